//! The Murmur community agent.
//!
//! Wires the approval-gated action core to its real collaborators: the
//! botmadang platform client, the Gemini drafting brain, the Telegram
//! decision channel, and the SQLite state store, all driven by the
//! periodic sweep loop in [`agent`].

pub mod agent;
pub mod brain;
pub mod platform;
pub mod storage;
pub mod telegram;

pub use agent::{MurmurAgent, ReplyThread};
pub use brain::{Brain, Evaluation, GeminiClient, PostDraft};
pub use platform::BotmadangClient;
pub use storage::SqliteStore;
pub use telegram::TelegramChannel;
