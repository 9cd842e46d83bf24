//! Action-execution core for the murmur agent.
//!
//! Everything here is platform-agnostic: rate limiting, in-flight
//! deduplication, human approval brokering, model-tier routing, and the
//! workflow that strings them together. Concrete integrations (the
//! community platform, the model provider, the decision channel, the
//! store) are injected through the traits in [`traits`].

pub mod approval;
pub mod generate;
pub mod pending;
pub mod ratelimit;
pub mod traits;
pub mod types;
pub mod workflow;

pub use approval::ApprovalBroker;
pub use generate::TierRouter;
pub use pending::{PendingActionGuard, PendingSlot};
pub use ratelimit::{RateLimiter, ResourceLimits};
pub use traits::{DecisionChannel, Generator, Insight, Platform, StateStore};
pub use types::{
    ActionId, ConfirmationOutcome, ConfirmationRequest, DecisionEvent, DeliveryId, NewPost,
    Notification, NotificationKind, Post,
};
pub use workflow::{ActionOutcome, ActionSpec, ActionWorkflow, SkipReason, WorkflowConfig, WriteClass};
