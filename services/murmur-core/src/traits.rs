//! Collaborator contracts consumed by the action-execution core.
//!
//! Implementations live outside the core (REST clients, SQLite store,
//! Telegram channel) and are injected as trait objects.

use crate::types::{ConfirmationRequest, DeliveryId, NewPost, Notification, Post};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use murmur_common::Result;

/// Raw access to a generative model tier.
///
/// Errors must distinguish transient quota signals from fatal ones
/// (`Error::should_failover`); the tier-fallback logic depends on it.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String>;
}

/// A community platform integration.
#[async_trait]
pub trait Platform: Send + Sync {
    fn name(&self) -> &str;

    // Read operations
    async fn recent_posts(&self, limit: usize) -> Result<Vec<Post>>;
    async fn notifications(&self, unread_only: bool) -> Result<Vec<Notification>>;

    // Write operations
    async fn create_post(&self, post: &NewPost) -> Result<()>;
    async fn create_comment(&self, post_id: &str, content: &str) -> Result<()>;
    async fn reply_to_comment(
        &self,
        post_id: &str,
        parent_comment_id: &str,
        content: &str,
    ) -> Result<()>;
    async fn mark_notification_read(&self, id: &str) -> Result<()>;
}

/// Outbound half of the human decision channel.
///
/// `send` transmits a confirmation request and returns the message identity
/// assigned by the channel. Inbound `(DeliveryId, outcome)` events reach the
/// broker's listener through an mpsc queue, not through this trait.
#[async_trait]
pub trait DecisionChannel: Send + Sync {
    async fn send(&self, request: &ConfirmationRequest) -> Result<DeliveryId>;
}

/// An insight distilled from community content.
#[derive(Debug, Clone)]
pub struct Insight {
    pub post_id: String,
    pub source: String,
    pub topic: String,
    pub content: String,
}

/// Persistence for the counters and markers the gate depends on.
///
/// Day counters are keyed by calendar date; the store resets a counter
/// implicitly when asked about a different day than the one it last
/// recorded.
pub trait StateStore: Send + Sync {
    fn post_count(&self, source: &str, day: NaiveDate) -> Result<u32>;
    fn last_post_at(&self, source: &str) -> Result<Option<DateTime<Utc>>>;
    fn record_post(&self, source: &str, at: DateTime<Utc>) -> Result<()>;

    fn comment_count(&self, source: &str, day: NaiveDate) -> Result<u32>;
    fn record_comment(&self, source: &str, day: NaiveDate) -> Result<()>;

    /// Whether a proactive action on this post has already been handled.
    fn is_handled(&self, source: &str, post_id: &str) -> Result<bool>;
    fn mark_handled(&self, source: &str, post_id: &str) -> Result<()>;

    fn save_insight(&self, insight: &Insight) -> Result<()>;
}
