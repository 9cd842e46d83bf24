//! Domain types shared across the action-execution core.

use chrono::{DateTime, NaiveDate, Utc};
use std::fmt;

// ============================================================================
// Action Identity
// ============================================================================

/// Deterministic key identifying one logical unit of approvable work.
///
/// Derived from stable inputs so that re-derivation during a retry yields
/// the same key: the same reply opportunity always maps to the same id, no
/// matter which sweep discovers it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(String);

impl ActionId {
    /// Reply to activity on a post.
    pub fn reply(post_id: &str) -> Self {
        Self(format!("reply_{post_id}"))
    }

    /// Proactive comment on a post.
    pub fn proactive(post_id: &str) -> Self {
        Self(format!("proactive_{post_id}"))
    }

    /// Daily post for a given date and topic.
    pub fn daily_post(date: NaiveDate, topic: &str) -> Self {
        Self(format!("post_{date}_{topic}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// ============================================================================
// Confirmation Types
// ============================================================================

/// Message identity assigned by the decision channel when it accepts a
/// confirmation request. Inbound decisions are correlated by this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryId(String);

impl DeliveryId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A human-readable confirmation request. Immutable once sent.
#[derive(Debug, Clone)]
pub struct ConfirmationRequest {
    /// Caller-chosen correlation id, unified with the channel-assigned
    /// delivery id immediately after transmission.
    pub correlation_id: String,
    pub title: String,
    pub body: String,
}

impl ConfirmationRequest {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            correlation_id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            body: body.into(),
        }
    }
}

/// A human decision on a confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// Publish the draft as-is.
    Approved,
    /// Produce a new draft and ask again.
    Regenerate,
    /// Drop the draft; no write occurs.
    Rejected,
}

impl ConfirmationOutcome {
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// An inbound decision event from the external channel.
#[derive(Debug, Clone)]
pub struct DecisionEvent {
    pub delivery: DeliveryId,
    pub outcome: ConfirmationOutcome,
}

// ============================================================================
// Platform Domain Models
// ============================================================================

/// A post on the community platform.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: String,
    pub source: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub url: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// The kind of event behind a notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationKind {
    CommentOnPost,
    ReplyToComment,
    Other(String),
}

impl NotificationKind {
    /// Whether this notification represents a comment the agent may answer.
    pub fn is_reply_worthy(&self) -> bool {
        matches!(self, Self::CommentOnPost | Self::ReplyToComment)
    }
}

/// A platform notification the agent needs to be aware of.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: String,
    pub kind: NotificationKind,
    pub actor: String,
    pub post_id: String,
    pub post_title: String,
    /// Comment to reply to, when applicable.
    pub comment_id: String,
    /// Preview of the comment content.
    pub preview: String,
    pub read: bool,
}

/// Payload for creating a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    /// Sub-community to post into.
    pub channel: String,
}
