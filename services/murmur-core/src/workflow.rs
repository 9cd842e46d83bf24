//! The approval-gated action workflow.
//!
//! One `run_action` call owns the full life of a unit of work: reserve the
//! action id, draft content, ask a human, honor the decision, and perform
//! the platform write behind the write-class throttle. The pending slot is
//! held for the entire span, including the wait for a decision, and is
//! released on every exit path.

use crate::approval::ApprovalBroker;
use crate::pending::PendingActionGuard;
use crate::ratelimit::RateLimiter;
use crate::traits::StateStore;
use crate::types::{ActionId, ConfirmationOutcome, ConfirmationRequest};
use chrono::Utc;
use murmur_common::Result;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which daily write budget an action draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteClass {
    Post,
    Comment,
}

/// Tunables for the workflow, sourced from agent configuration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub max_posts_per_day: u32,
    pub max_comments_per_day: u32,
    /// Regeneration rounds allowed before a draft is treated as rejected.
    pub max_regenerations: u32,
    pub decision_timeout: Duration,
}

/// Everything that identifies one action to the gate.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub id: ActionId,
    pub class: WriteClass,
    /// Spacing resource acquired before the platform write.
    pub write_resource: String,
    /// Platform the daily counters are keyed by.
    pub source: String,
    /// Post id to mark handled on an explicit rejection, for proactive
    /// actions that must not be re-proposed.
    pub handled_key: Option<String>,
}

/// Why an action ended without a platform write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyInFlight,
    DailyCapReached,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyInFlight => f.write_str("already in flight"),
            Self::DailyCapReached => f.write_str("daily cap reached"),
        }
    }
}

/// Terminal state of one `run_action` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Published,
    Rejected,
    Skipped(SkipReason),
}

/// Orchestrates draft, approval, and throttled write for one action at a
/// time per action id.
pub struct ActionWorkflow {
    guard: PendingActionGuard,
    limiter: Arc<RateLimiter>,
    broker: ApprovalBroker,
    store: Arc<dyn StateStore>,
    config: WorkflowConfig,
}

impl ActionWorkflow {
    pub fn new(
        guard: PendingActionGuard,
        limiter: Arc<RateLimiter>,
        broker: ApprovalBroker,
        store: Arc<dyn StateStore>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            guard,
            limiter,
            broker,
            store,
            config,
        }
    }

    /// Run one action end to end.
    ///
    /// `generate` is called with the attempt number (0 for the first draft)
    /// and returns the draft plus the confirmation request describing it.
    /// `publish` performs the platform write for the approved draft and is
    /// called at most once, after the write-class throttle is acquired.
    ///
    /// A decision timeout surfaces as `Error::DecisionTimeout` and leaves
    /// no handled marker, so the same action can be re-proposed by a later
    /// sweep.
    pub async fn run_action<T, G, GFut, P, PFut>(
        &self,
        spec: &ActionSpec,
        mut generate: G,
        publish: P,
    ) -> Result<ActionOutcome>
    where
        G: FnMut(u32) -> GFut,
        GFut: Future<Output = Result<(T, ConfirmationRequest)>>,
        P: FnOnce(T) -> PFut,
        PFut: Future<Output = Result<()>>,
    {
        if self.cap_reached(spec)? {
            debug!(action = %spec.id, "Daily cap reached, skipping");
            return Ok(ActionOutcome::Skipped(SkipReason::DailyCapReached));
        }

        // Held until this function returns, covering the decision wait.
        let Some(_slot) = self.guard.try_acquire(&spec.id) else {
            return Ok(ActionOutcome::Skipped(SkipReason::AlreadyInFlight));
        };

        let draft = {
            let mut attempt = 0u32;
            loop {
                // Another workflow may have consumed the budget while this
                // one waited on a human.
                if attempt > 0 && self.cap_reached(spec)? {
                    info!(action = %spec.id, "Daily cap reached during regeneration, skipping");
                    return Ok(ActionOutcome::Skipped(SkipReason::DailyCapReached));
                }

                let (draft, request) = generate(attempt).await?;
                let outcome = self
                    .broker
                    .request_decision(&request, self.config.decision_timeout)
                    .await?;

                match outcome {
                    ConfirmationOutcome::Approved => break draft,
                    ConfirmationOutcome::Regenerate if attempt < self.config.max_regenerations => {
                        info!(action = %spec.id, attempt, "Draft sent back for regeneration");
                        attempt += 1;
                    }
                    ConfirmationOutcome::Regenerate => {
                        warn!(
                            action = %spec.id,
                            limit = self.config.max_regenerations,
                            "Regeneration limit reached, treating as rejected"
                        );
                        self.mark_rejected(spec)?;
                        return Ok(ActionOutcome::Rejected);
                    }
                    ConfirmationOutcome::Rejected => {
                        info!(action = %spec.id, "Draft rejected");
                        self.mark_rejected(spec)?;
                        return Ok(ActionOutcome::Rejected);
                    }
                }
            }
        };

        self.limiter.acquire(&spec.write_resource).await?;
        publish(draft).await?;
        self.record_write(spec)?;
        info!(action = %spec.id, class = ?spec.class, "Action published");
        Ok(ActionOutcome::Published)
    }

    fn cap_reached(&self, spec: &ActionSpec) -> Result<bool> {
        let today = Utc::now().date_naive();
        let (used, cap) = match spec.class {
            WriteClass::Post => (
                self.store.post_count(&spec.source, today)?,
                self.config.max_posts_per_day,
            ),
            WriteClass::Comment => (
                self.store.comment_count(&spec.source, today)?,
                self.config.max_comments_per_day,
            ),
        };
        Ok(used >= cap)
    }

    fn record_write(&self, spec: &ActionSpec) -> Result<()> {
        match spec.class {
            WriteClass::Post => self.store.record_post(&spec.source, Utc::now()),
            WriteClass::Comment => self
                .store
                .record_comment(&spec.source, Utc::now().date_naive()),
        }
    }

    fn mark_rejected(&self, spec: &ActionSpec) -> Result<()> {
        if let Some(post_id) = &spec.handled_key {
            self.store.mark_handled(&spec.source, post_id)?;
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
