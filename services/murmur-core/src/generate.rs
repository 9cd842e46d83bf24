//! Quota-aware routing across generative model tiers.
//!
//! Tiers are consulted in priority order. A tier is skipped up front when
//! its quota windows are exhausted, and abandoned mid-call when the
//! provider answers with a failover-worthy error (quota, rate limit,
//! missing model). Usage is recorded only for the tier that actually
//! served the call.

use crate::ratelimit::RateLimiter;
use crate::traits::Generator;
use murmur_common::{Error, Result};
use std::sync::Arc;
use tracing::{debug, warn};

/// Routes generation calls across an ordered list of model tiers.
pub struct TierRouter {
    generator: Arc<dyn Generator>,
    limiter: Arc<RateLimiter>,
    /// Tier names in priority order; each must be registered on `limiter`.
    tiers: Vec<String>,
}

impl TierRouter {
    pub fn new(
        generator: Arc<dyn Generator>,
        limiter: Arc<RateLimiter>,
        tiers: Vec<String>,
    ) -> Self {
        Self {
            generator,
            limiter,
            tiers,
        }
    }

    /// Generate a completion for `prompt` on the best available tier.
    ///
    /// Fails with the last provider error once every tier is exhausted, or
    /// with `Error::QuotaExhausted` when no tier was even attempted.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let mut last_err: Option<Error> = None;

        for tier in &self.tiers {
            if !self.limiter.try_consume(tier) {
                debug!(tier = %tier, "Tier quota exhausted, trying next");
                continue;
            }

            match self.generator.generate(tier, prompt).await {
                Ok(text) => {
                    self.limiter.record_usage(tier);
                    debug!(tier = %tier, "Generation served");
                    return Ok(text);
                }
                Err(err) if err.should_failover() => {
                    warn!(tier = %tier, error = %err, "Tier failed over");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err
            .unwrap_or_else(|| Error::QuotaExhausted("all model tiers exhausted".to_string())))
    }
}

// ============================================================================
// Tests
// ============================================================================
