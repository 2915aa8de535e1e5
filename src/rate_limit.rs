//! Per-process request budget for chat turns.
//!
//! A GCRA limiter from `governor` admits up to `requests_per_minute`
//! messages in a burst and refills one slot every `60s / requests_per_minute`.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::clock::{Clock, DefaultClock};
use governor::{DefaultDirectRateLimiter, Quota};
use nonzero_ext::nonzero;
use thiserror::Error;

use crate::config::RateLimitConfig;

/// Default budget.
pub const DEFAULT_REQUESTS_PER_MINUTE: NonZeroU32 = nonzero!(15u32);

/// The budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("rate limit exceeded, retry after {retry_after:?}")]
pub struct RateLimited {
    /// Earliest time from now at which a request will be admitted.
    pub retry_after: Duration,
}

/// Admission control in front of the model channel.
pub struct RequestLimiter {
    limiter: Option<DefaultDirectRateLimiter>,
    clock: DefaultClock,
}

impl std::fmt::Debug for RequestLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestLimiter")
            .field("enabled", &self.limiter.is_some())
            .finish_non_exhaustive()
    }
}

impl Default for RequestLimiter {
    fn default() -> Self {
        Self::per_minute(DEFAULT_REQUESTS_PER_MINUTE)
    }
}

impl RequestLimiter {
    #[must_use]
    pub fn per_minute(requests: NonZeroU32) -> Self {
        Self::with_quota(Quota::per_minute(requests))
    }

    #[must_use]
    pub fn with_quota(quota: Quota) -> Self {
        Self {
            limiter: Some(DefaultDirectRateLimiter::direct(quota)),
            clock: DefaultClock::default(),
        }
    }

    /// A limiter that admits everything.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            limiter: None,
            clock: DefaultClock::default(),
        }
    }

    /// Build from configuration. A zero budget falls back to the default.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        if !config.enabled {
            return Self::unlimited();
        }
        let budget = NonZeroU32::new(config.requests_per_minute).unwrap_or_else(|| {
            tracing::warn!(
                default = DEFAULT_REQUESTS_PER_MINUTE.get(),
                "rate_limit.requests_per_minute is 0, using default"
            );
            DEFAULT_REQUESTS_PER_MINUTE
        });
        Self::per_minute(budget)
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Take one slot, or report how long until one frees up.
    pub fn check_and_consume(&self) -> Result<(), RateLimited> {
        let Some(limiter) = &self.limiter else {
            return Ok(());
        };
        limiter.check().map_err(|not_until| RateLimited {
            retry_after: not_until.wait_time_from(self.clock.now()),
        })
    }
}
