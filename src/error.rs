//! Error taxonomy for the assistant.
//!
//! Only [`AssistantError`] ever escapes a turn. Tool failures and retrieval
//! failures are folded back into the conversation where they happen.

use std::time::Duration;

use thiserror::Error;

/// Errors raised by the context store.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The store was read before a snapshot was installed.
    #[error("business context has not been initialized")]
    NotInitialized,
    /// A narrow patch referenced an entity the current snapshot does not hold.
    #[error("{kind} '{id}' is not present in the current snapshot")]
    EntityNotFound {
        /// Entity kind, e.g. `job`.
        kind: &'static str,
        /// Entity identifier.
        id: String,
    },
}

/// Terminal errors for a single conversation turn.
#[derive(Debug, Error)]
pub enum AssistantError {
    /// Chat was attempted before `initialize`.
    #[error("business context has not been initialized")]
    NotInitialized,

    /// The request budget is exhausted; the model was not contacted.
    #[error("rate limit exceeded, retry after {retry_after:?}")]
    RateLimited {
        /// Time until the next request will be admitted.
        retry_after: Duration,
    },

    /// The model channel (or the network under it) failed.
    #[error("model channel failed: {0}")]
    Channel(#[source] anyhow::Error),

    /// The model channel did not answer in time.
    #[error("model channel timed out after {after:?}")]
    Timeout {
        /// The configured channel timeout.
        after: Duration,
    },

    /// The model kept asking for tools past the configured round limit.
    #[error("model requested tools for more than {rounds} rounds (pending: {pending:?})")]
    ToolRoundLimit {
        /// Number of tool rounds that were executed.
        rounds: usize,
        /// Names of the tool calls left unanswered when the turn stopped.
        pending: Vec<String>,
    },
}

impl AssistantError {
    /// Stable machine-readable code for API responses and logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized => "not_initialized",
            Self::RateLimited { .. } => "rate_limited",
            Self::Channel(_) => "channel_failure",
            Self::Timeout { .. } => "channel_timeout",
            Self::ToolRoundLimit { .. } => "tool_round_limit",
        }
    }

    /// Text suitable for showing to the person chatting.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NotInitialized => {
                "I don't have your business data loaded yet. Please try again in a moment."
                    .to_string()
            }
            Self::RateLimited { retry_after } => format!(
                "You're sending messages too quickly. Please wait {} seconds and try again.",
                retry_after_secs(*retry_after)
            ),
            Self::Channel(_) | Self::Timeout { .. } => {
                "Sorry, I ran into a problem reaching the assistant service. Please try again."
                    .to_string()
            }
            Self::ToolRoundLimit { .. } => {
                "Sorry, I couldn't finish that request. Try breaking it into smaller steps."
                    .to_string()
            }
        }
    }

    /// Whole seconds a client should wait before retrying, if throttled.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after } => Some(retry_after_secs(*retry_after)),
            _ => None,
        }
    }
}

/// Rounds up so a client never retries a fraction of a second too early.
fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs();
    let secs = if retry_after.subsec_nanos() > 0 { secs + 1 } else { secs };
    secs.max(1)
}
