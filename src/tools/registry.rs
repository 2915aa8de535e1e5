//! Tool registration, declaration export and dispatch.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use thiserror::Error;
use tracing::{debug, warn};

use super::domain::DomainService;
use super::handlers;
use super::invocation::{ToolInvocation, ToolKind};
use super::{ToolCall, ToolDeclaration, ToolResult};
use crate::context::{BusinessSnapshot, SnapshotPatch};

/// Default per-call dispatch timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Why a tool call failed. Never leaves the dispatcher as an error; it is
/// rendered into the failed [`ToolResult`].
#[derive(Debug, Error)]
enum ToolError {
    #[error("Unknown function {0}")]
    UnknownFunction(String),
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: &'static str, reason: String },
    #[error("{tool} failed: {source:#}")]
    Handler {
        tool: &'static str,
        source: anyhow::Error,
    },
    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: &'static str, after: Duration },
    #[error("{tool} failed unexpectedly")]
    Panicked { tool: &'static str },
}

/// Result of dispatching one call.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub result: ToolResult,
    /// Present when a mutating tool succeeded.
    pub patch: Option<SnapshotPatch>,
}

impl DispatchOutcome {
    fn failed(error: &ToolError) -> Self {
        Self {
            result: ToolResult::failure(error.to_string()),
            patch: None,
        }
    }
}

/// The enabled tool set plus the domain service their handlers call.
#[derive(Clone)]
pub struct ToolRegistry {
    domain: Arc<dyn DomainService>,
    enabled: BTreeMap<&'static str, ToolKind>,
    timeout: Duration,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.enabled.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl ToolRegistry {
    /// Register the standard tool set.
    #[must_use]
    pub fn new(domain: Arc<dyn DomainService>) -> Self {
        Self {
            domain,
            enabled: ToolKind::ALL.iter().map(|k| (k.name(), *k)).collect(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Keep only the named tools. Unknown names are logged and ignored.
    #[must_use]
    pub fn with_enabled<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        let mut enabled = BTreeMap::new();
        for name in names {
            match ToolKind::from_name(name.as_ref()) {
                Some(kind) => {
                    enabled.insert(kind.name(), kind);
                }
                None => warn!(tool_name = name.as_ref(), "Ignoring unknown tool in allow-list"),
            }
        }
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn domain(&self) -> &Arc<dyn DomainService> {
        &self.domain
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.enabled.contains_key(name)
    }

    /// Declarations of the enabled tools, in the canonical tool order.
    #[must_use]
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        ToolKind::ALL
            .iter()
            .filter(|k| self.enabled.contains_key(k.name()))
            .map(|k| k.declaration())
            .collect()
    }

    /// Declarations in function-calling JSON.
    #[must_use]
    pub fn openai_tools_json(&self) -> Vec<serde_json::Value> {
        self.declarations()
            .iter()
            .map(ToolDeclaration::to_openai_json)
            .collect()
    }

    /// Run one call against `snapshot`. Always produces a result.
    pub async fn dispatch(&self, call: &ToolCall, snapshot: &BusinessSnapshot) -> DispatchOutcome {
        let started = Instant::now();
        let outcome = match self.try_dispatch(call, snapshot).await {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    tool_name = %call.name,
                    call_id = %call.id,
                    error = %error,
                    "Tool call failed"
                );
                DispatchOutcome::failed(&error)
            }
        };
        debug!(
            tool_name = %call.name,
            call_id = %call.id,
            success = outcome.result.success,
            patched = outcome.patch.is_some(),
            elapsed_ms = started.elapsed().as_millis(),
            "Tool call dispatched"
        );
        outcome
    }

    async fn try_dispatch(
        &self,
        call: &ToolCall,
        snapshot: &BusinessSnapshot,
    ) -> Result<DispatchOutcome, ToolError> {
        let kind = self
            .enabled
            .get(call.name.as_str())
            .copied()
            .ok_or_else(|| ToolError::UnknownFunction(call.name.clone()))?;
        let tool = kind.name();

        kind.schema()
            .validate(&call.arguments)
            .map_err(|violation| ToolError::InvalidArguments {
                tool,
                reason: violation.to_string(),
            })?;
        let invocation = ToolInvocation::parse(kind, call.arguments.clone()).map_err(|e| {
            ToolError::InvalidArguments {
                tool,
                reason: e.to_string(),
            }
        })?;

        let run = AssertUnwindSafe(handlers::execute(
            self.domain.as_ref(),
            invocation,
            snapshot,
        ))
        .catch_unwind();
        let handled = match tokio::time::timeout(self.timeout, run).await {
            Err(_) => {
                return Err(ToolError::Timeout {
                    tool,
                    after: self.timeout,
                });
            }
            Ok(Err(_panic)) => return Err(ToolError::Panicked { tool }),
            Ok(Ok(result)) => result.map_err(|source| ToolError::Handler { tool, source })?,
        };

        Ok(DispatchOutcome {
            result: ToolResult::ok(handled.payload),
            patch: handled.patch,
        })
    }
}
