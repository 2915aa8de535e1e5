//! The conversation loop.
//!
//! One call to [`Assistant::chat`] is one turn:
//! 1. Take a slot from the request budget
//! 2. Capture the current session and snapshot
//! 3. Augment the message with retrieved context and send it
//! 4. Dispatch every requested tool call and answer it, then ask for the
//!    follow-up; repeat while the model keeps asking for tools
//! 5. Record the final answer

use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::state::{TurnMachine, TurnState};
use crate::config::AppConfig;
use crate::context::{BusinessSnapshot, ContextStore};
use crate::error::AssistantError;
use crate::llm::{ChannelInput, ModelConnector, ModelReply};
use crate::rate_limit::RequestLimiter;
use crate::retrieval::{HttpRetriever, RetrievalAugmenter};
use crate::session::{
    Conversation, DEFAULT_DOMAIN_KNOWLEDGE, Session, SessionManager, load_knowledge,
};
use crate::tools::{DomainService, ExecutedToolCall, ToolRegistry};

/// Default bound on tool rounds per turn.
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 5;

/// Default time allowed for one model round trip.
pub const DEFAULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(60);

/// Answer to one turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub response: String,
    /// Every tool call executed during the turn, or `None` when the model
    /// answered directly.
    pub tool_calls: Option<Vec<ExecutedToolCall>>,
    pub session_id: Uuid,
    /// Version of the snapshot the turn ran against.
    pub snapshot_version: u64,
    /// Whether retrieved context was added to the outgoing message.
    pub augmented: bool,
}

/// Configures an [`Assistant`].
#[derive(Debug)]
pub struct AssistantBuilder {
    connector: Arc<dyn ModelConnector>,
    domain: Arc<dyn DomainService>,
    limiter: RequestLimiter,
    augmenter: RetrievalAugmenter,
    knowledge: String,
    sample_size: usize,
    max_tool_rounds: usize,
    channel_timeout: Duration,
    tool_timeout: Option<Duration>,
    enabled_tools: Option<Vec<String>>,
}

impl AssistantBuilder {
    #[must_use]
    pub fn new(connector: Arc<dyn ModelConnector>, domain: Arc<dyn DomainService>) -> Self {
        Self {
            connector,
            domain,
            limiter: RequestLimiter::default(),
            augmenter: RetrievalAugmenter::disabled(),
            knowledge: DEFAULT_DOMAIN_KNOWLEDGE.to_string(),
            sample_size: crate::context::summary::DEFAULT_SAMPLE_SIZE,
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
            channel_timeout: DEFAULT_CHANNEL_TIMEOUT,
            tool_timeout: None,
            enabled_tools: None,
        }
    }

    /// Apply every assistant-related setting from `config`.
    pub fn from_config(
        config: &AppConfig,
        connector: Arc<dyn ModelConnector>,
        domain: Arc<dyn DomainService>,
    ) -> anyhow::Result<Self> {
        let augmenter = match config.retrieval.endpoint.as_deref() {
            Some(endpoint) if !endpoint.trim().is_empty() => RetrievalAugmenter::new(
                Arc::new(HttpRetriever::new(endpoint)?),
                config.retrieval_timeout(),
            ),
            _ => RetrievalAugmenter::disabled(),
        };
        let mut builder = Self::new(connector, domain)
            .limiter(RequestLimiter::from_config(&config.rate_limit))
            .augmenter(augmenter)
            .knowledge(load_knowledge(config.knowledge_path().as_deref())?)
            .sample_size(config.assistant.summary_sample_size)
            .max_tool_rounds(config.assistant.max_tool_rounds)
            .channel_timeout(config.llm_timeout())
            .tool_timeout(config.tool_timeout());
        if let Some(names) = &config.assistant.enabled_tools {
            builder = builder.enabled_tools(names.clone());
        }
        Ok(builder)
    }

    #[must_use]
    pub fn limiter(mut self, limiter: RequestLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    #[must_use]
    pub fn augmenter(mut self, augmenter: RetrievalAugmenter) -> Self {
        self.augmenter = augmenter;
        self
    }

    #[must_use]
    pub fn knowledge(mut self, knowledge: impl Into<String>) -> Self {
        self.knowledge = knowledge.into();
        self
    }

    #[must_use]
    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    #[must_use]
    pub fn max_tool_rounds(mut self, rounds: usize) -> Self {
        self.max_tool_rounds = rounds.max(1);
        self
    }

    #[must_use]
    pub fn channel_timeout(mut self, timeout: Duration) -> Self {
        self.channel_timeout = timeout;
        self
    }

    #[must_use]
    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn enabled_tools(mut self, names: Vec<String>) -> Self {
        self.enabled_tools = Some(names);
        self
    }

    #[must_use]
    pub fn build(self) -> Assistant {
        let store = Arc::new(ContextStore::new(self.sample_size));
        let mut registry = ToolRegistry::new(self.domain);
        if let Some(names) = &self.enabled_tools {
            registry = registry.with_enabled(names);
        }
        if let Some(timeout) = self.tool_timeout {
            registry = registry.with_timeout(timeout);
        }
        let registry = Arc::new(registry);
        let sessions = SessionManager::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            self.connector,
            self.knowledge,
        );

        Assistant {
            store,
            sessions,
            registry,
            limiter: self.limiter,
            augmenter: self.augmenter,
            turn_gate: Mutex::new(()),
            max_tool_rounds: self.max_tool_rounds,
            channel_timeout: self.channel_timeout,
            last_trace: std::sync::Mutex::new(Vec::new()),
        }
    }
}

/// The business assistant: context, session, tools and the turn loop.
#[derive(Debug)]
pub struct Assistant {
    store: Arc<ContextStore>,
    sessions: SessionManager,
    registry: Arc<ToolRegistry>,
    limiter: RequestLimiter,
    augmenter: RetrievalAugmenter,
    turn_gate: Mutex<()>,
    max_tool_rounds: usize,
    channel_timeout: Duration,
    last_trace: std::sync::Mutex<Vec<TurnState>>,
}

impl Assistant {
    #[must_use]
    pub fn builder(
        connector: Arc<dyn ModelConnector>,
        domain: Arc<dyn DomainService>,
    ) -> AssistantBuilder {
        AssistantBuilder::new(connector, domain)
    }

    /// Install the first snapshot and open a session for it.
    ///
    /// A session that fails to open is retried on the next turn; the
    /// snapshot stays installed either way.
    pub async fn initialize(&self, snapshot: BusinessSnapshot) -> Arc<BusinessSnapshot> {
        let (installed, session) = self
            .sessions
            .rebuild_after(|| self.store.initialize(snapshot))
            .await;
        info!(
            name: "assistant.initialized",
            snapshot_version = installed.version,
            session_ready = session.is_ok(),
            "Assistant initialized"
        );
        installed
    }

    /// Replace the snapshot and rebuild the session.
    ///
    /// Does not wait for an in-flight turn; that turn finishes with the
    /// session and snapshot it started with.
    pub async fn refresh(&self, snapshot: BusinessSnapshot) -> Arc<BusinessSnapshot> {
        let (installed, session) = self
            .sessions
            .rebuild_after(|| self.store.refresh(snapshot))
            .await;
        info!(
            name: "assistant.refreshed",
            snapshot_version = installed.version,
            session_ready = session.is_ok(),
            "Assistant context refreshed"
        );
        installed
    }

    /// Fetch a fresh snapshot from the domain service and install it.
    pub async fn refresh_from_domain(&self) -> anyhow::Result<Arc<BusinessSnapshot>> {
        let snapshot = self.registry.domain().fetch_snapshot().await?;
        Ok(if self.store.is_initialized() {
            self.refresh(snapshot).await
        } else {
            self.initialize(snapshot).await
        })
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.store.is_initialized()
    }

    pub fn snapshot(&self) -> Result<Arc<BusinessSnapshot>, AssistantError> {
        self.store
            .current()
            .map_err(|_| AssistantError::NotInitialized)
    }

    /// Digest of the current snapshot.
    #[must_use]
    pub fn summary(&self) -> String {
        self.store.summarize()
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// States the most recent turn went through.
    #[must_use]
    pub fn last_trace(&self) -> Vec<TurnState> {
        self.last_trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Id of the open model session, if any.
    pub async fn session_id(&self) -> Option<Uuid> {
        self.sessions.current().await.map(|s| s.id())
    }

    /// Drop the model session; the next turn opens a new one.
    pub async fn invalidate_session(&self) {
        self.sessions.invalidate().await;
    }

    /// Run one turn for `message`, appending to `conversation`.
    #[instrument(
        skip(self, message, conversation),
        fields(
            turn_id = %Uuid::new_v4(),
            conversation_id = %conversation.id(),
            session_id = tracing::field::Empty,
            snapshot_version = tracing::field::Empty
        )
    )]
    pub async fn chat(
        &self,
        message: &str,
        conversation: &mut Conversation,
    ) -> Result<ChatResponse, AssistantError> {
        let _turn = self.turn_gate.lock().await;
        let mut machine = TurnMachine::new();

        let result = self.run_turn(message, conversation, &mut machine).await;
        match &result {
            Ok(response) => info!(
                tool_calls = response.tool_calls.as_ref().map_or(0, Vec::len),
                augmented = response.augmented,
                "Turn completed"
            ),
            Err(AssistantError::RateLimited { retry_after }) => {
                warn!(retry_after_ms = retry_after.as_millis(), "Turn rejected by rate limiter");
            }
            Err(e) => error!(error = %e, code = e.code(), "Turn failed"),
        }
        machine.reset();
        *self
            .last_trace
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = machine.into_trace();
        result
    }

    async fn run_turn(
        &self,
        message: &str,
        conversation: &mut Conversation,
        machine: &mut TurnMachine,
    ) -> Result<ChatResponse, AssistantError> {
        self.limiter
            .check_and_consume()
            .map_err(|limited| AssistantError::RateLimited {
                retry_after: limited.retry_after,
            })?;

        let (session, snapshot) = self.sessions.capture().await?;
        let span = tracing::Span::current();
        span.record("session_id", tracing::field::display(session.id()));
        span.record("snapshot_version", snapshot.version);

        advance(machine, TurnState::Sending);
        let augmented = self.augmenter.augment(message).await;
        conversation.push_user(message);
        let mut reply = self
            .send(&session, ChannelInput::user(augmented.message))
            .await?;

        let mut working = Arc::clone(&snapshot);
        let mut executed = Vec::new();
        let mut round = 0;

        while reply.has_tool_calls() {
            if round == self.max_tool_rounds {
                return Err(AssistantError::ToolRoundLimit {
                    rounds: round,
                    pending: reply.tool_calls.iter().map(|c| c.name.clone()).collect(),
                });
            }
            round += 1;
            advance(machine, TurnState::AwaitingToolResults { round });
            debug!(round, tool_calls = reply.tool_calls.len(), "Dispatching tool round");

            for call in &reply.tool_calls {
                let outcome = self.registry.dispatch(call, &working).await;
                if let Some(patch) = &outcome.patch {
                    match patch.apply(&working) {
                        Ok(patched) => working = Arc::new(patched),
                        Err(e) => warn!(error = %e, "Could not patch turn snapshot"),
                    }
                    if let Err(e) = self.store.apply_patch(patch) {
                        warn!(error = %e, "Could not patch live snapshot");
                    }
                }

                conversation.push_tool(&call.name, outcome.result.to_content());
                self.send(
                    &session,
                    ChannelInput::ToolResponse {
                        call_id: call.id.clone(),
                        name: call.name.clone(),
                        result: outcome.result.clone(),
                    },
                )
                .await?;
                executed.push(ExecutedToolCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                    result: outcome.result,
                });
            }

            advance(machine, TurnState::Finalizing { round });
            reply = self.send(&session, ChannelInput::Continue).await?;
        }

        if let Some(thinking) = &reply.thinking {
            debug!(reasoning_chars = thinking.len(), "Model returned reasoning");
        }
        conversation.push_assistant(reply.text.clone(), reply.thinking);
        advance(machine, TurnState::Idle);

        Ok(ChatResponse {
            response: reply.text,
            tool_calls: (!executed.is_empty()).then_some(executed),
            session_id: session.id(),
            snapshot_version: snapshot.version,
            augmented: augmented.augmented,
        })
    }

    async fn send(
        &self,
        session: &Session,
        input: ChannelInput,
    ) -> Result<ModelReply, AssistantError> {
        let kind = input.kind();
        match tokio::time::timeout(self.channel_timeout, session.channel().send(input)).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(e)) => {
                error!(input = kind, error = %e, "Model channel failed");
                Err(AssistantError::Channel(e))
            }
            Err(_) => {
                error!(
                    input = kind,
                    timeout_secs = self.channel_timeout.as_secs(),
                    "Model channel timed out"
                );
                Err(AssistantError::Timeout {
                    after: self.channel_timeout,
                })
            }
        }
    }
}

fn advance(machine: &mut TurnMachine, next: TurnState) {
    if let Err(e) = machine.advance(next) {
        error!(error = %e, "Turn state machine out of step");
    }
}
