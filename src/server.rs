use axum::{
    Json, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tracing::{Instrument, debug, error, info, warn};

use crate::AppState;
use crate::assistant::{Assistant, ChatResponse};
use crate::config::AppConfig;
use crate::context::BusinessSnapshot;
use crate::error::AssistantError;
use crate::session::{ConversationMessage, ConversationStore, transcript::DEFAULT_IDLE_TIMEOUT};

const CONVERSATION_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Start the Axum server with the provided configuration.
pub async fn start_server(config: Arc<AppConfig>, assistant: Arc<Assistant>) -> anyhow::Result<()> {
    let state = AppState {
        assistant,
        conversations: ConversationStore::new(),
        config: Arc::clone(&config),
    };

    spawn_conversation_sweeper(state.conversations.clone());

    let app = build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        timeout_disabled = config.server.timeout_disabled,
        "Server started"
    );

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

/// Assemble the routes and middleware around `state`.
pub fn build_router(state: AppState) -> Router {
    let app = Router::new()
        .route("/health", get(health))
        .route("/api/chat", post(api_chat))
        .route("/api/context/refresh", post(api_refresh_context))
        .route("/api/context/summary", get(api_context_summary))
        .route("/api/conversations/{id}/messages", get(api_get_messages))
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024)); // 10MB limit

    let app = if state.config.server.timeout_disabled {
        app
    } else {
        let timeout_duration = Duration::from_secs(state.config.server.request_timeout_secs.max(1));
        app.layer(axum::middleware::from_fn(
            move |req: Request, next: Next| async move {
                match tokio::time::timeout(timeout_duration, next.run(req)).await {
                    Ok(res) => res,
                    Err(_) => (StatusCode::REQUEST_TIMEOUT, "Request timed out").into_response(),
                }
            },
        ))
    };

    app.layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn spawn_conversation_sweeper(conversations: ConversationStore) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CONVERSATION_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = conversations.cleanup_idle(DEFAULT_IDLE_TIMEOUT);
            if removed > 0 {
                debug!(removed, remaining = conversations.len(), "Dropped idle conversations");
            }
        }
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure of an API call, rendered as `{error, message}` JSON.
#[derive(Debug)]
enum ApiError {
    Assistant(AssistantError),
    BadRequest(String),
    NotFound(String),
    Backend(anyhow::Error),
    Internal(String),
}

impl From<AssistantError> for ApiError {
    fn from(e: AssistantError) -> Self {
        Self::Assistant(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Assistant(e) => {
                let status = match &e {
                    AssistantError::NotInitialized => StatusCode::CONFLICT,
                    AssistantError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                    AssistantError::Channel(_)
                    | AssistantError::Timeout { .. }
                    | AssistantError::ToolRoundLimit { .. } => StatusCode::BAD_GATEWAY,
                };
                let mut body = json!({
                    "error": e.code(),
                    "message": e.user_message(),
                });
                let retry_after = e.retry_after_secs();
                if let Some(secs) = retry_after {
                    body["retry_after_secs"] = json!(secs);
                }
                let mut response = (status, Json(body)).into_response();
                if let Some(secs) = retry_after {
                    response
                        .headers_mut()
                        .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                }
                response
            }
            Self::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "bad_request", "message": message })),
            )
                .into_response(),
            Self::NotFound(message) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "not_found", "message": message })),
            )
                .into_response(),
            Self::Backend(e) => {
                warn!(error = %format!("{e:#}"), "Business backend request failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({
                        "error": "backend_failure",
                        "message": "Could not load business data from the backend.",
                    })),
                )
                    .into_response()
            }
            Self::Internal(message) => {
                error!(error = %message, "Request handler failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": "internal_error",
                        "message": "Something went wrong while handling the request.",
                    })),
                )
                    .into_response()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

/// Request body for chat API.
#[derive(Debug, Deserialize)]
struct ChatRequest {
    /// User message content.
    message: String,
    /// Optional conversation ID (creates new if not provided).
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Response from chat API.
#[derive(Debug, Serialize)]
struct ChatReply {
    conversation_id: String,
    #[serde(flatten)]
    turn: ChatResponse,
}

/// POST /api/chat - Run one turn and return the answer.
async fn api_chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message cannot be empty".to_string()));
    }

    let (conversation_id, conversation) = match req.conversation_id.as_deref() {
        Some(id) if !id.trim().is_empty() => (id.to_string(), state.conversations.get_or_create(id)),
        _ => state.conversations.create(),
    };

    debug!(
        conversation_id = %conversation_id,
        message_chars = req.message.len(),
        "Received chat request"
    );

    // Detached from the request future: a timed-out or abandoned request
    // must not stop the turn between a backend mutation and its patch.
    let assistant = Arc::clone(&state.assistant);
    let message = req.message;
    let turn = tokio::spawn(async move {
        let mut conversation = conversation.lock().await;
        assistant.chat(&message, &mut conversation).await
    }
    .in_current_span())
    .await
    .map_err(|e| ApiError::Internal(format!("chat turn aborted: {e}")))??;

    Ok(Json(ChatReply {
        conversation_id,
        turn,
    }))
}

/// Response from the refresh API.
#[derive(Debug, Serialize)]
struct RefreshReply {
    version: u64,
    revision: u64,
    summary: String,
}

/// POST /api/context/refresh - Reload the business snapshot.
///
/// A JSON snapshot in the body is installed as-is; an empty body refetches
/// from the business backend.
async fn api_refresh_context(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<RefreshReply>, ApiError> {
    let assistant = &state.assistant;
    let installed = if body.iter().all(u8::is_ascii_whitespace) {
        assistant
            .refresh_from_domain()
            .await
            .map_err(ApiError::Backend)?
    } else {
        let snapshot: BusinessSnapshot = serde_json::from_slice(&body)
            .map_err(|e| ApiError::BadRequest(format!("invalid snapshot: {e}")))?;
        if assistant.is_initialized() {
            assistant.refresh(snapshot).await
        } else {
            assistant.initialize(snapshot).await
        }
    };

    Ok(Json(RefreshReply {
        version: installed.version,
        revision: installed.revision,
        summary: assistant.summary(),
    }))
}

/// Digest of the installed snapshot.
#[derive(Debug, Serialize)]
struct SummaryReply {
    initialized: bool,
    version: Option<u64>,
    summary: String,
}

/// GET /api/context/summary - Describe what the assistant currently knows.
async fn api_context_summary(State(state): State<AppState>) -> Json<SummaryReply> {
    let snapshot = state.assistant.snapshot().ok();
    Json(SummaryReply {
        initialized: snapshot.is_some(),
        version: snapshot.as_ref().map(|s| s.version),
        summary: state.assistant.summary(),
    })
}

/// GET /api/conversations/{id}/messages - Get conversation messages.
async fn api_get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ConversationMessage>>, ApiError> {
    let conversation = state
        .conversations
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("conversation '{id}' not found")))?;
    let messages = conversation.lock().await.messages().to_vec();
    Ok(Json(messages))
}
