//! Field Service Business Assistant
//!
//! A conversational assistant for trades businesses. It answers questions
//! about a point-in-time snapshot of the business's data and performs a small
//! set of mutations through function calls issued by a language model.
//!
//! # Architecture
//!
//! - **Context**: immutable business snapshot behind a pointer swap, plus the
//!   bounded text digest that goes into the system instruction
//! - **Tools**: declared, schema-validated operations dispatched against the
//!   snapshot and the business backend
//! - **Session**: the model session bound to one snapshot version, and the
//!   caller-visible conversation transcript
//! - **Assistant**: the turn loop driving the model through tool rounds
//! - **Server**: Axum HTTP API over the assistant
//!
//! # Modules
//!
//! - [`assistant`]: turn loop and its state machine
//! - [`context`]: snapshot model, store and summarizer
//! - [`llm`]: model channel traits and the Chat Completions driver
//! - [`tools`]: tool declarations, handlers and the domain service boundary
//! - [`session`]: model sessions and conversations

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cargo_common_metadata)]
#![allow(clippy::multiple_crate_versions)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod assistant;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod rate_limit;
pub mod retrieval;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod tools;

use std::sync::Arc;

use crate::assistant::Assistant;
use crate::config::AppConfig;
use crate::session::ConversationStore;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The assistant every conversation talks to.
    pub assistant: Arc<Assistant>,
    /// Caller-visible conversations keyed by id.
    pub conversations: ConversationStore,
    /// Global configuration.
    pub config: Arc<AppConfig>,
}
