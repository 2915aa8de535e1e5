//! Caller-facing assistant and its turn loop.

pub mod orchestrator;
pub mod state;

pub use orchestrator::{
    Assistant, AssistantBuilder, ChatResponse, DEFAULT_CHANNEL_TIMEOUT, DEFAULT_MAX_TOOL_ROUNDS,
};
pub use state::{InvalidTransition, TurnMachine, TurnState};
