//! Model sessions and conversation transcripts.
//!
//! - [`SessionManager`]: owns the single model session and rebuilds it when
//!   the business snapshot changes
//! - [`instruction`]: system instruction layout and domain knowledge
//! - [`Conversation`] / [`ConversationStore`]: caller-visible, append-only
//!   message history kept in memory

pub mod instruction;
pub mod manager;
pub mod transcript;

pub use instruction::{DEFAULT_DOMAIN_KNOWLEDGE, build_instruction, load_knowledge};
pub use manager::{Session, SessionManager};
pub use transcript::{
    Conversation, ConversationMessage, ConversationStore, Role, SharedConversation,
};
