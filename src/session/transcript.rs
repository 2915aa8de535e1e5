//! Caller-visible conversation history and its in-memory store.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default idle timeout for stored conversations (30 minutes).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    /// Set on `tool` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// Model reasoning shown alongside an answer; never sent back to the model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            tool_name: None,
            thinking: None,
            created_at: Utc::now(),
        }
    }
}

/// Append-only message history for one conversation.
#[derive(Debug, Clone, Serialize)]
pub struct Conversation {
    id: String,
    messages: Vec<ConversationMessage>,
    #[serde(skip)]
    last_activity: DateTime<Utc>,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::with_id(Uuid::new_v4().to_string())
    }
}

impl Conversation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
            last_activity: Utc::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(ConversationMessage::new(Role::User, content.into()));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>, thinking: Option<String>) {
        let mut message = ConversationMessage::new(Role::Assistant, content.into());
        message.thinking = thinking;
        self.push(message);
    }

    pub fn push_tool(&mut self, tool_name: impl Into<String>, content: impl Into<String>) {
        let mut message = ConversationMessage::new(Role::Tool, content.into());
        message.tool_name = Some(tool_name.into());
        self.push(message);
    }

    fn push(&mut self, message: ConversationMessage) {
        self.last_activity = message.created_at;
        self.messages.push(message);
    }

    /// Whether the conversation has been idle longer than `timeout`.
    #[must_use]
    pub fn is_idle_for(&self, timeout: Duration) -> bool {
        (Utc::now() - self.last_activity)
            .to_std()
            .is_ok_and(|idle| idle > timeout)
    }
}

/// A conversation shared between requests. Holding the lock for a whole
/// turn keeps its messages in exchange order.
pub type SharedConversation = Arc<tokio::sync::Mutex<Conversation>>;

/// Thread-safe store of conversations keyed by id.
#[derive(Debug, Clone, Default)]
pub struct ConversationStore {
    inner: Arc<ConversationStoreInner>,
}

#[derive(Debug, Default)]
struct ConversationStoreInner {
    conversations: RwLock<HashMap<String, SharedConversation>>,
}

impl ConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a conversation with a fresh UUID.
    #[must_use]
    pub fn create(&self) -> (String, SharedConversation) {
        let conversation = Conversation::new();
        let id = conversation.id().to_string();
        let shared = Arc::new(tokio::sync::Mutex::new(conversation));
        self.write().insert(id.clone(), Arc::clone(&shared));
        (id, shared)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<SharedConversation> {
        self.read().get(id).cloned()
    }

    /// Look up `id`, creating an empty conversation under that id if needed.
    #[must_use]
    pub fn get_or_create(&self, id: &str) -> SharedConversation {
        if let Some(existing) = self.get(id) {
            return existing;
        }
        Arc::clone(
            self.write()
                .entry(id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(Conversation::with_id(id)))),
        )
    }

    pub fn remove(&self, id: &str) -> Option<SharedConversation> {
        self.write().remove(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop conversations idle for longer than `timeout`. Conversations in
    /// the middle of a turn are kept.
    pub fn cleanup_idle(&self, timeout: Duration) -> usize {
        let mut guard = self.write();
        let before = guard.len();
        guard.retain(|_, conversation| {
            conversation
                .try_lock()
                .map_or(true, |c| !c.is_idle_for(timeout))
        });
        before - guard.len()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, SharedConversation>> {
        self.inner
            .conversations
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, SharedConversation>> {
        self.inner
            .conversations
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
