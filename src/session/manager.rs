//! Model session lifecycle.
//!
//! A [`Session`] pairs an open model channel with the instruction it was
//! opened with. The [`SessionManager`] keeps at most one and rebuilds it
//! whenever the snapshot is replaced.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use super::instruction::{InstructionParts, build_instruction};
use crate::context::{BusinessSnapshot, ContextStore};
use crate::error::AssistantError;
use crate::llm::{ModelChannel, ModelConnector, SessionInstruction};
use crate::tools::ToolRegistry;

/// An open model exchange and the instruction it was opened with.
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    instruction: String,
    snapshot_version: u64,
    created_at: DateTime<Utc>,
    channel: Arc<dyn ModelChannel>,
}

impl Session {
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Version of the snapshot the instruction was built from.
    #[must_use]
    pub fn snapshot_version(&self) -> u64 {
        self.snapshot_version
    }

    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    #[must_use]
    pub fn channel(&self) -> &Arc<dyn ModelChannel> {
        &self.channel
    }
}

/// Owns the current [`Session`].
///
/// All snapshot replacements go through [`SessionManager::rebuild_after`],
/// which holds the session slot while the store is swapped and the session
/// rebuilt. [`SessionManager::capture`] takes the same lock, so a turn
/// always sees a session and snapshot that belong together.
#[derive(Debug)]
pub struct SessionManager {
    store: Arc<ContextStore>,
    registry: Arc<ToolRegistry>,
    connector: Arc<dyn ModelConnector>,
    knowledge: String,
    slot: Mutex<Option<Arc<Session>>>,
}

impl SessionManager {
    #[must_use]
    pub fn new(
        store: Arc<ContextStore>,
        registry: Arc<ToolRegistry>,
        connector: Arc<dyn ModelConnector>,
        knowledge: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            connector,
            knowledge: knowledge.into(),
            slot: Mutex::new(None),
        }
    }

    /// The current session, building one if none exists.
    pub async fn ensure_session(&self) -> Result<Arc<Session>, AssistantError> {
        self.capture().await.map(|(session, _)| session)
    }

    /// The current session together with the current snapshot.
    pub async fn capture(&self) -> Result<(Arc<Session>, Arc<BusinessSnapshot>), AssistantError> {
        let mut slot = self.slot.lock().await;
        let snapshot = self
            .store
            .current()
            .map_err(|_| AssistantError::NotInitialized)?;
        if let Some(session) = slot.as_ref() {
            return Ok((Arc::clone(session), snapshot));
        }

        let session = self.open(&snapshot).await?;
        *slot = Some(Arc::clone(&session));
        Ok((session, snapshot))
    }

    /// Discard the current session and open a new one.
    pub async fn rebuild(&self) -> Result<Arc<Session>, AssistantError> {
        self.rebuild_after(|| ()).await.1
    }

    /// Run `install` and rebuild the session without letting a turn start
    /// in between.
    ///
    /// When the rebuild fails the slot is left empty, so the next turn tries
    /// again.
    pub async fn rebuild_after<T>(
        &self,
        install: impl FnOnce() -> T,
    ) -> (T, Result<Arc<Session>, AssistantError>) {
        let mut slot = self.slot.lock().await;
        let installed = install();
        *slot = None;

        let rebuilt = match self.store.current() {
            Ok(snapshot) => self.open(&snapshot).await,
            Err(_) => Err(AssistantError::NotInitialized),
        };
        match &rebuilt {
            Ok(session) => *slot = Some(Arc::clone(session)),
            Err(e) => warn!(error = %e, "Session rebuild failed; will retry on next turn"),
        }
        (installed, rebuilt)
    }

    /// Drop the current session. The next turn opens a new one.
    pub async fn invalidate(&self) {
        if let Some(session) = self.slot.lock().await.take() {
            info!(session_id = %session.id, "Session invalidated");
        }
    }

    /// The current session, if one is open.
    pub async fn current(&self) -> Option<Arc<Session>> {
        self.slot.lock().await.clone()
    }

    async fn open(&self, snapshot: &BusinessSnapshot) -> Result<Arc<Session>, AssistantError> {
        let declarations = self.registry.declarations();
        let summary = self.store.summarize_snapshot(snapshot);
        let instruction = build_instruction(InstructionParts {
            company_name: &snapshot.company.name,
            summary: &summary,
            knowledge: &self.knowledge,
            tools: &declarations,
        });

        let channel = self
            .connector
            .open(SessionInstruction {
                system_instruction: instruction.clone(),
                tools: self.registry.openai_tools_json(),
            })
            .await
            .map_err(AssistantError::Channel)?;

        let session = Arc::new(Session {
            id: Uuid::new_v4(),
            instruction,
            snapshot_version: snapshot.version,
            created_at: Utc::now(),
            channel,
        });
        info!(
            name: "session.rebuilt",
            session_id = %session.id,
            snapshot_version = session.snapshot_version,
            tools = declarations.len(),
            instruction_chars = session.instruction.len(),
            "Model session opened"
        );
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChannelInput, ModelReply};
    use crate::tools::InMemoryDomainService;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct EchoChannel;

    #[async_trait::async_trait]
    impl ModelChannel for EchoChannel {
        async fn send(&self, _input: ChannelInput) -> anyhow::Result<ModelReply> {
            Ok(ModelReply::text("ok"))
        }
    }

    #[derive(Debug, Default)]
    struct CountingConnector {
        opened: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl ModelConnector for CountingConnector {
        async fn open(
            &self,
            _instruction: SessionInstruction,
        ) -> anyhow::Result<Arc<dyn ModelChannel>> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                anyhow::bail!("model endpoint unreachable");
            }
            Ok(Arc::new(EchoChannel))
        }
    }

    fn manager(connector: Arc<CountingConnector>) -> (Arc<ContextStore>, SessionManager) {
        let store = Arc::new(ContextStore::default());
        let registry = Arc::new(ToolRegistry::new(Arc::new(InMemoryDomainService::default())));
        let manager = SessionManager::new(Arc::clone(&store), registry, connector, "knowledge");
        (store, manager)
    }

    #[tokio::test]
    async fn ensure_session_requires_snapshot() {
        let (_, manager) = manager(Arc::new(CountingConnector::default()));
        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, AssistantError::NotInitialized));
    }

    #[tokio::test]
    async fn session_is_reused_until_rebuilt() {
        let connector = Arc::new(CountingConnector::default());
        let (store, manager) = manager(Arc::clone(&connector));
        store.initialize(BusinessSnapshot::default());

        let first = manager.ensure_session().await.unwrap();
        let again = manager.ensure_session().await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 1);
        assert!(first.instruction().contains("## Available tools"));

        let (version, rebuilt) = manager
            .rebuild_after(|| store.refresh(BusinessSnapshot::default()).version)
            .await;
        let rebuilt = rebuilt.unwrap();
        assert_eq!(rebuilt.snapshot_version(), version);
        assert_ne!(rebuilt.id(), first.id());
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rebuild_picks_up_patched_snapshot() {
        use crate::context::{Job, JobStatus, SnapshotPatch};

        let job = |status| Job {
            id: "J1".to_string(),
            client_id: "C1".to_string(),
            title: "Boiler service".to_string(),
            status,
            scheduled_date: None,
            assigned_employee_ids: Vec::new(),
            quote_id: None,
        };
        let connector = Arc::new(CountingConnector::default());
        let (store, manager) = manager(Arc::clone(&connector));
        let mut snapshot = BusinessSnapshot::default();
        snapshot.jobs.push(job(JobStatus::Pending));
        let installed = store.initialize(snapshot);

        let first = manager.ensure_session().await.unwrap();
        assert!(first.instruction().contains("J1: Boiler service [Pending]"));

        store
            .apply_patch(&SnapshotPatch::ReplaceJob(job(JobStatus::Completed)))
            .unwrap();
        let rebuilt = manager.rebuild().await.unwrap();

        assert_ne!(rebuilt.id(), first.id());
        assert_eq!(rebuilt.snapshot_version(), installed.version);
        assert!(rebuilt.instruction().contains("J1: Boiler service [Completed]"));
        assert!(!rebuilt.instruction().contains("[Pending]"));
        assert!(Arc::ptr_eq(&manager.current().await.unwrap(), &rebuilt));
        assert_eq!(connector.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_lazy_rebuild() {
        let connector = Arc::new(CountingConnector::default());
        let (store, manager) = manager(Arc::clone(&connector));
        store.initialize(BusinessSnapshot::default());

        let first = manager.ensure_session().await.unwrap();
        manager.invalidate().await;
        assert!(manager.current().await.is_none());

        let second = manager.ensure_session().await.unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn open_failure_is_channel_error() {
        let connector = Arc::new(CountingConnector {
            opened: AtomicUsize::new(0),
            fail: true,
        });
        let (store, manager) = manager(connector);
        store.initialize(BusinessSnapshot::default());

        let (_, rebuilt) = manager.rebuild_after(|| ()).await;
        assert!(matches!(rebuilt, Err(AssistantError::Channel(_))));
        assert!(manager.current().await.is_none());
    }
}
