//! Scripted model and backend doubles shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use chrono::NaiveDate;
use serde_json::Value;
use tokio::sync::Notify;

use fieldservice_assistant::context::{
    BusinessSnapshot, Client, Invoice, InvoiceStatus, Job, JobStatus,
};
use fieldservice_assistant::llm::{
    ChannelInput, ModelChannel, ModelConnector, ModelReply, SessionInstruction,
};
use fieldservice_assistant::tools::{DomainService, ToolCall};

/// Two clients, two jobs and two invoices.
pub fn sample_snapshot() -> BusinessSnapshot {
    let mut snapshot = BusinessSnapshot::default();
    snapshot.company.name = "Northside Plumbing".to_string();
    snapshot.clients = vec![
        Client {
            id: "C1".to_string(),
            name: "Acme Dental".to_string(),
            email: Some("office@acme.example".to_string()),
            phone: None,
            address: None,
        },
        Client {
            id: "C2".to_string(),
            name: "Rivera Residence".to_string(),
            email: None,
            phone: Some("555-0100".to_string()),
            address: None,
        },
    ];
    snapshot.jobs = vec![
        Job {
            id: "J1".to_string(),
            client_id: "C1".to_string(),
            title: "Water heater install".to_string(),
            status: JobStatus::Pending,
            scheduled_date: None,
            assigned_employee_ids: Vec::new(),
            quote_id: None,
        },
        Job {
            id: "J2".to_string(),
            client_id: "C2".to_string(),
            title: "Drain cleaning".to_string(),
            status: JobStatus::Scheduled,
            scheduled_date: NaiveDate::from_ymd_opt(2025, 6, 2),
            assigned_employee_ids: vec!["E1".to_string()],
            quote_id: None,
        },
    ];
    snapshot.invoices = vec![
        Invoice {
            id: "I1".to_string(),
            client_id: "C1".to_string(),
            job_id: Some("J1".to_string()),
            amount: 1200.0,
            amount_paid: 200.0,
            status: InvoiceStatus::Sent,
            due_date: None,
        },
        Invoice {
            id: "I2".to_string(),
            client_id: "C2".to_string(),
            job_id: Some("J2".to_string()),
            amount: 300.0,
            amount_paid: 300.0,
            status: InvoiceStatus::Paid,
            due_date: None,
        },
    ];
    snapshot
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ToolCall {
    ToolCall::new(id, name, arguments)
}

pub fn tool_reply(calls: Vec<ToolCall>) -> ModelReply {
    ModelReply {
        tool_calls: calls,
        ..ModelReply::default()
    }
}

/// Replies and recordings shared by every channel a [`ScriptedConnector`]
/// opens.
#[derive(Debug, Default)]
pub struct Script {
    replies: Mutex<VecDeque<ModelReply>>,
    inputs: Mutex<Vec<ChannelInput>>,
    instructions: Mutex<Vec<SessionInstruction>>,
    sends: AtomicUsize,
    fail: AtomicBool,
    fallback: Mutex<Option<ModelReply>>,
    hold_next_user: AtomicBool,
    /// Signalled when a held user message reaches the channel.
    pub entered: Notify,
    /// Lets a held user message through.
    pub release: Notify,
}

impl Script {
    pub fn push_reply(&self, reply: ModelReply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    /// Answer every user message and follow-up with `reply`.
    pub fn always(&self, reply: ModelReply) {
        *self.fallback.lock().unwrap() = Some(reply);
    }

    pub fn fail_sends(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Block the next user message until [`Script::release`] is notified.
    pub fn hold_next_user(&self) {
        self.hold_next_user.store(true, Ordering::SeqCst);
    }

    pub fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<ChannelInput> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn instructions(&self) -> Vec<SessionInstruction> {
        self.instructions.lock().unwrap().clone()
    }

    fn next_reply(&self) -> ModelReply {
        if let Some(reply) = self.replies.lock().unwrap().pop_front() {
            return reply;
        }
        self.fallback
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| ModelReply::text("ok"))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedConnector {
    pub script: Arc<Script>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ModelConnector for ScriptedConnector {
    async fn open(&self, instruction: SessionInstruction) -> anyhow::Result<Arc<dyn ModelChannel>> {
        self.script.instructions.lock().unwrap().push(instruction);
        Ok(Arc::new(ScriptedChannel {
            script: Arc::clone(&self.script),
        }))
    }
}

#[derive(Debug)]
struct ScriptedChannel {
    script: Arc<Script>,
}

#[async_trait::async_trait]
impl ModelChannel for ScriptedChannel {
    async fn send(&self, input: ChannelInput) -> anyhow::Result<ModelReply> {
        self.script.sends.fetch_add(1, Ordering::SeqCst);
        self.script.inputs.lock().unwrap().push(input.clone());

        if self.script.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("connection reset by peer"));
        }

        match input {
            ChannelInput::ToolResponse { .. } => Ok(ModelReply::default()),
            ChannelInput::User { .. } => {
                if self.script.hold_next_user.swap(false, Ordering::SeqCst) {
                    self.script.entered.notify_one();
                    self.script.release.notified().await;
                }
                Ok(self.script.next_reply())
            }
            ChannelInput::Continue => Ok(self.script.next_reply()),
        }
    }
}

/// Backend whose mutations always fail.
#[derive(Debug)]
pub struct FailingDomain {
    pub snapshot: BusinessSnapshot,
}

#[async_trait::async_trait]
impl DomainService for FailingDomain {
    async fn fetch_snapshot(&self) -> anyhow::Result<BusinessSnapshot> {
        Ok(self.snapshot.clone())
    }

    async fn update_job_status(&self, job_id: &str, _status: JobStatus) -> anyhow::Result<Job> {
        Err(anyhow!("backend rejected update of {job_id}"))
    }

    async fn schedule_job(
        &self,
        job_id: &str,
        _date: NaiveDate,
        _employee_ids: Option<&[String]>,
    ) -> anyhow::Result<Job> {
        Err(anyhow!("backend rejected scheduling of {job_id}"))
    }

    async fn update_invoice_status(
        &self,
        invoice_id: &str,
        _status: InvoiceStatus,
    ) -> anyhow::Result<Invoice> {
        Err(anyhow!("backend rejected update of {invoice_id}"))
    }
}

/// Backend whose mutations panic.
#[derive(Debug)]
pub struct PanickingDomain;

#[async_trait::async_trait]
impl DomainService for PanickingDomain {
    async fn fetch_snapshot(&self) -> anyhow::Result<BusinessSnapshot> {
        Ok(sample_snapshot())
    }

    async fn update_job_status(&self, _job_id: &str, _status: JobStatus) -> anyhow::Result<Job> {
        panic!("job table corrupted");
    }

    async fn schedule_job(
        &self,
        _job_id: &str,
        _date: NaiveDate,
        _employee_ids: Option<&[String]>,
    ) -> anyhow::Result<Job> {
        panic!("job table corrupted");
    }

    async fn update_invoice_status(
        &self,
        _invoice_id: &str,
        _status: InvoiceStatus,
    ) -> anyhow::Result<Invoice> {
        panic!("invoice table corrupted");
    }
}
