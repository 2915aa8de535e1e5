//! Boundary to the system of record.
//!
//! Mutating tools never edit the snapshot directly. They call a
//! [`DomainService`], which returns the updated entity, and the dispatcher
//! turns that entity into a [`SnapshotPatch`](crate::context::SnapshotPatch).

use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context as _, anyhow};
use chrono::NaiveDate;
use serde_json::json;
use tracing::debug;

use crate::context::{BusinessSnapshot, Invoice, InvoiceStatus, Job, JobStatus};

/// Operations the assistant may perform against the business backend.
#[async_trait::async_trait]
pub trait DomainService: Send + Sync + std::fmt::Debug {
    /// Fetch a complete, fresh snapshot.
    async fn fetch_snapshot(&self) -> anyhow::Result<BusinessSnapshot>;

    async fn update_job_status(&self, job_id: &str, status: JobStatus) -> anyhow::Result<Job>;

    /// Set the visit date and, when given, the assigned crew.
    async fn schedule_job(
        &self,
        job_id: &str,
        date: NaiveDate,
        employee_ids: Option<&[String]>,
    ) -> anyhow::Result<Job>;

    async fn update_invoice_status(
        &self,
        invoice_id: &str,
        status: InvoiceStatus,
    ) -> anyhow::Result<Invoice>;
}

/// [`DomainService`] backed by the business REST API.
#[derive(Clone)]
pub struct RestDomainService {
    http: reqwest::Client,
    base_url: url::Url,
    token: Option<String>,
}

impl std::fmt::Debug for RestDomainService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestDomainService")
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl RestDomainService {
    /// Build a client for `base_url`, authenticating with `token` when present.
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let mut base_url =
            url::Url::parse(base_url).with_context(|| format!("invalid backend url '{base_url}'"))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base_url,
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    fn endpoint(&self, path: &str) -> anyhow::Result<url::Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .with_context(|| format!("invalid backend path '{path}'"))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn patch_entity<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> anyhow::Result<T> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "PATCH backend entity");
        let response = self
            .authorize(self.http.patch(url).json(&body))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait::async_trait]
impl DomainService for RestDomainService {
    async fn fetch_snapshot(&self) -> anyhow::Result<BusinessSnapshot> {
        let url = self.endpoint("api/assistant/snapshot")?;
        debug!(url = %url, "Fetching business snapshot");
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await?
            .error_for_status()?;
        response
            .json::<BusinessSnapshot>()
            .await
            .context("backend returned a malformed snapshot")
    }

    async fn update_job_status(&self, job_id: &str, status: JobStatus) -> anyhow::Result<Job> {
        self.patch_entity(&format!("api/jobs/{job_id}"), json!({ "status": status }))
            .await
    }

    async fn schedule_job(
        &self,
        job_id: &str,
        date: NaiveDate,
        employee_ids: Option<&[String]>,
    ) -> anyhow::Result<Job> {
        let mut body = json!({ "scheduledDate": date });
        if let Some(ids) = employee_ids {
            body["assignedEmployeeIds"] = json!(ids);
        }
        self.patch_entity(&format!("api/jobs/{job_id}"), body).await
    }

    async fn update_invoice_status(
        &self,
        invoice_id: &str,
        status: InvoiceStatus,
    ) -> anyhow::Result<Invoice> {
        self.patch_entity(
            &format!("api/invoices/{invoice_id}"),
            json!({ "status": status }),
        )
        .await
    }
}

/// [`DomainService`] that keeps its own copy of the business data.
///
/// Used for offline runs and tests. Mutations edit the private copy and
/// return the updated entity the same way the REST backend would.
#[derive(Debug, Default)]
pub struct InMemoryDomainService {
    data: Mutex<BusinessSnapshot>,
}

impl InMemoryDomainService {
    #[must_use]
    pub fn from_snapshot(snapshot: BusinessSnapshot) -> Self {
        Self {
            data: Mutex::new(snapshot),
        }
    }

    /// Load seed data from a JSON snapshot file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read snapshot file {}", path.display()))?;
        let snapshot = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse snapshot file {}", path.display()))?;
        Ok(Self::from_snapshot(snapshot))
    }

    fn with_job(&self, job_id: &str, edit: impl FnOnce(&mut Job)) -> anyhow::Result<Job> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let job = data
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| anyhow!("job '{job_id}' not found"))?;
        edit(job);
        Ok(job.clone())
    }
}

#[async_trait::async_trait]
impl DomainService for InMemoryDomainService {
    async fn fetch_snapshot(&self) -> anyhow::Result<BusinessSnapshot> {
        let mut snapshot = self
            .data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        snapshot.captured_at = chrono::Utc::now();
        Ok(snapshot)
    }

    async fn update_job_status(&self, job_id: &str, status: JobStatus) -> anyhow::Result<Job> {
        self.with_job(job_id, |job| job.status = status)
    }

    async fn schedule_job(
        &self,
        job_id: &str,
        date: NaiveDate,
        employee_ids: Option<&[String]>,
    ) -> anyhow::Result<Job> {
        self.with_job(job_id, |job| {
            job.scheduled_date = Some(date);
            if let Some(ids) = employee_ids {
                job.assigned_employee_ids = ids.to_vec();
            }
            if job.status == JobStatus::Pending {
                job.status = JobStatus::Scheduled;
            }
        })
    }

    async fn update_invoice_status(
        &self,
        invoice_id: &str,
        status: InvoiceStatus,
    ) -> anyhow::Result<Invoice> {
        let mut data = self.data.lock().unwrap_or_else(PoisonError::into_inner);
        let invoice = data
            .invoices
            .iter_mut()
            .find(|i| i.id == invoice_id)
            .ok_or_else(|| anyhow!("invoice '{invoice_id}' not found"))?;
        invoice.status = status;
        if status == InvoiceStatus::Paid {
            invoice.amount_paid = invoice.amount;
        }
        Ok(invoice.clone())
    }
}
