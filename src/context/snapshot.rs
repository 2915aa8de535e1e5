//! Business snapshot and the domain entities it aggregates.
//!
//! Entities mirror the backend's camelCase JSON. Status fields are closed
//! enums that accept the loose spellings people (and models) actually type.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ContextError;

/// A status string that did not match any known variant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status '{value}'")]
pub struct UnknownStatus {
    /// Which status family was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// Lowercases, turns `-`/`_` into spaces and collapses runs of whitespace.
fn normalize_label(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

macro_rules! status_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $( $(#[$vmeta:meta])* $variant:ident => $label:literal $(| $alias:literal)* ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Every variant, in lifecycle order.
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Canonical display label.
            #[must_use]
            pub fn label(self) -> &'static str {
                match self {
                    $( $name::$variant => $label ),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                let key = normalize_label(raw);
                $(
                    if key == normalize_label($label) $(|| key == $alias)* {
                        return Ok($name::$variant);
                    }
                )+
                Err(UnknownStatus { kind: $kind, value: raw.to_string() })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.label())
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownStatus;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(status: $name) -> Self {
                status.label().to_string()
            }
        }
    };
}

status_enum! {
    /// Lifecycle of a job.
    JobStatus ("job") {
        Pending => "Pending" | "unscheduled" | "new" | "open",
        Scheduled => "Scheduled" | "booked",
        InProgress => "In Progress" | "inprogress" | "started" | "active",
        OnHold => "On Hold" | "onhold" | "paused",
        Completed => "Completed" | "complete" | "done" | "finished",
        Cancelled => "Cancelled" | "canceled",
    }
}

status_enum! {
    /// Lifecycle of an invoice.
    InvoiceStatus ("invoice") {
        Draft => "Draft",
        Sent => "Sent" | "issued",
        PartiallyPaid => "Partially Paid" | "partial",
        Paid => "Paid",
        Overdue => "Overdue" | "late",
        Void => "Void" | "voided",
    }
}

status_enum! {
    /// Lifecycle of a quote.
    QuoteStatus ("quote") {
        Draft => "Draft",
        Sent => "Sent",
        Accepted => "Accepted" | "approved",
        Declined => "Declined" | "rejected",
        Expired => "Expired",
    }
}

status_enum! {
    /// Sales pipeline stage of a lead.
    LeadStatus ("lead") {
        New => "New",
        Contacted => "Contacted",
        Qualified => "Qualified",
        Won => "Won" | "converted",
        Lost => "Lost",
    }
}

impl Default for LeadStatus {
    fn default() -> Self {
        Self::New
    }
}

impl InvoiceStatus {
    /// Whether an invoice in this status still expects payment.
    #[must_use]
    pub fn is_open(self) -> bool {
        matches!(self, Self::Sent | Self::PartiallyPaid | Self::Overdue)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Client {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub status: LeadStatus,
    #[serde(default)]
    pub estimated_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub id: String,
    pub client_id: String,
    pub title: String,
    pub total: f64,
    pub status: QuoteStatus,
    #[serde(default)]
    pub valid_until: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub client_id: String,
    pub title: String,
    pub status: JobStatus,
    #[serde(default)]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(default)]
    pub assigned_employee_ids: Vec<String>,
    #[serde(default)]
    pub quote_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub client_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub amount: f64,
    #[serde(default)]
    pub amount_paid: f64,
    pub status: InvoiceStatus,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
}

impl Invoice {
    /// Amount still owed, never negative.
    #[must_use]
    pub fn balance(&self) -> f64 {
        (self.amount - self.amount_paid).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Employee {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub hourly_rate: Option<f64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Equipment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayrollRecord {
    pub id: String,
    pub employee_id: String,
    pub pay_period_id: String,
    pub gross_pay: f64,
    pub net_pay: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub employee_id: String,
    #[serde(default)]
    pub job_id: Option<String>,
    pub date: NaiveDate,
    pub hours: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayPeriod {
    pub id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub processed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanyProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub service_area: Option<String>,
}

/// Point-in-time copy of the business's operational data.
///
/// Never mutated once it is shared. Changes produce a new snapshot that the
/// [`ContextStore`](super::ContextStore) swaps in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusinessSnapshot {
    #[serde(default)]
    pub clients: Vec<Client>,
    #[serde(default)]
    pub leads: Vec<Lead>,
    #[serde(default)]
    pub quotes: Vec<Quote>,
    #[serde(default)]
    pub jobs: Vec<Job>,
    #[serde(default)]
    pub invoices: Vec<Invoice>,
    #[serde(default)]
    pub employees: Vec<Employee>,
    #[serde(default)]
    pub equipment: Vec<Equipment>,
    #[serde(default)]
    pub payroll_records: Vec<PayrollRecord>,
    #[serde(default)]
    pub time_entries: Vec<TimeEntry>,
    #[serde(default)]
    pub pay_periods: Vec<PayPeriod>,
    #[serde(default)]
    pub company: CompanyProfile,
    #[serde(default = "Utc::now")]
    pub captured_at: DateTime<Utc>,
    /// Assigned by the store on `initialize`/`refresh`.
    #[serde(default)]
    pub version: u64,
    /// Bumped by every narrow patch applied on top of `version`.
    #[serde(default)]
    pub revision: u64,
}

impl Default for BusinessSnapshot {
    fn default() -> Self {
        Self {
            clients: Vec::new(),
            leads: Vec::new(),
            quotes: Vec::new(),
            jobs: Vec::new(),
            invoices: Vec::new(),
            employees: Vec::new(),
            equipment: Vec::new(),
            payroll_records: Vec::new(),
            time_entries: Vec::new(),
            pay_periods: Vec::new(),
            company: CompanyProfile::default(),
            captured_at: Utc::now(),
            version: 0,
            revision: 0,
        }
    }
}

impl BusinessSnapshot {
    #[must_use]
    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id == id)
    }

    #[must_use]
    pub fn job(&self, id: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    #[must_use]
    pub fn invoice(&self, id: &str) -> Option<&Invoice> {
        self.invoices.iter().find(|i| i.id == id)
    }

    #[must_use]
    pub fn employee(&self, id: &str) -> Option<&Employee> {
        self.employees.iter().find(|e| e.id == id)
    }

    /// Client display name, falling back to the raw id.
    #[must_use]
    pub fn client_name<'a>(&'a self, id: &'a str) -> &'a str {
        self.client(id).map_or(id, |c| c.name.as_str())
    }
}

/// A single-entity replacement produced by a successful mutating tool.
///
/// This is the one sanctioned shortcut around full refreshes: the entity is
/// swapped into a copy of the snapshot instead of re-fetching everything.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotPatch {
    ReplaceJob(Job),
    ReplaceInvoice(Invoice),
}

impl SnapshotPatch {
    /// Entity kind and id touched by this patch.
    #[must_use]
    pub fn target(&self) -> (&'static str, &str) {
        match self {
            Self::ReplaceJob(job) => ("job", &job.id),
            Self::ReplaceInvoice(invoice) => ("invoice", &invoice.id),
        }
    }

    /// Build the patched copy of `snapshot`. The input is left untouched.
    pub fn apply(&self, snapshot: &BusinessSnapshot) -> Result<BusinessSnapshot, ContextError> {
        let mut next = snapshot.clone();
        match self {
            Self::ReplaceJob(job) => replace_by_id(&mut next.jobs, job, |j| &j.id, "job")?,
            Self::ReplaceInvoice(invoice) => {
                replace_by_id(&mut next.invoices, invoice, |i| &i.id, "invoice")?;
            }
        }
        next.revision += 1;
        Ok(next)
    }
}

fn replace_by_id<T: Clone>(
    items: &mut [T],
    replacement: &T,
    id_of: impl Fn(&T) -> &String,
    kind: &'static str,
) -> Result<(), ContextError> {
    let id = id_of(replacement);
    let slot = items
        .iter_mut()
        .find(|item| id_of(&**item) == id)
        .ok_or_else(|| ContextError::EntityNotFound {
            kind,
            id: id.clone(),
        })?;
    *slot = replacement.clone();
    Ok(())
}
