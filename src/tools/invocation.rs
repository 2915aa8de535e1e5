//! The closed set of tools the assistant can call.

use serde::Deserialize;
use serde_json::Value;

use super::ToolDeclaration;
use super::schema::{ParamType, ParameterSchema, ScalarType};

/// Identifies one tool; every variant has a fixed name and schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ToolKind {
    UpdateJobStatus,
    ScheduleJob,
    UpdateInvoiceStatus,
    ListJobs,
    FindClients,
    GetOutstandingInvoices,
}

impl ToolKind {
    pub const ALL: &'static [ToolKind] = &[
        Self::UpdateJobStatus,
        Self::ScheduleJob,
        Self::UpdateInvoiceStatus,
        Self::ListJobs,
        Self::FindClients,
        Self::GetOutstandingInvoices,
    ];

    /// Name the model uses to call this tool.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::UpdateJobStatus => "updateJobStatus",
            Self::ScheduleJob => "scheduleJob",
            Self::UpdateInvoiceStatus => "updateInvoiceStatus",
            Self::ListJobs => "listJobs",
            Self::FindClients => "findClients",
            Self::GetOutstandingInvoices => "getOutstandingInvoices",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }

    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::UpdateJobStatus => {
                "Change the status of a job (Pending, Scheduled, In Progress, On Hold, Completed, Cancelled)."
            }
            Self::ScheduleJob => {
                "Schedule a job for a date and optionally assign employees to it."
            }
            Self::UpdateInvoiceStatus => {
                "Change the status of an invoice (Draft, Sent, Partially Paid, Paid, Overdue, Void)."
            }
            Self::ListJobs => "List jobs, optionally filtered by status or client.",
            Self::FindClients => "Search clients by name, email or phone number.",
            Self::GetOutstandingInvoices => {
                "List unpaid invoices and the total outstanding balance, optionally for one client."
            }
        }
    }

    #[must_use]
    pub fn schema(self) -> ParameterSchema {
        match self {
            Self::UpdateJobStatus => ParameterSchema::new()
                .required("jobId", ParamType::String, "Identifier of the job to update.")
                .required("status", ParamType::String, "New job status."),
            Self::ScheduleJob => ParameterSchema::new()
                .required("jobId", ParamType::String, "Identifier of the job to schedule.")
                .required(
                    "scheduledDate",
                    ParamType::String,
                    "Date of the visit in YYYY-MM-DD format.",
                )
                .optional(
                    "employeeIds",
                    ParamType::Array(ScalarType::String),
                    "Employees to assign to the job.",
                ),
            Self::UpdateInvoiceStatus => ParameterSchema::new()
                .required("invoiceId", ParamType::String, "Identifier of the invoice to update.")
                .required("status", ParamType::String, "New invoice status."),
            Self::ListJobs => ParameterSchema::new()
                .optional("status", ParamType::String, "Only jobs with this status.")
                .optional("clientId", ParamType::String, "Only jobs for this client.")
                .optional("limit", ParamType::Integer, "Maximum number of jobs to return."),
            Self::FindClients => ParameterSchema::new()
                .required("query", ParamType::String, "Text to search for.")
                .optional("limit", ParamType::Integer, "Maximum number of clients to return."),
            Self::GetOutstandingInvoices => ParameterSchema::new().optional(
                "clientId",
                ParamType::String,
                "Only invoices for this client.",
            ),
        }
    }

    #[must_use]
    pub fn declaration(self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name(),
            description: self.description(),
            parameters: self.schema(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateJobStatusArgs {
    pub job_id: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleJobArgs {
    pub job_id: String,
    pub scheduled_date: String,
    #[serde(default)]
    pub employee_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInvoiceStatusArgs {
    pub invoice_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsArgs {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindClientsArgs {
    pub query: String,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutstandingInvoicesArgs {
    #[serde(default)]
    pub client_id: Option<String>,
}

/// A validated, typed tool request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolInvocation {
    UpdateJobStatus(UpdateJobStatusArgs),
    ScheduleJob(ScheduleJobArgs),
    UpdateInvoiceStatus(UpdateInvoiceStatusArgs),
    ListJobs(ListJobsArgs),
    FindClients(FindClientsArgs),
    GetOutstandingInvoices(OutstandingInvoicesArgs),
}

impl ToolInvocation {
    /// Build the typed variant for `kind` from schema-checked arguments.
    pub fn parse(kind: ToolKind, args: Value) -> Result<Self, serde_json::Error> {
        let args = if args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            args
        };
        Ok(match kind {
            ToolKind::UpdateJobStatus => Self::UpdateJobStatus(serde_json::from_value(args)?),
            ToolKind::ScheduleJob => Self::ScheduleJob(serde_json::from_value(args)?),
            ToolKind::UpdateInvoiceStatus => {
                Self::UpdateInvoiceStatus(serde_json::from_value(args)?)
            }
            ToolKind::ListJobs => Self::ListJobs(serde_json::from_value(args)?),
            ToolKind::FindClients => Self::FindClients(serde_json::from_value(args)?),
            ToolKind::GetOutstandingInvoices => {
                Self::GetOutstandingInvoices(serde_json::from_value(args)?)
            }
        })
    }

    #[must_use]
    pub fn kind(&self) -> ToolKind {
        match self {
            Self::UpdateJobStatus(_) => ToolKind::UpdateJobStatus,
            Self::ScheduleJob(_) => ToolKind::ScheduleJob,
            Self::UpdateInvoiceStatus(_) => ToolKind::UpdateInvoiceStatus,
            Self::ListJobs(_) => ToolKind::ListJobs,
            Self::FindClients(_) => ToolKind::FindClients,
            Self::GetOutstandingInvoices(_) => ToolKind::GetOutstandingInvoices,
        }
    }
}
