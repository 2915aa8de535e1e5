//! Tool bodies. Each takes a typed invocation and the turn's snapshot.

use anyhow::{Context as _, anyhow, bail};
use chrono::NaiveDate;
use serde_json::{Value, json};

use super::domain::DomainService;
use super::invocation::{
    FindClientsArgs, ListJobsArgs, OutstandingInvoicesArgs, ScheduleJobArgs, ToolInvocation,
    UpdateInvoiceStatusArgs, UpdateJobStatusArgs,
};
use crate::context::summary::money;
use crate::context::{BusinessSnapshot, InvoiceStatus, Job, JobStatus, SnapshotPatch};

const DEFAULT_JOB_LIMIT: usize = 20;
const DEFAULT_CLIENT_LIMIT: usize = 10;
const MAX_ROWS: usize = 50;

/// What a handler produced: the payload for the model and an optional patch.
#[derive(Debug)]
pub(crate) struct Handled {
    pub payload: Value,
    pub patch: Option<SnapshotPatch>,
}

impl Handled {
    fn read_only(payload: Value) -> Self {
        Self {
            payload,
            patch: None,
        }
    }
}

pub(crate) async fn execute(
    domain: &dyn DomainService,
    invocation: ToolInvocation,
    snapshot: &BusinessSnapshot,
) -> anyhow::Result<Handled> {
    match invocation {
        ToolInvocation::UpdateJobStatus(args) => update_job_status(domain, args, snapshot).await,
        ToolInvocation::ScheduleJob(args) => schedule_job(domain, args, snapshot).await,
        ToolInvocation::UpdateInvoiceStatus(args) => {
            update_invoice_status(domain, args, snapshot).await
        }
        ToolInvocation::ListJobs(args) => list_jobs(&args, snapshot).map(Handled::read_only),
        ToolInvocation::FindClients(args) => Ok(Handled::read_only(find_clients(&args, snapshot))),
        ToolInvocation::GetOutstandingInvoices(args) => {
            Ok(Handled::read_only(outstanding_invoices(&args, snapshot)))
        }
    }
}

async fn update_job_status(
    domain: &dyn DomainService,
    args: UpdateJobStatusArgs,
    snapshot: &BusinessSnapshot,
) -> anyhow::Result<Handled> {
    let status: JobStatus = args.status.parse()?;
    let previous = snapshot
        .job(&args.job_id)
        .ok_or_else(|| anyhow!("job '{}' not found", args.job_id))?
        .status;

    let job = domain.update_job_status(&args.job_id, status).await?;
    Ok(Handled {
        payload: json!({
            "jobId": job.id,
            "previousStatus": previous,
            "status": job.status,
            "message": format!("Job {} is now {}.", job.id, job.status),
        }),
        patch: Some(SnapshotPatch::ReplaceJob(job)),
    })
}

async fn schedule_job(
    domain: &dyn DomainService,
    args: ScheduleJobArgs,
    snapshot: &BusinessSnapshot,
) -> anyhow::Result<Handled> {
    let date = NaiveDate::parse_from_str(args.scheduled_date.trim(), "%Y-%m-%d")
        .with_context(|| format!("'{}' is not a YYYY-MM-DD date", args.scheduled_date))?;
    if snapshot.job(&args.job_id).is_none() {
        bail!("job '{}' not found", args.job_id);
    }
    if let Some(ids) = &args.employee_ids
        && let Some(unknown) = ids.iter().find(|id| snapshot.employee(id).is_none())
    {
        bail!("employee '{unknown}' not found");
    }

    let job = domain
        .schedule_job(&args.job_id, date, args.employee_ids.as_deref())
        .await?;
    let crew = job
        .assigned_employee_ids
        .iter()
        .map(|id| snapshot.employee(id).map_or(id.as_str(), |e| e.name.as_str()))
        .collect::<Vec<_>>();
    Ok(Handled {
        payload: json!({
            "jobId": job.id,
            "scheduledDate": job.scheduled_date,
            "status": job.status,
            "assignedEmployees": crew,
        }),
        patch: Some(SnapshotPatch::ReplaceJob(job)),
    })
}

async fn update_invoice_status(
    domain: &dyn DomainService,
    args: UpdateInvoiceStatusArgs,
    snapshot: &BusinessSnapshot,
) -> anyhow::Result<Handled> {
    let status: InvoiceStatus = args.status.parse()?;
    if snapshot.invoice(&args.invoice_id).is_none() {
        bail!("invoice '{}' not found", args.invoice_id);
    }

    let invoice = domain
        .update_invoice_status(&args.invoice_id, status)
        .await?;
    Ok(Handled {
        payload: json!({
            "invoiceId": invoice.id,
            "status": invoice.status,
            "balance": money(invoice.balance()),
        }),
        patch: Some(SnapshotPatch::ReplaceInvoice(invoice)),
    })
}

fn row_limit(requested: Option<u64>, default: usize) -> usize {
    requested
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(default)
        .clamp(1, MAX_ROWS)
}

fn job_row(job: &Job, snapshot: &BusinessSnapshot) -> Value {
    json!({
        "id": job.id,
        "title": job.title,
        "client": snapshot.client_name(&job.client_id),
        "status": job.status,
        "scheduledDate": job.scheduled_date,
    })
}

fn list_jobs(args: &ListJobsArgs, snapshot: &BusinessSnapshot) -> anyhow::Result<Value> {
    let status = args
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()?;
    let limit = row_limit(args.limit, DEFAULT_JOB_LIMIT);

    let matching = snapshot
        .jobs
        .iter()
        .filter(|job| status.is_none_or(|s| job.status == s))
        .filter(|job| {
            args.client_id
                .as_deref()
                .is_none_or(|id| job.client_id == id)
        })
        .collect::<Vec<_>>();
    let rows = matching
        .iter()
        .take(limit)
        .map(|job| job_row(job, snapshot))
        .collect::<Vec<_>>();

    Ok(json!({ "total": matching.len(), "jobs": rows }))
}

fn find_clients(args: &FindClientsArgs, snapshot: &BusinessSnapshot) -> Value {
    let needle = args.query.trim().to_lowercase();
    let limit = row_limit(args.limit, DEFAULT_CLIENT_LIMIT);
    let contains = |field: Option<&str>| field.is_some_and(|f| f.to_lowercase().contains(&needle));

    let rows = snapshot
        .clients
        .iter()
        .filter(|c| {
            contains(Some(&c.name)) || contains(c.email.as_deref()) || contains(c.phone.as_deref())
        })
        .take(limit)
        .map(|c| {
            json!({
                "id": c.id,
                "name": c.name,
                "email": c.email,
                "phone": c.phone,
                "address": c.address,
            })
        })
        .collect::<Vec<_>>();

    json!({ "count": rows.len(), "clients": rows })
}

fn outstanding_invoices(args: &OutstandingInvoicesArgs, snapshot: &BusinessSnapshot) -> Value {
    let open = snapshot
        .invoices
        .iter()
        .filter(|i| i.status.is_open() && i.balance() > 0.0)
        .filter(|i| {
            args.client_id
                .as_deref()
                .is_none_or(|id| i.client_id == id)
        })
        .collect::<Vec<_>>();
    let total: f64 = open.iter().map(|i| i.balance()).sum();
    let rows = open
        .iter()
        .map(|i| {
            json!({
                "id": i.id,
                "client": snapshot.client_name(&i.client_id),
                "status": i.status,
                "balance": money(i.balance()),
                "dueDate": i.due_date,
            })
        })
        .collect::<Vec<_>>();

    json!({
        "count": rows.len(),
        "totalOutstanding": money(total),
        "invoices": rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Client, Invoice};
    use crate::tools::InMemoryDomainService;

    fn snapshot() -> BusinessSnapshot {
        let mut snapshot = BusinessSnapshot::default();
        snapshot.clients = vec![
            Client {
                id: "C1".to_string(),
                name: "Jane Doe".to_string(),
                email: Some("jane@example.com".to_string()),
                phone: None,
                address: None,
            },
            Client {
                id: "C2".to_string(),
                name: "Bob's Bakery".to_string(),
                email: None,
                phone: Some("555-0100".to_string()),
                address: None,
            },
        ];
        snapshot.jobs = vec![
            Job {
                id: "J1".to_string(),
                client_id: "C1".to_string(),
                title: "Leaky faucet".to_string(),
                status: JobStatus::Scheduled,
                scheduled_date: None,
                assigned_employee_ids: Vec::new(),
                quote_id: None,
            },
            Job {
                id: "J2".to_string(),
                client_id: "C2".to_string(),
                title: "Oven hookup".to_string(),
                status: JobStatus::Completed,
                scheduled_date: None,
                assigned_employee_ids: Vec::new(),
                quote_id: None,
            },
        ];
        snapshot.invoices = vec![
            Invoice {
                id: "I1".to_string(),
                client_id: "C1".to_string(),
                job_id: Some("J1".to_string()),
                amount: 250.0,
                amount_paid: 50.0,
                status: InvoiceStatus::PartiallyPaid,
                due_date: None,
            },
            Invoice {
                id: "I2".to_string(),
                client_id: "C2".to_string(),
                job_id: Some("J2".to_string()),
                amount: 100.0,
                amount_paid: 100.0,
                status: InvoiceStatus::Paid,
                due_date: None,
            },
        ];
        snapshot
    }

    #[tokio::test]
    async fn update_job_status_returns_patch() {
        let snapshot = snapshot();
        let domain = InMemoryDomainService::from_snapshot(snapshot.clone());
        let invocation = ToolInvocation::UpdateJobStatus(UpdateJobStatusArgs {
            job_id: "J1".to_string(),
            status: "done".to_string(),
        });

        let handled = execute(&domain, invocation, &snapshot).await.unwrap();
        assert_eq!(handled.payload["status"], "Completed");
        assert_eq!(handled.payload["previousStatus"], "Scheduled");
        match handled.patch {
            Some(SnapshotPatch::ReplaceJob(job)) => assert_eq!(job.status, JobStatus::Completed),
            other => panic!("unexpected patch {other:?}"),
        }
    }

    #[tokio::test]
    async fn schedule_rejects_bad_date() {
        let snapshot = snapshot();
        let domain = InMemoryDomainService::from_snapshot(snapshot.clone());
        let invocation = ToolInvocation::ScheduleJob(ScheduleJobArgs {
            job_id: "J1".to_string(),
            scheduled_date: "next tuesday".to_string(),
            employee_ids: None,
        });
        let err = execute(&domain, invocation, &snapshot).await.unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"));
    }

    #[test]
    fn list_jobs_filters_by_status() {
        let args = ListJobsArgs {
            status: Some("completed".to_string()),
            ..ListJobsArgs::default()
        };
        let value = list_jobs(&args, &snapshot()).unwrap();
        assert_eq!(value["total"], 1);
        assert_eq!(value["jobs"][0]["id"], "J2");
        assert_eq!(value["jobs"][0]["client"], "Bob's Bakery");
    }

    #[test]
    fn find_clients_matches_any_contact_field() {
        let by_phone = FindClientsArgs {
            query: "0100".to_string(),
            limit: None,
        };
        assert_eq!(find_clients(&by_phone, &snapshot())["clients"][0]["id"], "C2");

        let by_name = FindClientsArgs {
            query: "JANE".to_string(),
            limit: None,
        };
        assert_eq!(find_clients(&by_name, &snapshot())["count"], 1);
    }

    #[test]
    fn outstanding_invoices_skip_paid() {
        let value = outstanding_invoices(&OutstandingInvoicesArgs::default(), &snapshot());
        assert_eq!(value["count"], 1);
        assert_eq!(value["totalOutstanding"], "$200.00");
    }
}
