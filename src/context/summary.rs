//! Compact, prompt-sized digest of a [`BusinessSnapshot`].
//!
//! Every collection is reduced to a count plus at most `sample_size`
//! entries so the system instruction stays bounded no matter how large the
//! business grows.

use std::collections::BTreeMap;

use super::snapshot::{BusinessSnapshot, JobStatus};

/// Digest used before any snapshot has been installed.
pub const NOT_INITIALIZED_SUMMARY: &str = "Business context has not been initialized yet.";

/// Default number of entities listed per collection.
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

/// Render the digest for `snapshot`.
#[must_use]
pub fn summarize(snapshot: &BusinessSnapshot, sample_size: usize) -> String {
    let mut lines = Vec::new();

    let company = if snapshot.company.name.is_empty() {
        "Unnamed company".to_string()
    } else {
        match &snapshot.company.industry {
            Some(industry) => format!("{} ({industry})", snapshot.company.name),
            None => snapshot.company.name.clone(),
        }
    };
    lines.push(format!("Company: {company}"));
    lines.push(format!(
        "Snapshot captured {} (version {}, revision {})",
        snapshot.captured_at.format("%Y-%m-%d %H:%M UTC"),
        snapshot.version,
        snapshot.revision
    ));
    lines.push(String::new());

    lines.push(format!(
        "Totals: {} clients, {} leads, {} quotes, {} jobs, {} invoices, {} employees, \
         {} equipment items, {} payroll records, {} time entries, {} pay periods",
        snapshot.clients.len(),
        snapshot.leads.len(),
        snapshot.quotes.len(),
        snapshot.jobs.len(),
        snapshot.invoices.len(),
        snapshot.employees.len(),
        snapshot.equipment.len(),
        snapshot.payroll_records.len(),
        snapshot.time_entries.len(),
        snapshot.pay_periods.len(),
    ));
    lines.push(job_status_line(snapshot));
    lines.push(outstanding_line(snapshot));

    section(
        &mut lines,
        "Clients",
        snapshot.clients.iter().map(|c| {
            let contact = c.email.as_deref().or(c.phone.as_deref());
            match contact {
                Some(contact) => format!("{}: {} ({contact})", c.id, c.name),
                None => format!("{}: {}", c.id, c.name),
            }
        }),
        snapshot.clients.len(),
        sample_size,
    );

    section(
        &mut lines,
        "Jobs",
        snapshot.jobs.iter().map(|j| {
            let mut line = format!(
                "{}: {} [{}] for {}",
                j.id,
                j.title,
                j.status,
                snapshot.client_name(&j.client_id)
            );
            if let Some(date) = j.scheduled_date {
                line.push_str(&format!(" on {date}"));
            }
            line
        }),
        snapshot.jobs.len(),
        sample_size,
    );

    section(
        &mut lines,
        "Invoices",
        snapshot.invoices.iter().map(|i| {
            let mut line = format!(
                "{}: {} for {}, balance {} [{}]",
                i.id,
                money(i.amount),
                snapshot.client_name(&i.client_id),
                money(i.balance()),
                i.status
            );
            if let Some(due) = i.due_date {
                line.push_str(&format!(" due {due}"));
            }
            line
        }),
        snapshot.invoices.len(),
        sample_size,
    );

    section(
        &mut lines,
        "Quotes",
        snapshot.quotes.iter().map(|q| {
            format!(
                "{}: {} for {}, {} [{}]",
                q.id,
                q.title,
                snapshot.client_name(&q.client_id),
                money(q.total),
                q.status
            )
        }),
        snapshot.quotes.len(),
        sample_size,
    );

    section(
        &mut lines,
        "Leads",
        snapshot
            .leads
            .iter()
            .map(|l| format!("{}: {} [{}]", l.id, l.name, l.status)),
        snapshot.leads.len(),
        sample_size,
    );

    section(
        &mut lines,
        "Employees",
        snapshot.employees.iter().map(|e| {
            let role = e.role.as_deref().unwrap_or("staff");
            let active = if e.active { "" } else { ", inactive" };
            format!("{}: {} ({role}{active})", e.id, e.name)
        }),
        snapshot.employees.len(),
        sample_size,
    );

    lines.join("\n")
}

fn job_status_line(snapshot: &BusinessSnapshot) -> String {
    let mut counts: BTreeMap<usize, (JobStatus, usize)> = BTreeMap::new();
    for job in &snapshot.jobs {
        // Keyed by lifecycle position so the line reads in workflow order.
        let position = JobStatus::ALL
            .iter()
            .position(|s| *s == job.status)
            .unwrap_or(usize::MAX);
        counts.entry(position).or_insert((job.status, 0)).1 += 1;
    }
    if counts.is_empty() {
        return "Jobs by status: none".to_string();
    }
    let parts = counts
        .values()
        .map(|(status, count)| format!("{status} {count}"))
        .collect::<Vec<_>>();
    format!("Jobs by status: {}", parts.join(", "))
}

fn outstanding_line(snapshot: &BusinessSnapshot) -> String {
    let open = snapshot
        .invoices
        .iter()
        .filter(|i| i.status.is_open() && i.balance() > 0.0)
        .collect::<Vec<_>>();
    let total: f64 = open.iter().map(|i| i.balance()).sum();
    let overdue = open
        .iter()
        .filter(|i| i.status == super::snapshot::InvoiceStatus::Overdue)
        .count();
    format!(
        "Outstanding invoice balance: {} across {} invoices ({overdue} overdue)",
        money(total),
        open.len()
    )
}

fn section(
    lines: &mut Vec<String>,
    title: &str,
    entries: impl Iterator<Item = String>,
    total: usize,
    sample_size: usize,
) {
    lines.push(String::new());
    if total == 0 {
        lines.push(format!("{title}: none"));
        return;
    }
    if total > sample_size {
        lines.push(format!("{title} (showing {sample_size} of {total}):"));
    } else {
        lines.push(format!("{title}:"));
    }
    lines.extend(entries.take(sample_size).map(|entry| format!("- {entry}")));
}

/// Dollar amount with cents.
pub(crate) fn money(amount: f64) -> String {
    format!("${amount:.2}")
}
