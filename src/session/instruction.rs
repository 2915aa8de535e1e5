//! System instruction text for a model session.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::Context as _;

use crate::tools::ToolDeclaration;

/// Built-in field service knowledge used when no knowledge file is configured.
pub const DEFAULT_DOMAIN_KNOWLEDGE: &str = "\
- Work flows from lead to quote to job to invoice. A won lead becomes a client; an accepted \
quote becomes one or more jobs; completed jobs are invoiced.
- Job statuses: Pending (not yet on the calendar), Scheduled, In Progress, On Hold, Completed, \
Cancelled. A job needs a date before it can be marked Scheduled.
- Invoice statuses: Draft, Sent, Partially Paid, Paid, Overdue, Void. Only Sent, Partially Paid \
and Overdue invoices count toward the outstanding balance.
- Payroll is computed per pay period from approved time entries and each employee's hourly rate.
- Amounts are in US dollars.";

/// Inputs for one instruction.
#[derive(Debug, Clone, Copy)]
pub struct InstructionParts<'a> {
    pub company_name: &'a str,
    pub summary: &'a str,
    pub knowledge: &'a str,
    pub tools: &'a [ToolDeclaration],
}

/// Render the system instruction.
#[must_use]
pub fn build_instruction(parts: InstructionParts<'_>) -> String {
    let company = if parts.company_name.trim().is_empty() {
        "a field service business"
    } else {
        parts.company_name.trim()
    };

    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are the business assistant for {company}. You help the owner and office staff \
         understand and manage clients, leads, quotes, jobs, invoices, scheduling and payroll."
    );
    out.push_str("\n## Current business snapshot\n");
    out.push_str(parts.summary.trim_end());
    out.push_str("\n\n## Domain knowledge\n");
    out.push_str(parts.knowledge.trim_end());
    out.push_str("\n\n## Available tools\n");
    if parts.tools.is_empty() {
        out.push_str("none\n");
    }
    for tool in parts.tools {
        let _ = writeln!(out, "- {}: {}", tool.name, tool.description);
    }
    out.push_str(
        "\n## Rules\n\
         - Use a tool for every change to jobs or invoices; never claim a change you did not make.\n\
         - After a tool runs, confirm what changed using its result. If it failed, say so plainly.\n\
         - Only use ids that appear in the snapshot or in tool results. Never invent ids.\n\
         - The snapshot may be summarized; use the query tools when you need more rows.\n",
    );
    out
}

/// Load domain knowledge from `path`, or the built-in text when `None`.
pub fn load_knowledge(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        None => Ok(DEFAULT_DOMAIN_KNOWLEDGE.to_string()),
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read knowledge file {}", path.display())),
    }
}
