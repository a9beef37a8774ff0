//! Implementation of `ticketlink ticket`.

use std::fmt::Write as _;

use anyhow::Result;

use crate::cli::commands::helpers::open_services;
use crate::output::{print_line, Formatter, OutputFormat};
use ticketlink_core::config::Settings;
use ticketlink_core::core::tickets::TicketAggregate;
use ticketlink_core::index::Page;

/// Show the commits that reference `ticket`.
#[tracing::instrument(skip(settings, format))]
pub fn run_ticket(
    settings: &Settings,
    ticket: &str,
    user: Option<i64>,
    page: i64,
    page_size: Option<i64>,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(settings)?;
    let principal = services.users().principal(user)?;
    let page = Page::new(page, page_size.unwrap_or(0), settings.page_size);

    let aggregate = services.tickets().find_by_ticket(ticket, &principal, page)?;

    let formatter = Formatter::new(format);
    if formatter.is_json() {
        return formatter.print(&aggregate);
    }
    print_line(render_aggregate(&aggregate).trim_end())
}

/// Human-readable listing: one header per repository, one line per commit.
fn render_aggregate(aggregate: &TicketAggregate) -> String {
    if aggregate.total_commits == 0 {
        return format!("No commits reference {}.", aggregate.ticket_id);
    }

    let mut out = format!(
        "{}: {} commit(s)\n",
        aggregate.ticket_id, aggregate.total_commits
    );
    for group in &aggregate.repositories {
        let repo = &group.repository;
        let _ = write!(out, "\n{} (#{})", repo.full_name(), repo.id);
        if let Some(mirror) = &group.mirror {
            let _ = write!(out, " mirror of {}", mirror.remote_address);
        }
        out.push('\n');

        for commit in &group.commits {
            let short = commit.sha.get(..12).unwrap_or(&commit.sha);
            let mark = if commit.signature.is_verified() { " [verified]" } else { "" };
            let _ = writeln!(
                out,
                "  {short} {} {} <{}>{mark}  {}",
                commit.committed_at.format("%Y-%m-%d"),
                commit.author_name,
                commit.author_email,
                commit.summary
            );
        }
    }
    out
}
