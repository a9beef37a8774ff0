//! Implementation of `ticketlink sync`.

use anyhow::Result;
use serde::Serialize;

use crate::cli::commands::helpers::{
    core_context, ensure_initialized, open_services, wait_until_idle,
};
use crate::output::{Formatter, OutputFormat};
use crate::signals::cancel_on_signal;
use ticketlink_core::config::Settings;
use ticketlink_core::core::queue::{EnqueueCounts, SyncQueue};
use ticketlink_core::lifecycle::Lifecycle;

#[derive(Serialize)]
struct SyncAllOutput {
    doer_id: i64,
    queued: EnqueueCounts,
    completed: bool,
}

/// Sync one repository in the foreground.
#[tracing::instrument(skip(settings, format))]
pub fn run_sync(settings: &Settings, repo_id: i64, format: OutputFormat) -> Result<()> {
    let services = open_services(settings)?;
    let report = services.sync().sync_repository(repo_id)?;
    Formatter::new(format).print(&report)
}

/// Queue a sync of every non-empty repository and wait until the queue drains.
///
/// SIGINT/SIGTERM stop the wait; syncs still running roll back.
#[tracing::instrument(skip(settings, format))]
pub fn run_sync_all(settings: &Settings, doer_id: i64, format: OutputFormat) -> Result<()> {
    ensure_initialized(settings)?;

    let lifecycle = Lifecycle::new();
    cancel_on_signal(lifecycle.token().clone())?;

    let ctx = core_context(settings).with_token(lifecycle.token().clone());
    ctx.open_db()?;
    let queue = SyncQueue::start(&ctx, settings.workers, &lifecycle)?;

    let queued = queue.enqueue_sync_all(doer_id)?;
    let completed = wait_until_idle(&queue, lifecycle.token());
    lifecycle.shutdown();

    Formatter::new(format).print(&SyncAllOutput {
        doer_id,
        queued,
        completed,
    })
}
