//! Shared helpers for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use ticketlink_core::config::Settings;
use ticketlink_core::core::queue::SyncQueue;
use ticketlink_core::core::{CoreContext, LinkServices};
use ticketlink_core::lifecycle::ShutdownToken;
use ticketlink_core::scm::GitHistoryProvider;

/// How often a waiting command re-checks for shutdown.
const IDLE_POLL: Duration = Duration::from_millis(200);

/// Ensure the index database exists.
pub fn ensure_initialized(settings: &Settings) -> Result<()> {
    if !settings.db_path.exists() {
        bail!(
            "No index database at {}. Run 'ticketlink init' first.",
            settings.db_path.display()
        );
    }
    Ok(())
}

/// Service context over the configured database and git repositories.
#[must_use]
pub fn core_context(settings: &Settings) -> CoreContext {
    let history = Arc::new(GitHistoryProvider::new(settings.repos_root.clone()));
    CoreContext::new(&settings.db_path, history)
}

/// Open services over an initialized index.
pub fn open_services(settings: &Settings) -> Result<LinkServices> {
    ensure_initialized(settings)?;
    Ok(core_context(settings).services()?)
}

/// Split `<owner>/<name>`.
pub fn parse_full_name(full_name: &str) -> Result<(&str, &str)> {
    match full_name.split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((owner, name))
        }
        _ => bail!("Expected <owner>/<name>, got '{full_name}'"),
    }
}

/// Wait for the queue to drain. Returns `false` if shutdown came first.
pub fn wait_until_idle(queue: &SyncQueue, token: &ShutdownToken) -> bool {
    while !token.is_cancelled() {
        if queue.wait_idle(IDLE_POLL) {
            return true;
        }
    }
    false
}
