//! Implementation of `ticketlink init`.

use anyhow::{Context, Result};

use crate::cli::commands::helpers::core_context;
use crate::output::{Formatter, OutputFormat};
use ticketlink_core::config::Settings;

/// Create the index database (idempotent) and the repositories root.
#[tracing::instrument(skip(settings, format))]
pub fn run_init(settings: &Settings, format: OutputFormat) -> Result<()> {
    let existed = settings.db_path.exists();
    core_context(settings).open_db()?;

    std::fs::create_dir_all(&settings.repos_root).with_context(|| {
        format!(
            "Failed to create repositories root: {}",
            settings.repos_root.display()
        )
    })?;

    let output = serde_json::json!({
        "db": settings.db_path.display().to_string(),
        "repos_root": settings.repos_root.display().to_string(),
        "created": !existed,
    });
    Formatter::new(format).print(&output)
}
