//! Implementation of `ticketlink repos` subcommands.

use anyhow::{bail, Result};

use crate::cli::commands::helpers::{open_services, parse_full_name};
use crate::output::{Formatter, OutputFormat};
use ticketlink_core::access::Visibility;
use ticketlink_core::config::Settings;
use ticketlink_core::core::repos::RegisterRepository;

/// Register an on-disk repository and run its first sync.
#[tracing::instrument(skip(settings, format))]
pub fn run_repos_add(
    settings: &Settings,
    full_name: &str,
    owner_id: i64,
    visibility: Visibility,
    mirror: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let (owner, name) = parse_full_name(full_name)?;
    let services = open_services(settings)?;

    let user = services.users().get(owner_id)?;
    if user.name != owner {
        bail!(
            "User {owner_id} is '{}', not '{owner}'. Use --owner-id of the owning user.",
            user.name
        );
    }

    let report = services.repos().register(&RegisterRepository {
        owner_id,
        name: name.to_string(),
        visibility,
        mirror,
    })?;
    Formatter::new(format).print(&report)
}

/// List registered repositories.
#[tracing::instrument(skip(settings, format))]
pub fn run_repos_list(settings: &Settings, format: OutputFormat) -> Result<()> {
    let services = open_services(settings)?;
    let repos = services.repos().list()?;
    Formatter::new(format).print_list(&repos, "No repositories registered.", "repositories")
}

/// Remove a repository and its links.
#[tracing::instrument(skip(settings, format))]
pub fn run_repos_remove(settings: &Settings, repo_id: i64, format: OutputFormat) -> Result<()> {
    let services = open_services(settings)?;
    let report = services.repos().remove(repo_id)?;
    Formatter::new(format).print(&report)
}

/// Grant a user access to a repository.
#[tracing::instrument(skip(settings, format))]
pub fn run_repos_grant(
    settings: &Settings,
    repo_id: i64,
    user_id: i64,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(settings)?;
    services.repos().grant_access(repo_id, user_id)?;
    Formatter::new(format).print(&serde_json::json!({
        "repo_id": repo_id,
        "user_id": user_id,
        "granted": true,
    }))
}

/// Record a mirror fetch and re-sync.
#[tracing::instrument(skip(settings, format))]
pub fn run_repos_mirror_updated(
    settings: &Settings,
    repo_id: i64,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(settings)?;
    let sync = services.repos().mirror_updated(repo_id)?;
    Formatter::new(format).print(&serde_json::json!({
        "repo_id": repo_id,
        "sync": sync,
    }))
}
