//! Implementation of `ticketlink users` subcommands.

use anyhow::Result;

use crate::cli::commands::helpers::open_services;
use crate::output::{Formatter, OutputFormat};
use ticketlink_core::config::Settings;

/// Add a user.
#[tracing::instrument(skip(settings, format))]
pub fn run_users_add(
    settings: &Settings,
    name: &str,
    admin: bool,
    format: OutputFormat,
) -> Result<()> {
    let services = open_services(settings)?;
    let user = services.users().add(name, admin)?;
    Formatter::new(format).print(&user)
}
