//! ticketlink - link git commits to issue-tracker tickets

mod cli;
mod output;
mod signals;
mod telemetry;

use anyhow::Result;
use clap::Parser;

use cli::commands::{
    run_init, run_repos_add, run_repos_grant, run_repos_list, run_repos_mirror_updated,
    run_repos_remove, run_sync, run_sync_all, run_ticket, run_users_add, run_worker,
};
use cli::{Cli, Commands, ReposCommands, UsersCommands};
use output::OutputFormat;
use ticketlink_core::config::{Overrides, Settings};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _telemetry = telemetry::init(cli.log_json)?;

    let settings = Settings::resolve(Overrides {
        db_path: cli.db.clone(),
        repos_root: cli.repos_root.clone(),
        workers: cli.workers,
        page_size: None,
    })?;

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    match cli.command {
        Commands::Init => run_init(&settings, format)?,

        Commands::Users(cmd) => match cmd {
            UsersCommands::Add { name, admin } => {
                run_users_add(&settings, &name, admin, format)?;
            }
        },

        Commands::Repos(cmd) => match cmd {
            ReposCommands::Add {
                full_name,
                owner_id,
                visibility,
                mirror,
            } => {
                run_repos_add(&settings, &full_name, owner_id, visibility, mirror, format)?;
            }
            ReposCommands::List => run_repos_list(&settings, format)?,
            ReposCommands::Remove { repo_id } => run_repos_remove(&settings, repo_id, format)?,
            ReposCommands::Grant { repo_id, user_id } => {
                run_repos_grant(&settings, repo_id, user_id, format)?;
            }
            ReposCommands::MirrorUpdated { repo_id } => {
                run_repos_mirror_updated(&settings, repo_id, format)?;
            }
        },

        Commands::Sync {
            repo_id,
            all,
            doer,
        } => match repo_id {
            Some(repo_id) if !all => run_sync(&settings, repo_id, format)?,
            _ => run_sync_all(&settings, doer.unwrap_or_default(), format)?,
        },

        Commands::Worker => run_worker(&settings, format)?,

        Commands::Ticket {
            ticket,
            user,
            page,
            page_size,
        } => run_ticket(&settings, &ticket, user, page, page_size, format)?,
    }

    Ok(())
}
