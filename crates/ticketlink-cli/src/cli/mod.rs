//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ticketlink_core::access::Visibility;

pub mod commands;

/// Link git commits to issue-tracker tickets
#[derive(Parser, Debug)]
#[command(name = "ticketlink")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format: text (default) or JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Index database path (default: $TICKETLINK_DB or .ticketlink/index.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Directory holding <owner>/<name>[.git] repositories
    /// (default: $TICKETLINK_REPOS_ROOT or ./repositories)
    #[arg(long, global = true)]
    pub repos_root: Option<PathBuf>,

    /// Number of sync worker threads (default: $TICKETLINK_WORKERS or 4)
    #[arg(long, global = true)]
    pub workers: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the index database
    Init,

    /// Manage users
    #[command(subcommand)]
    Users(UsersCommands),

    /// Manage the repository catalog
    #[command(subcommand)]
    Repos(ReposCommands),

    /// Sync ticket links of one repository, or of every non-empty repository
    Sync {
        /// Repository ID
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        repo_id: Option<i64>,

        /// Queue a sync of every non-empty repository and wait for it
        #[arg(long)]
        all: bool,

        /// User on whose behalf the bulk sync runs
        #[arg(long, requires = "all")]
        doer: Option<i64>,
    },

    /// Run the sync queue, reading repository IDs (or `all`) from stdin
    Worker,

    /// Show the commits that reference a ticket
    Ticket {
        /// Ticket reference, e.g. PROJ-123
        ticket: String,

        /// Look up as this user (default: anonymous)
        #[arg(long)]
        user: Option<i64>,

        /// 1-based page number
        #[arg(long, default_value_t = 1, allow_negative_numbers = true)]
        page: i64,

        /// Links per page (default: $TICKETLINK_PAGE_SIZE or 50)
        #[arg(long, allow_negative_numbers = true)]
        page_size: Option<i64>,
    },
}

// ============================================================================
// Users subcommands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum UsersCommands {
    /// Add a user
    Add {
        /// Unique user name
        name: String,

        /// Grant access to every repository
        #[arg(long)]
        admin: bool,
    },
}

// ============================================================================
// Repos subcommands
// ============================================================================

#[derive(Subcommand, Debug)]
pub enum ReposCommands {
    /// Register an on-disk repository and index it
    Add {
        /// Repository as <owner>/<name>
        full_name: String,

        /// ID of the owning user
        #[arg(long)]
        owner_id: i64,

        /// Who may see the repository
        #[arg(long, value_enum, default_value = "public")]
        visibility: Visibility,

        /// Upstream address if the repository is a pull mirror
        #[arg(long)]
        mirror: Option<String>,
    },

    /// List registered repositories
    List,

    /// Remove a repository and all of its links
    Remove {
        /// Repository ID
        repo_id: i64,
    },

    /// Give a user read access to a private repository
    Grant {
        /// Repository ID
        repo_id: i64,

        /// User ID
        user_id: i64,
    },

    /// Record a finished mirror fetch and re-sync
    MirrorUpdated {
        /// Repository ID
        repo_id: i64,
    },
}
