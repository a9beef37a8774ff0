//! SQLite-backed link index.
//!
//! Holds the commit/ticket link rows together with the repository catalog,
//! users, access grants and pull-mirror metadata that ticket queries join
//! against. Every worker thread opens its own [`IndexDb`].

#![allow(clippy::missing_errors_doc)]

mod links;
mod repos;

pub use links::{CommitTicketLink, Page};
pub(crate) use links::{delete_links, delete_links_for_repo, insert_link, links_for_repo};
pub use repos::{Mirror, NewRepository, Repository, User};

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::Connection;
use tracing::debug;

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to the link index database.
pub struct IndexDb {
    conn: Connection,
}

impl IndexDb {
    /// Open or create an index database at the given path.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create parent directories: {}", parent.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .context("Failed to set busy timeout")?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .context("Failed to apply pragmas")?;

        debug!(db = %path.display(), "index database opened");
        Ok(Self { conn })
    }

    /// Create an in-memory index database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        Ok(Self { conn })
    }

    /// Initialize the database schema.
    ///
    /// Creates all tables and indexes if they don't exist.
    pub fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;
        Ok(())
    }

    /// Get a reference to the underlying connection (for advanced queries).
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }
}

const SCHEMA_SQL: &str = r"
-- USERS
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    is_admin INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

-- REPOSITORIES
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner_id INTEGER NOT NULL REFERENCES users(id),
    owner_name TEXT NOT NULL,
    name TEXT NOT NULL,
    visibility TEXT NOT NULL DEFAULT 'public'
        CHECK (visibility IN ('public', 'limited', 'private')),
    is_empty INTEGER NOT NULL DEFAULT 0,
    is_mirror INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (owner_name, name)
);

CREATE INDEX IF NOT EXISTS idx_repositories_owner ON repositories(owner_id);

-- EXPLICIT ACCESS GRANTS
CREATE TABLE IF NOT EXISTS repo_access (
    repo_id INTEGER NOT NULL REFERENCES repositories(id) ON DELETE CASCADE,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    granted_at TEXT NOT NULL,
    PRIMARY KEY (repo_id, user_id)
);

CREATE INDEX IF NOT EXISTS idx_repo_access_user ON repo_access(user_id);

-- PULL MIRRORS
CREATE TABLE IF NOT EXISTS mirrors (
    repo_id INTEGER PRIMARY KEY REFERENCES repositories(id) ON DELETE CASCADE,
    remote_address TEXT NOT NULL,
    interval_secs INTEGER NOT NULL DEFAULT 28800,
    updated_unix INTEGER,
    next_update_unix INTEGER
);

-- COMMIT / TICKET LINKS
-- No foreign key to repositories: links are removed by the sync service,
-- possibly after the repository row itself is gone.
CREATE TABLE IF NOT EXISTS commit_ticket_links (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL,
    ticket TEXT NOT NULL,
    sha TEXT NOT NULL,
    created_unix INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_links_ticket
    ON commit_ticket_links(ticket, repo_id, created_unix);
CREATE INDEX IF NOT EXISTS idx_links_repo ON commit_ticket_links(repo_id);
";
