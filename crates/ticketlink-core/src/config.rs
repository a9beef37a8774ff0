//! Runtime settings: command-line value, then environment, then default.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::index::Page;

pub const DB_ENV: &str = "TICKETLINK_DB";
pub const REPOS_ROOT_ENV: &str = "TICKETLINK_REPOS_ROOT";
pub const WORKERS_ENV: &str = "TICKETLINK_WORKERS";
pub const PAGE_SIZE_ENV: &str = "TICKETLINK_PAGE_SIZE";

pub const DEFAULT_DB_PATH: &str = ".ticketlink/index.db";
pub const DEFAULT_REPOS_ROOT: &str = "repositories";
pub const DEFAULT_WORKERS: usize = 4;

/// Name of the repository sync queue.
pub const SYNC_QUEUE_NAME: &str = "ticket_links_sync";

/// Values supplied on the command line, if any.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub db_path: Option<PathBuf>,
    pub repos_root: Option<PathBuf>,
    pub workers: Option<usize>,
    pub page_size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub db_path: PathBuf,
    pub repos_root: PathBuf,
    pub workers: usize,
    pub page_size: usize,
}

impl Settings {
    /// Resolve against the process environment.
    pub fn resolve(overrides: Overrides) -> Result<Self> {
        Self::resolve_with(overrides, |key| std::env::var(key).ok())
    }

    /// Resolve against an arbitrary environment lookup.
    pub fn resolve_with(
        overrides: Overrides,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let db_path = overrides
            .db_path
            .or_else(|| env(DB_ENV).filter(|v| !v.trim().is_empty()).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let repos_root = overrides
            .repos_root
            .or_else(|| {
                env(REPOS_ROOT_ENV)
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from)
            })
            .unwrap_or_else(|| PathBuf::from(DEFAULT_REPOS_ROOT));

        let workers = match overrides.workers {
            Some(n) => n,
            None => match env(WORKERS_ENV) {
                Some(raw) => raw.trim().parse::<usize>().with_context(|| {
                    format!("Invalid {WORKERS_ENV} value '{raw}'. Expected a positive integer")
                })?,
                None => DEFAULT_WORKERS,
            },
        };
        if workers == 0 {
            bail!("Worker count must be at least 1");
        }

        let page_size = match overrides.page_size {
            Some(n) => n,
            None => match env(PAGE_SIZE_ENV) {
                Some(raw) => raw.trim().parse::<i64>().with_context(|| {
                    format!("Invalid {PAGE_SIZE_ENV} value '{raw}'. Expected an integer")
                })?,
                None => 0,
            },
        };
        let page_size = usize::try_from(page_size)
            .ok()
            .filter(|size| *size > 0)
            .unwrap_or(Page::DEFAULT_SIZE);

        Ok(Self {
            db_path,
            repos_root,
            workers,
            page_size,
        })
    }
}
