//! Service layer for ticketlink-core.
//!
//! Provides typed, high-level APIs for syncing repositories into the link
//! index, looking tickets up, and managing the repository and user catalog.
//! Storage and git access stay behind this interface.
//!
//! # Usage
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use std::sync::Arc;
//! use ticketlink_core::access::Principal;
//! use ticketlink_core::core::CoreContext;
//! use ticketlink_core::index::Page;
//! use ticketlink_core::scm::GitHistoryProvider;
//!
//! let history = Arc::new(GitHistoryProvider::new(PathBuf::from("/srv/repositories")));
//! let ctx = CoreContext::new(Path::new("/srv/.ticketlink/index.db"), history);
//!
//! let services = ctx.services().unwrap();
//! let aggregate = services
//!     .tickets()
//!     .find_by_ticket("PROJ-42", &Principal::Anonymous, Page::default())
//!     .unwrap();
//! ```

#![allow(clippy::missing_errors_doc)]

pub mod errors;
pub mod queue;
pub mod repos;
pub mod sync;
pub mod tickets;
pub mod users;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{CoreError, CoreResult};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::index::IndexDb;
use crate::lifecycle::ShutdownToken;
use crate::scm::HistoryProvider;

/// Context for ticketlink-core services.
///
/// Holds the index database location, the history provider, and the shutdown
/// token that in-flight syncs observe.
#[derive(Clone)]
pub struct CoreContext {
    db_path: PathBuf,
    history: Arc<dyn HistoryProvider>,
    token: ShutdownToken,
}

impl CoreContext {
    #[must_use]
    pub fn new(db_path: &Path, history: Arc<dyn HistoryProvider>) -> Self {
        Self {
            db_path: db_path.to_path_buf(),
            history,
            token: ShutdownToken::new(),
        }
    }

    /// Bind synchronous operations to an existing shutdown token.
    #[must_use]
    pub fn with_token(mut self, token: ShutdownToken) -> Self {
        self.token = token;
        self
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    #[must_use]
    pub fn history(&self) -> &dyn HistoryProvider {
        self.history.as_ref()
    }

    #[must_use]
    pub fn history_handle(&self) -> Arc<dyn HistoryProvider> {
        Arc::clone(&self.history)
    }

    #[must_use]
    pub const fn token(&self) -> &ShutdownToken {
        &self.token
    }

    /// Open the index database and make sure its schema exists.
    pub fn open_db(&self) -> CoreResult<IndexDb> {
        let db = IndexDb::open(&self.db_path)?;
        db.init_schema()?;
        Ok(db)
    }

    /// Create a `LinkServices` instance backed by this context.
    pub fn services(&self) -> CoreResult<LinkServices> {
        let db = self.open_db()?;
        Ok(LinkServices {
            ctx: self.clone(),
            db,
        })
    }
}

impl std::fmt::Debug for CoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreContext")
            .field("db_path", &self.db_path)
            .field("token", &self.token)
            .finish_non_exhaustive()
    }
}

/// Facade providing all ticketlink service APIs over one index connection.
pub struct LinkServices {
    ctx: CoreContext,
    db: IndexDb,
}

impl LinkServices {
    /// Build services over an already-open database.
    #[must_use]
    pub const fn with_db(ctx: CoreContext, db: IndexDb) -> Self {
        Self { ctx, db }
    }

    /// Access sync operations.
    #[must_use]
    pub fn sync(&self) -> sync::SyncService<'_> {
        sync::SyncService::new(&self.ctx, &self.db)
    }

    /// Access ticket lookups.
    #[must_use]
    pub fn tickets(&self) -> tickets::TicketService<'_> {
        tickets::TicketService::new(&self.ctx, &self.db)
    }

    /// Access repository catalog operations.
    #[must_use]
    pub fn repos(&self) -> repos::RepoService<'_> {
        repos::RepoService::new(&self.ctx, &self.db)
    }

    /// Access user operations.
    #[must_use]
    pub fn users(&self) -> users::UserService<'_> {
        users::UserService::new(&self.db)
    }

    /// The underlying index database.
    #[must_use]
    pub const fn db(&self) -> &IndexDb {
        &self.db
    }
}
