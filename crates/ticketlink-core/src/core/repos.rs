//! Repository catalog service and the lifecycle hooks that drive syncs.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};

use crate::access::Visibility;
use crate::index::{IndexDb, NewRepository, Repository};

use super::sync::{delete_all_for_repository, sync_repository, SyncReport};
use super::{CoreContext, CoreError, CoreResult};

/// Request to register a repository.
#[derive(Debug, Clone)]
pub struct RegisterRepository {
    pub owner_id: i64,
    pub name: String,
    pub visibility: Visibility,
    /// Upstream address if this is a pull mirror.
    pub mirror: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterReport {
    pub repository: Repository,
    /// Absent when the repository has no commits yet.
    pub sync: Option<SyncReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoveReport {
    pub repo_id: i64,
    pub links_deleted: usize,
    pub repository_removed: bool,
}

/// Service for repository catalog operations.
pub struct RepoService<'a> {
    ctx: &'a CoreContext,
    db: &'a IndexDb,
}

impl<'a> RepoService<'a> {
    pub(crate) const fn new(ctx: &'a CoreContext, db: &'a IndexDb) -> Self {
        Self { ctx, db }
    }

    pub fn get(&self, repo_id: i64) -> CoreResult<Repository> {
        self.db
            .get_repository(repo_id)?
            .ok_or(CoreError::RepositoryNotFound { repo_id })
    }

    pub fn list(&self) -> CoreResult<Vec<Repository>> {
        Ok(self.db.list_repositories()?)
    }

    /// Register a repository that already exists on disk, then index it.
    pub fn register(&self, request: &RegisterRepository) -> CoreResult<RegisterReport> {
        let owner = self
            .db
            .get_user(request.owner_id)?
            .ok_or(CoreError::UserNotFound {
                user_id: request.owner_id,
            })?;

        let repo_id = self.db.insert_repository(&NewRepository {
            owner_id: owner.id,
            owner_name: owner.name,
            name: request.name.clone(),
            visibility: request.visibility,
            is_empty: false,
        })?;

        let is_empty = match self.refresh_emptiness(repo_id) {
            Ok(is_empty) => is_empty,
            Err(err) => {
                self.db.delete_repository(repo_id)?;
                return Err(err);
            }
        };
        if let Some(remote) = &request.mirror {
            self.db.upsert_mirror(repo_id, remote)?;
        }

        let sync = if is_empty {
            None
        } else {
            Some(sync_repository(
                self.db,
                self.ctx.history(),
                repo_id,
                self.ctx.token(),
            )?)
        };

        let repository = self.get(repo_id)?;
        info!(repo_id, repo = %repository.full_name(), "repository registered");
        Ok(RegisterReport { repository, sync })
    }

    /// Record a finished mirror fetch and re-sync the repository.
    pub fn mirror_updated(&self, repo_id: i64) -> CoreResult<Option<SyncReport>> {
        self.get(repo_id)?;
        self.db.record_mirror_update(repo_id, Utc::now().timestamp())?;

        if self.refresh_emptiness(repo_id)? {
            debug!(repo_id, "mirror still empty, nothing to sync");
            return Ok(None);
        }
        sync_repository(self.db, self.ctx.history(), repo_id, self.ctx.token()).map(Some)
    }

    /// Delete every link of the repository, then the repository itself.
    ///
    /// Link deletion happens even if the repository row is already gone.
    pub fn remove(&self, repo_id: i64) -> CoreResult<RemoveReport> {
        let links_deleted = delete_all_for_repository(self.db, repo_id)?;
        let repository_removed = self.db.delete_repository(repo_id)?;
        info!(repo_id, links_deleted, repository_removed, "repository removed");
        Ok(RemoveReport {
            repo_id,
            links_deleted,
            repository_removed,
        })
    }

    pub fn grant_access(&self, repo_id: i64, user_id: i64) -> CoreResult<()> {
        self.get(repo_id)?;
        if self.db.get_user(user_id)?.is_none() {
            return Err(CoreError::UserNotFound { user_id });
        }
        self.db.grant_access(repo_id, user_id)?;
        Ok(())
    }

    fn refresh_emptiness(&self, repo_id: i64) -> CoreResult<bool> {
        let repo = self.get(repo_id)?;
        let is_empty = self.ctx.history().open(&repo)?.is_empty()?;
        if is_empty != repo.is_empty {
            self.db.set_repository_empty(repo_id, is_empty)?;
        }
        Ok(is_empty)
    }
}
