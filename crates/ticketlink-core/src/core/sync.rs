//! Sync service: bring a repository's links in line with its git history.

use anyhow::Context;
use serde::Serialize;
use tracing::{debug, trace};

use crate::index::{delete_links, delete_links_for_repo, insert_link, links_for_repo, IndexDb};
use crate::lifecycle::ShutdownToken;
use crate::parser::parse_commit_log;
use crate::reconcile::reconcile;
use crate::scm::{Cancellable, HistoryProvider};

use super::{CoreContext, CoreError, CoreResult};

/// Outcome of one repository sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub repo_id: i64,
    /// Ticket-bearing records found in the history.
    pub records_parsed: usize,
    pub inserted: usize,
    pub deleted: usize,
}

/// Service for sync operations.
pub struct SyncService<'a> {
    ctx: &'a CoreContext,
    db: &'a IndexDb,
}

impl<'a> SyncService<'a> {
    pub(crate) const fn new(ctx: &'a CoreContext, db: &'a IndexDb) -> Self {
        Self { ctx, db }
    }

    /// Reconcile the links of `repo_id` against its full commit history.
    pub fn sync_repository(&self, repo_id: i64) -> CoreResult<SyncReport> {
        sync_repository(self.db, self.ctx.history(), repo_id, self.ctx.token())
    }

    /// Drop every link of `repo_id`.
    pub fn delete_all_for_repository(&self, repo_id: i64) -> CoreResult<usize> {
        delete_all_for_repository(self.db, repo_id)
    }
}

/// Reconcile the links of `repo_id` against its full commit history.
///
/// The whole delta is applied in one transaction. Any failure, or a
/// cancelled `token`, leaves the index exactly as it was.
pub fn sync_repository(
    db: &IndexDb,
    history: &dyn HistoryProvider,
    repo_id: i64,
    token: &ShutdownToken,
) -> CoreResult<SyncReport> {
    let repo = db
        .get_repository(repo_id)?
        .ok_or(CoreError::RepositoryNotFound { repo_id })?;
    debug!(repo_id, repo = %repo.full_name(), "syncing ticket links");

    let log = history
        .open(&repo)
        .and_then(|h| h.commit_log())
        .with_context(|| format!("Failed to read history of {}", repo.full_name()))?;

    let records = match parse_commit_log(Cancellable::new(log, token.clone())) {
        Ok(records) => records,
        Err(_) if token.is_cancelled() => return Err(CoreError::Cancelled),
        Err(err) => return Err(err.into()),
    };
    let records_parsed = records.len();

    let tx = db
        .conn()
        .unchecked_transaction()
        .context("Failed to begin sync transaction")?;

    let persisted = links_for_repo(&tx, repo_id)?;
    let delta = reconcile(records, &persisted);

    for record in &delta.to_insert {
        if token.is_cancelled() {
            return Err(CoreError::Cancelled);
        }
        insert_link(&tx, repo_id, record)?;
    }
    let deleted = delete_links(&tx, repo_id, &delta.to_delete)?;

    if token.is_cancelled() {
        return Err(CoreError::Cancelled);
    }
    tx.commit().context("Failed to commit sync transaction")?;

    let report = SyncReport {
        repo_id,
        records_parsed,
        inserted: delta.to_insert.len(),
        deleted,
    };
    trace!(?report, "sync finished");
    Ok(report)
}

/// Drop every link of `repo_id`. Works whether or not the repository row still exists.
pub fn delete_all_for_repository(db: &IndexDb, repo_id: i64) -> CoreResult<usize> {
    let tx = db
        .conn()
        .unchecked_transaction()
        .context("Failed to begin delete transaction")?;
    let deleted = delete_links_for_repo(&tx, repo_id)?;
    tx.commit().context("Failed to commit delete transaction")?;
    debug!(repo_id, deleted, "deleted all ticket links");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Visibility;
    use crate::core::testing::{add_repo, log_line, setup_db, sha, FakeHistory};

    fn seed() -> (IndexDb, FakeHistory, i64) {
        let db = setup_db();
        let owner = db.insert_user("alice", false).expect("user");
        let repo = add_repo(&db, owner, "proj", Visibility::Public);
        (db, FakeHistory::default(), repo)
    }

    fn tickets_and_shas(db: &IndexDb, repo_id: i64) -> Vec<(String, String)> {
        let mut links: Vec<_> = db
            .links_for_repo(repo_id)
            .expect("links")
            .into_iter()
            .map(|l| (l.ticket, l.sha))
            .collect();
        links.sort();
        links
    }

    #[test]
    fn test_first_sync_indexes_ticket_commits() {
        let (db, history, repo) = seed();
        let log = [
            log_line(&sha(1), 100, "ABC-1 first"),
            log_line(&sha(2), 200, "no ticket"),
            log_line(&sha(3), 300, "ABC-2 second"),
        ]
        .concat();
        history.set_log("alice/proj", &log);

        let report = sync_repository(&db, &history, repo, &ShutdownToken::new()).expect("sync");
        assert_eq!(
            report,
            SyncReport {
                repo_id: repo,
                records_parsed: 2,
                inserted: 2,
                deleted: 0
            }
        );
        assert_eq!(
            tickets_and_shas(&db, repo),
            vec![
                ("ABC-1".to_string(), sha(1)),
                ("ABC-2".to_string(), sha(3))
            ]
        );
    }

    #[test]
    fn test_resync_without_changes_is_a_no_op() {
        let (db, history, repo) = seed();
        history.set_log("alice/proj", &log_line(&sha(1), 100, "ABC-1 first"));
        let token = ShutdownToken::new();

        sync_repository(&db, &history, repo, &token).expect("first");
        let before = db.links_for_repo(repo).expect("links");
        let report = sync_repository(&db, &history, repo, &token).expect("second");

        assert_eq!((report.inserted, report.deleted), (0, 0));
        assert_eq!(db.links_for_repo(repo).expect("links"), before);
    }

    #[test]
    fn test_rewritten_history_applies_symmetric_difference() {
        let (db, history, repo) = seed();
        let token = ShutdownToken::new();
        history.set_log(
            "alice/proj",
            &[
                log_line(&sha(1), 100, "TA-1 keep"),
                log_line(&sha(3), 300, "TC-1 drop"),
            ]
            .concat(),
        );
        sync_repository(&db, &history, repo, &token).expect("first");

        history.set_log(
            "alice/proj",
            &[
                log_line(&sha(1), 100, "TA-1 keep"),
                log_line(&sha(2), 200, "TB-1 new"),
            ]
            .concat(),
        );
        let report = sync_repository(&db, &history, repo, &token).expect("second");

        assert_eq!((report.inserted, report.deleted), (1, 1));
        assert_eq!(
            tickets_and_shas(&db, repo),
            vec![("TA-1".to_string(), sha(1)), ("TB-1".to_string(), sha(2))]
        );
    }

    #[test]
    fn test_empty_history_removes_all_links() {
        let (db, history, repo) = seed();
        let token = ShutdownToken::new();
        history.set_log("alice/proj", &log_line(&sha(1), 100, "ABC-1 first"));
        sync_repository(&db, &history, repo, &token).expect("first");

        history.set_log("alice/proj", "");
        let report = sync_repository(&db, &history, repo, &token).expect("second");
        assert_eq!(report.deleted, 1);
        assert!(db.links_for_repo(repo).expect("links").is_empty());
    }

    #[test]
    fn test_other_repositories_are_untouched() {
        let (db, history, repo) = seed();
        let owner = db.get_repository(repo).expect("get").expect("repo").owner_id;
        let other = add_repo(&db, owner, "other", Visibility::Public);
        let token = ShutdownToken::new();

        history.set_log("alice/other", &log_line(&sha(9), 100, "OTH-1 x"));
        sync_repository(&db, &history, other, &token).expect("other");
        history.set_log("alice/proj", "");
        sync_repository(&db, &history, repo, &token).expect("proj");

        assert_eq!(db.links_for_repo(other).expect("links").len(), 1);
    }

    #[test]
    fn test_failed_insert_rolls_back_everything() {
        let (db, history, repo) = seed();
        let token = ShutdownToken::new();
        history.set_log("alice/proj", &log_line(&sha(100), 1, "OLD-1 stale"));
        sync_repository(&db, &history, repo, &token).expect("first");
        let before = db.links_for_repo(repo).expect("links");

        db.conn()
            .execute_batch(
                "CREATE TRIGGER fail_fifth_insert BEFORE INSERT ON commit_ticket_links
                 WHEN (SELECT COUNT(*) FROM commit_ticket_links) >= 4
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .expect("trigger");

        let log: String = (1..=10)
            .map(|i| log_line(&sha(i), i64::from(i), &format!("NEW-{i} change")))
            .collect();
        history.set_log("alice/proj", &log);

        let err = sync_repository(&db, &history, repo, &token).expect_err("insert must fail");
        assert!(matches!(err, CoreError::Internal(_)), "unexpected error: {err}");
        assert_eq!(db.links_for_repo(repo).expect("links"), before);
    }

    #[test]
    fn test_cancelled_token_rolls_back() {
        let (db, history, repo) = seed();
        history.set_log("alice/proj", &log_line(&sha(1), 100, "ABC-1 first"));
        let token = ShutdownToken::new();
        token.cancel();

        let err = sync_repository(&db, &history, repo, &token).expect_err("cancelled");
        assert!(matches!(err, CoreError::Cancelled));
        assert!(db.links_for_repo(repo).expect("links").is_empty());
    }

    #[test]
    fn test_malformed_timestamp_aborts_without_changes() {
        let (db, history, repo) = seed();
        history.set_log("alice/proj", &format!("{} soon ABC-1 broken\n", sha(1)));

        let err = sync_repository(&db, &history, repo, &ShutdownToken::new())
            .expect_err("parse failure");
        assert!(matches!(err, CoreError::Parse(_)));
        assert!(db.links_for_repo(repo).expect("links").is_empty());
    }

    #[test]
    fn test_unknown_repository() {
        let db = setup_db();
        let err = sync_repository(&db, &FakeHistory::default(), 42, &ShutdownToken::new())
            .expect_err("missing");
        assert!(matches!(err, CoreError::RepositoryNotFound { repo_id: 42 }));
    }

    #[test]
    fn test_delete_all_for_removed_repository() {
        let (db, history, repo) = seed();
        history.set_log("alice/proj", &log_line(&sha(1), 100, "ABC-1 first"));
        sync_repository(&db, &history, repo, &ShutdownToken::new()).expect("sync");

        db.delete_repository(repo).expect("delete repo");
        assert_eq!(delete_all_for_repository(&db, repo).expect("delete links"), 1);
        assert_eq!(delete_all_for_repository(&db, repo).expect("again"), 0);
    }
}
