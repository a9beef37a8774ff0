//! Repository catalog, users, access grants and pull mirrors.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::IndexDb;
use crate::access::Visibility;

/// A user that can own repositories and query tickets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub is_admin: bool,
    pub created_at: String,
}

/// A repository known to the index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub id: i64,
    pub owner_id: i64,
    pub owner_name: String,
    pub name: String,
    pub visibility: Visibility,
    pub is_empty: bool,
    pub is_mirror: bool,
    pub created_at: String,
}

impl Repository {
    /// `owner/name`.
    #[must_use]
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner_name, self.name)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let visibility: String = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            owner_id: row.get(1)?,
            owner_name: row.get(2)?,
            name: row.get(3)?,
            visibility: Visibility::parse(&visibility).unwrap_or(Visibility::Private),
            is_empty: row.get(5)?,
            is_mirror: row.get(6)?,
            created_at: row.get(7)?,
        })
    }
}

/// Fields needed to register a repository.
#[derive(Debug, Clone)]
pub struct NewRepository {
    pub owner_id: i64,
    pub owner_name: String,
    pub name: String,
    pub visibility: Visibility,
    pub is_empty: bool,
}

/// Pull-mirror metadata of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mirror {
    pub repo_id: i64,
    pub remote_address: String,
    pub interval_secs: i64,
    pub updated_unix: Option<i64>,
    pub next_update_unix: Option<i64>,
}

const REPO_COLUMNS: &str =
    "id, owner_id, owner_name, name, visibility, is_empty, is_mirror, created_at";

impl IndexDb {
    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    pub fn insert_user(&self, name: &str, is_admin: bool) -> Result<i64> {
        if name.trim().is_empty() {
            bail!("User name cannot be empty");
        }
        self.conn
            .execute(
                "INSERT INTO users (name, is_admin, created_at) VALUES (?, ?, ?)",
                params![name, is_admin, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("Failed to insert user {name}"))?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.conn
            .query_row(
                "SELECT id, name, is_admin, created_at FROM users WHERE id = ?",
                params![id],
                |row| {
                    Ok(User {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        is_admin: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to query user {id}"))
    }

    // ------------------------------------------------------------------------
    // Repositories
    // ------------------------------------------------------------------------

    pub fn insert_repository(&self, repo: &NewRepository) -> Result<i64> {
        self.conn
            .execute(
                "INSERT INTO repositories (owner_id, owner_name, name, visibility, is_empty, created_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
                params![
                    repo.owner_id,
                    repo.owner_name,
                    repo.name,
                    repo.visibility.as_str(),
                    repo.is_empty,
                    Utc::now().to_rfc3339(),
                ],
            )
            .with_context(|| {
                format!("Failed to insert repository {}/{}", repo.owner_name, repo.name)
            })?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        self.conn
            .query_row(
                &format!("SELECT {REPO_COLUMNS} FROM repositories WHERE id = ?"),
                params![id],
                Repository::from_row,
            )
            .optional()
            .with_context(|| format!("Failed to query repository {id}"))
    }

    pub fn list_repositories(&self) -> Result<Vec<Repository>> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {REPO_COLUMNS} FROM repositories ORDER BY id"))
            .context("Failed to prepare list_repositories query")?;

        let rows = stmt
            .query_map([], Repository::from_row)
            .context("Failed to query repositories")?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read repository row")
    }

    /// Visit every non-empty repository in id order.
    ///
    /// Rows are read one at a time from the cursor, so the catalog is never
    /// held in memory as a whole. Stops at the first callback error.
    pub fn for_each_non_empty_repository(
        &self,
        mut visit: impl FnMut(&Repository) -> Result<()>,
    ) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {REPO_COLUMNS} FROM repositories WHERE is_empty = 0 ORDER BY id"
            ))
            .context("Failed to prepare repository iteration")?;

        let mut rows = stmt.query([]).context("Failed to iterate repositories")?;
        let mut visited = 0;
        while let Some(row) = rows.next().context("Failed to read repository row")? {
            let repo = Repository::from_row(row).context("Failed to decode repository row")?;
            visit(&repo)?;
            visited += 1;
        }
        Ok(visited)
    }

    pub fn set_repository_empty(&self, id: i64, is_empty: bool) -> Result<()> {
        self.conn
            .execute(
                "UPDATE repositories SET is_empty = ? WHERE id = ?",
                params![is_empty, id],
            )
            .with_context(|| format!("Failed to update repository {id}"))?;
        Ok(())
    }

    /// Remove a repository row. Grants and mirror metadata cascade.
    pub fn delete_repository(&self, id: i64) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM repositories WHERE id = ?", params![id])
            .with_context(|| format!("Failed to delete repository {id}"))?;
        Ok(affected > 0)
    }

    pub fn grant_access(&self, repo_id: i64, user_id: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR IGNORE INTO repo_access (repo_id, user_id, granted_at) VALUES (?, ?, ?)",
                params![repo_id, user_id, Utc::now().to_rfc3339()],
            )
            .with_context(|| format!("Failed to grant user {user_id} access to {repo_id}"))?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Mirrors
    // ------------------------------------------------------------------------

    /// Mark a repository as a pull mirror of `remote_address`.
    pub fn upsert_mirror(&self, repo_id: i64, remote_address: &str) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin mirror transaction")?;
        tx.execute(
            "INSERT INTO mirrors (repo_id, remote_address) VALUES (?, ?)
             ON CONFLICT (repo_id) DO UPDATE SET remote_address = excluded.remote_address",
            params![repo_id, remote_address],
        )
        .with_context(|| format!("Failed to store mirror for repository {repo_id}"))?;
        tx.execute(
            "UPDATE repositories SET is_mirror = 1 WHERE id = ?",
            params![repo_id],
        )
        .with_context(|| format!("Failed to flag repository {repo_id} as mirror"))?;
        tx.commit().context("Failed to commit mirror")?;
        Ok(())
    }

    pub fn get_mirror(&self, repo_id: i64) -> Result<Option<Mirror>> {
        self.conn
            .query_row(
                "SELECT repo_id, remote_address, interval_secs, updated_unix, next_update_unix
                 FROM mirrors WHERE repo_id = ?",
                params![repo_id],
                |row| {
                    Ok(Mirror {
                        repo_id: row.get(0)?,
                        remote_address: row.get(1)?,
                        interval_secs: row.get(2)?,
                        updated_unix: row.get(3)?,
                        next_update_unix: row.get(4)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("Failed to query mirror of repository {repo_id}"))
    }

    /// Record a completed mirror fetch at `now_unix` and schedule the next one.
    pub fn record_mirror_update(&self, repo_id: i64, now_unix: i64) -> Result<()> {
        let affected = self
            .conn
            .execute(
                "UPDATE mirrors SET updated_unix = ?1, next_update_unix = ?1 + interval_secs
                 WHERE repo_id = ?2",
                params![now_unix, repo_id],
            )
            .with_context(|| format!("Failed to record mirror update for {repo_id}"))?;
        if affected == 0 {
            bail!("Repository {repo_id} is not a pull mirror");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (IndexDb, i64) {
        let db = IndexDb::open_in_memory().expect("open");
        db.init_schema().expect("schema");
        let owner = db.insert_user("alice", false).expect("user");
        (db, owner)
    }

    fn new_repo(owner_id: i64, name: &str, is_empty: bool) -> NewRepository {
        NewRepository {
            owner_id,
            owner_name: "alice".to_string(),
            name: name.to_string(),
            visibility: Visibility::Public,
            is_empty,
        }
    }

    #[test]
    fn test_repository_roundtrip() {
        let (db, owner) = setup();
        let id = db.insert_repository(&new_repo(owner, "proj", false)).expect("insert");

        let repo = db.get_repository(id).expect("get").expect("exists");
        assert_eq!(repo.full_name(), "alice/proj");
        assert_eq!(repo.visibility, Visibility::Public);
        assert!(!repo.is_mirror);
        assert!(db.get_repository(id + 100).expect("get").is_none());
    }

    #[test]
    fn test_duplicate_repository_name_rejected() {
        let (db, owner) = setup();
        db.insert_repository(&new_repo(owner, "proj", false)).expect("insert");
        assert!(db.insert_repository(&new_repo(owner, "proj", false)).is_err());
    }

    #[test]
    fn test_for_each_non_empty_repository_skips_empty() {
        let (db, owner) = setup();
        let a = db.insert_repository(&new_repo(owner, "a", false)).expect("a");
        db.insert_repository(&new_repo(owner, "b", true)).expect("b");
        let c = db.insert_repository(&new_repo(owner, "c", false)).expect("c");

        let mut seen = Vec::new();
        let visited = db
            .for_each_non_empty_repository(|repo| {
                seen.push(repo.id);
                Ok(())
            })
            .expect("iterate");

        assert_eq!(visited, 2);
        assert_eq!(seen, vec![a, c]);
    }

    #[test]
    fn test_for_each_stops_on_callback_error() {
        let (db, owner) = setup();
        db.insert_repository(&new_repo(owner, "a", false)).expect("a");
        db.insert_repository(&new_repo(owner, "b", false)).expect("b");

        let mut calls = 0;
        let result = db.for_each_non_empty_repository(|_| {
            calls += 1;
            bail!("stop")
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_mirror_lifecycle() {
        let (db, owner) = setup();
        let id = db.insert_repository(&new_repo(owner, "m", false)).expect("insert");
        assert!(db.record_mirror_update(id, 100).is_err());

        db.upsert_mirror(id, "https://example.com/m.git").expect("mirror");
        assert!(db.get_repository(id).expect("get").expect("exists").is_mirror);

        db.record_mirror_update(id, 1_000).expect("update");
        let mirror = db.get_mirror(id).expect("get").expect("exists");
        assert_eq!(mirror.updated_unix, Some(1_000));
        assert_eq!(mirror.next_update_unix, Some(1_000 + mirror.interval_secs));
    }

    #[test]
    fn test_delete_repository_cascades_grants_and_mirror() {
        let (db, owner) = setup();
        let bob = db.insert_user("bob", false).expect("bob");
        let id = db.insert_repository(&new_repo(owner, "gone", false)).expect("insert");
        db.grant_access(id, bob).expect("grant");
        db.upsert_mirror(id, "https://example.com/gone.git").expect("mirror");

        assert!(db.delete_repository(id).expect("delete"));
        assert!(db.get_mirror(id).expect("mirror").is_none());

        let grants: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM repo_access", [], |row| row.get(0))
            .expect("count");
        assert_eq!(grants, 0);
    }

    #[test]
    fn test_user_roundtrip() {
        let (db, _) = setup();
        let id = db.insert_user("root", true).expect("insert");
        let user = db.get_user(id).expect("get").expect("exists");
        assert!(user.is_admin);
        assert!(db.insert_user("  ", false).is_err());
    }
}
