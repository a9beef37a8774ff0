//! Commit/ticket link rows.

use anyhow::{Context, Result};
use rusqlite::{params, params_from_iter, Connection, Row};
use serde::Serialize;

use super::IndexDb;
use crate::access::AccessScope;
use crate::parser::ParsedCommitRecord;
use crate::reconcile::{LinkKey, Linked, Persisted};

/// Upper bound on ids bound into a single `DELETE ... IN (...)`.
const DELETE_CHUNK: usize = 500;

/// A persisted link between a commit and a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitTicketLink {
    pub id: i64,
    pub repo_id: i64,
    pub ticket: String,
    pub sha: String,
    pub created_unix: i64,
}

impl CommitTicketLink {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            repo_id: row.get(1)?,
            ticket: row.get(2)?,
            sha: row.get(3)?,
            created_unix: row.get(4)?,
        })
    }
}

impl Linked for CommitTicketLink {
    fn key(&self) -> LinkKey<'_> {
        LinkKey::new(&self.ticket, &self.sha)
    }
}

impl Persisted for CommitTicketLink {
    fn row_id(&self) -> i64 {
        self.id
    }
}

/// One page of a ticket query, 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    number: usize,
    size: usize,
}

impl Page {
    pub const DEFAULT_SIZE: usize = 50;

    /// Normalize raw request values: page `<= 0` becomes 1, size `<= 0`
    /// becomes `default_size`.
    #[must_use]
    pub fn new(number: i64, size: i64, default_size: usize) -> Self {
        let number = usize::try_from(number).ok().filter(|n| *n > 0).unwrap_or(1);
        let size = usize::try_from(size)
            .ok()
            .filter(|s| *s > 0)
            .unwrap_or(default_size.max(1));
        Self { number, size }
    }

    #[must_use]
    pub const fn number(&self) -> usize {
        self.number
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn offset(&self) -> usize {
        self.number.saturating_sub(1).saturating_mul(self.size)
    }
}

impl Default for Page {
    fn default() -> Self {
        Self {
            number: 1,
            size: Self::DEFAULT_SIZE,
        }
    }
}

const LINK_COLUMNS: &str = "id, repo_id, ticket, sha, created_unix";

/// Insert a link for `repo_id`, returning the new row id.
pub(crate) fn insert_link(
    conn: &Connection,
    repo_id: i64,
    record: &ParsedCommitRecord,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO commit_ticket_links (repo_id, ticket, sha, created_unix)
         VALUES (?, ?, ?, ?)",
        params![repo_id, record.ticket, record.sha, record.created_unix],
    )
    .with_context(|| {
        format!(
            "Failed to insert link {} -> {} for repository {repo_id}",
            record.ticket, record.sha
        )
    })?;
    Ok(conn.last_insert_rowid())
}

/// All links of a repository, newest first.
pub(crate) fn links_for_repo(conn: &Connection, repo_id: i64) -> Result<Vec<CommitTicketLink>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {LINK_COLUMNS} FROM commit_ticket_links
             WHERE repo_id = ?
             ORDER BY created_unix DESC, id DESC"
        ))
        .context("Failed to prepare links_for_repo query")?;

    let rows = stmt
        .query_map(params![repo_id], CommitTicketLink::from_row)
        .context("Failed to query links for repository")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read link row")
}

/// Delete the given link ids, restricted to `repo_id`.
pub(crate) fn delete_links(conn: &Connection, repo_id: i64, ids: &[i64]) -> Result<usize> {
    let mut deleted = 0;
    for chunk in ids.chunks(DELETE_CHUNK) {
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "DELETE FROM commit_ticket_links WHERE repo_id = ? AND id IN ({placeholders})"
        );
        let values = std::iter::once(repo_id).chain(chunk.iter().copied());
        deleted += conn
            .execute(&sql, params_from_iter(values))
            .with_context(|| format!("Failed to delete links for repository {repo_id}"))?;
    }
    Ok(deleted)
}

/// Delete every link of a repository.
pub(crate) fn delete_links_for_repo(conn: &Connection, repo_id: i64) -> Result<usize> {
    conn.execute(
        "DELETE FROM commit_ticket_links WHERE repo_id = ?",
        params![repo_id],
    )
    .with_context(|| format!("Failed to delete all links for repository {repo_id}"))
}

impl IndexDb {
    /// All links currently indexed for a repository.
    pub fn links_for_repo(&self, repo_id: i64) -> Result<Vec<CommitTicketLink>> {
        links_for_repo(&self.conn, repo_id)
    }

    /// Count links for `ticket` in repositories visible within `scope`.
    pub fn count_links_for_ticket(&self, ticket: &str, scope: &AccessScope) -> Result<usize> {
        let (predicate, scope_params) = scope.repo_predicate("repo_id");
        let sql = format!(
            "SELECT COUNT(*) FROM commit_ticket_links WHERE ticket = ? AND {predicate}"
        );

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(ticket.to_string())];
        values.extend(
            scope_params
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn rusqlite::ToSql>),
        );
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(AsRef::as_ref).collect();

        let count: i64 = self
            .conn
            .query_row(&sql, params.as_slice(), |row| row.get(0))
            .with_context(|| format!("Failed to count links for ticket {ticket}"))?;

        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// One page of links for `ticket`, ordered by repository then commit time.
    pub fn find_links_for_ticket(
        &self,
        ticket: &str,
        scope: &AccessScope,
        page: Page,
    ) -> Result<Vec<CommitTicketLink>> {
        let (predicate, scope_params) = scope.repo_predicate("repo_id");
        let sql = format!(
            "SELECT {LINK_COLUMNS} FROM commit_ticket_links
             WHERE ticket = ? AND {predicate}
             ORDER BY repo_id ASC, created_unix ASC, id ASC
             LIMIT ? OFFSET ?"
        );

        let limit = i64::try_from(page.size()).unwrap_or(i64::MAX);
        let offset = i64::try_from(page.offset()).unwrap_or(i64::MAX);

        let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(ticket.to_string())];
        values.extend(
            scope_params
                .into_iter()
                .map(|p| Box::new(p) as Box<dyn rusqlite::ToSql>),
        );
        values.push(Box::new(limit));
        values.push(Box::new(offset));
        let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(AsRef::as_ref).collect();

        let mut stmt = self
            .conn
            .prepare(&sql)
            .context("Failed to prepare find_links_for_ticket query")?;

        let rows = stmt
            .query_map(params.as_slice(), CommitTicketLink::from_row)
            .with_context(|| format!("Failed to query links for ticket {ticket}"))?;

        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read link row")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Visibility;
    use crate::index::NewRepository;

    fn setup() -> IndexDb {
        let db = IndexDb::open_in_memory().expect("open");
        db.init_schema().expect("schema");
        db
    }

    fn record(ticket: &str, sha: &str, created_unix: i64) -> ParsedCommitRecord {
        ParsedCommitRecord {
            sha: sha.to_string(),
            ticket: ticket.to_string(),
            created_unix,
        }
    }

    fn add_repo(db: &IndexDb, owner_id: i64, name: &str, visibility: Visibility) -> i64 {
        db.insert_repository(&NewRepository {
            owner_id,
            owner_name: "owner".to_string(),
            name: name.to_string(),
            visibility,
            is_empty: false,
        })
        .expect("insert repository")
    }

    #[test]
    fn test_insert_and_load_links() {
        let db = setup();
        insert_link(db.conn(), 1, &record("A-1", "aaa", 10)).expect("insert");
        insert_link(db.conn(), 1, &record("A-2", "bbb", 20)).expect("insert");
        insert_link(db.conn(), 2, &record("A-1", "ccc", 30)).expect("insert");

        let links = db.links_for_repo(1).expect("load");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].sha, "bbb");
        assert!(links.iter().all(|l| l.repo_id == 1));
    }

    #[test]
    fn test_delete_links_is_scoped_to_repository() {
        let db = setup();
        let a = insert_link(db.conn(), 1, &record("A-1", "aaa", 10)).expect("insert");
        let b = insert_link(db.conn(), 2, &record("A-1", "bbb", 10)).expect("insert");

        let deleted = delete_links(db.conn(), 1, &[a, b]).expect("delete");
        assert_eq!(deleted, 1);
        assert_eq!(db.links_for_repo(2).expect("load").len(), 1);
    }

    #[test]
    fn test_delete_links_handles_many_ids() {
        let db = setup();
        let ids: Vec<i64> = (0..1200)
            .map(|i| {
                insert_link(db.conn(), 1, &record("A-1", &format!("sha{i}"), i)).expect("insert")
            })
            .collect();

        let deleted = delete_links(db.conn(), 1, &ids).expect("delete");
        assert_eq!(deleted, 1200);
        assert!(db.links_for_repo(1).expect("load").is_empty());
    }

    #[test]
    fn test_delete_links_for_repo() {
        let db = setup();
        insert_link(db.conn(), 1, &record("A-1", "aaa", 10)).expect("insert");
        insert_link(db.conn(), 1, &record("A-2", "bbb", 10)).expect("insert");
        insert_link(db.conn(), 2, &record("A-3", "ccc", 10)).expect("insert");

        assert_eq!(delete_links_for_repo(db.conn(), 1).expect("delete"), 2);
        assert!(db.links_for_repo(1).expect("load").is_empty());
        assert_eq!(db.links_for_repo(2).expect("load").len(), 1);
    }

    #[test]
    fn test_ticket_queries_respect_scope_and_order() {
        let db = setup();
        let alice = db.insert_user("alice", false).expect("user");
        let bob = db.insert_user("bob", false).expect("user");

        let public = add_repo(&db, alice, "public", Visibility::Public);
        let limited = add_repo(&db, alice, "limited", Visibility::Limited);
        let private = add_repo(&db, alice, "private", Visibility::Private);

        insert_link(db.conn(), private, &record("T-1", "p1", 5)).expect("insert");
        insert_link(db.conn(), limited, &record("T-1", "l1", 7)).expect("insert");
        insert_link(db.conn(), public, &record("T-1", "u2", 9)).expect("insert");
        insert_link(db.conn(), public, &record("T-1", "u1", 3)).expect("insert");
        insert_link(db.conn(), public, &record("T-2", "other", 1)).expect("insert");

        let anonymous = AccessScope::PublicOnly;
        assert_eq!(db.count_links_for_ticket("T-1", &anonymous).expect("count"), 2);

        let as_bob = AccessScope::SignedIn { user_id: bob };
        assert_eq!(db.count_links_for_ticket("T-1", &as_bob).expect("count"), 3);

        let as_alice = AccessScope::SignedIn { user_id: alice };
        assert_eq!(db.count_links_for_ticket("T-1", &as_alice).expect("count"), 4);

        db.grant_access(private, bob).expect("grant");
        assert_eq!(db.count_links_for_ticket("T-1", &as_bob).expect("count"), 4);

        let links = db
            .find_links_for_ticket("T-1", &AccessScope::All, Page::default())
            .expect("find");
        let order: Vec<&str> = links.iter().map(|l| l.sha.as_str()).collect();
        assert_eq!(order, vec!["u1", "u2", "l1", "p1"]);
    }

    #[test]
    fn test_find_links_paginates() {
        let db = setup();
        for i in 0..5 {
            insert_link(db.conn(), 1, &record("T-1", &format!("s{i}"), i)).expect("insert");
        }

        let page = Page { number: 2, size: 2 };
        let links = db
            .find_links_for_ticket("T-1", &AccessScope::All, page)
            .expect("find");
        let shas: Vec<&str> = links.iter().map(|l| l.sha.as_str()).collect();
        assert_eq!(shas, vec!["s2", "s3"]);
    }

    #[test]
    fn test_page_normalization() {
        assert_eq!(Page::new(0, 0, 50), Page { number: 1, size: 50 });
        assert_eq!(Page::new(-3, 10, 50), Page { number: 1, size: 10 });
        assert_eq!(Page::new(3, 20, 50).offset(), 40);
    }

    #[test]
    fn test_page_zero_offset_is_first_page() {
        let page = Page { number: 0, size: 10 };
        assert_eq!(page.offset(), 0);
    }
}
