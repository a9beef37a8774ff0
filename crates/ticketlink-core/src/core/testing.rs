//! In-memory history provider and catalog helpers shared by service tests.

use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Cursor};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};
use chrono::DateTime;

use crate::access::Visibility;
use crate::index::{IndexDb, NewRepository, Repository};
use crate::scm::{CommitDetail, CommitHistory, HistoryProvider, SignatureStatus};

/// 40-hex SHA derived from `n`.
pub fn sha(n: u32) -> String {
    format!("{n:040x}")
}

pub fn log_line(sha: &str, unix: i64, subject: &str) -> String {
    format!("{sha} {unix} {subject}\n")
}

pub fn setup_db() -> IndexDb {
    let db = IndexDb::open_in_memory().expect("open");
    db.init_schema().expect("schema");
    db
}

pub fn add_repo(db: &IndexDb, owner_id: i64, name: &str, visibility: Visibility) -> i64 {
    let owner = db.get_user(owner_id).expect("get user").expect("owner exists");
    db.insert_repository(&NewRepository {
        owner_id,
        owner_name: owner.name,
        name: name.to_string(),
        visibility,
        is_empty: false,
    })
    .expect("insert repository")
}

#[derive(Default)]
pub struct FakeHistory {
    logs: Mutex<HashMap<String, String>>,
    commits: Mutex<HashMap<String, CommitDetail>>,
    broken: Mutex<HashSet<String>>,
    opens: AtomicUsize,
}

impl FakeHistory {
    /// Replace the commit log served for `full_name` (`owner/name`).
    pub fn set_log(&self, full_name: &str, log: &str) {
        self.logs
            .lock()
            .expect("lock")
            .insert(full_name.to_string(), log.to_string());
    }

    pub fn add_commit(&self, sha: &str, message: &str, committed_unix: i64) {
        let detail = CommitDetail {
            sha: sha.to_string(),
            author_name: "Test User".to_string(),
            author_email: "test@example.com".to_string(),
            committed_at: DateTime::from_timestamp(committed_unix, 0).expect("timestamp"),
            summary: message.lines().next().unwrap_or_default().to_string(),
            message: message.to_string(),
            signature: SignatureStatus::Unsigned,
        };
        self.commits
            .lock()
            .expect("lock")
            .insert(sha.to_string(), detail);
    }

    /// Make hydration fail for `full_name`.
    pub fn break_hydration(&self, full_name: &str) {
        self.broken
            .lock()
            .expect("lock")
            .insert(full_name.to_string());
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl HistoryProvider for FakeHistory {
    fn open(&self, repo: &Repository) -> Result<Box<dyn CommitHistory>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let name = repo.full_name();
        let log = self
            .logs
            .lock()
            .expect("lock")
            .get(&name)
            .cloned()
            .ok_or_else(|| anyhow!("no storage for {name}"))?;
        Ok(Box::new(FakeRepoHistory {
            log,
            commits: self.commits.lock().expect("lock").clone(),
            broken: self.broken.lock().expect("lock").contains(&name),
        }))
    }
}

struct FakeRepoHistory {
    log: String,
    commits: HashMap<String, CommitDetail>,
    broken: bool,
}

impl CommitHistory for FakeRepoHistory {
    fn commit_log(&self) -> Result<Box<dyn BufRead + Send>> {
        Ok(Box::new(Cursor::new(self.log.clone().into_bytes())))
    }

    fn commits_by_ids(&self, shas: &[String]) -> Result<Vec<CommitDetail>> {
        if self.broken {
            bail!("object store unreadable");
        }
        Ok(shas
            .iter()
            .filter_map(|sha| self.commits.get(sha).cloned())
            .collect())
    }

    fn is_empty(&self) -> Result<bool> {
        Ok(self.log.is_empty())
    }
}
