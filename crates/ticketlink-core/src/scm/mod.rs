use std::io::{self, BufRead, Read};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::index::Repository;
use crate::lifecycle::ShutdownToken;

pub mod git;

pub use git::{GitHistoryProvider, GitRepo};

/// Opens the version-control history of a repository.
pub trait HistoryProvider: Send + Sync {
    fn open(&self, repo: &Repository) -> Result<Box<dyn CommitHistory>>;
}

/// Read access to one repository's commit history.
pub trait CommitHistory {
    /// Stream of `<sha> <unix-seconds> <subject>` lines across all refs.
    fn commit_log(&self) -> Result<Box<dyn BufRead + Send>>;

    /// Hydrate the given SHAs, in request order. Unknown SHAs are skipped.
    fn commits_by_ids(&self, shas: &[String]) -> Result<Vec<CommitDetail>>;

    fn is_empty(&self) -> Result<bool>;
}

/// A fully hydrated commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitDetail {
    pub sha: String,
    pub author_name: String,
    pub author_email: String,
    pub committed_at: DateTime<Utc>,
    pub summary: String,
    pub message: String,
    pub signature: SignatureStatus,
}

/// Signature verification state, as reported by git's `%G?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureStatus {
    Good,
    Bad,
    UnknownValidity,
    ExpiredSignature,
    ExpiredKey,
    RevokedKey,
    MissingKey,
    Unsigned,
}

impl SignatureStatus {
    #[must_use]
    pub const fn from_code(code: char) -> Self {
        match code {
            'G' => Self::Good,
            'B' => Self::Bad,
            'U' => Self::UnknownValidity,
            'X' => Self::ExpiredSignature,
            'Y' => Self::ExpiredKey,
            'R' => Self::RevokedKey,
            'E' => Self::MissingKey,
            _ => Self::Unsigned,
        }
    }

    #[must_use]
    pub const fn is_verified(self) -> bool {
        matches!(self, Self::Good | Self::UnknownValidity)
    }
}

/// Wraps a reader so that reads fail once `token` is cancelled.
pub struct Cancellable<R> {
    inner: R,
    token: ShutdownToken,
}

impl<R> Cancellable<R> {
    pub const fn new(inner: R, token: ShutdownToken) -> Self {
        Self { inner, token }
    }

    fn check(&self) -> io::Result<()> {
        if self.token.is_cancelled() {
            return Err(io::Error::other("sync cancelled"));
        }
        Ok(())
    }
}

impl<R: Read> Read for Cancellable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check()?;
        self.inner.read(buf)
    }
}

impl<R: BufRead> BufRead for Cancellable<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.check()?;
        self.inner.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.inner.consume(amt);
    }
}

/// Reject anything that is not a plausible hex object id.
pub fn validate_sha(sha: &str) -> Result<()> {
    if sha.len() < 4 || sha.len() > 64 {
        bail!("Invalid commit id length: {sha}");
    }
    if !sha.bytes().all(|b| b.is_ascii_hexdigit()) {
        bail!("Commit id must be hexadecimal: {sha}");
    }
    Ok(())
}
