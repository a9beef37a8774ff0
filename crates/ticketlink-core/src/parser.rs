//! Streaming parser for ticket-bearing commit log lines.
//!
//! Input is the output of `git log --pretty=format:'%H %at %s'`: one commit
//! per line, `<sha> <unix-seconds> <subject>`. Lines whose subject does not
//! start with a ticket reference are skipped. An empty line ends the stream,
//! even if more bytes follow.

use std::io::{BufRead, Read};
use std::num::ParseIntError;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::reconcile::{LinkKey, Linked};

/// Longest accepted log line, excluding the newline.
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

// Zero leading letters is accepted on purpose (`-123` is a ticket).
static TICKET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[A-Z]*-[0-9]+").expect("ticket pattern is a valid regex")
});

/// Errors produced while parsing a commit log stream.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The timestamp field of a ticket-bearing line is not an integer.
    #[error("malformed timestamp '{value}' for commit {sha}")]
    MalformedTimestamp {
        sha: String,
        value: String,
        #[source]
        source: ParseIntError,
    },

    /// A single line is longer than [`MAX_LINE_BYTES`].
    #[error("commit log line exceeds {limit} bytes")]
    LineTooLong { limit: usize },

    /// The underlying stream failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One ticket reference found in the commit log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedCommitRecord {
    pub sha: String,
    pub ticket: String,
    pub created_unix: i64,
}

impl Linked for ParsedCommitRecord {
    fn key(&self) -> LinkKey<'_> {
        LinkKey::new(&self.ticket, &self.sha)
    }
}

/// Extract the ticket reference at the start of a commit subject.
#[must_use]
pub fn extract_ticket(message: &str) -> Option<&str> {
    TICKET_PATTERN.find(message).map(|m| m.as_str())
}

/// Lazy iterator of [`ParsedCommitRecord`] over a commit log stream.
///
/// The iterator is fused: after the end of input, the terminating blank line
/// or the first error, it yields `None` forever.
pub struct CommitLogParser<R> {
    reader: R,
    line: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> CommitLogParser<R> {
    pub const fn new(reader: R) -> Self {
        Self {
            reader,
            line: Vec::new(),
            finished: false,
        }
    }

    /// Read the next raw line into `self.line`. Returns `false` at end of input.
    fn read_line(&mut self) -> Result<bool, ParseError> {
        self.line.clear();

        let limit = MAX_LINE_BYTES as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.line)?;
        if read == 0 {
            return Ok(false);
        }

        if self.line.last() == Some(&b'\n') {
            self.line.pop();
        } else if self.line.len() > MAX_LINE_BYTES {
            return Err(ParseError::LineTooLong {
                limit: MAX_LINE_BYTES,
            });
        }

        Ok(true)
    }

    fn next_record(&mut self) -> Result<Option<ParsedCommitRecord>, ParseError> {
        loop {
            if !self.read_line()? || self.line.is_empty() {
                return Ok(None);
            }

            let line = String::from_utf8_lossy(&self.line);
            let mut fields = line.splitn(3, ' ');
            let sha = fields.next().unwrap_or_default();
            let timestamp = fields.next().unwrap_or_default();
            let message = fields.next().unwrap_or_default();

            let Some(ticket) = extract_ticket(message) else {
                continue;
            };

            let created_unix =
                timestamp
                    .parse::<i64>()
                    .map_err(|source| ParseError::MalformedTimestamp {
                        sha: sha.to_string(),
                        value: timestamp.to_string(),
                        source,
                    })?;

            return Ok(Some(ParsedCommitRecord {
                sha: sha.to_string(),
                ticket: ticket.to_string(),
                created_unix,
            }));
        }
    }
}

impl<R: BufRead> Iterator for CommitLogParser<R> {
    type Item = Result<ParsedCommitRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(err) => {
                self.finished = true;
                Some(Err(err))
            }
        }
    }
}

/// Parse a whole stream, stopping at the first error.
pub fn parse_commit_log(reader: impl BufRead) -> Result<Vec<ParsedCommitRecord>, ParseError> {
    CommitLogParser::new(reader).collect()
}
