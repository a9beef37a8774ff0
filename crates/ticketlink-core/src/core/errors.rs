//! Typed error types for the ticketlink-core service layer.

use thiserror::Error;

use crate::parser::ParseError;

/// Result type alias for core service operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in the ticketlink-core service layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// No repository row with this id.
    #[error("Repository not found: {repo_id}")]
    RepositoryNotFound { repo_id: i64 },

    /// No user row with this id.
    #[error("User not found: {user_id}")]
    UserNotFound { user_id: i64 },

    /// The commit log could not be parsed.
    #[error("Failed to parse commit log: {0}")]
    Parse(#[from] ParseError),

    /// The operation observed shutdown and rolled back.
    #[error("Operation cancelled by shutdown")]
    Cancelled,

    /// A queue worker thread could not be started.
    #[error("Failed to start queue {name}: {source}")]
    QueueInit {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// An internal storage or version-control error.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
