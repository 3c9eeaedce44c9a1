use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading or querying a snapshot.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error originating from the underlying SQLite database.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ingestion file is not a JSON array of stories.
    #[error("invalid story data: {0}")]
    Json(#[from] serde_json::Error),

    /// A compiled query whose placeholders and values disagree. Never caused
    /// by user input.
    #[error("internal query fault: {0}")]
    InvalidQuery(String),

    #[error("a reload is already in progress")]
    ReloadInProgress,
}
