use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error(
        "dimension mismatch in {context}: expected {expected}, found {found}"
    )]
    DimensionMismatch {
        expected: usize,
        found: usize,
        context: String,
    },

    #[error("no vectors to index: {0}")]
    EmptyIndex(String),

    #[error("vector store is corrupt: {0}")]
    CorruptStore(String),

    #[error("{service} service failed: {message}")]
    Service {
        service: &'static str,
        message: String,
    },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    /// Whether a failed vector store load should fall back to a rebuild.
    pub fn is_recoverable_load(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. } | Error::CorruptStore(_) | Error::Io(_)
        )
    }
}
