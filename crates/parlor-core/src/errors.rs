/// Errors reported by storage and credential collaborators.
///
/// Payloads are strings so that backends can map their own error types
/// without this crate depending on them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("password hashing failed: {0}")]
    Hashing(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("blocking task failed: {0}")]
    Task(String),
}

impl StoreError {
    /// Short classification string for logging/metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Conflict(_) => "conflict",
            Self::Hashing(_) => "hashing",
            Self::Io(_) => "io",
            Self::Task(_) => "task",
        }
    }
}
