use thiserror::Error;

pub type Result<T> = std::result::Result<T, EtlError>;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Index transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Index rejected request: {0}")]
    IndexRejected(String),

    #[error("Bulk upsert rejected {} of {total} documents: {}", .failed.len(), .failed.join(", "))]
    PartialWrite { total: usize, failed: Vec<String> },

    #[error("Watermark store error: {0}")]
    State(#[from] etl_state::StorageError),

    #[error("Malformed row: {0}")]
    MalformedRow(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{operation} gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<EtlError>,
    },
}

impl EtlError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn malformed<E: std::fmt::Display>(e: E) -> Self {
        Self::MalformedRow(e.to_string())
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Anything raised while talking to Postgres, Elasticsearch or the
    /// watermark file is transient. Bad rows, bad configuration and an
    /// already exhausted retry budget are not.
    pub fn category(&self) -> ErrorCategory {
        match self {
            EtlError::Database(_)
            | EtlError::Http(_)
            | EtlError::IndexRejected(_)
            | EtlError::PartialWrite { .. }
            | EtlError::State(_)
            | EtlError::Io(_) => ErrorCategory::Transient,
            EtlError::MalformedRow(_)
            | EtlError::Serialization(_)
            | EtlError::Config(_)
            | EtlError::RetriesExhausted { .. } => ErrorCategory::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.category() == ErrorCategory::Transient
    }
}

/// Error category for retry logic
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ErrorCategory {
    /// Retry automatically (connection loss, timeout, rejected bulk item)
    Transient,
    /// Retrying reproduces the failure (malformed row, bad config)
    Permanent,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Transient => "transient",
            ErrorCategory::Permanent => "permanent",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
