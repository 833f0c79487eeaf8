use std::time::Duration;

use thiserror::Error;

/// Type alias for Result with SearchError
pub type Result<T> = std::result::Result<T, SearchError>;

/// Error types for the mail search cache
#[derive(Error, Debug)]
pub enum SearchError {
    /// Bad credentials, unreachable server or TLS failure while opening a session
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// Transient network or protocol failure during a remote call
    #[error("Fetch error: {0}")]
    FetchError(String),

    /// A remote call exceeded its deadline
    #[error("Remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The server rejected a command (NO / BAD response)
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Local cache could not be read or written
    #[error("Store error: {0}")]
    StoreError(String),

    /// Local cache file is not a readable database
    #[error("Cache file is corrupt: {0}")]
    StoreCorrupt(String),

    /// Search pattern is not a valid regular expression
    #[error("Invalid search pattern: {0}")]
    PatternError(#[from] regex::Error),

    /// Message headers could not be interpreted
    #[error("Invalid message format: {0}")]
    InvalidMessageFormat(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// User cancelled operation
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// IO error (file operations, etc.)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl SearchError {
    /// Check if the error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::FetchError(_) | SearchError::Timeout(_))
    }

    /// Check if the error is permanent and should not be retried
    pub fn is_permanent(&self) -> bool {
        !self.is_transient()
    }

    /// Errors that a fresh cache file would cure
    pub fn is_store_failure(&self) -> bool {
        matches!(self, SearchError::StoreError(_) | SearchError::StoreCorrupt(_))
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(error: rusqlite::Error) -> Self {
        match error {
            rusqlite::Error::SqliteFailure(ref failure, _)
                if matches!(
                    failure.code,
                    rusqlite::ErrorCode::NotADatabase | rusqlite::ErrorCode::DatabaseCorrupt
                ) =>
            {
                SearchError::StoreCorrupt(error.to_string())
            }
            other => SearchError::StoreError(other.to_string()),
        }
    }
}

impl From<async_imap::error::Error> for SearchError {
    fn from(error: async_imap::error::Error) -> Self {
        use async_imap::error::Error as ImapError;
        match error {
            // Server answered but refused the command - retrying won't help
            ImapError::No(_) | ImapError::Bad(_) => SearchError::ProtocolError(error.to_string()),
            ImapError::Io(err) => SearchError::FetchError(format!("Connection error: {}", err)),
            // BYE, lost connections and parse hiccups are worth another attempt
            other => SearchError::FetchError(other.to_string()),
        }
    }
}
