//! Error types for Ticketlore

use thiserror::Error;

/// Result type alias using Ticketlore's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Ticketlore error types
#[derive(Error, Debug)]
pub enum Error {
    // Provider errors (E100-E199)
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Generation provider error: {0}")]
    LlmError(String),

    #[error("Rate limited. Waiting {0} seconds before retry.")]
    RateLimited(u64),

    #[error("Generation provider timed out after {0} seconds")]
    ProviderTimeout(u64),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    // Synthesis errors (E200-E299)
    #[error("Malformed generation output: {0}")]
    MalformedOutput(String),

    #[error("Duplicate cluster: an article already exists for provenance key {0}")]
    DuplicateCluster(String),

    // Queue errors (E300-E399)
    #[error("Invalid queue transition for ticket '{ticket_id}': {reason}")]
    QueueState { ticket_id: String, reason: String },

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Concurrent update conflict for article '{0}'")]
    VersionConflict(String),

    // Lookup errors (E500-E599)
    #[error("Article '{0}' not found")]
    ArticleNotFound(String),

    #[error("Ticket '{0}' not found")]
    TicketNotFound(String),

    // Config errors (E600-E699)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Input errors (E800-E899)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Generic errors
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::NetworkError(_) => "E100",
            Self::LlmError(_) => "E101",
            Self::RateLimited(_) => "E102",
            Self::ProviderTimeout(_) => "E103",
            Self::EmbeddingFailed(_) => "E104",
            Self::MalformedOutput(_) => "E200",
            Self::DuplicateCluster(_) => "E201",
            Self::QueueState { .. } => "E300",
            Self::DatabaseError(_) => "E400",
            Self::VersionConflict(_) => "E401",
            Self::ArticleNotFound(_) => "E500",
            Self::TicketNotFound(_) => "E501",
            Self::ConfigError(_) => "E600",
            Self::InvalidInput(_) => "E800",
            Self::Other(_) | Self::Io(_) => "E9999",
        }
    }

    /// Whether the failure is worth retrying with backoff.
    ///
    /// Transient provider errors (timeouts, connection failures, rate
    /// limits) are retried by the worker; everything else is terminal for
    /// the queue item that triggered it.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::ProviderTimeout(_) => true,
            Self::NetworkError(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::LlmError(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("overloaded") || msg.contains("unavailable") || msg.contains("capacity")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::MalformedOutput("x".into()).code(), "E200");
        assert_eq!(Error::DuplicateCluster("abc".into()).code(), "E201");
        assert_eq!(Error::InvalidInput("bad range".into()).code(), "E800");
    }

    #[test]
    fn test_transient_classification() {
        assert!(Error::RateLimited(30).is_transient());
        assert!(Error::ProviderTimeout(30).is_transient());
        assert!(Error::LlmError("model overloaded".into()).is_transient());
        assert!(!Error::MalformedOutput("missing category".into()).is_transient());
        assert!(!Error::InvalidInput("empty range".into()).is_transient());
        assert!(!Error::DuplicateCluster("key".into()).is_transient());
    }

    #[test]
    fn test_queue_state_message() {
        let err = Error::QueueState {
            ticket_id: "t-1".into(),
            reason: "not in processing state".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("t-1"));
        assert!(msg.contains("not in processing state"));
    }
}
