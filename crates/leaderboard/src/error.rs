use crate::types::RecordId;

/// Errors that can occur in the leaderboard core.
#[derive(Debug, thiserror::Error)]
pub enum LeaderboardError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid stage number: {reason}")]
    InvalidStage { reason: String },

    #[error("invalid time value: {reason}")]
    InvalidTime { reason: String },

    #[error("invalid player name: {reason}")]
    InvalidName { reason: String },

    #[error("record {record_id} does not exist")]
    ForeignKeyError { record_id: RecordId },

    #[error("persistence error: {reason}")]
    PersistenceError {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("no replay stored for record {record_id}")]
    NotFound { record_id: RecordId },

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl LeaderboardError {
    /// Whether the error was caused by the caller's input rather than the store.
    ///
    /// Client errors are detected before any storage call and are safe to
    /// report verbatim.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            LeaderboardError::MissingField { .. }
                | LeaderboardError::InvalidStage { .. }
                | LeaderboardError::InvalidTime { .. }
                | LeaderboardError::InvalidName { .. }
        )
    }

    /// Shorthand for a persistence error without an underlying source.
    pub(crate) fn persistence(reason: impl Into<String>) -> Self {
        LeaderboardError::PersistenceError {
            reason: reason.into(),
            source: None,
        }
    }
}
