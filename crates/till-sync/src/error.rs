//! # Sync Error Types
//!
//! Error types for the engines, the scheduler and the hub.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Error Categories (kind())                         │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │   Validation    │  │    NotFound     │  │     ClosedPeriod        │ │
//! │  │                 │  │                 │  │                         │ │
//! │  │  bad input      │  │  sale, payment, │  │  mutation of activity   │ │
//! │  │  bad config     │  │  closing absent │  │  a closed record covers │ │
//! │  │  no retry       │  │  no retry       │  │  never retried          │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐                              │
//! │  │   Persistence   │  │    Internal     │                              │
//! │  │                 │  │                 │                              │
//! │  │  store failure  │  │  channels,      │                              │
//! │  │  RETRYABLE      │  │  transport      │                              │
//! │  └─────────────────┘  └─────────────────┘                              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;
use till_core::CoreError;
use till_db::DbError;

/// Result type alias for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Category of a failure, deciding how callers react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    ClosedPeriod,
    Persistence,
    Internal,
}

/// Engine error type.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Ledger Errors
    // =========================================================================
    /// A ledger rule rejected the operation.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Store-level row absence (outside the domain rules).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The store failed; the operation may succeed when retried.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Could not bind or serve the hub.
    #[error("Server error: {0}")]
    ServerFailed(String),

    /// Failed to serialize a message.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Channel send/receive failed.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// The component is shutting down.
    #[error("Shutting down")]
    ShuttingDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Domain(core) => SyncError::Domain(core),
            DbError::NotFound { entity, id } => SyncError::NotFound(format!("{entity} {id}")),
            other => SyncError::Persistence(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::SerializationFailed(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// Error Categorization (for retry logic)
// =============================================================================

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Domain(core) if core.is_closed_period() => ErrorKind::ClosedPeriod,
            SyncError::Domain(core) if core.is_not_found() => ErrorKind::NotFound,
            SyncError::Domain(_) => ErrorKind::Validation,
            SyncError::InvalidConfig(_)
            | SyncError::ConfigLoadFailed(_)
            | SyncError::ConfigSaveFailed(_) => ErrorKind::Validation,
            SyncError::NotFound(_) => ErrorKind::NotFound,
            SyncError::Persistence(_) => ErrorKind::Persistence,
            SyncError::ServerFailed(_)
            | SyncError::SerializationFailed(_)
            | SyncError::ChannelError(_)
            | SyncError::ShuttingDown
            | SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Only store failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Persistence
    }

    /// Returns true if this error indicates a configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_) | SyncError::ConfigLoadFailed(_) | SyncError::ConfigSaveFailed(_)
        )
    }
}
