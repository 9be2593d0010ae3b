//! Unified error type for the application layers.

use thiserror::Error;

/// Result type alias using [`BeaconError`].
pub type BeaconResult<T> = Result<T, BeaconError>;

/// Unified error type for Beacon.
///
/// Crate-specific errors (job processing, storage) convert into this type at
/// the composition root so `main` has a single error surface.
#[derive(Error, Debug)]
pub enum BeaconError {
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict error (e.g., duplicate registration)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error wrapper
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BeaconError {
    /// Creates a not found error.
    pub fn not_found(resource_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type,
            id: id.into(),
        }
    }

    /// Returns true if retrying the operation later could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Timeout(_))
    }

    /// Returns a short machine-readable code for this error.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Conflict(_) => "CONFLICT",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) | Self::Other(_) => "INTERNAL_ERROR",
        }
    }
}
