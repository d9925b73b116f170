//! Error types for the bootstrap manager.

use thiserror::Error;

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Errors surfaced by [`crate::BootstrapManager`].
///
/// The type is `Clone` because every caller waiting on the same bootstrap
/// receives the same error value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// A runtime dependency module failed to resolve.
    #[error("failed to load dependency module {module}: {message}")]
    DependencyLoad {
        /// Name of the module that failed.
        module: String,
        /// Error message.
        message: String,
    },

    /// The engine image could not be fetched in full.
    #[error("failed to download database image from {url}: {message}")]
    Download {
        /// Image URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// The downloaded bytes are not a valid program image.
    #[error("failed to compile database image: {0}")]
    Compile(String),

    /// The engine or ORM binding refused to construct.
    #[error("failed to construct database: {0}")]
    Construction(String),

    /// The handle was used before a successful initialization.
    #[error("database not initialized; call initialize() first")]
    Uninitialized,

    /// Schema sync through the handle failed.
    #[error("schema migration failed: {0}")]
    Migration(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BootstrapError {
    /// Creates a download error for `url`.
    pub fn download(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a dependency error for `module`.
    pub fn dependency(module: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DependencyLoad {
            module: module.into(),
            message: message.into(),
        }
    }

    /// Returns true if the caller broke the usage contract rather than the
    /// infrastructure failing.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, BootstrapError::Uninitialized | BootstrapError::Config(_))
    }

    /// Returns true if a fresh `initialize()` may succeed where this attempt
    /// failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BootstrapError::DependencyLoad { .. } | BootstrapError::Download { .. }
        )
    }
}
