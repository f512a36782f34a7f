//! Unified error handling for the vault-unseal crate
//!
//! Each module keeps its own error enum; [`Error`] wraps them so failures can
//! cross module boundaries and be classified uniformly. The category is
//! attached to every failure log line as the `category` field.
//!
//! # Architecture
//!
//! - [`UnsealErrorTrait`] - Classification shared by the seal and unified errors
//! - [`ErrorCategory`] - Classification of errors for handling strategies
//! - [`Error`] - Unified error enum wrapping all domain-specific errors
//!
//! # Usage
//!
//! ```rust,ignore
//! use vault_unseal::error::{Error, ErrorCategory, UnsealErrorTrait};
//!
//! fn handle_error(err: Error, error_count: u32) {
//!     if err.category() == ErrorCategory::TransientNetwork && error_count == 1 {
//!         tracing::error!(error = %err, "probably a blip");
//!     } else {
//!         notifier.error(err.to_string());
//!     }
//! }
//! ```

use thiserror::Error;

// Re-export domain-specific errors for convenience
pub use crate::cluster::discovery::DiscoveryError;
pub use crate::config::ConfigError;
pub use crate::notifications::channels::ChannelError;
pub use crate::vault::SealError;

/// Common trait for all vault-unseal error types
pub trait UnsealErrorTrait: std::error::Error {
    /// Get the error category for handling strategies
    fn category(&self) -> ErrorCategory;
}

/// Classification of errors for handling strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Network timeout talking to a node (first occurrence is suppressed)
    TransientNetwork,
    /// Seal status check failed
    StatusCheck,
    /// Submitting an unseal token failed
    UnsealSubmission,
    /// Target discovery failed
    Discovery,
    /// Configuration loading or validation failed
    Config,
    /// Notification delivery failed
    Notification,
}

impl ErrorCategory {
    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TransientNetwork => "transient_network",
            Self::StatusCheck => "status_check",
            Self::UnsealSubmission => "unseal_submission",
            Self::Discovery => "discovery",
            Self::Config => "config",
            Self::Notification => "notification",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UnsealErrorTrait for SealError {
    fn category(&self) -> ErrorCategory {
        if self.is_transient_timeout() {
            ErrorCategory::TransientNetwork
        } else {
            ErrorCategory::StatusCheck
        }
    }
}

/// Unified error type for the vault-unseal crate
#[derive(Error, Debug)]
pub enum Error {
    /// Seal status check against a node failed
    #[error("checking seal status: {0}")]
    StatusCheck(#[from] SealError),

    /// Submitting one unseal token failed
    #[error("using unseal key {index} on {addr}: {source}")]
    Unseal {
        /// 1-based position of the token in the configured order
        index: usize,
        addr: String,
        #[source]
        source: SealError,
    },

    /// The HTTP client for talking to nodes could not be built
    #[error("failed to create seal client: {0}")]
    Client(#[source] SealError),

    /// Discovery errors
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Configuration errors
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Notification channel errors
    #[error("notification error: {0}")]
    Notification(#[from] ChannelError),
}

impl UnsealErrorTrait for Error {
    fn category(&self) -> ErrorCategory {
        match self {
            Self::StatusCheck(e) => e.category(),
            Self::Unseal { .. } => ErrorCategory::UnsealSubmission,
            Self::Discovery(_) => ErrorCategory::Discovery,
            Self::Client(_) | Self::Config(_) => ErrorCategory::Config,
            Self::Notification(_) => ErrorCategory::Notification,
        }
    }
}

impl Error {
    /// Create an unseal submission error
    pub fn unseal(index: usize, addr: impl Into<String>, source: SealError) -> Self {
        Self::Unseal {
            index,
            addr: addr.into(),
            source,
        }
    }
}

/// Result type alias using the unified Error type
pub type Result<T> = std::result::Result<T, Error>;
