//! Error types for fotohora-core.
//!
//! Two families of failure exist, and they are handled very differently:
//!
//! | Error | Effect on the reporter |
//! |-------|------------------------|
//! | [`Error::PermissionDenied`] | Fatal to the run; the host is asked to stop |
//! | [`Error::SubscriptionFailed`] | Fatal to the run; recovery is a restart of the host |
//! | [`Error::RemovalFailed`] | Fatal to the run; two live subscriptions are never risked |
//! | [`StoreError`] on a position write | Logged only; never retried |
//! | [`StoreError`] on the config stream | Logged only; the last interval is kept |
//! | Invalid config value | Ignored; the last interval is kept |
//!
//! Location telemetry tolerates loss, so write failures never reach the
//! controller and never block the next fix.

use std::time::Duration;

use thiserror::Error;

use fotohora_types::ParseError;

/// Errors raised by the reporter and its collaborators.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Location permission is not granted.
    #[error("Location permission not granted")]
    PermissionDenied,

    /// The location source rejected a subscription request.
    #[error("Failed to create location subscription at {interval:?}: {reason}")]
    SubscriptionFailed {
        /// The interval that was requested.
        interval: Duration,
        /// Why the request failed.
        reason: String,
    },

    /// The location source failed to tear down a subscription.
    #[error("Failed to remove location subscription: {0}")]
    RemovalFailed(String),

    /// Remote store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Data validation error.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a subscription failure for the given interval.
    pub fn subscription_failed(interval: Duration, reason: impl Into<String>) -> Self {
        Self::SubscriptionFailed {
            interval,
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }
}

/// Errors raised by a [`RemoteStore`](crate::traits::RemoteStore).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The store could not be reached.
    #[error("Store not reachable while accessing '{path}': {message}")]
    Unreachable {
        /// Path being accessed.
        path: String,
        /// Transport error description.
        message: String,
    },

    /// The store answered but refused the operation.
    #[error("Store rejected '{path}'{}: {message}", format_status(.status))]
    Rejected {
        /// Path being accessed.
        path: String,
        /// HTTP status, if the store speaks HTTP.
        status: Option<u16>,
        /// Reason given by the store.
        message: String,
    },

    /// The store ended a subscription.
    #[error("Subscription to '{path}' cancelled: {reason}")]
    Cancelled {
        /// Subscribed path.
        path: String,
        /// Reason given by the store.
        reason: String,
    },

    /// A subscription stream ended without being cancelled.
    #[error("Subscription to '{0}' closed by the store")]
    Closed(String),

    /// The store URL is malformed.
    #[error("Invalid store URL: {0}")]
    InvalidUrl(String),

    /// A path failed validation.
    #[error("Invalid path: {0}")]
    InvalidPath(#[from] ParseError),

    /// A value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl StoreError {
    /// Create a rejection error.
    pub fn rejected(path: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Rejected {
            path: path.into(),
            status,
            message: message.into(),
        }
    }

    /// Create an unreachable error.
    pub fn unreachable(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias using fotohora-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Result type alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
