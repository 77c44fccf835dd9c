//! Error types for data validation in fotohora-types.

use thiserror::Error;

/// Errors that can occur when building or validating Fotohora data values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A store path was empty or contained a forbidden segment.
    #[error("Invalid store path '{path}': {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why the path was rejected.
        reason: String,
    },

    /// A value was outside its allowed range or had the wrong shape.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// A color was not in `#rrggbb` form.
    #[error("Invalid color '{0}': expected #rrggbb")]
    InvalidColor(String),
}

impl ParseError {
    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using fotohora-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
