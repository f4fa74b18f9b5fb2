//! Object layer error types

use thiserror::Error;

/// Errors returned by object operations
///
/// `OutOfMemory` is the allocation-failure case and leaves the object it was
/// raised for unchanged. The script error variants are pending exceptions the
/// caller must propagate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    /// Storage growth could not obtain memory
    #[error("OutOfMemory")]
    OutOfMemory,

    /// Type error (e.g. writing a read-only property in strict code)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Range error (e.g. invalid array length)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Violated embedder precondition
    #[error("InternalError: {0}")]
    InternalError(String),
}

impl ObjectError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    /// Whether this error is visible to script code
    pub fn is_script_error(&self) -> bool {
        matches!(self, Self::TypeError(_) | Self::RangeError(_))
    }
}

impl From<std::collections::TryReserveError> for ObjectError {
    fn from(_: std::collections::TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

/// Result type for object operations
pub type ObjectResult<T> = Result<T, ObjectError>;
