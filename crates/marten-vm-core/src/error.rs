//! VM error types

use thiserror::Error;

/// Runtime errors raised by the object/value core.
///
/// The error taxonomy is intentionally small: everything the core can raise
/// is a TypeError-class, RangeError-class, or internal/allocation-class
/// failure. Script-visible Error objects are built by the embedding layer
/// from these kinds.
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g., property access on null/undefined, calling a
    /// non-callable, invalid proxy trap result)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Range error (e.g., chain sanity limit exceeded, invalid array length)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Internal error (corrupted object graph, missing executor hook)
    #[error("InternalError: {0}")]
    InternalError(String),

    /// Out of memory
    #[error("OutOfMemory")]
    OutOfMemory,
}

impl VmError {
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

    /// True for TypeError-class failures
    pub fn is_type_error(&self) -> bool {
        matches!(self, Self::TypeError(_))
    }

    /// True for RangeError-class failures
    pub fn is_range_error(&self) -> bool {
        matches!(self, Self::RangeError(_))
    }
}

/// Result type for VM operations
pub type VmResult<T> = std::result::Result<T, VmError>;
