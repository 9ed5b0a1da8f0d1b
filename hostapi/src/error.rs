//! Builtin error types.
//!
//! `BuiltinError` is returned by builtin implementations. The sandbox wraps
//! it together with the builtin's name before failing the evaluation that
//! triggered the call.

/// Error returned by a builtin implementation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuiltinError {
    /// The builtin was called with the wrong number of arguments.
    #[error("expected {expected} arguments, got {actual}")]
    Arity { expected: usize, actual: usize },

    /// An argument had the wrong shape for this builtin.
    #[error("argument {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },

    /// Any other failure, carried as a message.
    #[error("{0}")]
    Failed(String),
}

impl BuiltinError {
    /// Create a generic failure from anything printable.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Create an invalid-argument error for the argument at `index`.
    pub fn invalid_argument(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            index,
            reason: reason.into(),
        }
    }
}
