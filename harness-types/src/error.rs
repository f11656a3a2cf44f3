//! Error types reported by the storage control plane.

use thiserror::Error;

/// Invalid parameters (e.g. an unknown rank).
pub const DER_INVAL: i32 = -1003;

/// Entity does not exist.
pub const DER_NONEXIST: i32 = -1005;

/// Entity already exists.
pub const DER_EXIST: i32 = -1004;

/// No space left on storage target. The only code tolerated by fillup loops.
pub const DER_NOSPACE: i32 = -1007;

/// Operation timed out.
pub const DER_TIMEDOUT: i32 = -1011;

/// Device or resource busy.
pub const DER_BUSY: i32 = -1012;

/// Errors returned by control plane operations.
///
/// Every error that carries a numeric return code exposes it through
/// [`ControlPlaneError::code`], so callers classify on the integer rather
/// than on message text.
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// The control plane rejected the request with a structured return code.
    #[error("{operation} failed with rc {code}: {message}")]
    Status {
        /// Operation that failed (e.g. `container create`).
        operation: String,
        /// Numeric return code.
        code: i32,
        /// Message reported alongside the code.
        message: String,
    },

    /// The command failed without a structured return code.
    #[error("{operation} failed: {message}")]
    Command {
        /// Operation that failed.
        operation: String,
        /// Failure detail (stderr, exit status).
        message: String,
    },

    /// Command output could not be parsed.
    #[error("could not parse {operation} output: {message}")]
    Parse {
        /// Operation whose output was malformed.
        operation: String,
        /// Parser error detail.
        message: String,
    },

    /// Process spawn or other I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControlPlaneError {
    /// Build a [`ControlPlaneError::Status`].
    pub fn status(operation: &str, code: i32, message: impl Into<String>) -> Self {
        Self::Status {
            operation: operation.to_string(),
            code,
            message: message.into(),
        }
    }

    /// Build a [`ControlPlaneError::Command`].
    pub fn command(operation: &str, message: impl Into<String>) -> Self {
        Self::Command {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    /// The numeric return code, if the control plane reported one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Self::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// True if this is the reserved "no space" error.
    pub fn is_no_space(&self) -> bool {
        self.code() == Some(DER_NOSPACE)
    }
}
