//! Error taxonomy shared by every twinwire component.

use thiserror::Error;

/// Error type for all messenger operations.
///
/// The set of variants is closed: both transport engines and the messenger
/// report exactly one of these. Engine errors travel to the caller unchanged.
#[derive(Debug, Error)]
pub enum MessengerError {
    /// Malformed configuration, out-of-range argument, or a call made in the
    /// wrong lifecycle state.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Error message.
        message: String,
    },

    /// A resource (shared segment, mapping) could not be created.
    #[error("memory allocation failed: {message}")]
    MemoryAllocation {
        /// Error message.
        message: String,
    },

    /// Transport-level connect or attach failure.
    #[error("connection failed: {message}")]
    ConnectionFailed {
        /// Error message.
        message: String,
    },

    /// The message could not be handed to the transport.
    #[error("send failed: {message}")]
    SendFailed {
        /// Error message.
        message: String,
    },

    /// The transport failed while reading, or the peer went away.
    #[error("receive failed: {message}")]
    ReceiveFailed {
        /// Error message.
        message: String,
    },

    /// A bounded wait expired.
    #[error("{operation} timed out")]
    Timeout {
        /// Operation that timed out.
        operation: &'static str,
    },

    /// The destination buffer cannot hold the decoded data. The message has
    /// already been consumed from its source.
    #[error("buffer too small: required {required} bytes, available {available} bytes")]
    BufferTooSmall {
        /// Required buffer size in bytes.
        required: usize,
        /// Available buffer size in bytes.
        available: usize,
    },

    /// The message exceeds the configured size limit.
    #[error("message too large: {size} bytes exceeds maximum {max} bytes")]
    MessageTooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },

    /// Nothing to receive right now. Not a fault.
    #[error("no messages available")]
    NoMessages,

    /// Unclassified defect, including corrupt shared state.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

/// Field-less discriminant of [`MessengerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// See [`MessengerError::InvalidArgument`].
    InvalidArgument,
    /// See [`MessengerError::MemoryAllocation`].
    MemoryAllocation,
    /// See [`MessengerError::ConnectionFailed`].
    ConnectionFailed,
    /// See [`MessengerError::SendFailed`].
    SendFailed,
    /// See [`MessengerError::ReceiveFailed`].
    ReceiveFailed,
    /// See [`MessengerError::Timeout`].
    Timeout,
    /// See [`MessengerError::BufferTooSmall`].
    BufferTooSmall,
    /// See [`MessengerError::MessageTooLarge`].
    MessageTooLarge,
    /// See [`MessengerError::NoMessages`].
    NoMessages,
    /// See [`MessengerError::Internal`].
    Internal,
}

impl ErrorKind {
    /// Returns the stable negative integer code for this kind.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::InvalidArgument => -1,
            Self::MemoryAllocation => -2,
            Self::ConnectionFailed => -3,
            Self::SendFailed => -4,
            Self::ReceiveFailed => -5,
            Self::Timeout => -6,
            Self::BufferTooSmall => -7,
            Self::MessageTooLarge => -8,
            Self::NoMessages => -9,
            Self::Internal => -10,
        }
    }

    /// Maps a negative code back to its kind.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        Some(match code {
            -1 => Self::InvalidArgument,
            -2 => Self::MemoryAllocation,
            -3 => Self::ConnectionFailed,
            -4 => Self::SendFailed,
            -5 => Self::ReceiveFailed,
            -6 => Self::Timeout,
            -7 => Self::BufferTooSmall,
            -8 => Self::MessageTooLarge,
            -9 => Self::NoMessages,
            -10 => Self::Internal,
            _ => return None,
        })
    }
}

impl MessengerError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a memory allocation error.
    pub fn memory_allocation(message: impl Into<String>) -> Self {
        Self::MemoryAllocation {
            message: message.into(),
        }
    }

    /// Creates a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
        }
    }

    /// Creates a send failed error.
    pub fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed {
            message: message.into(),
        }
    }

    /// Creates a receive failed error.
    pub fn receive_failed(message: impl Into<String>) -> Self {
        Self::ReceiveFailed {
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: &'static str) -> Self {
        Self::Timeout { operation }
    }

    /// Creates a buffer too small error.
    pub fn buffer_too_small(required: usize, available: usize) -> Self {
        Self::BufferTooSmall {
            required,
            available,
        }
    }

    /// Creates a message too large error.
    pub fn message_too_large(size: usize, max: usize) -> Self {
        Self::MessageTooLarge { size, max }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::MemoryAllocation { .. } => ErrorKind::MemoryAllocation,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::SendFailed { .. } => ErrorKind::SendFailed,
            Self::ReceiveFailed { .. } => ErrorKind::ReceiveFailed,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::BufferTooSmall { .. } => ErrorKind::BufferTooSmall,
            Self::MessageTooLarge { .. } => ErrorKind::MessageTooLarge,
            Self::NoMessages => ErrorKind::NoMessages,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Returns the stable negative integer code for this error.
    #[must_use]
    pub fn code(&self) -> i32 {
        self.kind().code()
    }

    /// Returns true for the empty-poll result.
    #[must_use]
    pub fn is_no_messages(&self) -> bool {
        matches!(self, Self::NoMessages)
    }
}

impl From<std::io::Error> for MessengerError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                Self::timeout("I/O operation")
            }
            _ => Self::internal(err.to_string()),
        }
    }
}

/// Result type alias for twinwire operations.
pub type Result<T> = std::result::Result<T, MessengerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct_and_negative() {
        let kinds = [
            ErrorKind::InvalidArgument,
            ErrorKind::MemoryAllocation,
            ErrorKind::ConnectionFailed,
            ErrorKind::SendFailed,
            ErrorKind::ReceiveFailed,
            ErrorKind::Timeout,
            ErrorKind::BufferTooSmall,
            ErrorKind::MessageTooLarge,
            ErrorKind::NoMessages,
            ErrorKind::Internal,
        ];
        for (i, kind) in kinds.iter().enumerate() {
            assert_eq!(kind.code(), -(i as i32) - 1);
            assert_eq!(ErrorKind::from_code(kind.code()), Some(*kind));
        }
        assert_eq!(ErrorKind::from_code(0), None);
        assert_eq!(ErrorKind::from_code(-11), None);
    }

    #[test]
    fn test_error_kind_and_code() {
        let err = MessengerError::message_too_large(200, 100);
        assert_eq!(err.kind(), ErrorKind::MessageTooLarge);
        assert_eq!(err.code(), -8);
        assert_eq!(
            err.to_string(),
            "message too large: 200 bytes exceeds maximum 100 bytes"
        );
    }

    #[test]
    fn test_buffer_too_small_display() {
        let err = MessengerError::buffer_too_small(10, 4);
        assert!(err.to_string().contains("required 10 bytes"));
        assert!(err.to_string().contains("available 4 bytes"));
    }

    #[test]
    fn test_no_messages() {
        let err = MessengerError::NoMessages;
        assert!(err.is_no_messages());
        assert!(!MessengerError::internal("x").is_no_messages());
    }

    #[test]
    fn test_from_io_error() {
        let timed_out = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(MessengerError::from(timed_out).kind(), ErrorKind::Timeout);

        let other = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        let err = MessengerError::from(other);
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(err.to_string().contains("nope"));
    }
}
