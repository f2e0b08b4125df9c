//! Error types for the KCP core protocol engine

use std::fmt;

/// Result type for KCP core operations
pub type KcpCoreResult<T> = std::result::Result<T, KcpCoreError>;

/// Error types produced by the KCP protocol engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KcpCoreError {
    /// Malformed datagram: too short, truncated payload, unknown command
    Protocol { message: String },
    /// Datagram addressed to another conversation
    ConvMismatch { expected: u32, actual: u32 },
    /// Message cannot be queued as a single unit (too many fragments)
    Buffer { message: String },
    /// The send queue holds `limit` segments already
    SendQueueFull { limit: usize },
    /// Nothing has been reassembled yet
    RecvQueueEmpty,
    /// The head message is still missing fragments
    ExpectingFragment,
    /// The next message needs `needed` bytes but the caller offered `available`
    BufferTooSmall { needed: usize, available: usize },
    /// Connection lost (exceeded max retransmissions)
    ConnectionLost,
}

impl KcpCoreError {
    pub fn protocol(message: impl Into<String>) -> Self {
        KcpCoreError::Protocol {
            message: message.into(),
        }
    }

    pub fn buffer(message: impl Into<String>) -> Self {
        KcpCoreError::Buffer {
            message: message.into(),
        }
    }

    /// Check if this is a fatal error that should stop the engine
    pub fn is_fatal(&self) -> bool {
        matches!(self, KcpCoreError::ConnectionLost)
    }

    /// `recv` found no complete message; the normal end of a drain.
    pub fn is_no_data(&self) -> bool {
        matches!(
            self,
            KcpCoreError::RecvQueueEmpty | KcpCoreError::ExpectingFragment
        )
    }

    /// `send` refused only because the queue is full; retrying later may succeed.
    pub fn is_send_full(&self) -> bool {
        matches!(self, KcpCoreError::SendQueueFull { .. })
    }
}

impl fmt::Display for KcpCoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KcpCoreError::Protocol { message } => write!(f, "Protocol error: {message}"),
            KcpCoreError::ConvMismatch { expected, actual } => {
                write!(f, "Conversation mismatch: expected {expected}, got {actual}")
            }
            KcpCoreError::Buffer { message } => write!(f, "Buffer error: {message}"),
            KcpCoreError::SendQueueFull { limit } => {
                write!(f, "Send queue full ({limit} segments)")
            }
            KcpCoreError::RecvQueueEmpty => write!(f, "Receive queue empty"),
            KcpCoreError::ExpectingFragment => write!(f, "Expecting more fragments"),
            KcpCoreError::BufferTooSmall { needed, available } => {
                write!(f, "Buffer too small: need {needed} bytes, have {available}")
            }
            KcpCoreError::ConnectionLost => write!(f, "Connection lost"),
        }
    }
}

impl std::error::Error for KcpCoreError {}
