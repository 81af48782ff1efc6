//! Error types for Parlor
//!
//! Errors are grouped by the layer that raises them. Every per-session error
//! ends that session only; the one error fatal to a role is
//! [`NetworkError::BindFailed`] when the listener cannot take its port.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for Parlor operations
#[derive(Error, Debug)]
pub enum ParlorError {
    /// Socket-level errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Malformed or truncated frames
    #[error("Framing error: {0}")]
    Framing(#[from] FramingError),

    /// Invalid configuration or arguments
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Attachment storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O errors outside an established session
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while binding, connecting, or talking over a socket
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// The listening port could not be bound
    #[error("Failed to bind {address}: {reason}")]
    BindFailed {
        /// Address we tried to bind
        address: String,
        /// Underlying failure
        reason: String,
    },

    /// Outgoing connection could not be established
    #[error("Failed to connect to {address}: {reason}")]
    ConnectionFailed {
        /// Address we tried to reach
        address: String,
        /// Underlying failure
        reason: String,
    },

    /// The session is no longer alive
    #[error("Connection to '{peer}' is closed")]
    ConnectionClosed {
        /// Display name or address of the peer
        peer: String,
    },

    /// Peer closed the stream between frames
    #[error("Connection reset by peer")]
    ConnectionReset,

    /// Writing a frame failed
    #[error("Send failed: {reason}")]
    SendFailed {
        /// Underlying failure
        reason: String,
    },

    /// Reading a frame failed
    #[error("Receive failed: {reason}")]
    ReceiveFailed {
        /// Underlying failure
        reason: String,
    },

    /// Peer sent a frame that is not valid at this point of the session
    #[error("Protocol violation: {reason}")]
    ProtocolViolation {
        /// What was wrong
        reason: String,
    },
}

/// Errors in encoding or decoding a single frame
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// A string does not fit the 2-byte length prefix
    #[error("String too long: {0} bytes (max: {max} bytes)", max = u16::MAX)]
    StringTooLong(usize),

    /// Attachment size above the accepted bound
    #[error("Attachment too large: {size} bytes (max: {max} bytes)")]
    AttachmentTooLarge {
        /// Declared or actual size
        size: usize,
        /// Configured bound
        max: usize,
    },

    /// Stream ended in the middle of a frame
    #[error("Frame truncated")]
    Truncated,

    /// String payload was not valid UTF-8
    #[error("Invalid UTF-8 in frame")]
    InvalidUtf8,

    /// Text body the receiver would read back as `Exit`
    #[error("Text body '{0}' is reserved for leaving the chat")]
    ReservedText(String),

    /// Frame kind cannot be expressed in the negotiated dialect
    #[error("{frame} frames are not supported by the {dialect} dialect")]
    Unsupported {
        /// Frame kind
        frame: &'static str,
        /// Dialect name
        dialect: &'static str,
    },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Identity cannot be used as a chat name
    #[error("Invalid identity '{name}': {reason}")]
    InvalidIdentity {
        /// Rejected name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Host or port not usable
    #[error("Invalid address: {address}")]
    InvalidAddress {
        /// Rejected address
        address: String,
    },

    /// Required path is empty
    #[error("Invalid path: {path}")]
    InvalidPath {
        /// Rejected path
        path: PathBuf,
    },

    /// Config file could not be read or parsed
    #[error("Failed to load config from {path}: {reason}")]
    LoadFailed {
        /// Config file path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },
}

/// Attachment storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Sender-supplied filename has no usable final component
    #[error("Invalid attachment filename: '{0}'")]
    InvalidFilename(String),

    /// Writing the attachment to disk failed
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Target path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ParlorError>;
