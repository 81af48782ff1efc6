//! Protocol module
//!
//! This module defines the [`Frame`] union exchanged between chat peers and
//! the length-prefixed wire encoding shared by the server and client roles.
//!
//! Two dialects exist on the wire (see [`Dialect`]). The typed dialect is
//! canonical; the bare dialect is kept as a compatibility fallback.

pub mod codec;
pub mod dialect;

pub use codec::{encode, read_frame, write_frame};
pub use dialect::{Dialect, FrameTag};

use std::fmt;

/// Sentinel text that terminates a session
pub const EXIT_SENTINEL: &str = "exit";

/// Maximum attachment payload accepted on the wire (16 MB)
pub const MAX_ATTACHMENT_SIZE: usize = 16 * 1024 * 1024;

/// Maximum encoded length of a single wire string
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// One discrete protocol message
#[derive(Clone, PartialEq, Eq)]
pub enum Frame {
    /// First frame a client sends after connecting
    Identity(String),
    /// Chat text
    Text(String),
    /// Binary payload with a sender-chosen filename
    Attachment {
        /// Filename as supplied by the sender
        filename: String,
        /// Raw payload; its length is the wire size field
        data: Vec<u8>,
    },
    /// The sender is terminating this session now
    Exit,
}

impl Frame {
    /// Build a text frame, mapping the exit sentinel to [`Frame::Exit`]
    pub fn text(body: impl Into<String>) -> Self {
        let body = body.into();
        if is_exit_sentinel(&body) {
            Frame::Exit
        } else {
            Frame::Text(body)
        }
    }

    /// Short name of the frame kind, used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Identity(_) => "Identity",
            Frame::Text(_) => "Text",
            Frame::Attachment { .. } => "Attachment",
            Frame::Exit => "Exit",
        }
    }
}

// Attachment bytes can be megabytes; show the size instead.
impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Frame::Identity(name) => f.debug_tuple("Identity").field(name).finish(),
            Frame::Text(body) => f.debug_tuple("Text").field(body).finish(),
            Frame::Attachment { filename, data } => f
                .debug_struct("Attachment")
                .field("filename", filename)
                .field("size", &data.len())
                .finish(),
            Frame::Exit => f.write_str("Exit"),
        }
    }
}

/// Whether a string is the (case-insensitive) exit sentinel
pub fn is_exit_sentinel(s: &str) -> bool {
    s.eq_ignore_ascii_case(EXIT_SENTINEL)
}
