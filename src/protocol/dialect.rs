//! Wire dialects and frame tags.
//!
//! Earlier revisions of the chat protocol spoke a *bare* dialect where every
//! frame is a single length-prefixed string. The *typed* dialect prefixes
//! each frame with a tag string so attachments can be carried. The two are
//! not assumed to interoperate beyond the identity handshake and the exit
//! sentinel, which both dialects write as bare strings.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol dialect spoken on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Every frame is one string; `"exit"` is the only sentinel
    Bare,
    /// Frames carry a `TEXT` / `IMAGE` tag; untagged strings fall back to bare
    #[default]
    Typed,
}

impl Dialect {
    /// Lowercase name used in config files and error messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bare => "bare",
            Self::Typed => "typed",
        }
    }

    /// Whether attachments can be expressed in this dialect
    pub fn supports_attachments(&self) -> bool {
        matches!(self, Self::Typed)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Type tag that opens a typed-dialect frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameTag {
    /// Followed by one body string
    Text,
    /// Followed by filename string, u32 size, raw bytes
    Image,
}

impl FrameTag {
    /// Wire spelling of the tag
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Image => "IMAGE",
        }
    }

    /// Recognise a tag. Matching is exact, so `"text"` is ordinary chat.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TEXT" => Some(Self::Text),
            "IMAGE" => Some(Self::Image),
            _ => None,
        }
    }
}
