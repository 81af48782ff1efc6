//! Storage layer for Parlor
//!
//! The only persistent state is received attachments, written by
//! [`AttachmentSink`]. Chat text is never stored.

pub mod attachments;

pub use attachments::{AttachmentSink, DEFAULT_ATTACHMENT_DIR};
