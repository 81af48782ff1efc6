//! Network module
//!
//! This module provides framed TCP sessions for Parlor peers. Both the
//! server and client roles speak through [`Session`].

mod session;

pub use session::{CloseReason, Session, SessionId};

/// Default TCP port for the chat server
pub const DEFAULT_PORT: u16 = 5000;

/// Default host clients connect to
pub const DEFAULT_HOST: &str = "localhost";

/// Default interface the server binds
pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";
