//! High-level API for Parlor
//!
//! This module provides the two roles applications build on: [`Listener`]
//! (the server) and [`Connector`] (the client), together with their
//! configuration and the [`Event`] stream they report through.

pub mod config;
pub mod connector;
pub mod events;
pub mod listener;
pub mod registry;

// Re-export main types for convenience
pub use config::{ClientConfig, EchoPolicy, ServerConfig};
pub use connector::{validate_identity, Connector};
pub use events::{Event, EventCallback, EventHandlers, PeerInfo, SubscriptionHandle};
pub use listener::{Listener, ListenerState};
pub use registry::{peer_info, SessionRegistry};
