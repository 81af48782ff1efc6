//! # Parlor
//!
//! A small multi-user chat transport over TCP: a server that relays chat
//! lines and image attachments between named clients, and the client side
//! that talks to it.
//!
//! Both roles report everything they observe as [`Event`]s, so the same core
//! can sit behind a terminal, a GUI or a test harness.
//!
//! ## Quick Start
//!
//! ```no_run
//! use parlor::{ClientConfig, Connector, Listener, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = Listener::new(ServerConfig::default())?;
//!     server.start().await?;
//!
//!     let client = Connector::new(ClientConfig::default())?;
//!     client.on_event(|event| {
//!         if let Some(line) = event.display_text() {
//!             println!("{}", line);
//!         }
//!     });
//!
//!     let session = client.connect("localhost", 5000, "Alice").await?;
//!     client.spawn_receiver(session.clone());
//!     client.send_text(&session, "hello").await?;
//!
//!     client.disconnect(&session).await;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod api;
pub mod error;
pub mod network;
pub mod protocol;
pub mod storage;

// Re-export main types
pub use api::{
    ClientConfig, Connector, EchoPolicy, Event, EventHandlers, Listener, ListenerState, PeerInfo,
    ServerConfig, SessionRegistry, SubscriptionHandle,
};
pub use error::{ConfigError, FramingError, NetworkError, ParlorError, Result, StorageError};
pub use network::{CloseReason, Session, SessionId};
pub use protocol::{Dialect, Frame};
pub use storage::AttachmentSink;
