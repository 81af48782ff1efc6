//! Event system for asynchronous notification delivery
//!
//! The networking core never touches a UI. Everything a display needs to
//! know (messages, attachments, peers joining and leaving, status lines,
//! session shutdown) is published as an [`Event`] through [`EventHandlers`].
//! Handlers run on whichever task raised the event; a UI with its own thread
//! model should forward them through [`EventHandlers::subscribe_channel`].

use crate::network::{CloseReason, SessionId};
use parking_lot::RwLock;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::mpsc;

/// A registered peer as shown in peer lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    /// Registry key
    pub id: SessionId,
    /// Display name from the identity frame
    pub name: String,
    /// Remote socket address
    pub address: SocketAddr,
}

impl PeerInfo {
    /// `name (ip)` as used in peer list widgets
    pub fn display(&self) -> String {
        format!("{} ({})", self.name, self.address.ip())
    }
}

/// Events that can be delivered to application handlers
#[derive(Debug, Clone)]
pub enum Event {
    /// A chat line to display
    MessageReceived {
        /// Originating peer, when known (server side)
        sender: Option<String>,
        /// Display text, already prefixed with the sender's name
        text: String,
        /// Time the line was received
        timestamp: SystemTime,
    },

    /// An attachment was written to disk
    AttachmentReceived {
        /// Originating peer, when known (server side)
        sender: Option<String>,
        /// Name supplied by the sender
        filename: String,
        /// Where the bytes were written
        path: PathBuf,
        /// Payload size in bytes
        size: usize,
        /// Time the attachment was received
        timestamp: SystemTime,
    },

    /// A peer completed its handshake and was registered
    PeerJoined {
        /// The new peer
        peer: PeerInfo,
    },

    /// A registered peer's session ended
    PeerLeft {
        /// The departed peer
        peer: PeerInfo,
        /// Why its session ended
        reason: CloseReason,
    },

    /// Registry membership changed; carries the new snapshot
    PeerListChanged {
        /// Live peers in join order
        peers: Vec<PeerInfo>,
    },

    /// A broadcast could not be delivered to one peer
    PeerSendFailed {
        /// Peer that missed the frame
        peer: PeerInfo,
        /// Send failure
        error: String,
    },

    /// Human-readable status line
    Status {
        /// Text to show
        message: String,
    },

    /// The local client session ended; the UI decides what happens next
    SessionEnded {
        /// Why the session ended
        reason: CloseReason,
    },
}

impl Event {
    /// Build a status event
    pub fn status(message: impl Into<String>) -> Self {
        Event::Status {
            message: message.into(),
        }
    }

    /// Text a chat display should append for this event, if any
    pub fn display_text(&self) -> Option<String> {
        match self {
            Event::MessageReceived { text, .. } => Some(text.clone()),
            Event::AttachmentReceived {
                sender,
                filename,
                size,
                ..
            } => Some(match sender {
                Some(name) => format!("{} sent an image: {} ({} bytes)", name, filename, size),
                None => format!("Received image: {} ({} bytes)", filename, size),
            }),
            Event::PeerSendFailed { peer, error } => Some(format!(
                "Failed to send message to '{}': {}",
                peer.name, error
            )),
            Event::Status { message } => Some(message.clone()),
            _ => None,
        }
    }
}

/// Handle for unsubscribing from events
///
/// Dropping the handle does not unsubscribe; call
/// [`EventHandlers::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// Type alias for event handler callbacks
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync + 'static>;

/// Manages event subscriptions and delivery
///
/// Cheap to clone; clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct EventHandlers {
    handlers: Arc<RwLock<Vec<(SubscriptionHandle, EventCallback)>>>,
    next_id: Arc<AtomicU64>,
}

impl EventHandlers {
    /// Create an empty handler registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for all future events
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        let handle = SubscriptionHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers.write().push((handle, Arc::new(callback)));
        handle
    }

    /// Register a handler that forwards every event into a channel
    ///
    /// Events sent after the receiver is dropped are discarded.
    pub fn subscribe_channel(&self) -> (SubscriptionHandle, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.subscribe(move |event| {
            let _ = tx.send(event);
        });
        (handle, rx)
    }

    /// Remove a handler. Unknown handles are ignored.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.handlers.write().retain(|(h, _)| *h != handle);
    }

    /// Dispatch an event to all registered handlers
    ///
    /// Handlers are called in registration order. A panicking handler is
    /// logged and skipped; the remaining handlers still run.
    pub fn dispatch(&self, event: Event) {
        // Snapshot so handlers may subscribe/unsubscribe without deadlocking.
        let handlers: Vec<_> = self.handlers.read().clone();

        for (handle, callback) in handlers.iter() {
            let event_clone = event.clone();

            if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                callback(event_clone);
            })) {
                tracing::error!(
                    "Event handler {:?} panicked: {:?}",
                    handle,
                    e.downcast_ref::<&str>()
                        .copied()
                        .or_else(|| e.downcast_ref::<String>().map(|s| s.as_str()))
                        .unwrap_or("unknown panic")
                );
            }
        }
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[test]
    fn test_event_handlers_subscribe() {
        let handlers = EventHandlers::new();
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = Arc::clone(&called);

        let _handle = handlers.subscribe(move |_event| {
            called_clone.store(true, Ordering::SeqCst);
        });

        handlers.dispatch(Event::status("hello"));
        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_event_handlers_unsubscribe() {
        let handlers = EventHandlers::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let handle = handlers.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });
        handlers.dispatch(Event::status("one"));
        handlers.unsubscribe(handle);
        handlers.dispatch(Event::status("two"));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(handlers.handler_count(), 0);
    }

    #[test]
    fn test_clones_share_subscribers() {
        let handlers = EventHandlers::new();
        let clone = handlers.clone();
        let _h = clone.subscribe(|_| {});
        assert_eq!(handlers.handler_count(), 1);
    }

    #[test]
    fn test_event_handlers_panic_isolation() {
        let handlers = EventHandlers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let _handle1 = handlers.subscribe(|_event| {
            panic!("Handler panic");
        });

        let count_clone = Arc::clone(&count);
        let _handle2 = handlers.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        handlers.dispatch(Event::status("x"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_channel() {
        let handlers = EventHandlers::new();
        let (_handle, mut rx) = handlers.subscribe_channel();

        handlers.dispatch(Event::status("via channel"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.display_text().as_deref(), Some("via channel"));
    }

    #[test]
    fn test_attachment_display_text() {
        let event = Event::AttachmentReceived {
            sender: Some("Alice".to_string()),
            filename: "photo.png".to_string(),
            path: PathBuf::from("received-images/photo.png"),
            size: 1024,
            timestamp: SystemTime::now(),
        };
        assert_eq!(
            event.display_text().unwrap(),
            "Alice sent an image: photo.png (1024 bytes)"
        );
    }

    #[test]
    fn test_peer_info_display() {
        let peer = PeerInfo {
            id: crate::network::SessionId::for_tests(3),
            name: "Bob".to_string(),
            address: "127.0.0.1:41000".parse().unwrap(),
        };
        assert_eq!(peer.display(), "Bob (127.0.0.1)");
    }
}
