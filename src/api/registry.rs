//! Server-side session registry
//!
//! [`SessionRegistry`] is the authoritative set of live sessions in the room.
//! Membership is guarded by one lock; broadcasts only hold it long enough to
//! copy the member list and then send through each session's own write lock,
//! so a slow peer never blocks joins or leaves.

use crate::api::events::{Event, EventHandlers, PeerInfo};
use crate::network::{Session, SessionId};
use crate::protocol::Frame;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Registry of live sessions keyed by [`SessionId`]
///
/// # Examples
///
/// ```no_run
/// use parlor::api::{EventHandlers, SessionRegistry};
/// use parlor::network::Session;
/// use parlor::protocol::{Dialect, Frame};
/// use std::sync::Arc;
///
/// # async fn example() -> parlor::Result<()> {
/// let registry = SessionRegistry::new(EventHandlers::new());
/// let session = Arc::new(Session::connect("localhost:5000", Dialect::Typed).await?);
///
/// registry.add(Arc::clone(&session));
/// registry.broadcast(&Frame::Text("hello".into()), None).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: RwLock<BTreeMap<SessionId, Arc<Session>>>,
    events: EventHandlers,
}

impl SessionRegistry {
    /// Create an empty registry reporting send failures to `events`
    pub fn new(events: EventHandlers) -> Self {
        Self {
            sessions: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Register a session
    ///
    /// Returns `false` without registering if the session is already dead or
    /// already present.
    pub fn add(&self, session: Arc<Session>) -> bool {
        let mut sessions = self.sessions.write();
        if !session.is_alive() || sessions.contains_key(&session.id()) {
            return false;
        }

        debug!(session = %session.id(), peer = %session.label(), "session registered");
        sessions.insert(session.id(), session);
        true
    }

    /// Unregister a session. Returns `false` if it was not registered.
    pub fn remove(&self, session: &Session) -> bool {
        let removed = self.sessions.write().remove(&session.id()).is_some();
        if removed {
            debug!(session = %session.id(), peer = %session.label(), "session unregistered");
        }
        removed
    }

    /// Send `frame` to every live session except `exclude`
    ///
    /// A failed send is logged and reported as [`Event::PeerSendFailed`]; it
    /// neither stops delivery to the remaining sessions nor unregisters the
    /// failing one, whose own receive loop is responsible for its teardown.
    ///
    /// Returns the number of sessions the frame was written to.
    pub async fn broadcast(&self, frame: &Frame, exclude: Option<SessionId>) -> usize {
        let recipients: Vec<Arc<Session>> = self
            .members()
            .into_iter()
            .filter(|s| Some(s.id()) != exclude)
            .collect();

        let mut delivered = 0;
        for session in recipients {
            match session.send(frame).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(peer = %session.label(), "broadcast of {} failed: {}", frame.kind(), e);
                    self.events.dispatch(Event::PeerSendFailed {
                        peer: peer_info(&session),
                        error: e.to_string(),
                    });
                },
            }
        }

        delivered
    }

    /// Send `Exit` to every live session at once, giving each at most `grace`
    ///
    /// Used on shutdown. A peer that has stopped reading cannot hold up the
    /// others, and a send still pending after `grace` is abandoned; the
    /// session is expected to be closed right after. Returns the number of
    /// sessions that took the frame.
    pub async fn broadcast_exit(&self, grace: Duration) -> usize {
        let mut sends = JoinSet::new();
        for session in self.members() {
            sends.spawn(async move {
                match timeout(grace, session.send(&Frame::Exit)).await {
                    Ok(Ok(())) => true,
                    Ok(Err(e)) => {
                        debug!(peer = %session.label(), "exit frame not sent: {}", e);
                        false
                    },
                    Err(_) => {
                        debug!(peer = %session.label(), "exit frame timed out");
                        false
                    },
                }
            });
        }

        let mut delivered = 0;
        while let Some(sent) = sends.join_next().await {
            match sent {
                Ok(true) => delivered += 1,
                Ok(false) => {},
                Err(e) => warn!("exit send task failed: {}", e),
            }
        }
        delivered
    }

    /// Point-in-time list of live peers in join order
    pub fn snapshot(&self) -> Vec<PeerInfo> {
        self.members().iter().map(|s| peer_info(s)).collect()
    }

    /// Number of live registered sessions
    pub fn len(&self) -> usize {
        self.sessions.read().values().filter(|s| s.is_alive()).count()
    }

    /// Whether no live session is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every registered session
    ///
    /// Each session's receive loop observes the close and unregisters it.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = self.sessions.read().values().cloned().collect();
        for session in sessions {
            session.close().await;
        }
    }

    fn members(&self) -> Vec<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .filter(|s| s.is_alive())
            .cloned()
            .collect()
    }
}

/// Peer list entry for a session
pub fn peer_info(session: &Session) -> PeerInfo {
    PeerInfo {
        id: session.id(),
        name: session.name(),
        address: session.remote_addr(),
    }
}
