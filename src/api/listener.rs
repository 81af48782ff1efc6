//! Server role: accept loop, handshakes and per-session relaying
//!
//! A [`Listener`] binds a TCP port, accepts clients on a background task and
//! hands each connection to its own task. That task performs the identity
//! handshake, registers the session and runs its receive loop, relaying chat
//! lines and attachments to the rest of the room.

use crate::api::config::{EchoPolicy, ServerConfig};
use crate::api::events::{Event, EventHandlers, PeerInfo, SubscriptionHandle};
use crate::api::registry::{peer_info, SessionRegistry};
use crate::error::{NetworkError, Result};
use crate::network::{CloseReason, Session};
use crate::protocol::{Dialect, Frame};
use crate::storage::AttachmentSink;
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How long `stop()` waits for each client to take its `Exit` frame
const EXIT_GRACE: Duration = Duration::from_millis(500);

/// Lifecycle state of a [`Listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    /// Created but not yet bound
    Created,
    /// Accepting connections
    Running,
    /// Stopped; may be started again
    Stopped,
}

/// State shared between the listener handle and its background tasks
struct Shared {
    registry: SessionRegistry,
    events: EventHandlers,
    sink: AttachmentSink,
    dialect: Dialect,
    echo_policy: EchoPolicy,
    relay_attachments: bool,
}

/// Chat server
///
/// # Examples
///
/// ```no_run
/// use parlor::api::{Listener, ServerConfig};
///
/// # async fn example() -> parlor::Result<()> {
/// let listener = Listener::new(ServerConfig::default())?;
/// listener.on_event(|event| {
///     if let Some(line) = event.display_text() {
///         println!("{}", line);
///     }
/// });
///
/// let addr = listener.start().await?;
/// println!("listening on {}", addr);
///
/// listener.send_text("welcome").await;
/// listener.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct Listener {
    config: ServerConfig,
    shared: Arc<Shared>,
    state: RwLock<ListenerState>,
    local_addr: RwLock<Option<SocketAddr>>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    /// Serializes start() and stop()
    lifecycle: tokio::sync::Mutex<()>,
}

impl Listener {
    /// Create a listener from a validated configuration
    pub fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;

        let events = EventHandlers::new();
        let shared = Arc::new(Shared {
            registry: SessionRegistry::new(events.clone()),
            events,
            sink: AttachmentSink::new(config.attachment_dir.clone()),
            dialect: config.dialect,
            echo_policy: config.echo_policy,
            relay_attachments: config.relay_attachments,
        });
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            shared,
            state: RwLock::new(ListenerState::Created),
            local_addr: RwLock::new(None),
            shutdown,
            accept_task: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        })
    }

    /// Bind the configured address and start accepting clients
    ///
    /// Returns the bound address, which differs from the configured one when
    /// the configured port is 0. Calling `start` on a running listener
    /// returns its current address.
    ///
    /// # Errors
    ///
    /// [`NetworkError::BindFailed`] if the address cannot be bound. Binding
    /// is not retried.
    pub async fn start(&self) -> Result<SocketAddr> {
        let _lifecycle = self.lifecycle.lock().await;

        if *self.state.read() == ListenerState::Running {
            if let Some(addr) = *self.local_addr.read() {
                return Ok(addr);
            }
        }

        let address = self.config.bind_address();
        let bind_failed = |e: std::io::Error| NetworkError::BindFailed {
            address: address.clone(),
            reason: e.to_string(),
        };

        let tcp_listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(%address, "bind failed: {}", e);
                self.shared
                    .events
                    .dispatch(Event::status(format!("Failed to start server: {}", e)));
                return Err(bind_failed(e).into());
            },
        };
        let local_addr = tcp_listener.local_addr().map_err(bind_failed)?;

        self.shutdown.send_replace(false);
        let task = tokio::spawn(accept_loop(
            tcp_listener,
            Arc::clone(&self.shared),
            self.shutdown.subscribe(),
        ));

        *self.accept_task.lock() = Some(task);
        *self.local_addr.write() = Some(local_addr);
        *self.state.write() = ListenerState::Running;

        info!(addr = %local_addr, dialect = %self.shared.dialect, "server started");
        self.shared.events.dispatch(Event::status(format!(
            "Server started on port {}",
            local_addr.port()
        )));

        Ok(local_addr)
    }

    /// Stop the server
    ///
    /// Stops accepting, tells every client the session is over with an
    /// `Exit` frame, closes every session and releases the listening socket.
    /// A client that does not take its `Exit` within a short grace period is
    /// closed without it. Idempotent.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        {
            let mut state = self.state.write();
            if *state != ListenerState::Running {
                return;
            }
            *state = ListenerState::Stopped;
        }

        // Pending handshakes observe this and give up.
        self.shutdown.send_replace(true);

        let task = self.accept_task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("accept loop ended abnormally: {}", e);
            }
        }

        self.shared.registry.broadcast_exit(EXIT_GRACE).await;
        self.shared.registry.close_all().await;
        *self.local_addr.write() = None;

        info!("server stopped");
        self.shared.events.dispatch(Event::status("Server stopped"));
    }

    /// Broadcast a server-originated chat line to every client
    ///
    /// The line goes out as `"Server: body"` and is also reported locally as
    /// [`Event::MessageReceived`]. Returns the number of clients reached.
    pub async fn send_text(&self, body: &str) -> usize {
        let line = format!("Server: {}", body);
        self.shared.events.dispatch(Event::MessageReceived {
            sender: None,
            text: line.clone(),
            timestamp: SystemTime::now(),
        });
        self.shared.registry.broadcast(&Frame::Text(line), None).await
    }

    /// Number of connected clients
    pub fn peer_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Connected clients in join order
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.shared.registry.snapshot()
    }

    /// The session registry backing this listener
    pub fn registry(&self) -> &SessionRegistry {
        &self.shared.registry
    }

    /// Event handlers for this listener
    pub fn events(&self) -> &EventHandlers {
        &self.shared.events
    }

    /// Register an event handler
    pub fn on_event<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    /// Bound address while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ListenerState {
        *self.state.read()
    }

    /// Configuration this listener was built with
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .field("peers", &self.peer_count())
            .finish()
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stopped| *stopped) => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                debug!(%addr, "connection accepted");
                let session = Arc::new(Session::accept(stream, addr, shared.dialect));
                tokio::spawn(run_session(
                    Arc::clone(&shared),
                    session,
                    shutdown.clone(),
                ));
            },
            Err(e) => {
                // Usually fd exhaustion; back off instead of spinning.
                warn!("accept failed: {}", e);
                shared
                    .events
                    .dispatch(Event::status(format!("Error accepting client connection: {}", e)));
                tokio::time::sleep(Duration::from_millis(100)).await;
            },
        }
    }

    debug!("accept loop stopped");
}

/// Handshake, register and serve one client until its session ends
async fn run_session(shared: Arc<Shared>, session: Arc<Session>, mut shutdown: watch::Receiver<bool>) {
    let addr = session.remote_addr();

    let identity = tokio::select! {
        biased;
        _ = shutdown.wait_for(|stopped| *stopped) => None,
        identity = session.receive_identity() => Some(identity),
    };
    let Some(identity) = identity else {
        session.close().await;
        return;
    };

    let name = match identity {
        Ok(name) => name,
        Err(e) => {
            warn!(%addr, "handshake failed: {}", e);
            shared
                .events
                .dispatch(Event::status(format!("Rejected connection from {}: {}", addr, e)));
            session.close().await;
            return;
        },
    };

    if !shared.registry.add(Arc::clone(&session)) {
        session.close().await;
        return;
    }
    // stop() may have run close_all() before this session was registered.
    if *shutdown.borrow() {
        shared.registry.remove(&session);
        session.close().await;
        return;
    }

    info!(peer = %name, %addr, "client connected");
    shared.events.dispatch(Event::status(format!(
        "Client '{}' connected from {}",
        name, addr
    )));
    shared.events.dispatch(Event::PeerJoined {
        peer: peer_info(&session),
    });
    shared.events.dispatch(Event::PeerListChanged {
        peers: shared.registry.snapshot(),
    });

    session
        .receive_loop(
            |frame| shared.handle_frame(&session, frame),
            |reason| shared.handle_closed(&session, reason),
        )
        .await;
}

impl Shared {
    async fn handle_frame(&self, session: &Session, frame: Frame) {
        let name = session.name();
        let exclude = match self.echo_policy {
            EchoPolicy::ExcludeSender => Some(session.id()),
            EchoPolicy::IncludeSender => None,
        };

        match frame {
            Frame::Text(body) => {
                let line = format!("{}: {}", name, body);
                debug!(peer = %name, "text received");
                self.events.dispatch(Event::MessageReceived {
                    sender: Some(name),
                    text: line.clone(),
                    timestamp: SystemTime::now(),
                });
                self.registry.broadcast(&Frame::Text(line), exclude).await;
            },
            Frame::Attachment { filename, data } => {
                debug!(peer = %name, %filename, size = data.len(), "attachment received");
                match self.sink.store(&filename, &data).await {
                    Ok(path) => self.events.dispatch(Event::AttachmentReceived {
                        sender: Some(name.clone()),
                        filename: filename.clone(),
                        path,
                        size: data.len(),
                        timestamp: SystemTime::now(),
                    }),
                    Err(e) => {
                        warn!(peer = %name, %filename, "failed to store attachment: {}", e);
                        self.events.dispatch(Event::status(format!(
                            "Failed to save image '{}' from '{}': {}",
                            filename, name, e
                        )));
                    },
                }

                if self.relay_attachments {
                    self.registry
                        .broadcast(&Frame::Attachment { filename, data }, exclude)
                        .await;
                }
            },
            // Never yielded mid-session by the receive loop.
            Frame::Identity(_) | Frame::Exit => {},
        }
    }

    async fn handle_closed(&self, session: &Session, reason: CloseReason) {
        self.registry.remove(session);

        let name = session.label();
        let message = match &reason {
            CloseReason::RemoteExit => format!("Client '{}' has left the chat", name),
            CloseReason::Error(e) => format!("Connection lost with client '{}': {}", name, e),
            CloseReason::Local => format!("Client '{}' disconnected", name),
        };
        info!(peer = %name, ?reason, "client session ended");

        self.events.dispatch(Event::status(message));
        self.events.dispatch(Event::PeerLeft {
            peer: peer_info(session),
            reason,
        });
        self.events.dispatch(Event::PeerListChanged {
            peers: self.registry.snapshot(),
        });
    }
}
