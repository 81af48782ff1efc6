//! Client role
//!
//! A [`Connector`] opens a session to a server, performs the identity
//! handshake and routes inbound frames to its [`EventHandlers`].

use crate::api::config::ClientConfig;
use crate::api::events::{Event, EventHandlers, SubscriptionHandle};
use crate::error::{ConfigError, Result};
use crate::network::{CloseReason, Session};
use crate::protocol::{is_exit_sentinel, Frame, FrameTag, MAX_STRING_LEN};
use crate::storage::AttachmentSink;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Chat client
///
/// # Examples
///
/// ```no_run
/// use parlor::api::{ClientConfig, Connector};
///
/// # async fn example() -> parlor::Result<()> {
/// let connector = Connector::new(ClientConfig::default())?;
/// connector.on_event(|event| {
///     if let Some(line) = event.display_text() {
///         println!("{}", line);
///     }
/// });
///
/// let session = connector.connect("localhost", 5000, "Alice").await?;
/// connector.spawn_receiver(session.clone());
///
/// connector.send_text(&session, "hi").await?;
/// connector.disconnect(&session).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Connector {
    config: ClientConfig,
    events: EventHandlers,
    sink: AttachmentSink,
}

impl Connector {
    /// Create a connector from a validated configuration
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let sink = AttachmentSink::new(config.attachment_dir.clone());

        Ok(Self {
            config,
            events: EventHandlers::new(),
            sink,
        })
    }

    /// Connect to `host:port` and introduce ourselves as `identity`
    ///
    /// # Errors
    ///
    /// - [`ConfigError::InvalidIdentity`] if the name can't be used on the wire
    /// - [`crate::error::NetworkError::ConnectionFailed`] if the server is unreachable
    /// - any send error while writing the identity frame
    pub async fn connect(&self, host: &str, port: u16, identity: &str) -> Result<Arc<Session>> {
        validate_identity(identity)?;

        let address = format!("{}:{}", host, port);
        let session = Arc::new(Session::connect(&address, self.config.dialect).await?);

        if let Err(e) = session.send(&Frame::Identity(identity.to_string())).await {
            warn!(%address, "failed to send identity: {}", e);
            session.close().await;
            return Err(e);
        }

        info!(%address, name = %identity, "connected");
        self.events
            .dispatch(Event::status(format!("Connected as: {}", identity)));

        Ok(session)
    }

    /// Connect to the host and port from the configuration
    pub async fn connect_configured(&self, identity: &str) -> Result<Arc<Session>> {
        self.connect(&self.config.host, self.config.port, identity)
            .await
    }

    /// Start the receive loop for `session` on its own task
    ///
    /// Text frames become [`Event::MessageReceived`] and attachments are
    /// stored and reported as [`Event::AttachmentReceived`]. When the session
    /// ends, one status line is dispatched followed by
    /// [`Event::SessionEnded`].
    pub fn spawn_receiver(&self, session: Arc<Session>) -> JoinHandle<()> {
        let events = self.events.clone();
        let sink = self.sink.clone();

        tokio::spawn(async move {
            session
                .receive_loop(
                    |frame| deliver(&events, &sink, frame),
                    |reason| {
                        report_end(&events, reason);
                        async {}
                    },
                )
                .await;
        })
    }

    /// Send a chat line
    ///
    /// A body equal to the exit sentinel (any case) ends the session: `Exit`
    /// is sent and the session is closed.
    pub async fn send_text(&self, session: &Session, body: &str) -> Result<()> {
        let frame = Frame::text(body);
        if frame == Frame::Exit {
            let result = session.send(&frame).await;
            session.close().await;
            return result;
        }
        session.send(&frame).await
    }

    /// Send a binary attachment under `filename`
    pub async fn send_attachment(&self, session: &Session, filename: &str, data: Vec<u8>) -> Result<()> {
        debug!(%filename, size = data.len(), "sending attachment");
        session
            .send(&Frame::Attachment {
                filename: filename.to_string(),
                data,
            })
            .await
    }

    /// Leave the chat: send `Exit` if possible, then close the session
    pub async fn disconnect(&self, session: &Session) {
        if let Err(e) = session.send(&Frame::Exit).await {
            debug!("exit frame not sent: {}", e);
        }
        session.close().await;
    }

    /// Event handlers for this connector
    pub fn events(&self) -> &EventHandlers {
        &self.events
    }

    /// Register an event handler
    pub fn on_event<F>(&self, handler: F) -> SubscriptionHandle
    where
        F: Fn(Event) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    /// Configuration this connector was built with
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

/// Check that `name` can be sent as an identity frame
///
/// The name must be non-empty, must not be read back as the exit sentinel or
/// a dialect tag, and must fit in one wire string.
pub fn validate_identity(name: &str) -> Result<()> {
    let invalid = |reason: &str| -> Result<()> {
        Err(ConfigError::InvalidIdentity {
            name: name.to_string(),
            reason: reason.to_string(),
        }
        .into())
    };

    if name.trim().is_empty() {
        return invalid("name is empty");
    }
    if is_exit_sentinel(name) {
        return invalid("name is reserved for leaving the chat");
    }
    if FrameTag::parse(name).is_some() {
        return invalid("name is a reserved protocol tag");
    }
    if name.len() > MAX_STRING_LEN {
        return invalid("name is too long");
    }
    Ok(())
}

async fn deliver(events: &EventHandlers, sink: &AttachmentSink, frame: Frame) {
    match frame {
        Frame::Text(text) => events.dispatch(Event::MessageReceived {
            sender: None,
            text,
            timestamp: SystemTime::now(),
        }),
        Frame::Attachment { filename, data } => match sink.store(&filename, &data).await {
            Ok(path) => events.dispatch(Event::AttachmentReceived {
                sender: None,
                filename,
                path,
                size: data.len(),
                timestamp: SystemTime::now(),
            }),
            Err(e) => {
                warn!(%filename, "failed to store attachment: {}", e);
                events.dispatch(Event::status(format!(
                    "Failed to save image '{}': {}",
                    filename, e
                )));
            },
        },
        Frame::Identity(_) | Frame::Exit => {},
    }
}

fn report_end(events: &EventHandlers, reason: CloseReason) {
    let message = match &reason {
        CloseReason::RemoteExit => "Server has closed the connection".to_string(),
        CloseReason::Error(e) => format!("Connection lost: {}", e),
        CloseReason::Local => "Disconnected from server".to_string(),
    };
    info!(?reason, "session ended");

    events.dispatch(Event::status(message));
    events.dispatch(Event::SessionEnded { reason });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParlorError;

    #[test]
    fn test_validate_identity() {
        assert!(validate_identity("Alice").is_ok());
        assert!(validate_identity("exit user").is_ok());

        for bad in ["", "   ", "exit", "EXIT", "TEXT", "IMAGE"] {
            let err = validate_identity(bad).unwrap_err();
            assert!(
                matches!(err, ParlorError::Config(ConfigError::InvalidIdentity { .. })),
                "{:?} accepted",
                bad
            );
        }

        assert!(validate_identity(&"a".repeat(MAX_STRING_LEN)).is_ok());
        assert!(validate_identity(&"a".repeat(MAX_STRING_LEN + 1)).is_err());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        // Grab a free port, then release it so nothing is listening.
        let port = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let connector = Connector::new(ClientConfig::default()).unwrap();
        let err = connector
            .connect("127.0.0.1", port, "Alice")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ParlorError::Network(crate::error::NetworkError::ConnectionFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_identity_never_connects() {
        let connector = Connector::new(ClientConfig::default()).unwrap();
        let err = connector.connect("127.0.0.1", 1, "exit").await.unwrap_err();
        assert!(matches!(
            err,
            ParlorError::Config(ConfigError::InvalidIdentity { .. })
        ));
    }
}
