//! Common test helpers and utilities
//!
//! Shared fixtures for integration tests: a server on an ephemeral loopback
//! port, connected clients with their own event channels, and bounded waits.

#![allow(dead_code)]

use parlor::{
    ClientConfig, Connector, EchoPolicy, Event, Listener, ServerConfig, Session,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

/// Upper bound for any single wait in integration tests
pub const WAIT: Duration = Duration::from_secs(5);

/// A running server plus the directory its attachments land in
pub struct TestServer {
    pub listener: Listener,
    pub addr: SocketAddr,
    pub events: UnboundedReceiver<Event>,
    pub dir: TempDir,
}

impl TestServer {
    /// Where the server stores attachments
    pub fn attachment_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("server-images")
    }
}

/// A connected client with its own event channel and attachment directory
pub struct TestClient {
    pub connector: Connector,
    pub session: Arc<Session>,
    pub events: UnboundedReceiver<Event>,
    pub dir: TempDir,
}

impl TestClient {
    /// Where this client stores attachments
    pub fn attachment_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("client-images")
    }

    pub async fn say(&self, body: &str) {
        self.connector
            .send_text(&self.session, body)
            .await
            .unwrap();
    }
}

/// Start a server on 127.0.0.1 with an ephemeral port
pub async fn start_server(echo_policy: EchoPolicy) -> TestServer {
    let dir = TempDir::new().unwrap();
    let config = ServerConfig {
        bind_host: "127.0.0.1".to_string(),
        port: 0,
        echo_policy,
        attachment_dir: dir.path().join("server-images"),
        ..Default::default()
    };

    let listener = Listener::new(config).unwrap();
    let (_handle, events) = listener.events().subscribe_channel();
    let addr = listener.start().await.unwrap();

    TestServer {
        listener,
        addr,
        events,
        dir,
    }
}

/// Connect a client named `name` and start its receiver
///
/// Returns once the server has registered the client.
pub async fn connect_client(server: &TestServer, name: &str) -> TestClient {
    let before = server.listener.peer_count();
    let client = connect_client_unregistered(server.addr, name).await;
    wait_until(|| server.listener.peer_count() > before).await;
    client
}

/// Connect a client without waiting for the server to register it
pub async fn connect_client_unregistered(addr: SocketAddr, name: &str) -> TestClient {
    let dir = TempDir::new().unwrap();
    let config = ClientConfig {
        host: addr.ip().to_string(),
        port: addr.port(),
        attachment_dir: dir.path().join("client-images"),
        ..Default::default()
    };

    let connector = Connector::new(config).unwrap();
    let (_handle, events) = connector.events().subscribe_channel();
    let session = connector.connect_configured(name).await.unwrap();
    connector.spawn_receiver(Arc::clone(&session));

    TestClient {
        connector,
        session,
        events,
        dir,
    }
}

/// Wait for the first event matching `pred`, discarding the ones before it
pub async fn wait_for_event<F>(rx: &mut UnboundedReceiver<Event>, mut pred: F) -> Event
where
    F: FnMut(&Event) -> bool,
{
    tokio::time::timeout(WAIT, async {
        loop {
            let event = rx.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Wait for the next chat line
pub async fn next_message(rx: &mut UnboundedReceiver<Event>) -> String {
    match wait_for_event(rx, |e| matches!(e, Event::MessageReceived { .. })).await {
        Event::MessageReceived { text, .. } => text,
        _ => unreachable!(),
    }
}

/// Wait for a status line with exactly `text`
pub async fn wait_for_status(rx: &mut UnboundedReceiver<Event>, text: &str) {
    wait_for_event(rx, |e| {
        matches!(e, Event::Status { message } if message == text)
    })
    .await;
}

/// Poll `cond` until it holds
pub async fn wait_until<F>(mut cond: F)
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for condition")
}

/// Deterministic non-UTF-8 payload for attachment tests
pub fn test_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_image_is_deterministic() {
        assert_eq!(test_image(64), test_image(64));
        assert_eq!(test_image(1024).len(), 1024);
        assert!(std::str::from_utf8(&test_image(1024)).is_err());
    }
}
