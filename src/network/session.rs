//! Session management and frame I/O
//!
//! A [`Session`] is one live TCP connection speaking the chat protocol. It
//! owns both socket halves: sends are serialized by a per-session write lock,
//! and a single receive loop owns the read half for the session's lifetime.
//!
//! Teardown is gated on an atomic `alive` flag so that resource release
//! happens exactly once, no matter whether a remote exit, an I/O error or a
//! local [`Session::close`] gets there first.

use crate::error::{NetworkError, Result};
use crate::protocol::{read_frame, write_frame, Dialect, Frame};
use parking_lot::RwLock;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique key of a session, increasing in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl SessionId {
    fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of this id
    pub fn as_u64(&self) -> u64 {
        self.0
    }

    #[cfg(test)]
    pub(crate) fn for_tests(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent the exit sentinel
    RemoteExit,
    /// The owning side called [`Session::close`]
    Local,
    /// Reading or decoding failed
    Error(String),
}

/// One live, framed, bidirectional connection
pub struct Session {
    id: SessionId,
    /// Peer display name; empty until the identity frame arrives
    name: RwLock<String>,
    remote_addr: SocketAddr,
    dialect: Dialect,
    alive: AtomicBool,
    loop_started: AtomicBool,
    reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    /// Flipped to `true` by `close()` to wake a blocked reader
    shutdown: watch::Sender<bool>,
}

impl Session {
    /// Connect to a peer as a client
    ///
    /// # Example
    ///
    /// ```no_run
    /// use parlor::network::Session;
    /// use parlor::protocol::Dialect;
    ///
    /// # async fn example() -> parlor::Result<()> {
    /// let session = Session::connect("localhost:5000", Dialect::Typed).await?;
    /// println!("connected to {}", session.remote_addr());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(address: &str, dialect: Dialect) -> Result<Self> {
        let stream =
            TcpStream::connect(address)
                .await
                .map_err(|e| NetworkError::ConnectionFailed {
                    address: address.to_string(),
                    reason: e.to_string(),
                })?;

        let remote_addr = stream
            .peer_addr()
            .map_err(|e| NetworkError::ConnectionFailed {
                address: address.to_string(),
                reason: format!("Failed to get peer address: {}", e),
            })?;

        Ok(Self::from_stream(stream, remote_addr, dialect))
    }

    /// Wrap a connection accepted by a listener
    pub fn accept(stream: TcpStream, remote_addr: SocketAddr, dialect: Dialect) -> Self {
        Self::from_stream(stream, remote_addr, dialect)
    }

    fn from_stream(stream: TcpStream, remote_addr: SocketAddr, dialect: Dialect) -> Self {
        // Small frames are written in one write_all; don't let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            debug!(addr = %remote_addr, "set_nodelay failed: {}", e);
        }

        let (read_half, write_half) = stream.into_split();
        let (shutdown, _) = watch::channel(false);

        Self {
            id: SessionId::next(),
            name: RwLock::new(String::new()),
            remote_addr,
            dialect,
            alive: AtomicBool::new(true),
            loop_started: AtomicBool::new(false),
            reader: Mutex::new(Some(BufReader::new(read_half))),
            writer: Mutex::new(Some(write_half)),
            shutdown,
        }
    }

    /// Send one frame
    ///
    /// The whole frame is written under the session's write lock, so frames
    /// sent from different tasks never interleave on the wire. A write still
    /// in flight when the session is closed is abandoned and fails with
    /// [`NetworkError::ConnectionClosed`].
    pub async fn send(&self, frame: &Frame) -> Result<()> {
        if !self.is_alive() {
            return Err(self.closed_error());
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| self.closed_error())?;

        // A peer that stops reading must not keep close() waiting on this lock.
        let written = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => None,
            result = write_frame(writer, frame, self.dialect) => Some(result),
        };
        written.unwrap_or_else(|| Err(self.closed_error()))
    }

    /// Read the handshake frame and record the peer's name
    ///
    /// The first inbound frame must be [`Frame::Identity`] with a non-empty
    /// name. Anything else is a protocol violation; the caller is expected to
    /// close and discard the session.
    pub async fn receive_identity(&self) -> Result<String> {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(self.closed_error());
        };

        let mut shutdown = self.shutdown.subscribe();
        let frame = tokio::select! {
            biased;
            _ = shutdown.wait_for(|closed| *closed) => None,
            result = read_frame(reader, self.dialect, true) => Some(result),
        };

        let Some(frame) = frame else {
            guard.take();
            return Err(self.closed_error());
        };

        match frame? {
            Frame::Identity(name) if !name.trim().is_empty() => {
                *self.name.write() = name.clone();
                Ok(name)
            },
            Frame::Identity(_) => Err(NetworkError::ProtocolViolation {
                reason: "empty identity".to_string(),
            }
            .into()),
            other => Err(NetworkError::ProtocolViolation {
                reason: format!("expected Identity as first frame, got {}", other.kind()),
            }
            .into()),
        }
    }

    /// Run the receive loop until the session ends
    ///
    /// Frames are handed to `on_frame` one at a time in arrival order; the
    /// loop waits for each callback before reading the next frame. When the
    /// peer sends `Exit`, a read fails, or the session is closed locally, the
    /// session is marked dead and `on_closed` runs exactly once with the
    /// reason. The socket is released only after `on_closed` completes.
    ///
    /// Only one receive loop may run per session; a second call returns
    /// immediately without invoking either callback.
    pub async fn receive_loop<F, Fut, C, CFut>(&self, mut on_frame: F, on_closed: C)
    where
        F: FnMut(Frame) -> Fut,
        Fut: Future<Output = ()>,
        C: FnOnce(CloseReason) -> CFut,
        CFut: Future<Output = ()>,
    {
        if self.loop_started.swap(true, Ordering::AcqRel) {
            warn!(session = %self.id, "receive loop already running");
            return;
        }

        let mut reader = self.reader.lock().await.take();
        let reason = match reader.as_mut() {
            Some(reader) => {
                let mut shutdown = self.shutdown.subscribe();
                loop {
                    let result = tokio::select! {
                        biased;
                        _ = shutdown.wait_for(|closed| *closed) => break CloseReason::Local,
                        result = read_frame(reader, self.dialect, false) => result,
                    };

                    match result {
                        Ok(Frame::Exit) => break CloseReason::RemoteExit,
                        Ok(frame) => on_frame(frame).await,
                        Err(_) if !self.is_alive() => break CloseReason::Local,
                        Err(e) => break CloseReason::Error(e.to_string()),
                    }
                }
            },
            // Closed before the loop got the reader.
            None => CloseReason::Local,
        };

        debug!(session = %self.id, peer = %self.label(), ?reason, "receive loop finished");
        self.mark_dead();
        on_closed(reason).await;

        drop(reader);
        self.release().await;
    }

    /// Close the session
    ///
    /// Idempotent. The first call marks the session dead and wakes any
    /// blocked read or write. Without a receive loop the socket is shut down
    /// before `close` returns; with one, the loop shuts it down after its
    /// `on_closed` callback. Later calls do nothing.
    pub async fn close(&self) {
        if !self.mark_dead() {
            return;
        }

        // A running receive loop reports the close, then releases the socket.
        if !self.loop_started.load(Ordering::Acquire) {
            self.release().await;
        }
    }

    /// Flip `alive` to false and wake every pending read and write.
    /// Returns `true` only for the call that performed the transition.
    fn mark_dead(&self) -> bool {
        if self
            .alive
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.shutdown.send_replace(true);
        debug!(session = %self.id, peer = %self.label(), "session closed");
        true
    }

    async fn release(&self) {
        // A reader still parked here belongs to no loop; drop it now.
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await; // Peer may already be gone
            debug!(session = %self.id, "socket released");
        }
    }

    /// Whether the session can still send and receive
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// Registry key of this session
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Peer display name (empty until the identity frame is received)
    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    /// Peer name, or its address when no name is known yet
    pub fn label(&self) -> String {
        let name = self.name.read();
        if name.is_empty() {
            self.remote_addr.to_string()
        } else {
            name.clone()
        }
    }

    /// Remote peer address
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Dialect this session reads and writes
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn closed_error(&self) -> crate::error::ParlorError {
        NetworkError::ConnectionClosed { peer: self.label() }.into()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("name", &*self.name.read())
            .field("remote_addr", &self.remote_addr)
            .field("dialect", &self.dialect)
            .field("alive", &self.is_alive())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParlorError;
    use crate::protocol::encode;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::time::{timeout, Duration};

    /// A connected (client session, raw server-side socket) pair
    async fn session_pair() -> (Session, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap().0 });
        let session = Session::connect(&addr.to_string(), Dialect::Typed)
            .await
            .unwrap();
        (session, accept.await.unwrap())
    }

    #[test]
    fn test_session_ids_increase() {
        let a = SessionId::next();
        let b = SessionId::next();
        assert!(b > a);
        assert_eq!(format!("{}", SessionId(7)), "#7");
    }

    #[tokio::test]
    async fn test_send_writes_encoded_frame() {
        let (session, mut raw) = session_pair().await;
        let frame = Frame::Text("hello".to_string());
        session.send(&frame).await.unwrap();

        let expected = encode(&frame, Dialect::Typed).unwrap();
        let mut buf = vec![0u8; expected.len()];
        raw.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (session, _raw) = session_pair().await;
        session.close().await;
        assert!(!session.is_alive());

        let err = session.send(&Frame::Text("late".into())).await.unwrap_err();
        assert!(matches!(
            err,
            ParlorError::Network(NetworkError::ConnectionClosed { .. })
        ));
    }

    #[tokio::test]
    async fn test_receive_identity_sets_name() {
        let (session, mut raw) = session_pair().await;
        let bytes = encode(&Frame::Identity("Alice".into()), Dialect::Typed).unwrap();
        raw.write_all(&bytes).await.unwrap();

        assert_eq!(session.name(), "");
        assert_eq!(session.receive_identity().await.unwrap(), "Alice");
        assert_eq!(session.name(), "Alice");
        assert_eq!(session.label(), "Alice");
    }

    #[tokio::test]
    async fn test_receive_identity_rejects_text_first() {
        let (session, mut raw) = session_pair().await;
        let bytes = encode(&Frame::Text("hi".into()), Dialect::Typed).unwrap();
        raw.write_all(&bytes).await.unwrap();

        let err = session.receive_identity().await.unwrap_err();
        assert!(matches!(
            err,
            ParlorError::Network(NetworkError::ProtocolViolation { .. })
        ));
        assert_eq!(session.name(), "");
    }

    #[tokio::test]
    async fn test_receive_loop_delivers_in_order_then_remote_exit() {
        let (session, mut raw) = session_pair().await;
        for frame in [
            Frame::Text("one".into()),
            Frame::Text("two".into()),
            Frame::Exit,
        ] {
            raw.write_all(&encode(&frame, Dialect::Typed).unwrap())
                .await
                .unwrap();
        }

        let mut received = Vec::new();
        let mut reason = None;
        session
            .receive_loop(
                |frame| {
                    received.push(frame);
                    async {}
                },
                |r| {
                    reason = Some(r);
                    async {}
                },
            )
            .await;

        assert_eq!(
            received,
            vec![Frame::Text("one".into()), Frame::Text("two".into())]
        );
        assert_eq!(reason, Some(CloseReason::RemoteExit));
        assert!(!session.is_alive());
    }

    #[tokio::test]
    async fn test_receive_loop_reports_peer_disconnect_as_error() {
        let (session, raw) = session_pair().await;
        drop(raw);

        let mut reason = None;
        session
            .receive_loop(|_| async {}, |r| {
                reason = Some(r);
                async {}
            })
            .await;

        assert!(matches!(reason, Some(CloseReason::Error(_))));
    }

    #[tokio::test]
    async fn test_local_close_wakes_receive_loop() {
        let (session, _raw) = session_pair().await;
        let session = Arc::new(session);

        let looping = Arc::clone(&session);
        let task = tokio::spawn(async move {
            let mut reason = None;
            looping
                .receive_loop(|_| async {}, |r| {
                    reason = Some(r);
                    async {}
                })
                .await;
            reason
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close().await;

        let reason = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(reason, Some(CloseReason::Local));
    }

    #[tokio::test]
    async fn test_cleanup_runs_once_under_racing_closes() {
        let (session, mut raw) = session_pair().await;
        let session = Arc::new(session);
        let closed_count = Arc::new(AtomicUsize::new(0));

        let looping = Arc::clone(&session);
        let count = Arc::clone(&closed_count);
        let task = tokio::spawn(async move {
            looping
                .receive_loop(|_| async {}, move |_| {
                    count.fetch_add(1, Ordering::SeqCst);
                    async {}
                })
                .await;
        });

        // Remote exit racing several local closes.
        raw.write_all(&encode(&Frame::Exit, Dialect::Typed).unwrap())
            .await
            .unwrap();
        let closers: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&session);
                tokio::spawn(async move { s.close().await })
            })
            .collect();
        for closer in closers {
            closer.await.unwrap();
        }

        timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(closed_count.load(Ordering::SeqCst), 1);
        assert!(!session.is_alive());
    }

    #[tokio::test]
    async fn test_second_receive_loop_is_ignored() {
        let (session, _raw) = session_pair().await;
        session.close().await;

        let calls = AtomicUsize::new(0);
        session
            .receive_loop(|_| async {}, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .await;
        session
            .receive_loop(|_| async {}, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {}
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_shuts_down_socket() {
        let (session, mut raw) = session_pair().await;
        session.close().await;
        session.close().await;

        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), raw.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
    #[tokio::test]
    async fn test_close_interrupts_send_to_stalled_peer() {
        // The peer never reads, so a large write fills the socket buffers.
        let (session, _raw) = session_pair().await;
        let session = Arc::new(session);

        let sending = Arc::clone(&session);
        let send = tokio::spawn(async move {
            sending
                .send(&Frame::Attachment {
                    filename: "big.bin".into(),
                    data: vec![0u8; 15 * 1024 * 1024],
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(!send.is_finished());

        timeout(Duration::from_secs(3), session.close())
            .await
            .expect("close blocked behind a stalled write");

        let result = timeout(Duration::from_secs(3), send)
            .await
            .expect("send not interrupted")
            .unwrap();
        assert!(matches!(
            result,
            Err(ParlorError::Network(NetworkError::ConnectionClosed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_on_closed_runs_before_release_on_remote_exit() {
        let (session, mut raw) = session_pair().await;
        raw.write_all(&encode(&Frame::Exit, Dialect::Typed).unwrap())
            .await
            .unwrap();

        let mut held_at_close = None;
        session
            .receive_loop(|_| async {}, |_| {
                held_at_close = Some(session.writer.try_lock().map(|w| w.is_some()).unwrap_or(false));
                async {}
            })
            .await;

        assert_eq!(held_at_close, Some(true));
        assert!(session.writer.try_lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_close_releases_after_on_closed() {
        let (session, mut raw) = session_pair().await;
        let session = Arc::new(session);

        let looping = Arc::clone(&session);
        let task = tokio::spawn(async move {
            let mut held_at_close = None;
            looping
                .receive_loop(|_| async {}, |_| {
                    held_at_close =
                        Some(looping.writer.try_lock().map(|w| w.is_some()).unwrap_or(false));
                    async {}
                })
                .await;
            held_at_close
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close().await;

        let held = timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
        assert_eq!(held, Some(true));

        // Released by the loop once it finished.
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(2), raw.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
