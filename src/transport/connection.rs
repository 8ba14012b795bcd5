//! WebSocket connection and event loop.
//!
//! This module owns one socket to the TV and fans its traffic out to
//! registered listeners.
//!
//! # Event Loop
//!
//! The connection spawns a tokio task that handles:
//!
//! - Incoming text frames (dispatched to message listeners)
//! - Outgoing frames from the Rust API
//! - The close handshake, on either side
//! - Close and error notifications

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, sleep_until};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::listeners::{
    ABNORMAL_CLOSURE, CloseInfo, EventKind, ListenerId, ListenerRegistry, NO_STATUS_RECEIVED,
    TransportEvent,
};

// ============================================================================
// Constants
// ============================================================================

/// Time allowed for the peer to answer our close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Close code sent on a normal shutdown.
const NORMAL_CLOSURE: u16 = 1000;

// ============================================================================
// ConnectionCommand
// ============================================================================

/// Internal commands for the event loop.
enum ConnectionCommand {
    /// Write a text frame.
    Send {
        text: String,
        done_tx: oneshot::Sender<Result<()>>,
    },
    /// Start the close handshake and report when it completes.
    Close {
        done_tx: oneshot::Sender<Result<CloseInfo>>,
    },
}

// ============================================================================
// Connection
// ============================================================================

/// Shared state of a connection handle.
struct ConnectionInner {
    /// Unique connection id.
    id: Uuid,
    /// Endpoint URL, token redacted.
    url: String,
    /// Channel for sending commands to the event loop.
    command_tx: mpsc::UnboundedSender<ConnectionCommand>,
    /// Listeners (shared with event loop).
    listeners: Arc<ListenerRegistry>,
    /// Set once by the event loop when the socket is gone.
    closed_rx: watch::Receiver<Option<CloseInfo>>,
}

/// WebSocket connection to the TV.
///
/// Cloning is cheap; clones share the socket and listener table.
/// The socket is closed when [`close`](Self::close) is called or the last
/// handle is dropped.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("open", &self.is_open())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Connection {
    /// Creates a connection from an established WebSocket stream.
    ///
    /// Spawns the event loop task internally.
    pub fn new<S>(url: impl Into<String>, ws_stream: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(None);
        let listeners = Arc::new(ListenerRegistry::new());
        let id = Uuid::new_v4();

        tokio::spawn(Self::run_event_loop(
            id,
            ws_stream,
            command_rx,
            Arc::clone(&listeners),
            closed_tx,
        ));

        Self {
            inner: Arc::new(ConnectionInner {
                id,
                url: url.into(),
                command_tx,
                listeners,
                closed_rx,
            }),
        }
    }

    /// Returns the unique connection id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    /// Returns the endpoint URL (token redacted).
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Returns `true` until the socket has closed.
    #[inline]
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.inner.closed_rx.borrow().is_none()
    }

    /// Registers a listener.
    ///
    /// This is the only way to attach a callback to the connection.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.add(kind, Arc::new(listener));
        trace!(connection = %self.inner.id, %id, ?kind, "Listener added");
        id
    }

    /// Removes one listener. Returns `false` if it was not registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let removed = self.inner.listeners.remove(id);
        if removed {
            trace!(connection = %self.inner.id, %id, "Listener removed");
        }
        removed
    }

    /// Removes every listener and returns how many were registered.
    pub fn remove_all_listeners(&self) -> usize {
        let count = self.inner.listeners.clear();
        if count > 0 {
            debug!(connection = %self.inner.id, count, "Removed all listeners");
        }
        count
    }

    /// Returns the number of registered listeners.
    #[inline]
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Writes a text frame and waits until it is flushed to the socket.
    ///
    /// # Errors
    ///
    /// - [`Error::ConnectionClosed`] if the socket is closed or closing
    /// - [`Error::WebSocket`] if the write fails
    pub async fn send_text(&self, text: String) -> Result<()> {
        if !self.is_open() {
            return Err(Error::ConnectionClosed);
        }

        let (done_tx, done_rx) = oneshot::channel();
        self.inner
            .command_tx
            .send(ConnectionCommand::Send { text, done_tx })
            .map_err(|_| Error::ConnectionClosed)?;

        done_rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Closes the socket and waits for confirmed closure.
    ///
    /// Returns immediately if the socket is already closed. Close listeners
    /// run before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the socket fails during the close
    /// handshake.
    pub async fn close(&self) -> Result<CloseInfo> {
        if let Some(info) = self.inner.closed_rx.borrow().clone() {
            return Ok(info);
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .inner
            .command_tx
            .send(ConnectionCommand::Close { done_tx })
            .is_err()
        {
            return Ok(self.closed().await);
        }

        match done_rx.await {
            Ok(result) => result,
            // Event loop finished on its own while the command was queued.
            Err(_) => Ok(self.closed().await),
        }
    }

    /// Waits until the socket has closed.
    pub async fn closed(&self) -> CloseInfo {
        let mut closed_rx = self.inner.closed_rx.clone();
        let info = match closed_rx.wait_for(Option::is_some).await {
            Ok(info) => info.clone(),
            Err(_) => None,
        };
        info.unwrap_or_else(|| CloseInfo::new(ABNORMAL_CLOSURE, "event loop gone", false))
    }

    /// Event loop that handles WebSocket I/O.
    async fn run_event_loop<S>(
        id: Uuid,
        ws_stream: WebSocketStream<S>,
        mut command_rx: mpsc::UnboundedReceiver<ConnectionCommand>,
        listeners: Arc<ListenerRegistry>,
        closed_tx: watch::Sender<Option<CloseInfo>>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_write, mut ws_read) = ws_stream.split();

        // Waiters for the close handshake; `Some` once we sent a close frame.
        let mut closing: Option<Vec<oneshot::Sender<Result<CloseInfo>>>> = None;
        let mut close_error: Option<String> = None;
        let close_deadline = sleep_until(Instant::now() + CLOSE_TIMEOUT);
        tokio::pin!(close_deadline);

        let info = loop {
            tokio::select! {
                message = ws_read.next() => {
                    let manual = closing.is_some();
                    match message {
                        Some(Ok(Message::Text(text))) => {
                            listeners.dispatch(&TransportEvent::Message(text.as_str().to_owned()));
                        }

                        Some(Ok(Message::Binary(data))) => {
                            debug!(connection = %id, len = data.len(), "Ignoring binary frame");
                        }

                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame.map_or_else(
                                || (NO_STATUS_RECEIVED, String::new()),
                                |frame| (u16::from(frame.code), frame.reason.as_str().to_owned()),
                            );
                            debug!(connection = %id, code, manual, "WebSocket closed");
                            break CloseInfo::new(code, reason, manual);
                        }

                        Some(Err(e)) => {
                            if manual {
                                close_error = Some(e.to_string());
                            } else {
                                warn!(connection = %id, error = %e, "WebSocket error");
                                listeners.dispatch(&TransportEvent::Error(e.to_string()));
                            }
                            break CloseInfo::new(ABNORMAL_CLOSURE, e.to_string(), manual);
                        }

                        None => {
                            debug!(connection = %id, "WebSocket stream ended");
                            break CloseInfo::new(ABNORMAL_CLOSURE, "stream ended", manual);
                        }

                        // Ping, Pong, raw frames
                        Some(Ok(_)) => {}
                    }
                }

                command = command_rx.recv() => {
                    match command {
                        Some(ConnectionCommand::Send { text, done_tx }) => {
                            let result = if closing.is_some() {
                                Err(Error::ConnectionClosed)
                            } else {
                                ws_write
                                    .send(Message::Text(text.into()))
                                    .await
                                    .map_err(Error::from)
                            };
                            let _ = done_tx.send(result);
                        }

                        Some(ConnectionCommand::Close { done_tx }) => {
                            if let Some(waiters) = closing.as_mut() {
                                waiters.push(done_tx);
                                continue;
                            }

                            debug!(connection = %id, "Sending close frame");
                            let frame = CloseFrame {
                                code: CloseCode::Normal,
                                reason: "".into(),
                            };
                            if let Err(e) = ws_write.send(Message::Close(Some(frame))).await {
                                close_error = Some(e.to_string());
                                closing = Some(vec![done_tx]);
                                break CloseInfo::new(ABNORMAL_CLOSURE, e.to_string(), true);
                            }
                            closing = Some(vec![done_tx]);
                            close_deadline.as_mut().reset(Instant::now() + CLOSE_TIMEOUT);
                        }

                        None => {
                            debug!(connection = %id, "All handles dropped, closing socket");
                            let _ = ws_write.close().await;
                            break CloseInfo::new(NORMAL_CLOSURE, "", true);
                        }
                    }
                }

                () = &mut close_deadline, if closing.is_some() => {
                    warn!(connection = %id, "Peer did not answer close frame in time");
                    break CloseInfo::new(NORMAL_CLOSURE, "close timeout", true);
                }
            }
        };

        let _ = closed_tx.send(Some(info.clone()));
        listeners.dispatch(&TransportEvent::Close(info.clone()));

        for done_tx in closing.unwrap_or_default() {
            let result = match &close_error {
                Some(message) => Err(Error::protocol(format!(
                    "socket error during close: {message}"
                ))),
                None => Ok(info.clone()),
            };
            let _ = done_tx.send(result);
        }

        debug!(connection = %id, code = info.code, "Event loop terminated");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;
    use tokio::io::{DuplexStream, duplex};
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn pair() -> (Connection, WebSocketStream<DuplexStream>) {
        let (client_io, server_io) = duplex(64 * 1024);
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        (Connection::new("ws://tv.test/api", client), server)
    }

    /// Keeps the server side reading so close replies get flushed.
    fn drain(mut server: WebSocketStream<DuplexStream>) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            let mut closes = 0;
            while let Some(Ok(message)) = server.next().await {
                if message.is_close() {
                    closes += 1;
                }
            }
            closes
        })
    }

    #[tokio::test]
    async fn test_text_frames_reach_listeners() {
        let (connection, mut server) = pair().await;
        let received = Arc::new(Mutex::new(Vec::new()));
        let received_clone = Arc::clone(&received);
        connection.on(EventKind::Message, move |event| {
            if let TransportEvent::Message(text) = event {
                received_clone.lock().push(text.clone());
            }
        });

        server
            .send(Message::Binary(vec![1, 2, 3].into()))
            .await
            .expect("send binary");
        server
            .send(Message::Text(r#"{"event":"x"}"#.into()))
            .await
            .expect("send text");

        tokio::time::timeout(Duration::from_secs(2), async {
            while received.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("message delivered");

        assert_eq!(received.lock().as_slice(), [r#"{"event":"x"}"#.to_string()]);
    }

    #[tokio::test]
    async fn test_send_text_reaches_peer() {
        let (connection, mut server) = pair().await;

        connection
            .send_text(r#"{"method":"ping"}"#.to_string())
            .await
            .expect("send");

        let message = server.next().await.expect("frame").expect("ok");
        assert_eq!(message.into_text().expect("text").as_str(), r#"{"method":"ping"}"#);
    }

    #[tokio::test]
    async fn test_manual_close_is_not_abnormal() {
        let (connection, server) = pair().await;
        let peer = drain(server);

        let closes = Arc::new(AtomicUsize::new(0));
        let closes_clone = Arc::clone(&closes);
        connection.on(EventKind::Close, move |_| {
            closes_clone.fetch_add(1, Ordering::SeqCst);
        });

        let info = connection.close().await.expect("close");

        assert!(info.manual);
        assert!(!info.is_abnormal());
        assert!(!connection.is_open());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(peer.await.expect("join"), 1);

        // Closing again reports the same outcome without a second frame.
        let again = connection.close().await.expect("close again");
        assert_eq!(again, info);
    }

    #[tokio::test]
    async fn test_peer_drop_is_abnormal() {
        let (connection, server) = pair().await;
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        connection.on(EventKind::Close, move |event| {
            if let TransportEvent::Close(info) = event
                && let Some(tx) = tx.lock().take()
            {
                let _ = tx.send(info.clone());
            }
        });

        drop(server);

        let info = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("close in time")
            .expect("close info");
        assert_eq!(info.code, ABNORMAL_CLOSURE);
        assert!(info.is_abnormal());
        assert!(
            connection
                .send_text("{}".to_string())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_remove_all_listeners() {
        let (connection, _server) = pair().await;
        let first = connection.on(EventKind::Message, |_| {});
        connection.on(EventKind::Close, |_| {});
        connection.on(EventKind::Error, |_| {});

        assert_eq!(connection.listener_count(), 3);
        assert!(connection.off(first));
        assert_eq!(connection.remove_all_listeners(), 2);
        assert_eq!(connection.listener_count(), 0);
    }
}
