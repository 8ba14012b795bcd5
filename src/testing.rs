//! Test doubles: an in-process fake TV, failing transports and a fixed probe.

// ============================================================================
// Imports
// ============================================================================

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;

use crate::client::{CapabilityProbe, ClientEvent, RemoteClientBuilder};
use crate::error::{Error, Result};
use crate::protocol::TOKEN_CHANNEL;
use crate::token::MemoryTokenStore;
use crate::transport::{Connection, Transport, WsTransport};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for anything a test waits on.
const TEST_DEADLINE: Duration = Duration::from_secs(5);

// ============================================================================
// FakeTv
// ============================================================================

#[derive(Debug, Clone)]
enum Control {
    /// Drop every socket without a close frame.
    Drop,
    /// Send a text frame on every socket.
    Send(String),
}

#[derive(Default)]
struct Shared {
    accepted: AtomicUsize,
    closes: AtomicUsize,
    received: Mutex<Vec<String>>,
    uris: Mutex<Vec<String>>,
    /// Token handed out on a `KEY_HOME` click; silent when `None`.
    token: Option<String>,
}

/// WebSocket server that behaves like the TV's remote-control channel.
pub(crate) struct FakeTv {
    port: u16,
    shared: Arc<Shared>,
    control: broadcast::Sender<Control>,
}

impl FakeTv {
    /// Starts a server on an ephemeral port.
    pub(crate) async fn start(token: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake tv");
        let port = listener.local_addr().expect("local addr").port();
        let shared = Arc::new(Shared {
            token: token.map(str::to_string),
            ..Shared::default()
        });
        let (control, _) = broadcast::channel(16);

        let accept_shared = Arc::clone(&shared);
        let accept_control = control.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_shared.accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(
                    stream,
                    Arc::clone(&accept_shared),
                    accept_control.subscribe(),
                ));
            }
        });

        Self {
            port,
            shared,
            control,
        }
    }

    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// TCP connections accepted so far.
    pub(crate) fn accepted(&self) -> usize {
        self.shared.accepted.load(Ordering::SeqCst)
    }

    /// Close frames received so far.
    pub(crate) fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    /// Text frames received so far.
    pub(crate) fn received(&self) -> Vec<String> {
        self.shared.received.lock().clone()
    }

    /// Request URIs of accepted handshakes.
    pub(crate) fn uris(&self) -> Vec<String> {
        self.shared.uris.lock().clone()
    }

    /// Number of `KEY_HOME` clicks received.
    pub(crate) fn home_clicks(&self) -> usize {
        self.shared
            .received
            .lock()
            .iter()
            .filter(|text| is_home_click(text))
            .count()
    }

    /// Drops every socket without a close frame.
    pub(crate) fn drop_connections(&self) {
        let _ = self.control.send(Control::Drop);
    }

    /// Sends `text` on every socket.
    pub(crate) fn send_all(&self, text: &str) {
        let _ = self.control.send(Control::Send(text.to_string()));
    }
}

async fn serve(stream: TcpStream, shared: Arc<Shared>, mut control_rx: broadcast::Receiver<Control>) {
    let uri_shared = Arc::clone(&shared);
    let record_uri = move |request: &Request, response: Response| {
        uri_shared.uris.lock().push(request.uri().to_string());
        Ok::<_, ErrorResponse>(response)
    };
    let Ok(mut ws) = accept_hdr_async(stream, record_uri).await else {
        return;
    };

    loop {
        tokio::select! {
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let text = text.as_str().to_owned();
                    shared.received.lock().push(text.clone());
                    if is_home_click(&text)
                        && let Some(token) = &shared.token
                    {
                        let reply = json!({"event": TOKEN_CHANNEL, "data": {"token": token}});
                        if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) => {
                    shared.closes.fetch_add(1, Ordering::SeqCst);
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },

            control = control_rx.recv() => match control {
                Ok(Control::Drop) | Err(broadcast::error::RecvError::Closed) => return,
                Ok(Control::Send(text)) => {
                    let _ = ws.send(Message::Text(text.into())).await;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },
        }
    }
}

fn is_home_click(text: &str) -> bool {
    serde_json::from_str::<Value>(text).is_ok_and(|value| {
        value["params"]["Cmd"] == "Click" && value["params"]["DataOfCmd"] == "KEY_HOME"
    })
}

// ============================================================================
// FailingTransport
// ============================================================================

/// Transport whose handshakes always fail after `delay`.
#[derive(Debug)]
pub(crate) struct FailingTransport {
    opens: AtomicU32,
    delay: Duration,
}

impl FailingTransport {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            opens: AtomicU32::new(0),
            delay,
        }
    }

    pub(crate) fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FailingTransport {
    async fn open(&self, url: &Url, _handshake_timeout: Duration) -> Result<Connection> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Err(Error::handshake(url.as_str(), "connection refused"))
    }
}

// ============================================================================
// FlakyTransport
// ============================================================================

/// Transport whose first `healthy` handshakes go through, then fail.
#[derive(Debug)]
pub(crate) struct FlakyTransport {
    opens: AtomicU32,
    healthy: u32,
    inner: WsTransport,
}

impl FlakyTransport {
    pub(crate) fn new(healthy: u32) -> Self {
        Self {
            opens: AtomicU32::new(0),
            healthy,
            inner: WsTransport::new(),
        }
    }

    pub(crate) fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FlakyTransport {
    async fn open(&self, url: &Url, handshake_timeout: Duration) -> Result<Connection> {
        let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
        if attempt < self.healthy {
            self.inner.open(url, handshake_timeout).await
        } else {
            Err(Error::handshake(url.as_str(), "connection refused"))
        }
    }
}

// ============================================================================
// FixedProbe
// ============================================================================

/// Probe with a fixed answer.
#[derive(Debug)]
pub(crate) struct FixedProbe {
    supported: bool,
    calls: AtomicUsize,
}

impl FixedProbe {
    pub(crate) fn supported() -> Self {
        Self {
            supported: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn unsupported() -> Self {
        Self {
            supported: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CapabilityProbe for FixedProbe {
    async fn supports_token(&self, _host: &str) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.supported)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Builder for a client talking to `tv` over plain `ws`.
pub(crate) fn client_for(tv: &FakeTv) -> RemoteClientBuilder {
    RemoteClientBuilder::new()
        .host("127.0.0.1")
        .port(tv.port())
        .secure(false)
        .token_store(Arc::new(MemoryTokenStore::new()))
        .probe(Arc::new(FixedProbe::supported()))
        .retry_delay(Duration::from_millis(10))
        .handshake_timeout(Duration::from_secs(2))
        .token_timeout(Duration::from_secs(2))
}

/// Polls `condition` until it holds.
pub(crate) async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    wait(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
}

/// Receives events until one matches `predicate`.
pub(crate) async fn next_event<P>(
    events: &mut broadcast::Receiver<ClientEvent>,
    predicate: P,
) -> ClientEvent
where
    P: Fn(&ClientEvent) -> bool,
{
    wait(async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
}

async fn wait<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(TEST_DEADLINE, future)
        .await
        .expect("condition not reached in time")
}
