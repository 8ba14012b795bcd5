//! Remote-control client.
//!
//! The [`RemoteClient`] owns at most one [`Connection`] to the TV and
//! drives it through the connection state machine:
//!
//! - `connect()` retries the handshake, installs listeners and negotiates
//!   a token when the device asks for one
//! - `disconnect()` closes the socket and removes every listener
//! - an abnormal close reconnects on its own when auto-reconnect is on
//!
//! # Example
//!
//! ```no_run
//! use tizen_remote::{Key, RemoteClient};
//!
//! # async fn example() -> tizen_remote::Result<()> {
//! let client = RemoteClient::builder().host("192.168.1.20").build()?;
//!
//! client.connect().await?;
//! client.click(Key::Home).await?;
//! client.text("hello").await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{OnceCell, broadcast};
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::protocol::{ChannelMessage, Key, KeyAction, RemoteCommand, TOKEN_CHANNEL};
use crate::retry::RetryEvent;
use crate::token::TokenStore;
use crate::transport::{CloseInfo, Connection, EventKind, ListenerId, Transport, TransportEvent, redact_url};

use super::builder::RemoteClientBuilder;
use super::events::{ClientEvent, EventBus};
use super::options::{ClientOptions, ConnectOptions, RequestOptions, SendOptions, TokenOptions};
use super::pending::PendingRequest;
use super::probe::CapabilityProbe;
use super::state::ConnectionState;

// ============================================================================
// Types
// ============================================================================

/// Socket and state, changed together.
#[derive(Default)]
struct Session {
    /// Current state.
    state: ConnectionState,
    /// Bumped by every connect and disconnect; stale attempts compare against it.
    generation: u64,
    /// Live connection.
    connection: Option<Connection>,
    /// Close listener of the live connection.
    close_listener: Option<ListenerId>,
}

/// In-memory token.
#[derive(Default)]
struct TokenState {
    value: Option<String>,
    /// `true` once `value` is in the token store.
    persisted: bool,
}

/// Internal shared state for the client.
pub(crate) struct ClientInner {
    /// Configuration.
    options: ClientOptions,
    /// Socket opener.
    transport: Arc<dyn Transport>,
    /// Token persistence; `None` when disabled.
    store: Option<Arc<dyn TokenStore>>,
    /// Token capability probe.
    probe: Arc<dyn CapabilityProbe>,
    /// Public events.
    events: EventBus,
    session: Mutex<Session>,
    token: Mutex<TokenState>,
    /// Cached probe answer.
    token_support: OnceCell<bool>,
    /// Number of negotiations in flight; mutes passive token updates.
    negotiating: AtomicUsize,
    /// Channels with a pending request.
    pending: Mutex<FxHashSet<String>>,
    /// Serializes `connect()`.
    connect_lock: tokio::sync::Mutex<()>,
    /// Serializes `disconnect()`.
    disconnect_lock: tokio::sync::Mutex<()>,
    /// Serializes token negotiation. Taken after `connect_lock`, never before.
    token_lock: tokio::sync::Mutex<()>,
}

/// Marks a token negotiation in flight.
struct NegotiationGuard<'a>(&'a AtomicUsize);

impl<'a> NegotiationGuard<'a> {
    fn new(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for NegotiationGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

// ============================================================================
// RemoteClient
// ============================================================================

/// Remote-control client for one TV.
///
/// Cloning is cheap; clones share the connection, token and event bus.
#[derive(Clone)]
pub struct RemoteClient {
    /// Shared inner state.
    pub(crate) inner: Arc<ClientInner>,
}

// ============================================================================
// RemoteClient - Display
// ============================================================================

impl fmt::Debug for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteClient")
            .field("host", &self.inner.options.host)
            .field("port", &self.inner.options.port)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// RemoteClient - Construction
// ============================================================================

impl RemoteClient {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> RemoteClientBuilder {
        RemoteClientBuilder::new()
    }

    /// Creates a client for `host` with default options.
    ///
    /// # Errors
    ///
    /// See [`RemoteClientBuilder::build`].
    pub fn new(host: impl Into<String>) -> Result<Self> {
        Self::builder().host(host).build()
    }

    /// Assembles a client from validated parts.
    pub(crate) fn from_parts(
        options: ClientOptions,
        transport: Arc<dyn Transport>,
        store: Option<Arc<dyn TokenStore>>,
        probe: Arc<dyn CapabilityProbe>,
    ) -> Self {
        let token = TokenState {
            value: options.token.clone(),
            persisted: false,
        };

        Self {
            inner: Arc::new(ClientInner {
                options,
                transport,
                store,
                probe,
                events: EventBus::default(),
                session: Mutex::new(Session::default()),
                token: Mutex::new(token),
                token_support: OnceCell::new(),
                negotiating: AtomicUsize::new(0),
                pending: Mutex::new(FxHashSet::default()),
                connect_lock: tokio::sync::Mutex::new(()),
                disconnect_lock: tokio::sync::Mutex::new(()),
                token_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

// ============================================================================
// RemoteClient - Accessors
// ============================================================================

impl RemoteClient {
    /// Returns the device host.
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.inner.options.host
    }

    /// Returns the client options.
    #[inline]
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    /// Returns the connection state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.session.lock().state
    }

    /// Returns `true` if connected.
    #[inline]
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Returns `true` while a connect is in progress.
    #[inline]
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// Returns `true` while a disconnect is in progress.
    #[inline]
    #[must_use]
    pub fn is_disconnecting(&self) -> bool {
        self.state() == ConnectionState::Disconnecting
    }

    /// Returns `true` if disconnected.
    #[inline]
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    /// Subscribes to client events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Returns the number of listeners on the live connection.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.inner
            .session
            .lock()
            .connection
            .as_ref()
            .map_or(0, Connection::listener_count)
    }

    /// Returns the live connection.
    #[cfg(test)]
    pub(crate) fn connection(&self) -> Option<Connection> {
        self.inner.session.lock().connection.clone()
    }

    fn live_connection(&self) -> Option<Connection> {
        let session = self.inner.session.lock();
        if session.state == ConnectionState::Connected {
            session.connection.clone()
        } else {
            None
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.inner.session.lock().generation == generation
    }
}

// ============================================================================
// RemoteClient - Connection Lifecycle
// ============================================================================

impl RemoteClient {
    /// Connects and negotiates a token if needed.
    ///
    /// Returns immediately if already connected. Concurrent calls share one
    /// socket.
    ///
    /// # Errors
    ///
    /// - [`Error::RetriesExhausted`] if every attempt fails
    /// - [`Error::ConnectAborted`] if `disconnect()` cancels the attempt
    /// - [`Error::TokenTimeout`] if the pairing prompt is not accepted in time
    /// - [`Error::CacheLock`] or [`Error::Io`] if the token cannot be persisted
    pub async fn connect(&self) -> Result<()> {
        self.connect_with(ConnectOptions::default()).await
    }

    /// Connects with options.
    ///
    /// # Errors
    ///
    /// See [`connect`](Self::connect).
    pub async fn connect_with(&self, options: ConnectOptions) -> Result<()> {
        let _connecting = self.inner.connect_lock.lock().await;

        if self.is_connected() {
            debug!(host = %self.host(), "Already connected");
            return Ok(());
        }

        let generation = {
            let mut session = self.inner.session.lock();
            session.generation += 1;
            session.state = ConnectionState::Connecting;
            session.generation
        };

        let result = self.establish(generation, options).await;

        if let Err(e) = &result {
            let mut session = self.inner.session.lock();
            // A socket still stored here belongs to a disconnect in flight.
            if session.generation == generation {
                session.state = ConnectionState::Disconnected;
            }
            drop(session);
            warn!(host = %self.host(), error = %e, "Connect failed");
        }

        result
    }

    /// Opens the socket, installs listeners and fetches a token.
    async fn establish(&self, generation: u64, options: ConnectOptions) -> Result<()> {
        let token = self.prepare_token(!options.no_token).await?;
        let url = self.inner.options.endpoint_url(token.as_deref())?;
        let redacted = redact_url(&url);

        let events = &self.inner.events;
        let url_ref = &url;
        let display_ref = redacted.as_str();

        let connection = self
            .inner
            .options
            .retry
            .run(
                display_ref,
                move || self.open_attempt(generation, url_ref, display_ref),
                |event| match event {
                    RetryEvent::Connecting => events.emit(ClientEvent::Connecting),
                    RetryEvent::Retry { attempt, .. } => {
                        events.emit(ClientEvent::Retry { attempt });
                    }
                },
            )
            .await?;

        self.install(generation, connection)?;
        info!(host = %self.host(), url = %redacted, "Connected");

        if !options.no_token && token.is_none() {
            let negotiated = self
                .get_token_with(TokenOptions {
                    force: false,
                    no_connect: true,
                })
                .await;

            if let Err(e) = negotiated {
                if let Err(close_err) = self.disconnect().await {
                    debug!(host = %self.host(), error = %close_err, "Teardown after token failure failed");
                }
                return Err(e);
            }
        }

        self.inner.events.emit(ClientEvent::Connect { url: redacted });
        Ok(())
    }

    /// One connection attempt, skipped once a disconnect superseded it.
    async fn open_attempt(&self, generation: u64, url: &Url, display: &str) -> Result<Connection> {
        if !self.is_current(generation) {
            return Err(Error::connect_aborted(display));
        }
        self.inner
            .transport
            .open(url, self.inner.options.handshake_timeout)
            .await
    }

    /// Makes `connection` the live connection and attaches the client's listeners.
    fn install(&self, generation: u64, connection: Connection) -> Result<()> {
        let mut session = self.inner.session.lock();

        if session.generation != generation {
            drop(session);
            let err = Error::connect_aborted(connection.url());
            debug!(host = %self.host(), "Disconnect raced connect, closing new socket");
            tokio::spawn(async move {
                let _ = connection.close().await;
                connection.remove_all_listeners();
            });
            return Err(err);
        }

        let connection_id = connection.id();

        let weak = Arc::downgrade(&self.inner);
        let close_listener = connection.on(EventKind::Close, move |event| {
            if let TransportEvent::Close(info) = event
                && let Some(inner) = weak.upgrade()
            {
                let client = RemoteClient { inner };
                let info = info.clone();
                tokio::spawn(async move { client.handle_close(connection_id, info).await });
            }
        });

        let weak = Arc::downgrade(&self.inner);
        connection.on(EventKind::Message, move |event| {
            if let TransportEvent::Message(text) = event
                && let Some(inner) = weak.upgrade()
            {
                RemoteClient { inner }.handle_message(text);
            }
        });

        session.connection = Some(connection);
        session.close_listener = Some(close_listener);
        session.state = ConnectionState::Connected;
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Resolves immediately when not connected, and cancels a connect in
    /// progress. Concurrent calls close the socket once. When this returns,
    /// no listener is left on the closed socket.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the socket fails during the close
    /// handshake. Cleanup happens regardless.
    pub async fn disconnect(&self) -> Result<()> {
        let _disconnecting = self.inner.disconnect_lock.lock().await;

        let (connection, close_listener, generation) = {
            let mut session = self.inner.session.lock();
            session.generation += 1;

            let Some(connection) = session.connection.clone() else {
                if session.state == ConnectionState::Connecting {
                    debug!(host = %self.host(), "Cancelling connect in progress");
                }
                session.state = ConnectionState::Disconnected;
                return Ok(());
            };

            session.state = ConnectionState::Disconnecting;
            (connection, session.close_listener.take(), session.generation)
        };

        info!(host = %self.host(), "Disconnecting");
        self.inner.events.emit(ClientEvent::Disconnecting);

        // A deliberate close must not trigger the reconnect policy.
        if let Some(id) = close_listener {
            connection.off(id);
        }

        let result = connection.close().await;

        {
            let mut session = self.inner.session.lock();
            if session.connection.as_ref().map(Connection::id) == Some(connection.id()) {
                session.connection = None;
            }
            // A later connect owns the state.
            if session.generation == generation {
                session.state = ConnectionState::Disconnected;
            }
        }

        self.inner.events.emit(ClientEvent::Disconnect);
        let removed = connection.remove_all_listeners();
        debug!(host = %self.host(), removed, "Connection torn down");

        let info = result?;
        info!(host = %self.host(), code = info.code, "Disconnected");
        Ok(())
    }

    /// Reacts to the live connection closing on its own.
    async fn handle_close(&self, connection_id: Uuid, info: CloseInfo) {
        let connection = {
            let mut session = self.inner.session.lock();
            if session.connection.as_ref().map(Connection::id) != Some(connection_id) {
                return;
            }
            session.close_listener = None;
            session.state = ConnectionState::Disconnected;
            session.connection.take()
        };

        if let Some(connection) = connection {
            connection.remove_all_listeners();
        }

        if !info.is_abnormal() {
            info!(host = %self.host(), code = info.code, "Connection closed by device");
            self.inner.events.emit(ClientEvent::Disconnect);
            return;
        }

        warn!(host = %self.host(), code = info.code, reason = %info.reason, "Connection closed abnormally");

        if self.inner.options.auto_reconnect {
            if let Err(e) = self.connect().await {
                self.inner.events.emit(ClientEvent::Error {
                    message: e.to_string(),
                });
            }
        } else {
            let err = Error::abnormal_close(self.host(), info.code);
            self.inner.events.emit(ClientEvent::Error {
                message: err.to_string(),
            });
        }
    }

    /// Passive handling of every inbound text frame.
    fn handle_message(&self, text: &str) {
        trace!(host = %self.host(), message = %text, "Received");

        let message = match ChannelMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                trace!(host = %self.host(), error = %e, "Ignoring unparsable message");
                return;
            }
        };

        if message.is_timeout_notice() {
            info!(host = %self.host(), "Device reported channel timeout, dropping token");
            let client = self.clone();
            tokio::spawn(async move {
                if let Err(e) = client.unset_token().await {
                    warn!(host = %client.host(), error = %e, "Cannot clear token");
                }
            });
            return;
        }

        if self.inner.negotiating.load(Ordering::SeqCst) > 0 {
            return;
        }

        if let Some(token) = message.token()
            && self.current_token().as_deref() != Some(token)
        {
            let client = self.clone();
            let token = token.to_string();
            tokio::spawn(async move {
                if let Err(e) = client.accept_token(&token).await {
                    warn!(host = %client.host(), error = %e, "Cannot store updated token");
                }
            });
        }
    }
}

// ============================================================================
// RemoteClient - Messaging
// ============================================================================

impl RemoteClient {
    /// Sends a JSON payload, connecting first if needed.
    ///
    /// # Errors
    ///
    /// See [`send_with`](Self::send_with).
    pub async fn send<T>(&self, data: &T) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.send_with(data, SendOptions::default()).await
    }

    /// Sends a JSON payload with options.
    ///
    /// # Errors
    ///
    /// - [`Error::Serialization`] if `data` is not representable as JSON
    /// - [`Error::NotConnected`] if disconnected and `no_connect` is set
    /// - Any [`connect`](Self::connect) error
    /// - [`Error::ConnectionClosed`] or [`Error::WebSocket`] if the write fails
    pub async fn send_with<T>(&self, data: &T, options: SendOptions) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let (text, payload) = encode(data)?;
        let connection = self
            .ready_connection(options.no_connect, options.no_token)
            .await?;

        connection.send_text(text).await?;
        self.inner.events.emit(ClientEvent::Sent { payload });
        Ok(())
    }

    /// Sends a payload and waits for the next message on `channel`.
    ///
    /// # Errors
    ///
    /// - [`Error::ChannelBusy`] if a request on `channel` is already pending
    /// - [`Error::RequestTimeout`] if `options.timeout` elapses first
    /// - [`Error::ConnectionClosed`] if the socket closes first
    /// - Any [`send_with`](Self::send_with) error
    pub async fn send_request<T>(
        &self,
        channel: &str,
        data: &T,
        options: RequestOptions,
    ) -> Result<ChannelMessage>
    where
        T: Serialize + ?Sized,
    {
        let (text, payload) = encode(data)?;
        let connection = self
            .ready_connection(options.no_connect, options.no_token)
            .await?;

        let pending = PendingRequest::register(&connection, channel, &self.inner.pending)?;
        connection.send_text(text).await?;
        self.inner.events.emit(ClientEvent::Sent { payload });

        pending.wait(options.timeout).await
    }

    /// Returns the live connection, connecting unless `no_connect`.
    async fn ready_connection(&self, no_connect: bool, no_token: bool) -> Result<Connection> {
        if let Some(connection) = self.live_connection() {
            return Ok(connection);
        }
        if no_connect {
            return Err(Error::not_connected(self.host()));
        }

        Box::pin(self.connect_with(ConnectOptions { no_token })).await?;
        self.live_connection()
            .ok_or_else(|| Error::not_connected(self.host()))
    }
}

/// Serializes a payload for the wire and for the `sent` event.
fn encode<T>(data: &T) -> Result<(String, Value)>
where
    T: Serialize + ?Sized,
{
    let payload = serde_json::to_value(data).map_err(Error::serialization)?;
    let text = serde_json::to_string(data).map_err(Error::serialization)?;
    Ok((text, payload))
}

// ============================================================================
// RemoteClient - Commands
// ============================================================================

impl RemoteClient {
    /// Clicks a key.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn click(&self, key: impl AsRef<str>) -> Result<()> {
        self.send(&RemoteCommand::key(KeyAction::Click, key)).await
    }

    /// Presses a key without releasing it.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn press(&self, key: impl AsRef<str>) -> Result<()> {
        self.send(&RemoteCommand::key(KeyAction::Press, key)).await
    }

    /// Releases a pressed key.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn release(&self, key: impl AsRef<str>) -> Result<()> {
        self.send(&RemoteCommand::key(KeyAction::Release, key)).await
    }

    /// Holds a key for `duration`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn long_press(&self, key: impl AsRef<str>, duration: Duration) -> Result<()> {
        let key = key.as_ref();
        self.press(key).await?;
        tokio::time::sleep(duration).await;
        self.release(key).await
    }

    /// Types text into the focused input field.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn text(&self, text: &str) -> Result<()> {
        self.send(&RemoteCommand::text(text)).await
    }
}

// ============================================================================
// RemoteClient - Token
// ============================================================================

impl RemoteClient {
    /// Returns the token, negotiating one if none is known.
    ///
    /// Returns `Ok(None)` if the device does not use tokens.
    ///
    /// # Errors
    ///
    /// See [`get_token_with`](Self::get_token_with).
    pub async fn get_token(&self) -> Result<Option<String>> {
        self.get_token_with(TokenOptions::default()).await
    }

    /// Returns the token with options.
    ///
    /// `force` negotiates a new token even if one is known.
    ///
    /// # Errors
    ///
    /// - [`Error::NotConnected`] if disconnected and `no_connect` is set
    /// - [`Error::TokenTimeout`] if the device supports tokens but none arrived
    /// - [`Error::Protocol`] if the device answered without a token
    /// - [`Error::CacheLock`] or [`Error::Io`] if the token cannot be persisted
    pub async fn get_token_with(&self, options: TokenOptions) -> Result<Option<String>> {
        if !options.force {
            if let Some(token) = self.current_token() {
                return Ok(Some(token));
            }
            if let Some(token) = self.stored_token().await? {
                return Ok(Some(token));
            }
        }

        if self.live_connection().is_none() {
            if options.no_connect {
                return Err(Error::not_connected(self.host()));
            }
            Box::pin(self.connect_with(ConnectOptions { no_token: true })).await?;
        }

        let _negotiation_lock = self.inner.token_lock.lock().await;
        if !options.force
            && let Some(token) = self.current_token()
        {
            return Ok(Some(token));
        }

        let _negotiating = NegotiationGuard::new(&self.inner.negotiating);
        let timeout = self.inner.options.token_timeout;
        info!(host = %self.host(), timeout_ms = timeout.as_millis() as u64, "Requesting token, accept the prompt on the TV");

        let response = self
            .send_request(
                TOKEN_CHANNEL,
                &RemoteCommand::key(KeyAction::Click, Key::Home),
                RequestOptions {
                    timeout: Some(timeout),
                    no_connect: true,
                    no_token: true,
                },
            )
            .await;

        match response {
            Ok(message) => match message.token() {
                Some(token) => {
                    self.accept_token(token).await?;
                    Ok(Some(token.to_string()))
                }
                None => {
                    let err = Error::protocol(format!(
                        "{} answered on {TOKEN_CHANNEL} without a token",
                        self.host()
                    ));
                    self.token_unavailable(err).await
                }
            },
            Err(e) if e.is_timeout() => {
                self.token_unavailable(Error::token_timeout(self.host(), timeout))
                    .await
            }
            Err(e) => Err(e),
        }
    }

    /// Returns `true` if a token is known in memory or in the store.
    ///
    /// # Errors
    ///
    /// Returns the store's read error.
    pub async fn has_token(&self) -> Result<bool> {
        if self.current_token().is_some() {
            return Ok(true);
        }
        match &self.inner.store {
            Some(store) => Ok(store.read(self.host()).await?.is_some()),
            None => Ok(false),
        }
    }

    /// Forgets the token in memory and in the store.
    ///
    /// # Errors
    ///
    /// Returns the store's error if the entry cannot be removed.
    pub async fn unset_token(&self) -> Result<()> {
        *self.inner.token.lock() = TokenState::default();
        if let Some(store) = &self.inner.store {
            store.clear(self.host()).await?;
        }
        debug!(host = %self.host(), "Token cleared");
        Ok(())
    }

    fn current_token(&self) -> Option<String> {
        self.inner.token.lock().value.clone()
    }

    /// Loads the token from the store into memory.
    async fn stored_token(&self) -> Result<Option<String>> {
        let Some(store) = &self.inner.store else {
            return Ok(None);
        };

        let token = store.read(self.host()).await?;
        if let Some(token) = &token {
            let mut state = self.inner.token.lock();
            state.value = Some(token.clone());
            state.persisted = true;
        }
        Ok(token)
    }

    /// Returns the token for a new connection, persisting a memory-only one first.
    async fn prepare_token(&self, load: bool) -> Result<Option<String>> {
        let (value, persisted) = {
            let state = self.inner.token.lock();
            (state.value.clone(), state.persisted)
        };

        match value {
            Some(token) => {
                if !persisted && let Some(store) = &self.inner.store {
                    store.write(self.host(), &token).await?;
                    self.mark_persisted(&token);
                }
                Ok(Some(token))
            }
            None if load => self.stored_token().await,
            None => Ok(None),
        }
    }

    /// Adopts a token received from the device.
    async fn accept_token(&self, token: &str) -> Result<()> {
        {
            let mut state = self.inner.token.lock();
            state.value = Some(token.to_string());
            state.persisted = false;
        }

        if let Some(store) = &self.inner.store {
            store.write(self.host(), token).await?;
            self.mark_persisted(token);
        }

        info!(host = %self.host(), "Token received");
        self.inner.events.emit(ClientEvent::Token {
            token: token.to_string(),
        });
        Ok(())
    }

    fn mark_persisted(&self, token: &str) {
        let mut state = self.inner.token.lock();
        if state.value.as_deref() == Some(token) {
            state.persisted = true;
        }
    }

    /// Turns a failed negotiation into `Ok(None)` for devices without tokens.
    async fn token_unavailable(&self, err: Error) -> Result<Option<String>> {
        if self.supports_token().await {
            Err(err)
        } else {
            info!(host = %self.host(), "Device does not use tokens");
            Ok(None)
        }
    }

    /// Asks the probe once; a failing probe counts as "supported".
    async fn supports_token(&self) -> bool {
        if let Some(supported) = self.inner.token_support.get() {
            return *supported;
        }

        match self.inner.probe.supports_token(self.host()).await {
            Ok(supported) => {
                let _ = self.inner.token_support.set(supported);
                supported
            }
            Err(e) => {
                warn!(host = %self.host(), error = %e, "Token capability probe failed");
                true
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::BTreeMap;

    use serde_json::json;
    use tokio_test::assert_ok;

    use crate::testing::{
        FailingTransport, FakeTv, FixedProbe, FlakyTransport, client_for, eventually, next_event,
    };
    use crate::token::MemoryTokenStore;

    #[tokio::test]
    async fn test_concurrent_connect_opens_one_socket() {
        let tv = FakeTv::start(Some("1234")).await;
        let client = client_for(&tv).build().expect("build");

        let (first, second) = tokio::join!(client.connect(), client.connect());

        assert_ok!(first);
        assert_ok!(second);
        assert!(client.is_connected());
        assert_eq!(tv.accepted(), 1);
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).token("known").build().expect("build");
        let mut events = client.subscribe();

        client.connect().await.expect("connect");
        client.connect().await.expect("connect again");

        assert_eq!(tv.accepted(), 1);
        next_event(&mut events, |e| matches!(e, ClientEvent::Connect { .. })).await;
        client.disconnect().await.expect("disconnect");
        // The next event after the single connect is the disconnect sequence.
        let event = next_event(&mut events, |e| {
            matches!(e, ClientEvent::Connect { .. } | ClientEvent::Disconnecting)
        })
        .await;
        assert_eq!(event, ClientEvent::Disconnecting);
    }

    #[tokio::test]
    async fn test_concurrent_disconnects_close_once() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).token("known").build().expect("build");
        client.connect().await.expect("connect");

        let results = futures_util::future::join_all((0..5).map(|_| client.disconnect())).await;

        assert!(results.iter().all(Result::is_ok));
        assert!(client.is_disconnected());
        eventually(|| tv.closes() == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(tv.closes(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_every_listener() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).token("known").build().expect("build");
        client.connect().await.expect("connect");
        let connection = client.connection().expect("connection");
        assert!(connection.listener_count() > 0);

        client.disconnect().await.expect("disconnect");

        assert_eq!(connection.listener_count(), 0);
        assert_eq!(client.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).build().expect("build");

        assert_ok!(client.disconnect().await);
        assert!(client.is_disconnected());
    }

    #[tokio::test]
    async fn test_retries_then_gives_up() {
        let transport = Arc::new(FailingTransport::new(Duration::ZERO));
        let client = RemoteClient::builder()
            .host("10.0.0.2")
            .transport(transport.clone())
            .token_store(Arc::new(MemoryTokenStore::new()))
            .probe(Arc::new(FixedProbe::supported()))
            .retries(3)
            .retry_delay(Duration::from_millis(1))
            .build()
            .expect("build");
        let mut events = client.subscribe();

        let err = client.connect().await.unwrap_err();

        assert_eq!(transport.opens(), 4);
        assert!(err.to_string().contains("giving up"));
        assert!(client.is_disconnected());

        assert_eq!(events.recv().await.expect("event"), ClientEvent::Connecting);
        for attempt in 1..=3 {
            assert_eq!(events.recv().await.expect("event"), ClientEvent::Retry { attempt });
        }
    }

    #[tokio::test]
    async fn test_disconnect_cancels_connect() {
        let transport = Arc::new(FailingTransport::new(Duration::from_millis(20)));
        let client = RemoteClient::builder()
            .host("10.0.0.2")
            .transport(transport.clone())
            .token_store(Arc::new(MemoryTokenStore::new()))
            .probe(Arc::new(FixedProbe::supported()))
            .retries(10)
            .retry_delay(Duration::from_millis(20))
            .build()
            .expect("build");

        let connecting = tokio::spawn({
            let client = client.clone();
            async move { client.connect().await }
        });
        eventually(|| transport.opens() >= 1).await;
        client.disconnect().await.expect("disconnect");

        let err = connecting.await.expect("join").unwrap_err();
        assert!(matches!(err, Error::ConnectAborted { .. }));
        assert!(transport.opens() < 11);
        assert!(client.is_disconnected());
    }

    #[tokio::test]
    async fn test_failed_connect_during_disconnect_settles() {
        let tv = FakeTv::start(Some("1234")).await;
        let transport = Arc::new(FlakyTransport::new(1));
        let client = client_for(&tv)
            .transport(transport.clone())
            .retries(0)
            .build()
            .expect("build");
        client.connect().await.expect("connect");

        let (disconnected, connected) = tokio::join!(client.disconnect(), client.connect());

        assert_ok!(disconnected);
        let err = connected.unwrap_err();
        assert!(err.to_string().contains("giving up"));
        assert_eq!(transport.opens(), 2);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.connection().is_none());
        assert_eq!(client.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_negotiates_and_caches_token() {
        let tv = FakeTv::start(Some("12345678")).await;
        let store = Arc::new(MemoryTokenStore::new());
        let client = client_for(&tv).token_store(store.clone()).build().expect("build");
        let mut events = client.subscribe();

        client.connect().await.expect("connect");

        let event = next_event(&mut events, |e| matches!(e, ClientEvent::Token { .. })).await;
        assert_eq!(
            event,
            ClientEvent::Token {
                token: "12345678".into()
            }
        );
        assert_eq!(store.read("127.0.0.1").await.expect("read").as_deref(), Some("12345678"));

        let requests = tv.home_clicks();
        assert_eq!(client.get_token().await.expect("token").as_deref(), Some("12345678"));
        assert_eq!(tv.home_clicks(), requests);
    }

    #[tokio::test]
    async fn test_cached_token_goes_into_url() {
        let tv = FakeTv::start(None).await;
        let store = Arc::new(MemoryTokenStore::new());
        store.write("127.0.0.1", "cached").await.expect("write");
        let client = client_for(&tv).token_store(store).build().expect("build");

        client.connect().await.expect("connect");

        assert_eq!(tv.home_clicks(), 0);
        assert!(tv.uris().iter().any(|uri| uri.contains("token=cached")));
    }

    #[tokio::test]
    async fn test_memory_token_is_persisted_before_connecting() {
        let tv = FakeTv::start(None).await;
        let store = Arc::new(MemoryTokenStore::new());
        let client = client_for(&tv)
            .token("from-options")
            .token_store(store.clone())
            .build()
            .expect("build");

        client.connect().await.expect("connect");

        assert_eq!(
            store.read("127.0.0.1").await.expect("read").as_deref(),
            Some("from-options")
        );
    }

    #[tokio::test]
    async fn test_token_timeout_tears_down() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv)
            .token_timeout(Duration::from_millis(50))
            .build()
            .expect("build");

        let err = client.connect().await.unwrap_err();

        assert!(matches!(err, Error::TokenTimeout { .. }));
        assert!(client.is_disconnected());
        eventually(|| tv.closes() == 1).await;
    }

    #[tokio::test]
    async fn test_device_without_token_support() {
        let tv = FakeTv::start(None).await;
        let probe = Arc::new(FixedProbe::unsupported());
        let client = client_for(&tv)
            .probe(probe.clone())
            .token_timeout(Duration::from_millis(50))
            .build()
            .expect("build");

        client.connect().await.expect("connect");
        assert!(client.is_connected());
        assert_eq!(client.get_token().await.expect("token"), None);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test]
    async fn test_request_timeout_leaves_no_listener() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).token("known").build().expect("build");
        client.connect().await.expect("connect");
        let baseline = client.listener_count();

        let err = client
            .send_request(
                "ping-channel",
                &json!({"method": "ping"}),
                RequestOptions::with_timeout(Duration::from_millis(1)),
            )
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(client.listener_count(), baseline);
    }

    #[tokio::test]
    async fn test_send_request_resolves_on_channel() {
        let tv = FakeTv::start(Some("abc")).await;
        let client = client_for(&tv).token("known").build().expect("build");
        client.connect().await.expect("connect");

        let message = client
            .send_request(
                TOKEN_CHANNEL,
                &RemoteCommand::key(KeyAction::Click, Key::Home),
                RequestOptions::with_timeout(Duration::from_secs(2)),
            )
            .await
            .expect("response");

        assert_eq!(message.token(), Some("abc"));
    }

    #[tokio::test]
    async fn test_abnormal_close_reconnects() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).token("known").build().expect("build");
        client.connect().await.expect("connect");
        let mut events = client.subscribe();

        tv.drop_connections();

        next_event(&mut events, |e| matches!(e, ClientEvent::Connect { .. })).await;
        assert!(client.is_connected());
        assert_eq!(tv.accepted(), 2);
    }

    #[tokio::test]
    async fn test_abnormal_close_without_reconnect_reports_error() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv)
            .token("known")
            .auto_reconnect(false)
            .build()
            .expect("build");
        client.connect().await.expect("connect");
        let connection = client.connection().expect("connection");
        let mut events = client.subscribe();

        tv.drop_connections();

        let event = next_event(&mut events, |e| matches!(e, ClientEvent::Error { .. })).await;
        assert!(matches!(event, ClientEvent::Error { message } if message.contains("1006")));
        assert!(client.is_disconnected());
        assert_eq!(connection.listener_count(), 0);
        assert_eq!(tv.accepted(), 1);
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).build().expect("build");

        let err = client
            .send_with(
                &json!({}),
                SendOptions {
                    no_connect: true,
                    no_token: false,
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotConnected { .. }));
        assert_eq!(tv.accepted(), 0);
    }

    #[tokio::test]
    async fn test_send_connects_on_demand() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).token("known").build().expect("build");
        let mut events = client.subscribe();

        client.click(Key::Enter).await.expect("click");

        assert!(client.is_connected());
        let event = next_event(&mut events, |e| matches!(e, ClientEvent::Sent { .. })).await;
        assert!(matches!(event, ClientEvent::Sent { payload } if payload["params"]["DataOfCmd"] == "KEY_ENTER"));
        eventually(|| {
            tv.received().iter().any(|text| {
                text == r#"{"method":"ms.remote.control","params":{"Cmd":"Click","DataOfCmd":"KEY_ENTER","Option":"false","TypeOfRemote":"SendRemoteKey"}}"#
            })
        })
        .await;
    }

    #[tokio::test]
    async fn test_unserializable_payload() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).token("known").build().expect("build");
        client.connect().await.expect("connect");

        let mut payload = BTreeMap::new();
        payload.insert(vec![1u8, 2], 3u8);
        let err = client.send(&payload).await.unwrap_err();

        assert!(matches!(err, Error::Serialization { .. }));
    }

    #[tokio::test]
    async fn test_long_press_sends_press_then_release() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).token("known").build().expect("build");

        client
            .long_press(Key::VolumeUp, Duration::from_millis(10))
            .await
            .expect("long press");

        eventually(|| tv.received().len() >= 2).await;
        let received = tv.received();
        assert!(received[0].contains(r#""Cmd":"Press""#));
        assert!(received[1].contains(r#""Cmd":"Release""#));
        assert!(received[1].contains("KEY_VOLUP"));
    }

    #[tokio::test]
    async fn test_passive_token_update() {
        let tv = FakeTv::start(None).await;
        let store = Arc::new(MemoryTokenStore::new());
        let client = client_for(&tv)
            .token("old")
            .token_store(store.clone())
            .build()
            .expect("build");
        client.connect().await.expect("connect");
        let mut events = client.subscribe();

        tv.send_all(r#"{"event":"ms.channel.connect","data":{"token":"new"}}"#);

        next_event(&mut events, |e| matches!(e, ClientEvent::Token { token } if token == "new")).await;
        assert_eq!(client.get_token().await.expect("token").as_deref(), Some("new"));
        assert_eq!(store.read("127.0.0.1").await.expect("read").as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_timeout_notice_clears_token() {
        let tv = FakeTv::start(None).await;
        let store = Arc::new(MemoryTokenStore::new());
        let client = client_for(&tv)
            .token("stale")
            .token_store(store.clone())
            .build()
            .expect("build");
        client.connect().await.expect("connect");

        tv.send_all(r#"{"event":"ms.channel.timeOut"}"#);

        tokio::time::timeout(Duration::from_secs(5), async {
            while client.has_token().await.expect("has token") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("token cleared");
        assert_eq!(store.read("127.0.0.1").await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_persistence_disabled_keeps_token_in_memory() {
        let tv = FakeTv::start(Some("mem-only")).await;
        let store = Arc::new(MemoryTokenStore::new());
        let client = client_for(&tv)
            .token_store(store.clone())
            .persist_token(false)
            .build()
            .expect("build");

        client.connect().await.expect("connect");

        assert!(client.has_token().await.expect("has token"));
        assert_eq!(client.get_token().await.expect("token").as_deref(), Some("mem-only"));
        assert_eq!(store.read("127.0.0.1").await.expect("read"), None);
    }

    #[tokio::test]
    async fn test_get_token_without_connection() {
        let tv = FakeTv::start(None).await;
        let client = client_for(&tv).build().expect("build");

        let err = client
            .get_token_with(TokenOptions {
                force: false,
                no_connect: true,
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotConnected { .. }));
    }

    #[tokio::test]
    async fn test_forced_negotiation() {
        let tv = FakeTv::start(Some("second")).await;
        let client = client_for(&tv).token("first").build().expect("build");
        client.connect().await.expect("connect");

        let token = client
            .get_token_with(TokenOptions {
                force: true,
                no_connect: true,
            })
            .await
            .expect("token");

        assert_eq!(token.as_deref(), Some("second"));
        assert_eq!(tv.home_clicks(), 1);
    }
}
