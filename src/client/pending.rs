//! Request/response correlation by channel name.
//!
//! A [`PendingRequest`] owns one message listener on the connection and
//! one slot in the client's busy-channel set. Both are released when the
//! guard drops, whether the request matched, timed out or failed.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{Error, Result};
use crate::protocol::ChannelMessage;
use crate::transport::{Connection, EventKind, ListenerId, TransportEvent};

// ============================================================================
// PendingRequest
// ============================================================================

/// One outstanding request waiting for a message on `channel`.
pub(crate) struct PendingRequest<'a> {
    connection: Connection,
    listener: ListenerId,
    channel: String,
    busy: &'a Mutex<FxHashSet<String>>,
    response_rx: oneshot::Receiver<ChannelMessage>,
}

impl<'a> PendingRequest<'a> {
    /// Claims `channel` and registers the response listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelBusy`] if another request holds the channel.
    pub(crate) fn register(
        connection: &Connection,
        channel: &str,
        busy: &'a Mutex<FxHashSet<String>>,
    ) -> Result<Self> {
        if !busy.lock().insert(channel.to_string()) {
            return Err(Error::channel_busy(channel));
        }

        let (response_tx, response_rx) = oneshot::channel();
        let response_tx = Mutex::new(Some(response_tx));
        let wanted = channel.to_string();

        let listener = connection.on(EventKind::Message, move |event| {
            let TransportEvent::Message(text) = event else {
                return;
            };
            let Ok(message) = ChannelMessage::parse(text) else {
                return;
            };
            if message.event == wanted
                && let Some(tx) = response_tx.lock().take()
            {
                let _ = tx.send(message);
            }
        });

        trace!(%channel, %listener, "Request registered");

        Ok(Self {
            connection: connection.clone(),
            listener,
            channel: channel.to_string(),
            busy,
            response_rx,
        })
    }

    /// Waits for the response.
    ///
    /// # Errors
    ///
    /// - [`Error::RequestTimeout`] if `timeout` elapses first
    /// - [`Error::ConnectionClosed`] if the socket closes first
    pub(crate) async fn wait(mut self, timeout: Option<Duration>) -> Result<ChannelMessage> {
        let connection = self.connection.clone();
        let response_rx = &mut self.response_rx;

        let response = async {
            tokio::select! {
                biased;
                message = response_rx => message.map_err(|_| Error::ConnectionClosed),
                _ = connection.closed() => Err(Error::ConnectionClosed),
            }
        };

        match timeout {
            Some(limit) => tokio::time::timeout(limit, response)
                .await
                .map_err(|_| Error::request_timeout(&self.channel, limit))?,
            None => response.await,
        }
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        self.connection.off(self.listener);
        self.busy.lock().remove(&self.channel);
        trace!(channel = %self.channel, "Request released");
    }
}

// ============================================================================
// Tests
// ============================================================================
