//! Inbound channel messages.
//!
//! The TV tags every message with an `event` field naming its channel:
//!
//! ```json
//! { "event": "ms.channel.connect", "data": { "token": "12345678" } }
//! { "event": "ms.channel.timeOut" }
//! ```

// ============================================================================
// Imports
// ============================================================================

use serde::Deserialize;
use serde_json::Value;

use crate::error::Result;

// ============================================================================
// Constants
// ============================================================================

/// Channel the device hands out tokens on.
pub const TOKEN_CHANNEL: &str = "ms.channel.connect";

/// Channel the device uses to report a stale session.
pub const TIMEOUT_CHANNEL: &str = "ms.channel.timeOut";

// ============================================================================
// ChannelMessage
// ============================================================================

/// A text message received from the device.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChannelMessage {
    /// Channel name.
    pub event: String,

    /// Channel payload (`null` when absent).
    #[serde(default)]
    pub data: Value,
}

impl ChannelMessage {
    /// Parses a text frame.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Json`] if the frame is not a JSON object
    /// with an `event` string.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Returns the token carried by a token-channel message.
    #[must_use]
    pub fn token(&self) -> Option<&str> {
        if self.event != TOKEN_CHANNEL {
            return None;
        }
        self.data
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
    }

    /// Returns `true` if the device reported the channel as timed out.
    #[inline]
    #[must_use]
    pub fn is_timeout_notice(&self) -> bool {
        self.event == TIMEOUT_CHANNEL
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_message() {
        let message =
            ChannelMessage::parse(r#"{"event":"ms.channel.connect","data":{"token":"1234"}}"#)
                .expect("parse");

        assert_eq!(message.event, TOKEN_CHANNEL);
        assert_eq!(message.token(), Some("1234"));
        assert!(!message.is_timeout_notice());
    }

    #[test]
    fn test_connect_without_token() {
        let message =
            ChannelMessage::parse(r#"{"event":"ms.channel.connect","data":{"clients":[]}}"#)
                .expect("parse");
        assert_eq!(message.token(), None);
    }

    #[test]
    fn test_token_ignored_on_other_channels() {
        let message = ChannelMessage::parse(r#"{"event":"ed.apps.launch","data":{"token":"x"}}"#)
            .expect("parse");
        assert_eq!(message.token(), None);
    }

    #[test]
    fn test_timeout_notice_without_data() {
        let message = ChannelMessage::parse(r#"{"event":"ms.channel.timeOut"}"#).expect("parse");

        assert!(message.is_timeout_notice());
        assert_eq!(message.data, Value::Null);
    }

    #[test]
    fn test_malformed_messages_fail() {
        assert!(ChannelMessage::parse("not json").is_err());
        assert!(ChannelMessage::parse(r#"{"data":{}}"#).is_err());
        assert!(ChannelMessage::parse(r#"[1,2,3]"#).is_err());
    }
}
