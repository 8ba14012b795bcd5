//! Outgoing remote-control commands.
//!
//! Every command uses the `ms.remote.control` method. Key commands carry the
//! action in `Cmd` and the key code in `DataOfCmd`; text commands carry the
//! base64 payload in `Cmd` and the literal encoding name `base64` in
//! `DataOfCmd`. Field order and values are fixed by TV firmware.
//!
//! # Format
//!
//! ```json
//! {
//!   "method": "ms.remote.control",
//!   "params": {
//!     "Cmd": "Click",
//!     "DataOfCmd": "KEY_ENTER",
//!     "Option": "false",
//!     "TypeOfRemote": "SendRemoteKey"
//!   }
//! }
//! ```

// ============================================================================
// Imports
// ============================================================================

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;

// ============================================================================
// Constants
// ============================================================================

/// Method name of every remote-control command.
pub const REMOTE_CONTROL_METHOD: &str = "ms.remote.control";

/// `DataOfCmd` value of text commands.
const TEXT_ENCODING: &str = "base64";

/// `Option` value sent with every command.
const OPTION_FALSE: &str = "false";

// ============================================================================
// KeyAction
// ============================================================================

/// What a key command does with the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyAction {
    /// Hold the key down.
    Press,
    /// Press and release.
    Click,
    /// Let go of a held key.
    Release,
}

impl KeyAction {
    /// Returns the wire `Cmd` value.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            KeyAction::Press => "Press",
            KeyAction::Click => "Click",
            KeyAction::Release => "Release",
        }
    }
}

// ============================================================================
// RemoteType
// ============================================================================

/// Kind of remote-control payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemoteType {
    /// Key press/click/release.
    SendRemoteKey,
    /// Text entry.
    SendInputString,
}

// ============================================================================
// RemoteCommand
// ============================================================================

/// One remote-control action, ready to serialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCommand {
    /// Always [`REMOTE_CONTROL_METHOD`].
    method: &'static str,
    /// Command parameters.
    params: RemoteParams,
}

/// Parameters of a [`RemoteCommand`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RemoteParams {
    /// Key action, or the base64 text payload.
    pub cmd: String,
    /// Key code, or `base64` for text.
    pub data_of_cmd: String,
    /// Always `"false"`.
    pub option: &'static str,
    /// Payload kind.
    pub type_of_remote: RemoteType,
}

impl RemoteCommand {
    /// Creates a key command.
    #[must_use]
    pub fn key(action: KeyAction, key: impl AsRef<str>) -> Self {
        Self {
            method: REMOTE_CONTROL_METHOD,
            params: RemoteParams {
                cmd: action.as_str().to_string(),
                data_of_cmd: key.as_ref().to_string(),
                option: OPTION_FALSE,
                type_of_remote: RemoteType::SendRemoteKey,
            },
        }
    }

    /// Creates a text entry command.
    #[must_use]
    pub fn text(text: &str) -> Self {
        Self {
            method: REMOTE_CONTROL_METHOD,
            params: RemoteParams {
                cmd: STANDARD.encode(text.as_bytes()),
                data_of_cmd: TEXT_ENCODING.to_string(),
                option: OPTION_FALSE,
                type_of_remote: RemoteType::SendInputString,
            },
        }
    }

    /// Returns the method name.
    #[inline]
    #[must_use]
    pub fn method(&self) -> &str {
        self.method
    }

    /// Returns the parameters.
    #[inline]
    #[must_use]
    pub fn params(&self) -> &RemoteParams {
        &self.params
    }
}

// ============================================================================
// Tests
// ============================================================================
