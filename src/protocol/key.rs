//! Remote-control key codes.
//!
//! Provides ergonomic constants for the `KEY_*` codes the TV accepts.
//!
//! # Example
//!
//! ```ignore
//! use tizen_remote::Key;
//!
//! client.click(Key::Home).await?;
//! client.click(Key::Enter).await?;
//!
//! // Any code the firmware understands also works as a plain string:
//! client.click("KEY_CONTENTS").await?;
//! ```

// ============================================================================
// Key Enum
// ============================================================================

/// Common remote-control keys.
///
/// Every helper taking a key accepts `impl AsRef<str>`, so codes missing
/// here can be passed as strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    // ========================================================================
    // Navigation
    // ========================================================================
    /// `KEY_HOME`
    Home,
    /// `KEY_ENTER`
    Enter,
    /// `KEY_RETURN` (back)
    Return,
    /// `KEY_EXIT`
    Exit,
    /// `KEY_UP`
    Up,
    /// `KEY_DOWN`
    Down,
    /// `KEY_LEFT`
    Left,
    /// `KEY_RIGHT`
    Right,
    /// `KEY_MENU`
    Menu,
    /// `KEY_SOURCE`
    Source,
    /// `KEY_INFO`
    Info,
    /// `KEY_TOOLS`
    Tools,

    // ========================================================================
    // Power & Volume
    // ========================================================================
    /// `KEY_POWER`
    Power,
    /// `KEY_VOLUP`
    VolumeUp,
    /// `KEY_VOLDOWN`
    VolumeDown,
    /// `KEY_MUTE`
    Mute,
    /// `KEY_CHUP`
    ChannelUp,
    /// `KEY_CHDOWN`
    ChannelDown,

    // ========================================================================
    // Media
    // ========================================================================
    /// `KEY_PLAY`
    Play,
    /// `KEY_PAUSE`
    Pause,
    /// `KEY_STOP`
    Stop,
    /// `KEY_FF`
    FastForward,
    /// `KEY_REWIND`
    Rewind,

    // ========================================================================
    // Digits
    // ========================================================================
    /// `KEY_0`
    Digit0,
    /// `KEY_1`
    Digit1,
    /// `KEY_2`
    Digit2,
    /// `KEY_3`
    Digit3,
    /// `KEY_4`
    Digit4,
    /// `KEY_5`
    Digit5,
    /// `KEY_6`
    Digit6,
    /// `KEY_7`
    Digit7,
    /// `KEY_8`
    Digit8,
    /// `KEY_9`
    Digit9,
}

impl Key {
    /// Returns the wire key code.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Key::Home => "KEY_HOME",
            Key::Enter => "KEY_ENTER",
            Key::Return => "KEY_RETURN",
            Key::Exit => "KEY_EXIT",
            Key::Up => "KEY_UP",
            Key::Down => "KEY_DOWN",
            Key::Left => "KEY_LEFT",
            Key::Right => "KEY_RIGHT",
            Key::Menu => "KEY_MENU",
            Key::Source => "KEY_SOURCE",
            Key::Info => "KEY_INFO",
            Key::Tools => "KEY_TOOLS",
            Key::Power => "KEY_POWER",
            Key::VolumeUp => "KEY_VOLUP",
            Key::VolumeDown => "KEY_VOLDOWN",
            Key::Mute => "KEY_MUTE",
            Key::ChannelUp => "KEY_CHUP",
            Key::ChannelDown => "KEY_CHDOWN",
            Key::Play => "KEY_PLAY",
            Key::Pause => "KEY_PAUSE",
            Key::Stop => "KEY_STOP",
            Key::FastForward => "KEY_FF",
            Key::Rewind => "KEY_REWIND",
            Key::Digit0 => "KEY_0",
            Key::Digit1 => "KEY_1",
            Key::Digit2 => "KEY_2",
            Key::Digit3 => "KEY_3",
            Key::Digit4 => "KEY_4",
            Key::Digit5 => "KEY_5",
            Key::Digit6 => "KEY_6",
            Key::Digit7 => "KEY_7",
            Key::Digit8 => "KEY_8",
            Key::Digit9 => "KEY_9",
        }
    }
}

impl AsRef<str> for Key {
    #[inline]
    fn as_ref(&self) -> &str {
        self.code()
    }
}

// ============================================================================
// Tests
// ============================================================================
