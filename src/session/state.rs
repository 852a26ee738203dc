//! Session states and the status line published for each

use std::fmt;

use crate::error::CaptureError;
use crate::protocol::NoticeCategory;

/// Where the session is in its record/reply cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Ready,
    Recording,
    AwaitingReply,
    Speaking,
    Disconnected,
    Fatal(String),
}

impl SessionState {
    /// Whether only an external restart can leave this state
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Fatal(_))
    }

    /// Whether the start/stop affordance is usable in this state
    #[must_use]
    pub const fn accepts_commands(&self) -> bool {
        matches!(self, Self::Ready | Self::Recording)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Ready => f.write_str("ready"),
            Self::Recording => f.write_str("recording"),
            Self::AwaitingReply => f.write_str("awaiting-reply"),
            Self::Speaking => f.write_str("speaking"),
            Self::Disconnected => f.write_str("disconnected"),
            Self::Fatal(_) => f.write_str("fatal"),
        }
    }
}

/// Everything the presentation layer gets to see
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: SessionState,
    pub message: String,
    pub actionable: bool,
}

impl StatusSnapshot {
    /// Snapshot with the state's default actionability
    #[must_use]
    pub fn new(state: SessionState, message: impl Into<String>) -> Self {
        let actionable = state.accepts_commands();
        Self {
            state,
            message: message.into(),
            actionable,
        }
    }

    /// Same snapshot with commands locked out
    #[must_use]
    pub fn locked(mut self) -> Self {
        self.actionable = false;
        self
    }
}

pub const CONNECTING: &str = "Connecting...";
pub const READY: &str = "Ready to listen";
pub const REQUESTING_MIC: &str = "Requesting microphone permission...";
pub const RECORDING: &str = "Recording... Speak now.";
pub const PROCESSING: &str = "Processing your message...";
pub const EMPTY_CLIP: &str = "No audio captured - Ready to listen";
pub const SEND_FAILED: &str = "Failed to send. Not connected.";
pub const SPEAKING: &str = "AI is speaking...";
pub const PLAYBACK_FAILED: &str = "Audio playback failed";
pub const CONNECT_FAILED: &str = "Connection error - Check backend server";
pub const CONNECTION_LOST: &str = "Connection closed - Restart to reconnect";

/// Status line for a text notice
#[must_use]
pub fn notice_message(category: NoticeCategory, text: &str) -> String {
    format!("{}: {}", category.label(), text.trim_start())
}

/// Status line for a reply whose audio could not be used
#[must_use]
pub fn silent_reply_message(text: &str) -> String {
    format!("AI: {} (audio unavailable)", text.trim_start())
}

/// Status line for a frame in no known shape
#[must_use]
pub fn unrecognized_message(raw: &str) -> String {
    format!("Server: {raw}")
}

/// Status line for a failed microphone acquisition
#[must_use]
pub fn capture_error_message(error: &CaptureError) -> String {
    match error {
        CaptureError::PermissionDenied => {
            "Permission denied. Please allow microphone access.".to_string()
        }
        CaptureError::DeviceNotFound => "No microphone found. Please check your device.".to_string(),
        CaptureError::DeviceBusy => {
            "Microphone is already in use by another application.".to_string()
        }
        CaptureError::AlreadyCapturing | CaptureError::Failed(_) => format!("Error: {error}"),
    }
}

/// Status line for a fatal fault
#[must_use]
pub fn fatal_message(reason: &str) -> String {
    format!("Fatal error: {reason}")
}
