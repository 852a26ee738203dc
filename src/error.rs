//! Error types for the Astra voice client

use thiserror::Error;

/// Result type alias for Astra operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone capture error
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Send attempted while the connection is not open
    #[error("not connected")]
    NotConnected,

    /// The connection was closed underneath a send
    #[error("connection closed")]
    ConnectionClosed,

    /// Connection establishment or socket failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Audio payload could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Audio could not be written to a WAV container
    #[error("encode error: {0}")]
    Encode(String),

    /// Audio output failure
    #[error("playback error: {0}")]
    Playback(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Microphone acquisition failures
///
/// Each variant maps to a distinct user-facing status line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The platform refused microphone access
    #[error("microphone permission denied")]
    PermissionDenied,

    /// No usable input device
    #[error("no microphone found")]
    DeviceNotFound,

    /// The input device is held by another application
    #[error("microphone is busy")]
    DeviceBusy,

    /// A capture session is already live
    #[error("a recording is already in progress")]
    AlreadyCapturing,

    /// Any other capture failure
    #[error("{0}")]
    Failed(String),
}

impl CaptureError {
    /// Classify a backend-specific failure message
    #[must_use]
    pub fn from_backend_message(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("permission") || lower.contains("denied") || lower.contains("not allowed")
        {
            Self::PermissionDenied
        } else if lower.contains("busy") || lower.contains("in use") {
            Self::DeviceBusy
        } else if lower.contains("no such device") || lower.contains("not found") {
            Self::DeviceNotFound
        } else {
            Self::Failed(message.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_messages_are_classified() {
        assert_eq!(
            CaptureError::from_backend_message("Operation not allowed by the user"),
            CaptureError::PermissionDenied
        );
        assert_eq!(
            CaptureError::from_backend_message("ALSA: Device or resource busy"),
            CaptureError::DeviceBusy
        );
        assert_eq!(
            CaptureError::from_backend_message("device not found"),
            CaptureError::DeviceNotFound
        );
        assert_eq!(
            CaptureError::from_backend_message("xrun"),
            CaptureError::Failed("xrun".to_string())
        );
    }
}
