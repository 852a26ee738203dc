//! Wire formats exchanged with the listener service
//!
//! Outbound traffic is one binary frame per recording. Inbound traffic comes in
//! two shapes, tried in a fixed order:
//!
//! 1. a JSON record `{"text": "...", "audio": "<base64>"}` (spoken reply)
//! 2. a plain text frame with a known prefix (`AI_RESPONSE:`, `CRISIS_RESPONSE:`, `ERROR:`)
//!
//! Anything else is surfaced verbatim as [`InboundMessage::Unrecognized`].
//! Parsing never fails.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use thiserror::Error;

use crate::transport::RawFrame;
use crate::voice::{CapturedClip, pcm16_to_wav};
use crate::Result;

/// Prefix for informational text replies
pub const AI_RESPONSE_PREFIX: &str = "AI_RESPONSE:";

/// Prefix for crisis-support replies
pub const CRISIS_RESPONSE_PREFIX: &str = "CRISIS_RESPONSE:";

/// Prefix for server-side error reports
pub const ERROR_PREFIX: &str = "ERROR:";

/// Category of a text-only notice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeCategory {
    Info,
    Crisis,
    Error,
}

impl NoticeCategory {
    /// Label used when rendering the notice as status text
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Info => "AI",
            Self::Crisis => "CRISIS",
            Self::Error => "Error",
        }
    }
}

/// A decoded server message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// Reply text paired with synthesized speech
    SpokenReply { text: String, audio: Vec<u8> },
    /// Structured reply whose audio could not be decoded; text only
    SilentReply { text: String, error: String },
    /// Text notice without audio
    TextNotice { category: NoticeCategory, text: String },
    /// Frame in no known shape, kept verbatim
    Unrecognized { raw: String },
}

/// Embedded audio could not be decoded from its transfer encoding
#[derive(Debug, Error)]
#[error("invalid base64 audio: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

impl From<DecodeError> for crate::Error {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e.to_string())
    }
}

/// Why a parse stage declined a frame
///
/// Never surfaced to callers: each stage's failure hands the frame to the next.
#[derive(Debug, Error)]
pub enum MalformedMessage {
    #[error("frame is not valid UTF-8")]
    NotText,
    #[error("not a reply record: {0}")]
    NotRecord(#[from] serde_json::Error),
    #[error("reply record carries no audio")]
    EmptyAudio,
    #[error("no known prefix")]
    NoKnownPrefix,
}

/// How a finished clip is framed on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundFraming {
    /// Clip bytes as captured, no envelope
    #[default]
    Raw,
    /// Clip PCM wrapped in a RIFF/WAVE header
    Wav,
}

#[derive(Debug, Deserialize)]
struct ReplyRecord {
    text: String,
    audio: String,
}

/// Translate one transport frame into an [`InboundMessage`]
#[must_use]
pub fn parse_inbound(frame: &RawFrame) -> InboundMessage {
    let text = match frame_text(frame) {
        Ok(text) => text,
        Err(reason) => {
            tracing::debug!(%reason, "inbound frame kept verbatim");
            return InboundMessage::Unrecognized {
                raw: frame.to_lossy_string(),
            };
        }
    };

    parse_structured(text)
        .or_else(|_| parse_prefixed(text))
        .unwrap_or_else(|reason| {
            tracing::debug!(%reason, "inbound frame kept verbatim");
            InboundMessage::Unrecognized {
                raw: text.to_string(),
            }
        })
}

fn frame_text(frame: &RawFrame) -> std::result::Result<&str, MalformedMessage> {
    match frame {
        RawFrame::Text(text) => Ok(text),
        RawFrame::Binary(bytes) => std::str::from_utf8(bytes).map_err(|_| MalformedMessage::NotText),
    }
}

/// Stage 1: structured reply record
///
/// # Errors
///
/// Returns why the text is not a usable reply record
pub fn parse_structured(text: &str) -> std::result::Result<InboundMessage, MalformedMessage> {
    let record: ReplyRecord = serde_json::from_str(text)?;
    if record.audio.is_empty() {
        return Err(MalformedMessage::EmptyAudio);
    }

    Ok(match decode_audio(&record.audio) {
        Ok(audio) => InboundMessage::SpokenReply {
            text: record.text,
            audio,
        },
        Err(e) => {
            tracing::warn!(error = %e, "reply audio undecodable, playback skipped");
            InboundMessage::SilentReply {
                text: record.text,
                error: e.to_string(),
            }
        }
    })
}

/// Stage 2: legacy prefixed text
///
/// # Errors
///
/// Returns [`MalformedMessage::NoKnownPrefix`] when no prefix matches
pub fn parse_prefixed(text: &str) -> std::result::Result<InboundMessage, MalformedMessage> {
    const PREFIXES: [(&str, NoticeCategory); 3] = [
        (AI_RESPONSE_PREFIX, NoticeCategory::Info),
        (CRISIS_RESPONSE_PREFIX, NoticeCategory::Crisis),
        (ERROR_PREFIX, NoticeCategory::Error),
    ];

    PREFIXES
        .iter()
        .find_map(|(prefix, category)| {
            text.strip_prefix(prefix)
                .map(|rest| InboundMessage::TextNotice {
                    category: *category,
                    text: rest.to_string(),
                })
        })
        .ok_or(MalformedMessage::NoKnownPrefix)
}

/// Decode base64-embedded audio into its exact original bytes
///
/// # Errors
///
/// Returns error if the encoding is malformed
pub fn decode_audio(encoded: &str) -> std::result::Result<Vec<u8>, DecodeError> {
    Ok(BASE64.decode(encoded.trim())?)
}

/// Produce the outbound binary frame for a finished clip
///
/// The clip is consumed: once handed to the transport it no longer exists.
///
/// # Errors
///
/// Returns error if WAV framing fails
pub fn encode_outbound(clip: CapturedClip, framing: OutboundFraming) -> Result<Vec<u8>> {
    match framing {
        OutboundFraming::Raw => Ok(clip.into_bytes()),
        OutboundFraming::Wav => pcm16_to_wav(clip.as_bytes(), clip.format()),
    }
}
