//! Astra - push-to-talk voice client for a conversational listener service
//!
//! This library provides the pieces of one voice session:
//! - Microphone capture into clips
//! - A WebSocket transport to the listener service
//! - Decoding of server replies (spoken, text notices, crisis notices)
//! - Playback of spoken replies
//! - A single state machine sequencing all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Console (status, keys)              │
//! └───────────▲─────────────────────────┬───────────────┘
//!             │ status snapshots        │ commands
//! ┌───────────┴─────────────────────────▼───────────────┐
//! │               SessionOrchestrator                    │
//! │   one event queue  │  one transition function        │
//! └─────┬──────────────────┬──────────────────┬─────────┘
//!       │                  │                  │
//! ┌─────▼──────┐   ┌───────▼───────┐   ┌──────▼────────┐
//! │  Capture   │   │   Transport   │   │   Playback    │
//! │ (cpal mic) │   │ (WebSocket)   │   │ (cpal output) │
//! └────────────┘   └───────────────┘   └───────────────┘
//! ```
//!
//! Platform callbacks never touch session state directly; they post events
//! through an [`session::EventSink`] that the orchestrator drains in order.

pub mod config;
pub mod console;
pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{CaptureError, Error, Result};
pub use protocol::{InboundMessage, NoticeCategory, OutboundFraming};
pub use session::{EventSink, SessionEvent, SessionOrchestrator, SessionState, StatusSnapshot};
