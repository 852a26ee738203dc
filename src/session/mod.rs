//! Voice session orchestration
//!
//! This module provides the `SessionOrchestrator` that ties together:
//! - Microphone capture into clips
//! - Sending clips over the transport
//! - Decoding server replies
//! - Playing spoken replies
//! - The status snapshot shown to the user

mod event;
mod orchestrator;
pub mod state;

pub use event::{EventSink, SessionEvent, UserCommand};
pub use orchestrator::SessionOrchestrator;
pub use state::{SessionState, StatusSnapshot};
