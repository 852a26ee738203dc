//! Events feeding the session state machine

use tokio::sync::mpsc;

use crate::transport::TransportEvent;
use crate::voice::{CaptureEvent, PlaybackEvent};

/// Commands issued by the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserCommand {
    /// Begin a recording
    StartCapture,
    /// Finish the current recording and send it
    StopCapture,
}

/// Every input the orchestrator reacts to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection lifecycle or inbound frame
    Transport(TransportEvent),
    /// Microphone fragment or hardware failure
    Capture(CaptureEvent),
    /// Playback start/end/error
    Playback(PlaybackEvent),
    /// User action
    Command(UserCommand),
    /// Unrecoverable internal fault
    Fault(String),
}

impl From<TransportEvent> for SessionEvent {
    fn from(event: TransportEvent) -> Self {
        Self::Transport(event)
    }
}

impl From<CaptureEvent> for SessionEvent {
    fn from(event: CaptureEvent) -> Self {
        Self::Capture(event)
    }
}

impl From<PlaybackEvent> for SessionEvent {
    fn from(event: PlaybackEvent) -> Self {
        Self::Playback(event)
    }
}

impl From<UserCommand> for SessionEvent {
    fn from(command: UserCommand) -> Self {
        Self::Command(command)
    }
}

/// Sending half of the session event queue
///
/// Cloned into every platform callback. All events funnel into one receiver,
/// so the orchestrator sees them in arrival order on a single task.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl EventSink {
    /// Create a sink and the receiver the orchestrator drains
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue an event for the orchestrator
    pub fn emit(&self, event: impl Into<SessionEvent>) {
        if self.tx.send(event.into()).is_err() {
            tracing::trace!("session event dropped, receiver gone");
        }
    }

    /// Whether the orchestrator side has gone away
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
