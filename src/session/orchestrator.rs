//! Session state machine
//!
//! ```text
//! Connecting --opened--> Ready --start--> Recording --stop--> AwaitingReply
//!      |                   ^                  |                 |      |
//!      |                   +----hw error------+                 |      |
//!      |                   +------------ text notice -----------+      |
//!      |                   +---- playback end/error ---- Speaking <----+
//!      +--error/closed--> Disconnected <--closed-- (any)
//!                         Fatal <--fault-- (any)
//! ```
//!
//! Every (state, event) pair not drawn above is a no-op.

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::event::{EventSink, SessionEvent, UserCommand};
use super::state::{self, SessionState, StatusSnapshot};
use crate::protocol::{InboundMessage, OutboundFraming, encode_outbound, parse_inbound};
use crate::transport::{TransportClient, TransportEvent};
use crate::voice::{
    AudioCaptureController, AudioPlaybackController, CaptureEvent, PlaybackEvent, PlaybackOutcome,
};

/// Sequences capture, send, receive and playback
pub struct SessionOrchestrator {
    id: Uuid,
    state: SessionState,
    capture: AudioCaptureController,
    playback: AudioPlaybackController,
    transport: TransportClient,
    framing: OutboundFraming,
    events: EventSink,
    status: watch::Sender<StatusSnapshot>,
}

impl SessionOrchestrator {
    /// Assemble a session from its components
    ///
    /// `events` must be the sink whose receiver feeds [`Self::handle`].
    #[must_use]
    pub fn new(
        capture: AudioCaptureController,
        playback: AudioPlaybackController,
        transport: TransportClient,
        framing: OutboundFraming,
        events: EventSink,
    ) -> Self {
        let (status, _) = watch::channel(StatusSnapshot::new(
            SessionState::Connecting,
            state::CONNECTING,
        ));

        Self {
            id: Uuid::new_v4(),
            state: SessionState::Connecting,
            capture,
            playback,
            transport,
            framing,
            events,
            status,
        }
    }

    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    /// Stream of status snapshots for the presentation layer
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.subscribe()
    }

    /// Start connecting to the remote service
    pub fn start(&mut self) {
        let _span = tracing::info_span!("session", id = %self.id).entered();

        if let Err(e) = self.transport.connect(&self.events) {
            tracing::warn!(error = %e, "could not start connecting");
            self.disconnect(state::CONNECT_FAILED);
        }
    }

    /// Drain events until the session reaches a terminal state
    #[allow(clippy::future_not_send)]
    pub async fn run(&mut self, events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionState {
        while !self.state.is_terminal() {
            let Some(event) = events.recv().await else {
                break;
            };
            self.handle(event);
        }
        self.state.clone()
    }

    /// Apply one event to the state machine
    pub fn handle(&mut self, event: SessionEvent) {
        let _span = tracing::info_span!("session", id = %self.id).entered();

        if self.state.is_terminal() {
            tracing::trace!(state = %self.state, ?event, "event after session end ignored");
            return;
        }

        match event {
            SessionEvent::Transport(event) => self.on_transport(event),
            SessionEvent::Capture(event) => self.on_capture(event),
            SessionEvent::Playback(event) => self.on_playback(&event),
            SessionEvent::Command(UserCommand::StartCapture) => self.start_capture(),
            SessionEvent::Command(UserCommand::StopCapture) => self.stop_capture(),
            SessionEvent::Fault(reason) => self.fail(&reason),
        }
    }

    /// Release every resource the session holds
    pub fn shutdown(&mut self) {
        tracing::info!(id = %self.id, state = %self.state, "session shutting down");
        self.release_all();
    }

    fn start_capture(&mut self) {
        if self.state != SessionState::Ready {
            tracing::debug!(state = %self.state, "start capture ignored");
            return;
        }

        self.publish(StatusSnapshot::new(SessionState::Ready, state::REQUESTING_MIC).locked());

        match self.capture.begin(&self.events) {
            Ok(capture) => {
                tracing::info!(capture = capture.0, "recording");
                self.transition(SessionState::Recording, state::RECORDING);
            }
            Err(e) => {
                tracing::warn!(error = %e, "microphone unavailable");
                self.transition(SessionState::Ready, state::capture_error_message(&e));
            }
        }
    }

    fn stop_capture(&mut self) {
        if self.state != SessionState::Recording {
            tracing::debug!(state = %self.state, "stop capture ignored");
            return;
        }

        let clip = self.capture.end();
        if clip.is_empty() {
            tracing::info!("empty recording discarded");
            self.transition(SessionState::Ready, state::EMPTY_CLIP);
            return;
        }

        let clip_bytes = clip.len();
        let payload = match encode_outbound(clip, self.framing) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "clip framing failed");
                self.transition(SessionState::Ready, format!("Error: {e}"));
                return;
            }
        };

        match self.transport.send(payload) {
            Ok(()) => {
                tracing::info!(bytes = clip_bytes, "clip sent");
                self.transition(SessionState::AwaitingReply, state::PROCESSING);
            }
            Err(e) => {
                tracing::warn!(error = %e, "clip not sent");
                self.transition(SessionState::Ready, state::SEND_FAILED);
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        self.transport.observe(&event);

        match event {
            TransportEvent::Opened => {
                if self.state == SessionState::Connecting {
                    self.transition(SessionState::Ready, state::READY);
                }
            }
            TransportEvent::Frame(frame) => {
                let message = parse_inbound(&frame);
                if self.state == SessionState::AwaitingReply {
                    self.on_message(message);
                } else {
                    tracing::warn!(state = %self.state, ?message, "message outside a reply window ignored");
                }
            }
            TransportEvent::Error(error) => match self.state {
                SessionState::Connecting => {
                    tracing::warn!(%error, "connection failed");
                    self.disconnect(state::CONNECT_FAILED);
                }
                SessionState::AwaitingReply => {
                    tracing::warn!(%error, "connection lost while awaiting reply");
                    self.disconnect(state::CONNECTION_LOST);
                }
                _ => tracing::warn!(%error, state = %self.state, "transport error"),
            },
            TransportEvent::Closed { reason } => {
                tracing::info!(?reason, state = %self.state, "connection closed");
                if self.state == SessionState::Connecting {
                    self.disconnect(state::CONNECT_FAILED);
                } else {
                    self.disconnect(state::CONNECTION_LOST);
                }
            }
        }
    }

    fn on_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::SpokenReply { text, audio } => {
                match self.playback.play(&audio, &self.events) {
                    Ok(handle) => {
                        tracing::info!(handle = handle.0, "reply playing");
                        self.transition(SessionState::Speaking, format!("AI: {text}"));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "reply playback skipped");
                        self.transition(SessionState::Ready, state::PLAYBACK_FAILED);
                    }
                }
            }
            InboundMessage::SilentReply { text, error } => {
                tracing::warn!(%error, "reply without playable audio");
                self.transition(SessionState::Ready, state::silent_reply_message(&text));
            }
            InboundMessage::TextNotice { category, text } => {
                self.transition(SessionState::Ready, state::notice_message(category, &text));
            }
            InboundMessage::Unrecognized { raw } => {
                self.transition(SessionState::Ready, state::unrecognized_message(&raw));
            }
        }
    }

    fn on_capture(&mut self, event: CaptureEvent) {
        if let CaptureEvent::Failed { capture, error } = &event
            && self.state == SessionState::Recording
            && self.capture.active_id() == Some(*capture)
        {
            tracing::warn!(%error, "microphone failed mid-recording");
            self.transition(SessionState::Ready, format!("Microphone error: {error}"));
        }

        // Appends fragments; on failure releases the partial capture
        self.capture.accept(event);
    }

    fn on_playback(&mut self, event: &PlaybackEvent) {
        let Some(outcome) = self.playback.accept(event) else {
            return;
        };
        if self.state != SessionState::Speaking {
            return;
        }

        match outcome {
            PlaybackOutcome::Started => {
                self.publish(StatusSnapshot::new(SessionState::Speaking, state::SPEAKING));
            }
            PlaybackOutcome::Finished => self.transition(SessionState::Ready, state::READY),
            PlaybackOutcome::Failed(error) => {
                tracing::warn!(%error, "playback failed");
                self.transition(SessionState::Ready, state::PLAYBACK_FAILED);
            }
        }
    }

    fn fail(&mut self, reason: &str) {
        tracing::error!(%reason, "session fault");
        self.transition(
            SessionState::Fatal(reason.to_string()),
            state::fatal_message(reason),
        );
        self.release_all();
    }

    fn disconnect(&mut self, message: &str) {
        self.transition(SessionState::Disconnected, message);
        self.release_all();
    }

    fn release_all(&mut self) {
        self.capture.abort();
        self.playback.stop_active();
        self.transport.close();
    }

    fn transition(&mut self, next: SessionState, message: impl Into<String>) {
        if self.state != next {
            tracing::info!(from = %self.state, to = %next, "session transition");
        }
        self.state = next.clone();
        self.publish(StatusSnapshot::new(next, message));
    }

    fn publish(&self, snapshot: StatusSnapshot) {
        tracing::debug!(message = %snapshot.message, actionable = snapshot.actionable, "status");
        self.status.send_replace(snapshot);
    }
}
