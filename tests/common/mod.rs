//! Shared test utilities
//!
//! In-memory stand-ins for the microphone, speaker and socket. Every fake
//! writes into one shared [`Recorder`] so tests can assert on call order and
//! on how often each resource was released.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::mpsc::UnboundedReceiver;

use astra_voice::protocol::OutboundFraming;
use astra_voice::session::UserCommand;
use astra_voice::transport::{RawFrame, Socket, TransportClient, TransportEvent};
use astra_voice::voice::{
    AudioCaptureController, AudioOutput, AudioPlaybackController, CaptureEvent, CaptureId,
    CaptureParams, InputStream, Microphone, OutputStream, PlaybackEvent, PlaybackId,
};
use astra_voice::{
    CaptureError, Error, EventSink, Result, SessionEvent, SessionOrchestrator, SessionState,
    StatusSnapshot,
};

/// Everything the fakes observed, plus the failures they should inject
#[derive(Debug, Default)]
pub struct Recorder {
    /// Ordered record of platform calls
    pub log: Vec<String>,
    /// Payloads handed to the socket
    pub sent: Vec<Vec<u8>>,
    pub last_capture: Option<CaptureId>,
    pub last_playback: Option<PlaybackId>,
    pub mic_releases: usize,
    pub playback_releases: usize,
    pub socket_closes: usize,

    /// Fail the next microphone acquisition
    pub mic_error: Option<CaptureError>,
    /// Fail every playback start with a decode error
    pub output_error: Option<String>,
    pub open_error: bool,
    pub send_error: bool,
}

pub type Shared = Rc<RefCell<Recorder>>;

pub struct FakeMicrophone {
    recorder: Shared,
}

impl FakeMicrophone {
    #[must_use]
    pub fn new(recorder: Shared) -> Self {
        Self { recorder }
    }
}

struct FakeInput {
    recorder: Shared,
    capture: CaptureId,
    format: CaptureParams,
}

impl Microphone for FakeMicrophone {
    fn open(
        &mut self,
        capture: CaptureId,
        params: CaptureParams,
        _events: EventSink,
    ) -> std::result::Result<Box<dyn InputStream>, CaptureError> {
        let mut recorder = self.recorder.borrow_mut();
        if let Some(error) = recorder.mic_error.take() {
            recorder.log.push(format!("mic:denied:{}", capture.0));
            return Err(error);
        }
        recorder.log.push(format!("mic:open:{}", capture.0));
        recorder.last_capture = Some(capture);

        Ok(Box::new(FakeInput {
            recorder: Rc::clone(&self.recorder),
            capture,
            format: params,
        }))
    }
}

impl InputStream for FakeInput {
    fn format(&self) -> CaptureParams {
        self.format
    }

    fn stop(&mut self) {
        let mut recorder = self.recorder.borrow_mut();
        recorder.mic_releases += 1;
        recorder.log.push(format!("mic:stop:{}", self.capture.0));
    }
}

pub struct FakeOutput {
    recorder: Shared,
}

impl FakeOutput {
    #[must_use]
    pub fn new(recorder: Shared) -> Self {
        Self { recorder }
    }
}

struct FakeStream {
    recorder: Shared,
    handle: PlaybackId,
}

impl AudioOutput for FakeOutput {
    fn start(
        &mut self,
        handle: PlaybackId,
        payload: &[u8],
        _events: EventSink,
    ) -> Result<Box<dyn OutputStream>> {
        let mut recorder = self.recorder.borrow_mut();
        recorder.log.push(format!("play:{}:{}", handle.0, payload.len()));
        if let Some(error) = recorder.output_error.clone() {
            return Err(Error::Decode(error));
        }
        recorder.last_playback = Some(handle);

        Ok(Box::new(FakeStream {
            recorder: Rc::clone(&self.recorder),
            handle,
        }))
    }
}

impl OutputStream for FakeStream {
    fn stop(&mut self) {
        let mut recorder = self.recorder.borrow_mut();
        recorder.playback_releases += 1;
        recorder.log.push(format!("play:stop:{}", self.handle.0));
    }
}

pub struct FakeSocket {
    recorder: Shared,
}

impl FakeSocket {
    #[must_use]
    pub fn new(recorder: Shared) -> Self {
        Self { recorder }
    }
}

impl Socket for FakeSocket {
    fn open(&mut self, _events: EventSink) -> Result<()> {
        let mut recorder = self.recorder.borrow_mut();
        recorder.log.push("socket:open".to_string());
        if recorder.open_error {
            return Err(Error::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        let mut recorder = self.recorder.borrow_mut();
        if recorder.send_error {
            return Err(Error::ConnectionClosed);
        }
        recorder.log.push(format!("socket:send:{}", payload.len()));
        recorder.sent.push(payload);
        Ok(())
    }

    fn close(&mut self) {
        let mut recorder = self.recorder.borrow_mut();
        recorder.socket_closes += 1;
        recorder.log.push("socket:close".to_string());
    }
}

/// A session wired to fakes, driven by hand
pub struct Harness {
    pub session: SessionOrchestrator,
    pub recorder: Shared,
    pub events: EventSink,
    pub rx: UnboundedReceiver<SessionEvent>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self::with(Recorder::default(), OutboundFraming::Raw)
    }

    #[must_use]
    pub fn with(recorder: Recorder, framing: OutboundFraming) -> Self {
        let recorder = Rc::new(RefCell::new(recorder));
        let (events, rx) = EventSink::channel();

        let capture = AudioCaptureController::new(
            Box::new(FakeMicrophone::new(Rc::clone(&recorder))),
            CaptureParams::default(),
        );
        let playback =
            AudioPlaybackController::new(Box::new(FakeOutput::new(Rc::clone(&recorder))));
        let transport = TransportClient::new(Box::new(FakeSocket::new(Rc::clone(&recorder))));

        let session =
            SessionOrchestrator::new(capture, playback, transport, framing, events.clone());

        Self {
            session,
            recorder,
            events,
            rx,
        }
    }

    /// Session that has connected and is ready to record
    #[must_use]
    pub fn ready() -> Self {
        let mut harness = Self::new();
        harness.session.start();
        harness.deliver(TransportEvent::Opened);
        assert_eq!(harness.state(), SessionState::Ready);
        harness
    }

    pub fn deliver(&mut self, event: impl Into<SessionEvent>) {
        self.session.handle(event.into());
    }

    pub fn command(&mut self, command: UserCommand) {
        self.deliver(command);
    }

    /// Feed a fragment for the capture the microphone last opened
    pub fn fragment(&mut self, bytes: &[u8]) {
        let capture = self.last_capture();
        self.deliver(CaptureEvent::Fragment {
            capture,
            bytes: bytes.to_vec(),
        });
    }

    /// Start, feed fragments and stop a recording
    pub fn record(&mut self, fragments: &[&[u8]]) {
        self.command(UserCommand::StartCapture);
        for bytes in fragments {
            self.fragment(bytes);
        }
        self.command(UserCommand::StopCapture);
    }

    /// Report a lifecycle event for the playback handle last started
    pub fn playback(&mut self, make: impl FnOnce(PlaybackId) -> PlaybackEvent) {
        let handle = self.last_playback();
        self.deliver(make(handle));
    }

    /// Hand every queued event to the session
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            self.session.handle(event);
        }
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.session.state().clone()
    }

    #[must_use]
    pub fn status(&self) -> StatusSnapshot {
        self.session.status()
    }

    #[must_use]
    pub fn last_capture(&self) -> CaptureId {
        self.recorder
            .borrow()
            .last_capture
            .expect("no capture was opened")
    }

    #[must_use]
    pub fn last_playback(&self) -> PlaybackId {
        self.recorder
            .borrow()
            .last_playback
            .expect("no playback was started")
    }

    #[must_use]
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.recorder.borrow().sent.clone()
    }

    #[must_use]
    pub fn log(&self) -> Vec<String> {
        self.recorder.borrow().log.clone()
    }
}

/// A structured reply frame carrying `audio` as base64
#[must_use]
pub fn spoken_reply(text: &str, audio: &[u8]) -> TransportEvent {
    TransportEvent::Frame(RawFrame::Text(format!(
        r#"{{"text":"{text}","audio":"{}"}}"#,
        BASE64.encode(audio)
    )))
}

/// A plain text frame
#[must_use]
pub fn text_frame(text: &str) -> TransportEvent {
    TransportEvent::Frame(RawFrame::Text(text.to_string()))
}
