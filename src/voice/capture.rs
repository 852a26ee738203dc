//! Audio capture from microphone
//!
//! [`AudioCaptureController`] owns at most one [`CaptureSession`] at a time.
//! The platform side ([`Microphone`]) pushes raw PCM fragments into the session
//! event queue; the controller appends them in arrival order and concatenates
//! them into a [`CapturedClip`] when the recording ends.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, PlayStreamError, SampleRate, Stream, StreamConfig};

use crate::error::CaptureError;
use crate::session::EventSink;
use crate::voice::wav::f32_to_i16;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Acquisition parameters requested from the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureParams {
    /// Channel count (1 = mono)
    pub channels: u16,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Bits per sample of the PCM fragments
    pub bits_per_sample: u16,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
        }
    }
}

/// Identifies one recording attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaptureId(pub u64);

/// Event raised by a live input stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// A chunk of PCM bytes arrived
    Fragment { capture: CaptureId, bytes: Vec<u8> },
    /// The input hardware failed mid-recording
    Failed { capture: CaptureId, error: String },
}

/// A live hardware input stream
pub trait InputStream {
    /// Format actually granted by the device
    fn format(&self) -> CaptureParams;

    /// Stop fragment delivery and release the device
    fn stop(&mut self);
}

/// Platform microphone capability
pub trait Microphone {
    /// Acquire the microphone and start delivering fragments tagged with `capture`
    ///
    /// # Errors
    ///
    /// Returns the acquisition failure (permission, missing or busy device)
    fn open(
        &mut self,
        capture: CaptureId,
        params: CaptureParams,
        events: EventSink,
    ) -> Result<Box<dyn InputStream>, CaptureError>;
}

/// One finalized, immutable recording
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedClip {
    bytes: Vec<u8>,
    format: CaptureParams,
}

impl CapturedClip {
    #[must_use]
    pub const fn new(bytes: Vec<u8>, format: CaptureParams) -> Self {
        Self { bytes, format }
    }

    #[must_use]
    pub fn empty(format: CaptureParams) -> Self {
        Self::new(Vec::new(), format)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    #[must_use]
    pub const fn format(&self) -> CaptureParams {
        self.format
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// A single recording in progress
pub struct CaptureSession {
    id: CaptureId,
    format: CaptureParams,
    fragments: Vec<Vec<u8>>,
    stream: Option<Box<dyn InputStream>>,
}

impl CaptureSession {
    /// Wrap an already-started input stream
    #[must_use]
    pub fn new(id: CaptureId, stream: Box<dyn InputStream>) -> Self {
        Self {
            id,
            format: stream.format(),
            fragments: Vec::new(),
            stream: Some(stream),
        }
    }

    #[must_use]
    pub const fn id(&self) -> CaptureId {
        self.id
    }

    /// Append a fragment; empty fragments are discarded
    pub fn push(&mut self, bytes: Vec<u8>) {
        if bytes.is_empty() {
            return;
        }
        self.fragments.push(bytes);
    }

    /// Number of fragments collected so far
    #[must_use]
    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    /// Stop the hardware and concatenate the fragments
    ///
    /// Safe to call more than once; later calls yield an empty clip.
    pub fn finish(&mut self) -> CapturedClip {
        self.release();
        let fragments = std::mem::take(&mut self.fragments);
        CapturedClip::new(fragments.concat(), self.format)
    }

    /// Release the hardware stream, at most once
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!(capture = self.id.0, "capture stream released");
        }
    }

    #[must_use]
    pub const fn is_released(&self) -> bool {
        self.stream.is_none()
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Owns the microphone for the lifetime of one recording
pub struct AudioCaptureController {
    microphone: Box<dyn Microphone>,
    params: CaptureParams,
    next_id: u64,
    active: Option<CaptureSession>,
}

impl AudioCaptureController {
    #[must_use]
    pub fn new(microphone: Box<dyn Microphone>, params: CaptureParams) -> Self {
        Self {
            microphone,
            params,
            next_id: 0,
            active: None,
        }
    }

    /// Start a recording
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::AlreadyCapturing`] if a session is live, or the
    /// platform acquisition failure
    pub fn begin(&mut self, events: &EventSink) -> Result<CaptureId, CaptureError> {
        if self.active.is_some() {
            return Err(CaptureError::AlreadyCapturing);
        }

        self.next_id += 1;
        let id = CaptureId(self.next_id);
        let stream = self.microphone.open(id, self.params, events.clone())?;

        tracing::debug!(
            capture = id.0,
            sample_rate = stream.format().sample_rate,
            channels = stream.format().channels,
            "audio capture started"
        );

        self.active = Some(CaptureSession::new(id, stream));
        Ok(id)
    }

    /// Feed a capture event into the live session
    ///
    /// Returns the error text when the live session's hardware failed; the
    /// partial capture is released before returning. Events from finished
    /// sessions are ignored.
    pub fn accept(&mut self, event: CaptureEvent) -> Option<String> {
        match event {
            CaptureEvent::Fragment { capture, bytes } => {
                match self.active.as_mut().filter(|s| s.id() == capture) {
                    Some(session) => session.push(bytes),
                    None => tracing::trace!(capture = capture.0, "stale fragment ignored"),
                }
                None
            }
            CaptureEvent::Failed { capture, error } => {
                if self.active_id() != Some(capture) {
                    tracing::debug!(capture = capture.0, %error, "stale capture failure ignored");
                    return None;
                }
                self.abort();
                Some(error)
            }
        }
    }

    /// Finish the live recording
    ///
    /// With no live session this yields an empty clip.
    pub fn end(&mut self) -> CapturedClip {
        self.active.take().map_or_else(
            || CapturedClip::empty(self.params),
            |mut session| {
                let clip = session.finish();
                tracing::debug!(capture = session.id().0, bytes = clip.len(), "audio capture stopped");
                clip
            },
        )
    }

    /// Drop the live recording without producing a clip
    pub fn abort(&mut self) {
        if let Some(mut session) = self.active.take() {
            session.release();
            tracing::debug!(capture = session.id().0, "audio capture aborted");
        }
    }

    #[must_use]
    pub fn active_id(&self) -> Option<CaptureId> {
        self.active.as_ref().map(CaptureSession::id)
    }

    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.active.is_some()
    }
}

/// Microphone backed by the default cpal input device
#[derive(Debug, Default)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Microphone for CpalMicrophone {
    fn open(
        &mut self,
        capture: CaptureId,
        params: CaptureParams,
        events: EventSink,
    ) -> Result<Box<dyn InputStream>, CaptureError> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or(CaptureError::DeviceNotFound)?;

        let config = negotiate_input_config(&device, params)?;
        let channels = usize::from(config.channels);
        let granted = CaptureParams {
            channels: 1,
            sample_rate: config.sample_rate.0,
            bits_per_sample: 16,
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = granted.sample_rate,
            device_channels = channels,
            "audio capture initialized"
        );

        let fragments = events.clone();
        let failures = events;

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    fragments.emit(CaptureEvent::Fragment {
                        capture,
                        bytes: interleaved_to_pcm16(data, channels),
                    });
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    failures.emit(CaptureEvent::Failed {
                        capture,
                        error: err.to_string(),
                    });
                },
                None,
            )
            .map_err(map_build_error)?;

        stream.play().map_err(map_play_error)?;

        Ok(Box::new(CpalInputStream {
            stream: Some(stream),
            format: granted,
        }))
    }
}

struct CpalInputStream {
    stream: Option<Stream>,
    format: CaptureParams,
}

impl InputStream for CpalInputStream {
    fn format(&self) -> CaptureParams {
        self.format
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "pausing input stream failed");
            }
            drop(stream);
        }
    }
}

/// Prefer the requested format, fall back to the device default
fn negotiate_input_config(
    device: &cpal::Device,
    params: CaptureParams,
) -> Result<StreamConfig, CaptureError> {
    let wanted = SampleRate(params.sample_rate);

    let exact = device
        .supported_input_configs()
        .map_err(|e| match e {
            cpal::SupportedStreamConfigsError::DeviceNotAvailable => CaptureError::DeviceNotFound,
            other => CaptureError::from_backend_message(&other.to_string()),
        })?
        .find(|c| {
            c.channels() == params.channels
                && c.min_sample_rate() <= wanted
                && c.max_sample_rate() >= wanted
        });

    if let Some(range) = exact {
        return Ok(range.with_sample_rate(wanted).config());
    }

    tracing::debug!(
        sample_rate = params.sample_rate,
        channels = params.channels,
        "requested capture format unsupported, using device default"
    );

    device
        .default_input_config()
        .map(|c| c.config())
        .map_err(|e| match e {
            cpal::DefaultStreamConfigError::DeviceNotAvailable => CaptureError::DeviceNotFound,
            other => CaptureError::from_backend_message(&other.to_string()),
        })
}

fn map_build_error(e: BuildStreamError) -> CaptureError {
    match e {
        BuildStreamError::DeviceNotAvailable => CaptureError::DeviceNotFound,
        BuildStreamError::BackendSpecific { err } => {
            CaptureError::from_backend_message(&err.description)
        }
        other => CaptureError::Failed(other.to_string()),
    }
}

fn map_play_error(e: PlayStreamError) -> CaptureError {
    match e {
        PlayStreamError::DeviceNotAvailable => CaptureError::DeviceBusy,
        PlayStreamError::BackendSpecific { err } => {
            CaptureError::from_backend_message(&err.description)
        }
    }
}

/// Downmix interleaved f32 frames to mono little-endian i16 bytes
#[allow(clippy::cast_precision_loss)]
pub fn interleaved_to_pcm16(data: &[f32], channels: usize) -> Vec<u8> {
    let channels = channels.max(1);
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .flat_map(|sample| f32_to_i16(sample).to_le_bytes())
        .collect()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    struct CountingStream {
        stops: Rc<Cell<usize>>,
    }

    impl InputStream for CountingStream {
        fn format(&self) -> CaptureParams {
            CaptureParams::default()
        }

        fn stop(&mut self) {
            self.stops.set(self.stops.get() + 1);
        }
    }

    struct CountingMic {
        stops: Rc<Cell<usize>>,
    }

    impl Microphone for CountingMic {
        fn open(
            &mut self,
            _capture: CaptureId,
            _params: CaptureParams,
            _events: EventSink,
        ) -> Result<Box<dyn InputStream>, CaptureError> {
            Ok(Box::new(CountingStream {
                stops: Rc::clone(&self.stops),
            }))
        }
    }

    fn controller() -> (AudioCaptureController, Rc<Cell<usize>>, EventSink) {
        let stops = Rc::new(Cell::new(0));
        let mic = CountingMic {
            stops: Rc::clone(&stops),
        };
        let (sink, _rx) = EventSink::channel();
        (
            AudioCaptureController::new(Box::new(mic), CaptureParams::default()),
            stops,
            sink,
        )
    }

    #[test]
    fn clip_is_ordered_concatenation_without_empty_fragments() {
        let (mut ctl, _, sink) = controller();
        let id = ctl.begin(&sink).unwrap();

        for bytes in [vec![1, 2], vec![], vec![3], vec![4, 5, 6], vec![]] {
            ctl.accept(CaptureEvent::Fragment { capture: id, bytes });
        }

        let clip = ctl.end();
        assert_eq!(clip.as_bytes(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn end_without_fragments_or_twice_is_empty() {
        let (mut ctl, stops, sink) = controller();
        ctl.begin(&sink).unwrap();

        assert!(ctl.end().is_empty());
        assert!(ctl.end().is_empty());
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn session_finish_is_idempotent() {
        let stops = Rc::new(Cell::new(0));
        let stream = CountingStream {
            stops: Rc::clone(&stops),
        };
        let mut session = CaptureSession::new(CaptureId(7), Box::new(stream));
        session.push(vec![9, 9]);

        assert_eq!(session.finish().len(), 2);
        assert!(session.finish().is_empty());
        drop(session);
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn second_begin_is_rejected() {
        let (mut ctl, _, sink) = controller();
        ctl.begin(&sink).unwrap();
        assert_eq!(ctl.begin(&sink), Err(CaptureError::AlreadyCapturing));
    }

    #[test]
    fn stale_events_are_ignored() {
        let (mut ctl, stops, sink) = controller();
        let first = ctl.begin(&sink).unwrap();
        ctl.end();
        let second = ctl.begin(&sink).unwrap();

        ctl.accept(CaptureEvent::Fragment {
            capture: first,
            bytes: vec![1],
        });
        assert_eq!(
            ctl.accept(CaptureEvent::Failed {
                capture: first,
                error: "late".to_string(),
            }),
            None
        );
        assert_eq!(ctl.active_id(), Some(second));
        assert!(ctl.end().is_empty());
        assert_eq!(stops.get(), 2);
    }

    #[test]
    fn hardware_failure_releases_partial_capture() {
        let (mut ctl, stops, sink) = controller();
        let id = ctl.begin(&sink).unwrap();
        ctl.accept(CaptureEvent::Fragment {
            capture: id,
            bytes: vec![1, 2],
        });

        let error = ctl.accept(CaptureEvent::Failed {
            capture: id,
            error: "unplugged".to_string(),
        });

        assert_eq!(error.as_deref(), Some("unplugged"));
        assert!(!ctl.is_capturing());
        assert_eq!(stops.get(), 1);
    }

    #[test]
    fn stereo_frames_are_downmixed() {
        let bytes = interleaved_to_pcm16(&[1.0, 1.0, -1.0, -1.0], 2);
        assert_eq!(bytes.len(), 4);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), 32767);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), -32767);
    }
}
