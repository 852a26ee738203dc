//! Audio playback to speakers
//!
//! [`AudioPlaybackController`] keeps at most one [`PlaybackHandle`] live.
//! Starting a new reply always stops and releases the previous handle before
//! the new payload is decoded.

use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};

use crate::session::EventSink;
use crate::{Error, Result};

/// Identifies one playback handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackId(pub u64);

/// Lifecycle event raised by a playing handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Audio became audible
    Started { handle: PlaybackId },
    /// Playback completed naturally
    Ended { handle: PlaybackId },
    /// Playback failed mid-stream
    Failed { handle: PlaybackId, error: String },
}

/// What the orchestrator should do with an accepted playback event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Started,
    Finished,
    Failed(String),
}

/// A decoded resource that is currently playing
pub trait OutputStream {
    /// Pause output and free decode/playback buffers
    fn stop(&mut self);
}

/// Platform audio decode/play capability
pub trait AudioOutput {
    /// Decode `payload` and begin playing it, reporting lifecycle events
    /// tagged with `handle`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Decode`] for undecodable payloads or
    /// [`Error::Playback`] when the output device fails
    fn start(
        &mut self,
        handle: PlaybackId,
        payload: &[u8],
        events: EventSink,
    ) -> Result<Box<dyn OutputStream>>;
}

/// The live resource for one spoken reply
pub struct PlaybackHandle {
    id: PlaybackId,
    stream: Option<Box<dyn OutputStream>>,
    started: bool,
}

impl PlaybackHandle {
    #[must_use]
    pub const fn id(&self) -> PlaybackId {
        self.id
    }

    #[must_use]
    pub const fn has_started(&self) -> bool {
        self.started
    }

    /// Stop output and release resources, at most once
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            tracing::debug!(handle = self.id.0, "playback resources released");
        }
    }
}

impl Drop for PlaybackHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Decodes and plays one spoken reply at a time
pub struct AudioPlaybackController {
    output: Box<dyn AudioOutput>,
    next_id: u64,
    active: Option<PlaybackHandle>,
}

impl AudioPlaybackController {
    #[must_use]
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        Self {
            output,
            next_id: 0,
            active: None,
        }
    }

    /// Play a reply payload, replacing any live handle
    ///
    /// # Errors
    ///
    /// Returns error if the payload cannot be decoded or played
    pub fn play(&mut self, payload: &[u8], events: &EventSink) -> Result<PlaybackId> {
        self.stop_active();

        self.next_id += 1;
        let id = PlaybackId(self.next_id);
        let stream = self.output.start(id, payload, events.clone())?;

        tracing::debug!(handle = id.0, bytes = payload.len(), "playback started");

        self.active = Some(PlaybackHandle {
            id,
            stream: Some(stream),
            started: false,
        });
        Ok(id)
    }

    /// Stop and release the live handle; no-op when idle
    pub fn stop_active(&mut self) {
        if let Some(mut handle) = self.active.take() {
            handle.release();
        }
    }

    /// Feed a playback event for the live handle
    ///
    /// `Started` is honored once per handle. `Ended` and `Failed` resolve the
    /// handle, so whichever comes first wins and everything after is ignored.
    pub fn accept(&mut self, event: &PlaybackEvent) -> Option<PlaybackOutcome> {
        let id = match event {
            PlaybackEvent::Started { handle }
            | PlaybackEvent::Ended { handle }
            | PlaybackEvent::Failed { handle, .. } => *handle,
        };

        let Some(active) = self.active.as_mut().filter(|h| h.id() == id) else {
            tracing::trace!(handle = id.0, "stale playback event ignored");
            return None;
        };

        match event {
            PlaybackEvent::Started { .. } => {
                if active.started {
                    return None;
                }
                active.started = true;
                Some(PlaybackOutcome::Started)
            }
            PlaybackEvent::Ended { .. } => {
                self.stop_active();
                Some(PlaybackOutcome::Finished)
            }
            PlaybackEvent::Failed { error, .. } => {
                self.stop_active();
                Some(PlaybackOutcome::Failed(error.clone()))
            }
        }
    }

    #[must_use]
    pub fn active_id(&self) -> Option<PlaybackId> {
        self.active.as_ref().map(PlaybackHandle::id)
    }

    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.active.is_some()
    }
}

/// Mono PCM ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode a WAV or MP3 container into mono f32 samples
///
/// # Errors
///
/// Returns [`Error::Decode`] if the payload is empty or not a supported container
pub fn decode_container(payload: &[u8]) -> Result<DecodedAudio> {
    if payload.is_empty() {
        return Err(Error::Decode("empty audio payload".to_string()));
    }

    if payload.starts_with(b"RIFF") {
        decode_wav(payload)
    } else {
        decode_mp3(payload)
    }
}

#[allow(clippy::cast_precision_loss)]
fn decode_wav(payload: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(payload)).map_err(|e| Error::Decode(e.to_string()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Decode(e.to_string()))?
        }
    };

    Ok(DecodedAudio {
        samples: downmix(&interleaved, usize::from(spec.channels)),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes to mono f32 samples
#[allow(clippy::cast_sign_loss)]
fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = frame.sample_rate as u32;
                let frame_samples: Vec<f32> =
                    frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&frame_samples, frame.channels));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(Error::Decode("unsupported audio container".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

#[allow(clippy::cast_precision_loss)]
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Resample audio using rubato
///
/// The last partial chunk is zero-padded so the tail of the reply is kept.
#[allow(clippy::cast_possible_truncation)]
fn resample_audio(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let chunk_size = 1024;
    let sub_chunks = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, chunk_size, sub_chunks, 1)
            .map_err(|e| Error::Playback(format!("resampler init failed: {e}")))?;

    let mut output = Vec::new();

    for chunk in samples.chunks(chunk_size) {
        let mut input: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        input.resize(chunk_size, 0.0);
        let result = resampler
            .process(&[input], None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    Ok(output)
}

/// What one output callback produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fill {
    started: bool,
    ended: bool,
}

/// Read position into a decoded reply, advanced by the output callback
struct ReplyCursor {
    samples: Vec<f32>,
    position: usize,
    started: bool,
    ended: bool,
}

impl ReplyCursor {
    const fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            position: 0,
            started: false,
            ended: false,
        }
    }

    /// Fill one device buffer with mono samples copied to every channel
    ///
    /// The end is reported on the first buffer requested after the last
    /// sample went out, so the final real buffer reaches the device before
    /// the stream is stopped. That buffer and any later ones are silence.
    fn fill(&mut self, data: &mut [f32], channels: usize) -> Fill {
        let started = !self.started;
        self.started = true;

        let drained = self.position >= self.samples.len();
        for frame in data.chunks_mut(channels.max(1)) {
            frame.fill(self.samples.get(self.position).copied().unwrap_or(0.0));
            self.position = (self.position + 1).min(self.samples.len());
        }

        let ended = drained && !self.ended;
        self.ended |= drained;
        Fill { started, ended }
    }
}

/// Plays replies on the default cpal output device
pub struct CpalSpeaker {
    device: Device,
    config: StreamConfig,
}

impl CpalSpeaker {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let config = device
            .default_output_config()
            .map_err(|e| Error::Playback(e.to_string()))?
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate.0,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self { device, config })
    }
}

impl AudioOutput for CpalSpeaker {
    fn start(
        &mut self,
        handle: PlaybackId,
        payload: &[u8],
        events: EventSink,
    ) -> Result<Box<dyn OutputStream>> {
        let decoded = decode_container(payload)?;
        let samples = resample_audio(&decoded.samples, decoded.sample_rate, self.config.sample_rate.0)?;
        let sample_count = samples.len();
        let channels = usize::from(self.config.channels);

        let mut cursor = ReplyCursor::new(samples);
        let resolved = Arc::new(AtomicBool::new(false));
        let resolved_on_error = Arc::clone(&resolved);
        let data_events = events.clone();
        let error_events = events;

        let stream = self
            .device
            .build_output_stream(
                &self.config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let fill = cursor.fill(data, channels);
                    if fill.started {
                        data_events.emit(PlaybackEvent::Started { handle });
                    }
                    if fill.ended && !resolved.swap(true, Ordering::SeqCst) {
                        data_events.emit(PlaybackEvent::Ended { handle });
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio playback error");
                    if !resolved_on_error.swap(true, Ordering::SeqCst) {
                        error_events.emit(PlaybackEvent::Failed {
                            handle,
                            error: err.to_string(),
                        });
                    }
                },
                None,
            )
            .map_err(|e| Error::Playback(e.to_string()))?;

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        tracing::debug!(handle = handle.0, samples = sample_count, "playback stream running");

        Ok(Box::new(CpalOutputStream {
            stream: Some(stream),
        }))
    }
}

struct CpalOutputStream {
    stream: Option<Stream>,
}

impl OutputStream for CpalOutputStream {
    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                tracing::debug!(error = %e, "pausing output stream failed");
            }
            drop(stream);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct LoggedStream {
        id: u64,
        log: Rc<RefCell<Vec<String>>>,
    }

    impl OutputStream for LoggedStream {
        fn stop(&mut self) {
            self.log.borrow_mut().push(format!("stop:{}", self.id));
        }
    }

    struct LoggedOutput {
        log: Rc<RefCell<Vec<String>>>,
    }

    impl AudioOutput for LoggedOutput {
        fn start(
            &mut self,
            handle: PlaybackId,
            payload: &[u8],
            _events: EventSink,
        ) -> Result<Box<dyn OutputStream>> {
            if payload.is_empty() {
                return Err(Error::Decode("empty".to_string()));
            }
            self.log.borrow_mut().push(format!("decode:{}", handle.0));
            Ok(Box::new(LoggedStream {
                id: handle.0,
                log: Rc::clone(&self.log),
            }))
        }
    }

    fn controller() -> (AudioPlaybackController, Rc<RefCell<Vec<String>>>, EventSink) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let output = LoggedOutput {
            log: Rc::clone(&log),
        };
        let (sink, _rx) = EventSink::channel();
        (AudioPlaybackController::new(Box::new(output)), log, sink)
    }

    #[test]
    fn new_play_releases_previous_handle_first() {
        let (mut ctl, log, sink) = controller();
        ctl.play(b"one", &sink).unwrap();
        ctl.play(b"two", &sink).unwrap();

        assert_eq!(*log.borrow(), vec!["decode:1", "stop:1", "decode:2"]);
        assert_eq!(ctl.active_id(), Some(PlaybackId(2)));
    }

    #[test]
    fn end_and_error_are_mutually_exclusive() {
        let (mut ctl, log, sink) = controller();
        let handle = ctl.play(b"one", &sink).unwrap();

        assert_eq!(
            ctl.accept(&PlaybackEvent::Ended { handle }),
            Some(PlaybackOutcome::Finished)
        );
        assert_eq!(
            ctl.accept(&PlaybackEvent::Failed {
                handle,
                error: "late".to_string()
            }),
            None
        );
        assert_eq!(ctl.accept(&PlaybackEvent::Ended { handle }), None);
        assert_eq!(*log.borrow(), vec!["decode:1", "stop:1"]);
    }

    #[test]
    fn started_fires_once() {
        let (mut ctl, _, sink) = controller();
        let handle = ctl.play(b"one", &sink).unwrap();

        assert_eq!(
            ctl.accept(&PlaybackEvent::Started { handle }),
            Some(PlaybackOutcome::Started)
        );
        assert_eq!(ctl.accept(&PlaybackEvent::Started { handle }), None);
        assert!(ctl.is_playing());
    }

    #[test]
    fn stop_active_is_safe_when_idle() {
        let (mut ctl, log, _) = controller();
        ctl.stop_active();
        ctl.stop_active();
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn decode_failure_leaves_nothing_live() {
        let (mut ctl, _, sink) = controller();
        assert!(matches!(ctl.play(b"", &sink), Err(Error::Decode(_))));
        assert!(!ctl.is_playing());
    }

    #[test]
    fn unknown_container_is_a_decode_error() {
        assert!(matches!(
            decode_container(b"definitely not audio"),
            Err(Error::Decode(_))
        ));
        assert!(matches!(decode_container(b""), Err(Error::Decode(_))));
    }

    #[test]
    fn end_waits_for_a_silent_buffer() {
        let mut cursor = ReplyCursor::new(vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);
        let mut data = [1.0_f32; 8];

        let first = cursor.fill(&mut data, 2);
        assert_eq!(first, Fill { started: true, ended: false });
        assert_eq!(data, [0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4]);

        // Last real samples go out in this buffer, so it must not end yet
        let second = cursor.fill(&mut data, 2);
        assert_eq!(second, Fill { started: false, ended: false });
        assert_eq!(&data[..4], &[0.5, 0.5, 0.6, 0.6]);
        assert!(data[4..].iter().all(|s| s.abs() < f32::EPSILON));

        let third = cursor.fill(&mut data, 2);
        assert_eq!(third, Fill { started: false, ended: true });
        assert!(data.iter().all(|s| s.abs() < f32::EPSILON));

        assert!(!cursor.fill(&mut data, 2).ended);
    }

    #[test]
    fn empty_reply_ends_on_first_buffer() {
        let mut cursor = ReplyCursor::new(Vec::new());
        let mut data = [0.5_f32; 4];
        assert_eq!(
            cursor.fill(&mut data, 1),
            Fill { started: true, ended: true }
        );
        assert!(data.iter().all(|s| s.abs() < f32::EPSILON));
    }

    #[test]
    fn resample_keeps_duration() {
        let samples = vec![0.1_f32; 24000];
        let out = resample_audio(&samples, 24000, 48000).unwrap();
        // Padding may add up to one chunk
        assert!(out.len() >= 47000 && out.len() <= 50000);
    }
}
