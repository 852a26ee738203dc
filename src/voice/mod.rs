//! Voice I/O
//!
//! Microphone capture into clips and playback of spoken replies. Each
//! controller sits on a small platform trait so the cpal adapters can be
//! swapped for fakes.

mod capture;
mod playback;
mod wav;

pub use capture::{
    AudioCaptureController, CaptureEvent, CaptureId, CaptureParams, CaptureSession, CapturedClip,
    CpalMicrophone, InputStream, Microphone, SAMPLE_RATE, interleaved_to_pcm16,
};
pub use playback::{
    AudioOutput, AudioPlaybackController, CpalSpeaker, DecodedAudio, OutputStream, PlaybackEvent,
    PlaybackHandle, PlaybackId, PlaybackOutcome, decode_container,
};
pub use wav::{pcm16_to_wav, samples_to_wav};
