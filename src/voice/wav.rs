//! WAV container helpers

use crate::voice::CaptureParams;
use crate::{Error, Result};

/// Convert f32 samples to mono 16-bit WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    write_wav(spec, samples.iter().map(|&s| f32_to_i16(s)))
}

/// Wrap little-endian 16-bit PCM in a RIFF/WAVE header
///
/// A trailing odd byte is dropped.
///
/// # Errors
///
/// Returns [`Error::Encode`] for a zero channel count or sample rate, or if WAV encoding fails
pub fn pcm16_to_wav(pcm: &[u8], format: CaptureParams) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: format.channels,
        sample_rate: format.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    write_wav(
        spec,
        pcm.chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
    )
}

fn write_wav(spec: hound::WavSpec, samples: impl Iterator<Item = i16>) -> Result<Vec<u8>> {
    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(Error::Encode(format!(
            "invalid format: {} Hz, {} channels",
            spec.sample_rate, spec.channels
        )));
    }

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Encode(e.to_string()))?;

        for sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Encode(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Encode(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

/// Convert an f32 sample in [-1.0, 1.0] to i16
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}
