use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CODEC_TYPE_NULL, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("No audio track in {0}")]
    NoAudioTrack(String),
    #[error("Sample rate missing in {0}")]
    NoSampleRate(String),
    #[error("Signal too long: {got} samples exceeds limit {limit}")]
    TooLong { got: usize, limit: usize },
    #[error("Decode error: {0}")]
    Codec(#[from] SymphoniaError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoded mono signal.
pub struct Signal {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Decode an audio file to mono f32 samples. Multi-channel input is averaged.
///
/// Signals longer than `max_samples` are rejected, not truncated; truncation
/// would leave tail events aliased onto the last surviving frame. The decode
/// aborts as soon as the limit is crossed, before the full file materializes.
pub fn decode_audio(path: &Path, max_samples: usize) -> Result<Signal, DecodeError> {
    let file = std::fs::File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::NoAudioTrack(path.display().to_string()))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| DecodeError::NoSampleRate(path.display().to_string()))?;

    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);

        let buf = sample_buf
            .get_or_insert_with(|| SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        buf.copy_interleaved_ref(decoded);

        for frame in buf.samples().chunks_exact(channels) {
            samples.push(frame.iter().sum::<f32>() / channels as f32);
        }
        if samples.len() > max_samples {
            return Err(DecodeError::TooLong { got: samples.len(), limit: max_samples });
        }
    }

    Ok(Signal { samples, sample_rate })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, num_samples: usize, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..num_samples {
            let t = i as f32 / sample_rate as f32;
            let v = (t * 440.0 * 2.0 * std::f32::consts::PI).sin();
            let s = (v * i16::MAX as f32 * 0.5) as i16;
            writer.write_sample(s).unwrap(); // L
            writer.write_sample(s).unwrap(); // R
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_decode_wav_to_mono() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_test_wav(&path, 4410, 44100);

        let signal = decode_audio(&path, usize::MAX).unwrap();
        assert_eq!(signal.sample_rate, 44100);
        assert_eq!(signal.samples.len(), 4410);
        assert!(signal.samples.iter().all(|s| s.is_finite()));
        assert!(signal.samples.iter().any(|s| s.abs() > 0.1));
    }

    #[test]
    fn test_oversized_signal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        write_test_wav(&path, 4410, 44100);

        match decode_audio(&path, 1000) {
            Err(DecodeError::TooLong { limit, .. }) => assert_eq!(limit, 1000),
            other => panic!("expected TooLong, got {:?}", other.map(|s| s.samples.len())),
        }
    }

    #[test]
    fn test_garbage_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("song.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();
        assert!(decode_audio(&path, usize::MAX).is_err());
    }
}
