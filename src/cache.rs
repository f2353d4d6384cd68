use std::path::{Path, PathBuf};

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AudioConfig;
use crate::extract::decode::{self, DecodeError};
use crate::extract::mfcc;
use crate::{CACHE_SUFFIX, CACHE_VERSION};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache serialization error: {0}")]
    Pickle(#[from] serde_pickle::Error),
}

/// Cepstral frames for one song, plus enough signal metadata to time-align
/// events without re-decoding the audio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureFrames {
    pub frames: Array2<f32>,
    pub sample_rate: u32,
    pub num_samples: usize,
}

impl FeatureFrames {
    pub fn duration_secs(&self) -> f64 {
        self.num_samples as f64 / self.sample_rate as f64
    }
}

/// Extraction parameters baked into a cache entry. An entry computed under
/// different parameters has a different frame shape and must not be reused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CacheParams {
    num_cepstral: usize,
    frame_length: f32,
    frame_stride: f32,
    use_temp_derivatives: bool,
}

impl CacheParams {
    fn of(audio: &AudioConfig) -> Self {
        Self {
            num_cepstral: audio.num_cepstral,
            frame_length: audio.frame_length,
            frame_stride: audio.frame_stride,
            use_temp_derivatives: audio.use_temp_derivatives,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    file_size: u64,
    file_modified: u64,
    params: CacheParams,
    features: FeatureFrames,
}

/// Cache file co-located with the audio file: `song.egg` → `song.egg.mfcc.pkl`.
pub fn cache_path(audio_path: &Path) -> PathBuf {
    let name = audio_path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
    audio_path.with_file_name(format!("{name}.{CACHE_SUFFIX}"))
}

/// Load cached frames when the entry is valid, otherwise decode + compute and
/// rewrite the cache. Corrupt, stale, or incompatible entries are treated as
/// misses, never surfaced as errors.
pub fn get_or_compute(audio_path: &Path, audio: &AudioConfig) -> Result<FeatureFrames, CacheError> {
    if let Some(features) = load_valid(audio_path, audio) {
        return Ok(features);
    }
    compute_and_store(audio_path, audio)
}

/// Recompute the cache entry for one audio file unconditionally.
pub fn compute_and_store(
    audio_path: &Path,
    audio: &AudioConfig,
) -> Result<FeatureFrames, CacheError> {
    let signal = decode::decode_audio(audio_path, audio.signal_max_length)?;
    let frames = mfcc::compute_frames(&signal.samples, signal.sample_rate, audio);
    let features = FeatureFrames {
        frames,
        sample_rate: signal.sample_rate,
        num_samples: signal.samples.len(),
    };

    let (file_size, file_modified) = signature(audio_path)?;
    let entry = CacheFile {
        version: CACHE_VERSION,
        file_size,
        file_modified,
        params: CacheParams::of(audio),
        features: features.clone(),
    };

    let path = cache_path(audio_path);
    let write = std::fs::File::create(&path).map_err(CacheError::from).and_then(|file| {
        let mut writer = std::io::BufWriter::new(file);
        serde_pickle::to_writer(&mut writer, &entry, serde_pickle::SerOptions::new())
            .map_err(CacheError::from)
    });
    if let Err(e) = write {
        // a cache that can't be written just means recomputation next run
        log::warn!("Failed to write feature cache {}: {}", path.display(), e);
    }
    Ok(features)
}

/// Remove cache entries for a set of audio files. Returns how many existed.
pub fn remove_caches(audio_paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for audio_path in audio_paths {
        let path = cache_path(audio_path);
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("Failed to remove cache {}: {}", path.display(), e),
        }
    }
    removed
}

fn load_valid(audio_path: &Path, audio: &AudioConfig) -> Option<FeatureFrames> {
    let path = cache_path(audio_path);
    let file = std::fs::File::open(&path).ok()?;
    let entry: CacheFile =
        match serde_pickle::from_reader(std::io::BufReader::new(file), serde_pickle::DeOptions::new())
        {
            Ok(entry) => entry,
            Err(e) => {
                log::debug!("Unreadable feature cache {} ({}), recomputing", path.display(), e);
                return None;
            }
        };

    if entry.version != CACHE_VERSION {
        log::debug!(
            "Feature cache {} has version {}, want {}; recomputing",
            path.display(),
            entry.version,
            CACHE_VERSION
        );
        return None;
    }
    if entry.params != CacheParams::of(audio) {
        log::debug!("Feature cache {} built with other parameters, recomputing", path.display());
        return None;
    }
    let (file_size, file_modified) = signature(audio_path).ok()?;
    if entry.file_size != file_size || entry.file_modified != file_modified {
        log::debug!("Feature cache {} is stale, recomputing", path.display());
        return None;
    }
    Some(entry.features)
}

fn signature(path: &Path) -> std::io::Result<(u64, u64)> {
    let meta = std::fs::metadata(path)?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_default();
    Ok((meta.len(), modified))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn write_test_wav(path: &Path, secs: f32) {
        let sample_rate = 16000;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for i in 0..(sample_rate as f32 * secs) as usize {
            let t = i as f32 / sample_rate as f32;
            let v = (t * 220.0 * 2.0 * std::f32::consts::PI).sin();
            writer.write_sample((v * 16000.0) as i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_compute_writes_cache_and_hits_it() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("song.wav");
        write_test_wav(&audio_path, 0.5);
        let audio = AudioConfig::default();

        let first = get_or_compute(&audio_path, &audio).unwrap();
        assert!(cache_path(&audio_path).exists());

        // plant a marker in the cache to prove the second call reads it
        let (file_size, file_modified) = signature(&audio_path).unwrap();
        let marker = FeatureFrames {
            frames: Array2::from_elem((2, 39), 42.0),
            sample_rate: first.sample_rate,
            num_samples: first.num_samples,
        };
        let entry = CacheFile {
            version: CACHE_VERSION,
            file_size,
            file_modified,
            params: CacheParams::of(&audio),
            features: marker.clone(),
        };
        let mut writer =
            std::io::BufWriter::new(std::fs::File::create(cache_path(&audio_path)).unwrap());
        serde_pickle::to_writer(&mut writer, &entry, serde_pickle::SerOptions::new()).unwrap();
        drop(writer);

        let second = get_or_compute(&audio_path, &audio).unwrap();
        assert_eq!(second, marker);
    }

    #[test]
    fn test_corrupt_cache_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("song.wav");
        write_test_wav(&audio_path, 0.5);
        let audio = AudioConfig::default();

        std::fs::write(cache_path(&audio_path), b"not a pickle").unwrap();
        let features = get_or_compute(&audio_path, &audio).unwrap();
        assert!(features.frames.dim().0 > 0);
        assert_eq!(features.frames.dim().1, mfcc::frame_dim(&audio));
    }

    #[test]
    fn test_parameter_change_invalidates() {
        let dir = tempfile::tempdir().unwrap();
        let audio_path = dir.path().join("song.wav");
        write_test_wav(&audio_path, 0.5);

        let audio = AudioConfig::default();
        let first = get_or_compute(&audio_path, &audio).unwrap();
        assert_eq!(first.frames.dim().1, 39);

        let wider = AudioConfig { num_cepstral: 20, ..AudioConfig::default() };
        let second = get_or_compute(&audio_path, &wider).unwrap();
        assert_eq!(second.frames.dim().1, 60);
    }

    #[test]
    fn test_remove_caches_counts_existing() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.wav");
        let b = dir.path().join("b.wav");
        write_test_wav(&a, 0.2);
        write_test_wav(&b, 0.2);
        let audio = AudioConfig::default();

        get_or_compute(&a, &audio).unwrap();
        get_or_compute(&b, &audio).unwrap();
        assert_eq!(remove_caches(&[a.clone(), b.clone()]), 2);
        assert_eq!(remove_caches(&[a, b]), 0);
    }
}
