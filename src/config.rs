use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Fallback worker-pool size when the config gives 0. Not derived from the
/// core count; extraction workers are memory-bound, not CPU-bound.
const DEFAULT_WORKERS: usize = 10;

/// Pipeline configuration loaded from an optional TOML file.
/// Built once in `main` and passed by reference into every component;
/// no component reads ambient state. Serializable so the coordinator can
/// hand the exact effective config to extraction worker processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub dataset: DatasetConfig,
    pub training: TrainingConfig,
    /// Run extraction in isolated child processes. Turn off to debug
    /// extraction in-process, single-threaded.
    pub use_multiprocessing: bool,
    /// Worker pool size. 0 = default (10).
    pub workers: usize,
    /// Per-song watchdog: a worker past this is killed and its song dropped.
    pub worker_timeout_secs: u64,
}

/// Audio feature extraction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Cepstral coefficients per frame.
    pub num_cepstral: usize,
    /// Analysis window length in seconds.
    pub frame_length: f32,
    /// Hop between analysis windows in seconds.
    pub frame_stride: f32,
    /// Shift applied to event timestamps before frame lookup, in seconds.
    /// Non-positive: compensates the perceptual lag between audio onset
    /// and the labeled action.
    pub time_shift: f32,
    /// Append first and second temporal derivatives to each frame.
    pub use_temp_derivatives: bool,
    /// Reuse per-song feature caches. When false, all caches for the
    /// current song set are rebuilt up front before extraction dispatch.
    pub use_cache: bool,
    /// Decoded signals longer than this many samples are rejected.
    pub signal_max_length: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            num_cepstral: 13,
            frame_length: 0.025,
            frame_stride: 0.010,
            time_shift: -0.4,
            use_temp_derivatives: true,
            use_cache: true,
            signal_max_length: 25_000_000,
        }
    }
}

/// Corpus layout and table shaping parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Root folder scanned for song folders.
    pub songs_folder: PathBuf,
    /// Where split tables and normalization stats land (XDG default if unset).
    pub storage_folder: Option<PathBuf>,
    /// Action-word embedding model (JSON word → vector). Optional; absence
    /// degrades the word columns to zeros with a warning.
    pub word_model_path: Option<PathBuf>,
    /// Columns whose per-dimension mean/std are fit on train and applied
    /// to every split.
    pub cols_to_normalize: Vec<String>,
    /// Recognized difficulty labels, in id order.
    pub difficulties: Vec<String>,
    /// Rows per training snippet.
    pub snippet_window_length: usize,
    /// Rows advanced between snippet starts.
    pub snippet_window_skip: usize,
    /// Per-hand event columns that get `prev_` lag counterparts.
    pub beat_elements: Vec<String>,
    /// Action columns that get `prev_` lag counterparts.
    pub beat_actions: Vec<String>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            songs_folder: PathBuf::from("data/dataset"),
            storage_folder: None,
            word_model_path: None,
            cols_to_normalize: vec_of(&["mfcc", "prev", "next", "part"]),
            difficulties: vec_of(&["Easy", "Normal", "Hard", "Expert", "ExpertPlus"]),
            snippet_window_length: 50,
            snippet_window_skip: 25,
            beat_elements: vec_of(&[
                "l_line_layer",
                "l_line_index",
                "l_cut_direction",
                "r_line_layer",
                "r_line_index",
                "r_cut_direction",
            ]),
            beat_actions: vec_of(&["word_vec", "word_id"]),
        }
    }
}

impl DatasetConfig {
    /// Integer id for a difficulty label; None for labels outside the
    /// configured list (those difficulties are skipped during extraction).
    pub fn difficulty_id(&self, label: &str) -> Option<i64> {
        self.difficulties.iter().position(|d| d == label).map(|i| i as i64)
    }

    /// Resolve the storage folder: config value or XDG data directory.
    pub fn resolve_storage(&self) -> PathBuf {
        if let Some(ref folder) = self.storage_folder {
            return folder.clone();
        }
        if let Some(dirs) = ProjectDirs::from("", "", crate::APP_NAME) {
            dirs.data_dir().join("generated_dataset")
        } else {
            PathBuf::from("generated_dataset")
        }
    }

    /// Resolve the word model path: config value or `<storage>/fasttext.json`.
    pub fn resolve_word_model(&self) -> PathBuf {
        self.word_model_path
            .clone()
            .unwrap_or_else(|| self.resolve_storage().join("fasttext.json"))
    }
}

/// Split boundaries consumed by dataset generation. The training loop itself
/// lives outside this crate; only the split geometry is needed here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Four fraction boundaries over the ordered song list:
    /// train = [0], [1]), val = [1], [2]), test = [2], [3]).
    pub data_split: Vec<f64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_split: vec![0.0, 0.8, 0.9, 0.99],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            dataset: DatasetConfig::default(),
            training: TrainingConfig::default(),
            use_multiprocessing: true,
            workers: 0,
            worker_timeout_secs: 600,
        }
    }
}

impl Config {
    /// Load config from an explicit path, or `./beatmill.toml` if present.
    /// Returns defaults if no file exists; logs a warning if a file exists
    /// but can't be parsed.
    pub fn load(path: Option<&Path>) -> Self {
        let candidate = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("beatmill.toml"));
        if !candidate.exists() {
            if path.is_some() {
                log::warn!("Config file {} not found. Using defaults.", candidate.display());
            } else {
                log::debug!("No config file found, using defaults");
            }
            return Self::default();
        }
        match std::fs::read_to_string(&candidate) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    log::info!("Loaded config from {}", candidate.display());
                    config
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}. Using defaults.", candidate.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}. Using defaults.", candidate.display(), e);
                Self::default()
            }
        }
    }

    /// Resolve worker count: 0 → default pool size.
    pub fn resolve_workers(&self) -> usize {
        if self.workers > 0 { self.workers } else { DEFAULT_WORKERS }
    }
}

fn vec_of(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.audio.num_cepstral, 13);
        assert!(config.audio.use_cache);
        assert_eq!(config.dataset.snippet_window_length, 50);
        assert_eq!(config.dataset.snippet_window_skip, 25);
        assert_eq!(config.training.data_split, vec![0.0, 0.8, 0.9, 0.99]);
        assert_eq!(config.resolve_workers(), DEFAULT_WORKERS);
    }

    #[test]
    fn test_difficulty_ids() {
        let dataset = DatasetConfig::default();
        assert_eq!(dataset.difficulty_id("Easy"), Some(0));
        assert_eq!(dataset.difficulty_id("ExpertPlus"), Some(4));
        assert_eq!(dataset.difficulty_id("ExpertPlusPlus"), None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let parsed: Config = toml::from_str(
            "use_multiprocessing = false\n\
             [audio]\n\
             num_cepstral = 20\n",
        )
        .unwrap();
        assert!(!parsed.use_multiprocessing);
        assert_eq!(parsed.audio.num_cepstral, 20);
        // untouched sections fall back to defaults
        assert_eq!(parsed.audio.frame_stride, 0.010);
        assert_eq!(parsed.dataset.cols_to_normalize.len(), 4);
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        // the dispatcher ships the effective config to worker processes as JSON
        let config = Config::default();
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: Config = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.audio.num_cepstral, config.audio.num_cepstral);
        assert_eq!(decoded.training.data_split, config.training.data_split);
    }
}
