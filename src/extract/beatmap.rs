use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::SONG_MARKERS;

#[derive(Error, Debug)]
pub enum BeatmapError {
    #[error("No info.dat/info.json marker in {0}")]
    MissingMarker(PathBuf),
    #[error("Unrecognized info layout in {0}")]
    UnknownLayout(PathBuf),
    #[error("Beats-per-minute missing or not positive in {0}")]
    BadBpm(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Song metadata pulled from the marker file.
#[derive(Debug, Clone)]
pub struct SongInfo {
    pub name: String,
    pub audio_filename: String,
    pub bpm: f64,
    /// (difficulty label, beatmap filename) pairs, in file order.
    pub beatmaps: Vec<(String, String)>,
}

/// One hand's part of a beat event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandNote {
    pub line_layer: i64,
    pub line_index: i64,
    pub cut_direction: i64,
}

/// One scored action: all notes sharing a timestamp, split by hand.
#[derive(Debug, Clone, PartialEq)]
pub struct BeatEvent {
    /// Seconds from song start.
    pub time: f64,
    pub left: Option<HandNote>,
    pub right: Option<HandNote>,
    /// Categorical token for the combined gesture, e.g. "L102_R320".
    pub word: String,
}

// Current marker layout (`info.dat`).
#[derive(Deserialize)]
struct InfoNew {
    #[serde(rename = "_songName")]
    song_name: String,
    #[serde(rename = "_beatsPerMinute")]
    beats_per_minute: f64,
    #[serde(rename = "_songFilename")]
    song_filename: String,
    #[serde(rename = "_difficultyBeatmapSets", default)]
    beatmap_sets: Vec<InfoNewSet>,
}

#[derive(Deserialize)]
struct InfoNewSet {
    #[serde(rename = "_difficultyBeatmaps", default)]
    beatmaps: Vec<InfoNewBeatmap>,
}

#[derive(Deserialize)]
struct InfoNewBeatmap {
    #[serde(rename = "_difficulty")]
    difficulty: String,
    #[serde(rename = "_beatmapFilename")]
    filename: String,
}

// Legacy marker layout (`info.json`).
#[derive(Deserialize)]
struct InfoOld {
    #[serde(rename = "songName")]
    song_name: String,
    #[serde(rename = "beatsPerMinute")]
    beats_per_minute: f64,
    #[serde(rename = "difficultyLevels", default)]
    difficulty_levels: Vec<InfoOldLevel>,
}

#[derive(Deserialize)]
struct InfoOldLevel {
    difficulty: String,
    #[serde(rename = "jsonPath")]
    json_path: String,
    #[serde(rename = "audioPath")]
    audio_path: Option<String>,
}

#[derive(Deserialize)]
struct BeatmapFile {
    #[serde(rename = "_notes", default)]
    notes: Vec<RawNote>,
}

#[derive(Deserialize)]
struct RawNote {
    #[serde(rename = "_time")]
    time: f64,
    #[serde(rename = "_lineIndex")]
    line_index: i64,
    #[serde(rename = "_lineLayer")]
    line_layer: i64,
    /// 0 = left hand, 1 = right hand, 3 = bomb.
    #[serde(rename = "_type")]
    note_type: i64,
    #[serde(rename = "_cutDirection")]
    cut_direction: i64,
}

/// Locate the marker file inside a song folder, case-insensitively.
pub fn marker_path(folder: &Path) -> Result<PathBuf, BeatmapError> {
    for entry in std::fs::read_dir(folder)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if SONG_MARKERS.contains(&name.as_str()) {
            return Ok(entry.path());
        }
    }
    Err(BeatmapError::MissingMarker(folder.to_path_buf()))
}

/// Parse the marker file, accepting both the current `info.dat` layout and
/// the legacy `info.json` one.
pub fn load_song_info(folder: &Path) -> Result<SongInfo, BeatmapError> {
    let marker = marker_path(folder)?;
    let contents = std::fs::read_to_string(&marker)?;

    if let Ok(info) = serde_json::from_str::<InfoNew>(&contents) {
        if info.beats_per_minute <= 0.0 {
            return Err(BeatmapError::BadBpm(marker));
        }
        let beatmaps = info
            .beatmap_sets
            .into_iter()
            .flat_map(|set| set.beatmaps)
            .map(|b| (b.difficulty, b.filename))
            .collect();
        return Ok(SongInfo {
            name: info.song_name,
            audio_filename: info.song_filename,
            bpm: info.beats_per_minute,
            beatmaps,
        });
    }

    if let Ok(info) = serde_json::from_str::<InfoOld>(&contents) {
        if info.beats_per_minute <= 0.0 {
            return Err(BeatmapError::BadBpm(marker));
        }
        let audio = info
            .difficulty_levels
            .iter()
            .find_map(|l| l.audio_path.clone())
            .unwrap_or_else(|| "song.ogg".to_string());
        let beatmaps = info
            .difficulty_levels
            .into_iter()
            .map(|l| (l.difficulty, l.json_path))
            .collect();
        return Ok(SongInfo {
            name: info.song_name,
            audio_filename: audio,
            bpm: info.beats_per_minute,
            beatmaps,
        });
    }

    Err(BeatmapError::UnknownLayout(marker))
}

/// Audio file backing a song folder. Used by the cache layer to key and
/// invalidate entries without running full extraction.
pub fn audio_path(folder: &Path) -> Result<PathBuf, BeatmapError> {
    let info = load_song_info(folder)?;
    Ok(folder.join(info.audio_filename))
}

/// Parse one difficulty's beatmap file into a strictly time-ordered event
/// sequence. Notes sharing a timestamp fold into one event: first left-hand
/// and first right-hand note win; bombs and anything else are ignored.
pub fn load_events(path: &Path, bpm: f64) -> Result<Vec<BeatEvent>, BeatmapError> {
    let contents = std::fs::read_to_string(path)?;
    let file: BeatmapFile = serde_json::from_str(&contents)?;

    let mut notes = file.notes;
    notes.retain(|n| n.note_type == 0 || n.note_type == 1);
    notes.sort_by(|a, b| a.time.partial_cmp(&b.time).unwrap_or(std::cmp::Ordering::Equal));

    let seconds_per_beat = 60.0 / bpm;
    let mut events: Vec<BeatEvent> = Vec::new();
    for note in &notes {
        let hand = HandNote {
            line_layer: note.line_layer,
            line_index: note.line_index,
            cut_direction: note.cut_direction,
        };
        let same_beat = events
            .last()
            .is_some_and(|e| (e.time - note.time * seconds_per_beat).abs() < 1e-9);
        if !same_beat {
            events.push(BeatEvent {
                time: note.time * seconds_per_beat,
                left: None,
                right: None,
                word: String::new(),
            });
        }
        let event = events.last_mut().unwrap();
        match note.note_type {
            0 if event.left.is_none() => event.left = Some(hand),
            1 if event.right.is_none() => event.right = Some(hand),
            _ => {}
        }
    }

    for event in &mut events {
        event.word = action_word(event.left.as_ref(), event.right.as_ref());
    }
    Ok(events)
}

/// Categorical token for a combined gesture: per-hand `<layer><index><cut>`
/// triplets prefixed L/R, joined with `_`. A missing hand contributes nothing.
fn action_word(left: Option<&HandNote>, right: Option<&HandNote>) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(2);
    if let Some(l) = left {
        parts.push(format!("L{}{}{}", l.line_layer, l.line_index, l.cut_direction));
    }
    if let Some(r) = right {
        parts.push(format!("R{}{}{}", r.line_layer, r.line_index, r.cut_direction));
    }
    parts.join("_")
}
