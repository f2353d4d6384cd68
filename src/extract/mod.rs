pub mod beatmap;
pub mod decode;
pub mod mfcc;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cache::{self, CacheError, FeatureFrames};
use crate::config::Config;
use crate::dataset::table::{Column, Table};
use self::beatmap::{BeatEvent, BeatmapError};

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Beatmap error: {0}")]
    Beatmap(#[from] BeatmapError),
    #[error("Feature error: {0}")]
    Cache(#[from] CacheError),
    #[error("Audio produced no analysis frames: {0}")]
    EmptyAudio(PathBuf),
    #[error("No usable difficulties in {0}")]
    NoDifficulties(PathBuf),
    #[error("Table error: {0}")]
    Table(#[from] crate::dataset::table::TableError),
}

/// Extract one song folder into a table with one `(name, difficulty)` group
/// per recognized difficulty.
///
/// Any failure fails the whole song: the dispatcher drops it from the corpus
/// rather than keeping partial rows. This function is the unit of work that
/// worker processes execute in isolation.
pub fn process_song_folder(folder: &Path, config: &Config) -> Result<Table, ExtractError> {
    let info = beatmap::load_song_info(folder)?;
    let audio_path = folder.join(&info.audio_filename);
    let features = cache::get_or_compute(&audio_path, &config.audio)?;
    if features.frames.dim().0 == 0 {
        return Err(ExtractError::EmptyAudio(audio_path));
    }

    let mut table = Table::new();
    for (label, filename) in &info.beatmaps {
        let Some(difficulty_id) = config.dataset.difficulty_id(label) else {
            log::debug!("Skipping unrecognized difficulty {label} in {}", folder.display());
            continue;
        };
        let events = beatmap::load_events(&folder.join(filename), info.bpm)?;
        if events.is_empty() {
            log::debug!("Difficulty {label} of {} has no notes", folder.display());
            continue;
        }
        let columns = difficulty_columns(&events, &features, difficulty_id, config);
        table.push_group(&info.name, label, columns)?;
    }

    if table.num_groups() == 0 {
        return Err(ExtractError::NoDifficulties(folder.to_path_buf()));
    }
    Ok(table)
}

/// Join one difficulty's event sequence with the song's feature frames.
fn difficulty_columns(
    events: &[BeatEvent],
    features: &FeatureFrames,
    difficulty_id: i64,
    config: &Config,
) -> BTreeMap<String, Column> {
    let n = events.len();
    let duration = features.duration_secs();
    let n_frames = features.frames.dim().0;
    let stride = config.audio.frame_stride as f64;
    let shift = config.audio.time_shift as f64;

    let mut time = Vec::with_capacity(n);
    let mut mfcc_col = Vec::with_capacity(n);
    let mut prev = Vec::with_capacity(n);
    let mut next = Vec::with_capacity(n);
    let mut part = Vec::with_capacity(n);
    let mut word = Vec::with_capacity(n);
    let mut l_layer = Vec::with_capacity(n);
    let mut l_index = Vec::with_capacity(n);
    let mut l_cut = Vec::with_capacity(n);
    let mut r_layer = Vec::with_capacity(n);
    let mut r_index = Vec::with_capacity(n);
    let mut r_cut = Vec::with_capacity(n);

    for (i, event) in events.iter().enumerate() {
        let t = event.time;
        time.push(t as f32);

        // nearest frame at the (negatively) shifted timestamp
        let frame = ((t + shift) / stride).round().max(0.0) as usize;
        let frame = frame.min(n_frames - 1);
        mfcc_col.push(features.frames.row(frame).to_vec());

        prev.push(if i == 0 { t as f32 } else { (t - events[i - 1].time) as f32 });
        next.push(if i + 1 == n {
            (duration - t).max(0.0) as f32
        } else {
            (events[i + 1].time - t) as f32
        });
        part.push(if duration > 0.0 { (t / duration) as f32 } else { 0.0 });
        word.push(event.word.clone());

        let (ll, li, lc) = event
            .left
            .map_or((0, 0, 0), |h| (h.line_layer, h.line_index, h.cut_direction));
        let (rl, ri, rc) = event
            .right
            .map_or((0, 0, 0), |h| (h.line_layer, h.line_index, h.cut_direction));
        l_layer.push(ll);
        l_index.push(li);
        l_cut.push(lc);
        r_layer.push(rl);
        r_index.push(ri);
        r_cut.push(rc);
    }

    let mut columns = BTreeMap::new();
    columns.insert("time".to_string(), Column::Float(time));
    columns.insert("mfcc".to_string(), Column::FloatVec(mfcc_col));
    columns.insert("prev".to_string(), Column::Float(prev));
    columns.insert("next".to_string(), Column::Float(next));
    columns.insert("part".to_string(), Column::Float(part));
    columns.insert("word".to_string(), Column::Str(word));
    columns.insert("l_line_layer".to_string(), Column::Int(l_layer));
    columns.insert("l_line_index".to_string(), Column::Int(l_index));
    columns.insert("l_cut_direction".to_string(), Column::Int(l_cut));
    columns.insert("r_line_layer".to_string(), Column::Int(r_layer));
    columns.insert("r_line_index".to_string(), Column::Int(r_index));
    columns.insert("r_cut_direction".to_string(), Column::Int(r_cut));
    columns.insert("difficulty".to_string(), Column::Int(vec![difficulty_id; n]));
    columns
}


#[cfg(test)]
mod tests {
    use super::*;
    use testutil::write_song_folder;

    #[test]
    fn test_process_song_folder_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("song_a");
        write_song_folder(&folder, "Song A", &["Hard", "Expert"]);

        let config = Config::default();
        let table = process_song_folder(&folder, &config).unwrap();

        assert_eq!(table.num_groups(), 2);
        assert_eq!(table.groups()[0].difficulty, "Hard");
        assert_eq!(table.groups()[1].difficulty, "Expert");
        assert_eq!(table.num_rows(), 14);
        table.check_consistency().unwrap();

        let Some(Column::FloatVec(mfcc_col)) = table.column("mfcc") else {
            panic!("mfcc column missing")
        };
        assert_eq!(mfcc_col[0].len(), 13 * 3);

        let Some(Column::Int(difficulty)) = table.column("difficulty") else {
            panic!("difficulty column missing")
        };
        assert_eq!(difficulty[0], config.dataset.difficulty_id("Hard").unwrap());
        assert_eq!(difficulty[13], config.dataset.difficulty_id("Expert").unwrap());

        // prev/next/part are finite and part stays in [0, 1]
        let Some(Column::Float(part)) = table.column("part") else { panic!() };
        assert!(part.iter().all(|&p| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn test_events_sorted_and_lagged_columns_absent_before_postprocessing() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("song_b");
        write_song_folder(&folder, "Song B", &["Expert"]);

        let table = process_song_folder(&folder, &Config::default()).unwrap();
        let Some(Column::Float(time)) = table.column("time") else { panic!() };
        assert!(time.windows(2).all(|w| w[0] <= w[1]));
        assert!(table.column("prev_word_id").is_none());
    }

    #[test]
    fn test_unrecognized_difficulties_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("song_c");
        write_song_folder(&folder, "Song C", &["Hard", "ExpertPlusPlus"]);

        let table = process_song_folder(&folder, &Config::default()).unwrap();
        assert_eq!(table.num_groups(), 1);
        assert_eq!(table.groups()[0].difficulty, "Hard");
    }

    #[test]
    fn test_only_unrecognized_difficulties_fails_song() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("song_d");
        write_song_folder(&folder, "Song D", &["Zen"]);

        assert!(matches!(
            process_song_folder(&folder, &Config::default()),
            Err(ExtractError::NoDifficulties(_))
        ));
    }

    #[test]
    fn test_corrupt_notes_file_fails_song() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("song_e");
        write_song_folder(&folder, "Song E", &["Hard"]);
        std::fs::write(folder.join("Hard.dat"), b"{ not json").unwrap();

        assert!(matches!(
            process_song_folder(&folder, &Config::default()),
            Err(ExtractError::Beatmap(_))
        ));
    }

    #[test]
    fn test_oversized_audio_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("song_f");
        write_song_folder(&folder, "Song F", &["Hard"]);

        let mut config = Config::default();
        config.audio.signal_max_length = 1000;
        assert!(matches!(
            process_song_folder(&folder, &config),
            Err(ExtractError::Cache(CacheError::Decode(decode::DecodeError::TooLong { .. })))
        ));
    }
}
