pub mod dispatch;
pub mod normalize;
pub mod store;
pub mod table;

use std::path::PathBuf;
use std::time::Instant;

use thiserror::Error;

use crate::config::Config;
use crate::extract::beatmap;
use crate::words::{self, WordModel};
use crate::{cache, dataset::table::Table};
use self::dispatch::WorkerMode;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Table error: {0}")]
    Table(#[from] table::TableError),
    #[error("Normalization error: {0}")]
    Norm(#[from] normalize::NormError),
    #[error("Store error: {0}")]
    Store(#[from] store::StoreError),
    #[error("Word model error: {0}")]
    Words(#[from] crate::words::WordModelError),
    #[error("data_split must be non-decreasing fractions in [0, 1], got {0:?}")]
    BadSplit(Vec<f64>),
}

/// Build one corpus table from a set of song folders.
///
/// Returns `Ok(None)` when no song survives extraction; the caller treats
/// that as "skip this split", not as a failure.
pub fn assemble(song_folders: &[PathBuf], config: &Config) -> Result<Option<Table>, DatasetError> {
    log::info!("Creating dataset from {} song folders", song_folders.len());

    // Bulk cache rebuild happens entirely before extraction dispatch: the
    // rebuild rewrites the same files extraction reads, so the two phases
    // must not interleave.
    if !config.audio.use_cache {
        let audio_paths: Vec<PathBuf> = song_folders
            .iter()
            .filter_map(|folder| match beatmap::audio_path(folder) {
                Ok(path) => Some(path),
                Err(e) => {
                    log::debug!("No audio path for {}: {}", folder.display(), e);
                    None
                }
            })
            .collect();
        let removed = cache::remove_caches(&audio_paths);
        log::info!("Invalidated {removed} feature caches, rebuilding");
        dispatch::run(song_folders, config, WorkerMode::WarmCache);
    }

    let results = dispatch::run(song_folders, config, WorkerMode::Extract);
    let tables: Vec<Table> = results.into_iter().flatten().collect();
    if tables.is_empty() {
        log::warn!("Dataset creation collected 0 songs. Check if searching in correct folders.");
        return Ok(None);
    }

    let mut df = Table::concat(tables)?;

    let model_path = config.dataset.resolve_word_model();
    let model = WordModel::load(&model_path)?;
    if model.is_none() {
        log::warn!(
            "Could not find action word model [{}], word_vec and word_id degrade to zeros.",
            model_path.display()
        );
    }
    words::attach_word_columns(&mut df, model.as_ref())?;

    let mut lag_sources = config.dataset.beat_elements.clone();
    lag_sources.extend(config.dataset.beat_actions.iter().cloned());
    df.add_lag_columns(&lag_sources)?;

    let df = df.snippets(
        config.dataset.snippet_window_length,
        config.dataset.snippet_window_skip,
    )?;
    df.check_consistency()?;
    Ok(Some(df))
}

/// Index range of one split over a corpus of `total` songs.
/// Fraction boundaries truncate, matching `songs[int(total*from):int(total*to)]`.
pub fn split_range(total: usize, from: f64, to: f64) -> (usize, usize) {
    ((total as f64 * from) as usize, (total as f64 * to) as usize)
}

/// Build, normalize, and persist all three splits.
///
/// Normalization statistics are fit on the train split alone, persisted, and
/// re-loaded for every transform: val/test never contribute to the fit, and
/// each split is transformed exactly once, right before it is written.
pub fn generate_datasets(song_folders: &[PathBuf], config: &Config) -> Result<(), DatasetError> {
    let split = &config.training.data_split;
    if split.len() < 2
        || split.windows(2).any(|w| w[0] > w[1])
        || split.iter().any(|f| !(0.0..=1.0).contains(f))
    {
        return Err(DatasetError::BadSplit(split.clone()));
    }

    let storage = config.dataset.resolve_storage();
    let total = song_folders.len();

    for (phase, bounds) in store::PHASES.iter().zip(split.windows(2)) {
        let started = Instant::now();
        let (from, to) = split_range(total, bounds[0], bounds[1]);
        log::info!("Processing {phase}: songs {from}..{to} of {total}");

        let Some(mut df) = assemble(&song_folders[from..to], config)? else {
            log::warn!("Skipped {phase} dataset. No songs.");
            continue;
        };

        if *phase == "train" {
            let stats = normalize::fit(&mut df, &config.dataset.cols_to_normalize);
            normalize::save(&stats, &storage)?;
        }
        // always transform with the persisted artifact, the single source of truth
        let stats = normalize::load(&storage)?;
        normalize::transform(&mut df, &stats);

        store::write(&df, &storage, phase)?;
        log::info!(
            "{phase}: {} snippet rows in {} groups, written in {:.1}s",
            df.num_rows(),
            df.num_groups(),
            started.elapsed().as_secs_f64()
        );
    }
    Ok(())
}
