use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::cache;
use crate::config::Config;
use crate::dataset::table::Table;
use crate::extract::{self, beatmap};

/// What a worker does with a song folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerMode {
    /// Full extraction; the worker returns a table.
    Extract,
    /// Recompute the feature cache only; nothing is returned. Used for the
    /// eager bulk rebuild before dispatch when caches were invalidated.
    WarmCache,
}

static WORKER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Fan per-song work across the pool. One entry per input folder: `Some`
/// for a table in `Extract` mode, `None` for warm-ups and for any song whose
/// worker failed, crashed, or timed out. A lost song never aborts the batch.
///
/// Multiprocessing mode runs each song in a freshly spawned copy of this
/// executable: audio decode and feature extraction are memory-hungry, and an
/// isolated address space bounds peak RSS per song instead of per run. The
/// sequential mode runs the same function in-process for debugging.
pub fn run(song_folders: &[PathBuf], config: &Config, mode: WorkerMode) -> Vec<Option<Table>> {
    if song_folders.is_empty() {
        return Vec::new();
    }

    let pb = ProgressBar::new(song_folders.len() as u64);
    pb.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} songs ({eta}) {msg}",
        )
        .unwrap()
        .progress_chars("#>-"),
    );
    pb.set_message(match mode {
        WorkerMode::Extract => "Extracting...",
        WorkerMode::WarmCache => "Rebuilding caches...",
    });

    let results = if config.use_multiprocessing {
        run_pool(song_folders, config, mode, &pb)
    } else {
        song_folders
            .iter()
            .map(|folder| {
                let result = run_in_process(folder, config, mode);
                pb.inc(1);
                result
            })
            .collect()
    };

    let ok = results.iter().filter(|r| r.is_some()).count();
    match mode {
        WorkerMode::Extract => {
            pb.finish_with_message(format!("{} ok, {} dropped", ok, results.len() - ok));
        }
        WorkerMode::WarmCache => pb.finish_with_message("caches rebuilt"),
    }
    results
}

fn run_pool(
    song_folders: &[PathBuf],
    config: &Config,
    mode: WorkerMode,
    pb: &ProgressBar,
) -> Vec<Option<Table>> {
    let workers = config.resolve_workers();
    log::info!("Dispatching {} songs across {} worker processes", song_folders.len(), workers);

    // ship the effective config to the children once
    let config_path = std::env::temp_dir()
        .join(format!("beatmill_config_{}.json", std::process::id()));
    if let Err(e) = std::fs::write(&config_path, serde_json::to_vec(config).unwrap_or_default()) {
        log::error!("Cannot stage worker config {}: {}", config_path.display(), e);
        return vec![None; song_folders.len()];
    }

    let pool = rayon::ThreadPoolBuilder::new().num_threads(workers).build().unwrap();
    let results = pool.install(|| {
        song_folders
            .par_iter()
            .map(|folder| {
                let result = spawn_worker(folder, &config_path, config.worker_timeout_secs, mode);
                pb.inc(1);
                result
            })
            .collect()
    });

    std::fs::remove_file(&config_path).ok();
    results
}

/// Run one song inside an isolated child process and harvest its table.
fn spawn_worker(
    folder: &Path,
    config_path: &Path,
    timeout_secs: u64,
    mode: WorkerMode,
) -> Option<Table> {
    let exe = match std::env::current_exe() {
        Ok(exe) => exe,
        Err(e) => {
            log::error!("Cannot locate own executable: {e}");
            return None;
        }
    };
    let out_path = std::env::temp_dir().join(format!(
        "beatmill_worker_{}_{}.pkl",
        std::process::id(),
        WORKER_SEQ.fetch_add(1, Ordering::Relaxed)
    ));

    let mut cmd = Command::new(exe);
    cmd.arg("extract-worker")
        .arg("--song")
        .arg(folder)
        .arg("--config-json")
        .arg(config_path)
        .arg("--out")
        .arg(&out_path)
        .stdout(Stdio::null());
    if mode == WorkerMode::WarmCache {
        cmd.arg("--warm-only");
    }

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            log::warn!("Failed to spawn worker for {}: {}", folder.display(), e);
            return None;
        }
    };

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if started.elapsed() > Duration::from_secs(timeout_secs) {
                    log::warn!(
                        "Worker for {} exceeded {}s, killing",
                        folder.display(),
                        timeout_secs
                    );
                    child.kill().ok();
                    child.wait().ok();
                    std::fs::remove_file(&out_path).ok();
                    return None;
                }
                std::thread::sleep(Duration::from_millis(100));
            }
            Err(e) => {
                log::warn!("Lost worker for {}: {}", folder.display(), e);
                std::fs::remove_file(&out_path).ok();
                return None;
            }
        }
    };

    if !status.success() {
        log::warn!("Worker for {} exited with {}, song dropped", folder.display(), status);
        std::fs::remove_file(&out_path).ok();
        return None;
    }
    if mode == WorkerMode::WarmCache {
        return None;
    }

    let table = std::fs::File::open(&out_path)
        .map_err(|e| e.to_string())
        .and_then(|file| {
            serde_pickle::from_reader(std::io::BufReader::new(file), serde_pickle::DeOptions::new())
                .map_err(|e| e.to_string())
        });
    std::fs::remove_file(&out_path).ok();

    match table {
        Ok(table) => Some(table),
        Err(e) => {
            log::warn!("Unreadable worker output for {}: {}", folder.display(), e);
            None
        }
    }
}

/// The same unit of work, in-process. Failure isolation is `Result`-based
/// here; a panic in debugging mode stays loud instead of being swallowed.
fn run_in_process(folder: &Path, config: &Config, mode: WorkerMode) -> Option<Table> {
    match mode {
        WorkerMode::Extract => match extract::process_song_folder(folder, config) {
            Ok(table) => Some(table),
            Err(e) => {
                log::warn!("Extraction failed for {}, song dropped: {}", folder.display(), e);
                None
            }
        },
        WorkerMode::WarmCache => {
            let warmed = beatmap::audio_path(folder)
                .map_err(|e| e.to_string())
                .and_then(|audio| {
                    cache::compute_and_store(&audio, &config.audio).map_err(|e| e.to_string())
                });
            if let Err(e) = warmed {
                log::warn!("Cache rebuild failed for {}: {}", folder.display(), e);
            }
            None
        }
    }
}

/// Entry point for the hidden `extract-worker` subcommand: run one song in
/// this (child) process and leave the result where the coordinator expects it.
pub fn worker_main(
    song: &Path,
    config: &Config,
    out: &Path,
    warm_only: bool,
) -> anyhow::Result<()> {
    if warm_only {
        let audio = beatmap::audio_path(song)?;
        cache::compute_and_store(&audio, &config.audio)?;
        return Ok(());
    }
    let table = extract::process_song_folder(song, config)?;
    let file = std::fs::File::create(out)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_pickle::to_writer(&mut writer, &table, serde_pickle::SerOptions::new())?;
    Ok(())
}
