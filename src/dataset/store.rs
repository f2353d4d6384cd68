use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::dataset::table::Table;

/// Split names, in generation order. Train must come first: its pass fits
/// the normalization stats the later splits are transformed with.
pub const PHASES: &[&str] = &["train", "val", "test"];

#[derive(Error, Debug)]
pub enum StoreError {
    #[error(
        "Dataset not found: {0}. Check the configured storage folder, or run `beatmill generate`."
    )]
    NotGenerated(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Table serialization error: {0}")]
    Pickle(#[from] serde_pickle::Error),
}

pub fn split_path(storage_folder: &Path, phase: &str) -> PathBuf {
    storage_folder.join(format!("{phase}_beatmaps.pkl"))
}

/// Persist one split table.
pub fn write(table: &Table, storage_folder: &Path, phase: &str) -> Result<(), StoreError> {
    std::fs::create_dir_all(storage_folder)?;
    let file = std::fs::File::create(split_path(storage_folder, phase))?;
    let mut writer = std::io::BufWriter::new(file);
    serde_pickle::to_writer(&mut writer, table, serde_pickle::SerOptions::new())?;
    Ok(())
}

/// Read one split table back. A missing file is reported as `NotGenerated`,
/// distinct from transport or format failures.
pub fn read(storage_folder: &Path, phase: &str) -> Result<Table, StoreError> {
    let path = split_path(storage_folder, phase);
    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotGenerated(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let table =
        serde_pickle::from_reader(std::io::BufReader::new(file), serde_pickle::DeOptions::new())?;
    Ok(table)
}

/// Read all three splits, the contract the external training loop consumes.
pub fn load_datasets(storage_folder: &Path) -> Result<(Table, Table, Table), StoreError> {
    Ok((
        read(storage_folder, "train")?,
        read(storage_folder, "val")?,
        read(storage_folder, "test")?,
    ))
}
