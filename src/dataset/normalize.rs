use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dataset::table::{Column, Table};

/// Keeps constant columns (std = 0) from dividing by zero.
pub const EPSILON: f32 = 1e-6;

/// Normalization stats artifact, one file next to the split tables.
pub const STATS_FILE: &str = "col_stats.pkl";

#[derive(Error, Debug)]
pub enum NormError {
    #[error(
        "Normalization stats not found at {0}: generate the train split before normalizing"
    )]
    Missing(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Stats serialization error: {0}")]
    Pickle(#[from] serde_pickle::Error),
}

/// Per-dimension mean and population standard deviation of one column.
/// Scalar columns carry length-1 vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnStats {
    pub mean: Vec<f32>,
    pub std: Vec<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormStats(pub BTreeMap<String, ColumnStats>);

/// Fit mean/std for the listed columns over all rows of `table`.
///
/// Non-finite values are coerced to 0 **in place** first; the coerced table
/// is what subsequently gets transformed and stored. Only the training split
/// may ever be fit.
pub fn fit(table: &mut Table, columns: &[String]) -> NormStats {
    let mut stats = BTreeMap::new();
    for name in columns {
        match table.column_mut(name) {
            Some(Column::Float(values)) => {
                for v in values.iter_mut() {
                    if !v.is_finite() {
                        *v = 0.0;
                    }
                }
                let (mean, std) = scalar_stats(values);
                stats.insert(name.clone(), ColumnStats { mean: vec![mean], std: vec![std] });
            }
            Some(Column::FloatVec(rows)) => {
                for row in rows.iter_mut() {
                    for v in row.iter_mut() {
                        if !v.is_finite() {
                            *v = 0.0;
                        }
                    }
                }
                let (mean, std) = vector_stats(rows);
                stats.insert(name.clone(), ColumnStats { mean, std });
            }
            Some(_) => log::debug!("Column {name} is not numeric, not normalizing"),
            None => log::debug!("Column {name} not present, not normalizing"),
        }
    }
    NormStats(stats)
}

/// Apply `(x - mean) / (std + ε)` to every column present in both the table
/// and the stats. Columns the stats don't know stay untouched.
pub fn transform(table: &mut Table, stats: &NormStats) {
    for (name, stat) in &stats.0 {
        match table.column_mut(name) {
            Some(Column::Float(values)) => {
                let (mean, std) = (stat.mean[0], stat.std[0]);
                for v in values.iter_mut() {
                    *v = (*v - mean) / (std + EPSILON);
                }
            }
            Some(Column::FloatVec(rows)) => {
                for row in rows.iter_mut() {
                    if row.len() != stat.mean.len() {
                        log::warn!(
                            "Column {name}: stats have {} dims but row has {}; skipping row",
                            stat.mean.len(),
                            row.len()
                        );
                        continue;
                    }
                    for (d, v) in row.iter_mut().enumerate() {
                        *v = (*v - stat.mean[d]) / (stat.std[d] + EPSILON);
                    }
                }
            }
            _ => {}
        }
    }
}

pub fn save(stats: &NormStats, storage_folder: &Path) -> Result<(), NormError> {
    std::fs::create_dir_all(storage_folder)?;
    let file = std::fs::File::create(storage_folder.join(STATS_FILE))?;
    let mut writer = std::io::BufWriter::new(file);
    serde_pickle::to_writer(&mut writer, stats, serde_pickle::SerOptions::new())?;
    Ok(())
}

pub fn load(storage_folder: &Path) -> Result<NormStats, NormError> {
    let path = storage_folder.join(STATS_FILE);
    let file = match std::fs::File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(NormError::Missing(path.display().to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let stats =
        serde_pickle::from_reader(std::io::BufReader::new(file), serde_pickle::DeOptions::new())?;
    Ok(stats)
}

fn scalar_stats(values: &[f32]) -> (f32, f32) {
    let n = values.len().max(1) as f64;
    let mean = values.iter().map(|&v| v as f64).sum::<f64>() / n;
    let var = values.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / n;
    (mean as f32, var.sqrt() as f32)
}

fn vector_stats(rows: &[Vec<f32>]) -> (Vec<f32>, Vec<f32>) {
    let dim = rows.first().map_or(0, Vec::len);
    let n = rows.len().max(1) as f64;
    let mut mean = vec![0.0f64; dim];
    for row in rows {
        for (d, &v) in row.iter().enumerate() {
            mean[d] += v as f64;
        }
    }
    for m in &mut mean {
        *m /= n;
    }
    let mut var = vec![0.0f64; dim];
    for row in rows {
        for (d, &v) in row.iter().enumerate() {
            let diff = v as f64 - mean[d];
            var[d] += diff * diff;
        }
    }
    let std = var.iter().map(|v| (v / n).sqrt() as f32).collect();
    (mean.into_iter().map(|m| m as f32).collect(), std)
}
