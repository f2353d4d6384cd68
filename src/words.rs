use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;

use crate::dataset::table::{Column, Table, TableError};

/// Reserved id for masked positions in training sequences.
pub const MASK_ID: i64 = 0;
/// Reserved id for action words outside the model vocabulary.
pub const UNK_ID: i64 = 1;

#[derive(Error, Debug)]
pub enum WordModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Word model parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Word model vectors have inconsistent dimensions ({0} vs {1})")]
    RaggedVectors(usize, usize),
    #[error("Word model is empty")]
    Empty,
}

/// Action-word embedding lookup: word → vector, word → integer id.
/// Vocabulary ids start at 2; 0 and 1 are the MASK/UNK reserves.
pub struct WordModel {
    vectors: BTreeMap<String, Vec<f32>>,
    ids: BTreeMap<String, i64>,
    dim: usize,
}

impl WordModel {
    /// Load a `{word: [f32, ...]}` JSON artifact. A missing file is the
    /// degraded-but-supported case and returns `None`; a present-but-broken
    /// file is an error.
    pub fn load(path: &Path) -> Result<Option<WordModel>, WordModelError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let vectors: BTreeMap<String, Vec<f32>> = serde_json::from_str(&contents)?;
        let dim = vectors.values().next().ok_or(WordModelError::Empty)?.len();
        for vec in vectors.values() {
            if vec.len() != dim {
                return Err(WordModelError::RaggedVectors(dim, vec.len()));
            }
        }
        // BTreeMap iteration is sorted, so ids are stable across runs
        let ids = vectors
            .keys()
            .enumerate()
            .map(|(i, word)| (word.clone(), i as i64 + 2))
            .collect();
        Ok(Some(WordModel { vectors, ids, dim }))
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Vocabulary size including the two reserved ids.
    pub fn num_classes(&self) -> usize {
        self.ids.len() + 2
    }

    pub fn id(&self, word: &str) -> i64 {
        self.ids.get(word).copied().unwrap_or(UNK_ID)
    }

    pub fn vector(&self, word: &str) -> Vec<f32> {
        self.vectors.get(word).cloned().unwrap_or_else(|| vec![0.0; self.dim])
    }
}

/// Attach `word_vec` and `word_id` columns derived from the `word` column.
/// Without a model both degrade to neutral zeros so the table keeps its shape.
pub fn attach_word_columns(table: &mut Table, model: Option<&WordModel>) -> Result<(), TableError> {
    let words: Vec<String> = match table.column("word") {
        Some(Column::Str(words)) => words.clone(),
        _ => return Ok(()),
    };

    let (vecs, ids) = match model {
        Some(model) => {
            let vecs = words.iter().map(|w| model.vector(w)).collect();
            let ids = words.iter().map(|w| model.id(w)).collect();
            (vecs, ids)
        }
        None => (vec![vec![0.0]; words.len()], vec![MASK_ID; words.len()]),
    };

    table.set_column("word_vec", Column::FloatVec(vecs))?;
    table.set_column("word_id", Column::Int(ids))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn model_fixture(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("fasttext.json");
        std::fs::write(
            &path,
            r#"{"L012": [1.0, 2.0], "R023": [3.0, 4.0], "L012_R023": [5.0, 6.0]}"#,
        )
        .unwrap();
        path
    }

    fn word_table(words: &[&str]) -> Table {
        let mut cols = Map::new();
        cols.insert(
            "word".to_string(),
            Column::Str(words.iter().map(|w| w.to_string()).collect()),
        );
        let mut table = Table::new();
        table.push_group("song", "Expert", cols).unwrap();
        table
    }

    #[test]
    fn test_missing_model_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(WordModel::load(&dir.path().join("absent.json")).unwrap().is_none());
    }

    #[test]
    fn test_ids_are_sorted_and_reserved() {
        let dir = tempfile::tempdir().unwrap();
        let model = WordModel::load(&model_fixture(dir.path())).unwrap().unwrap();
        // sorted key order: L012 < L012_R023 < R023
        assert_eq!(model.id("L012"), 2);
        assert_eq!(model.id("L012_R023"), 3);
        assert_eq!(model.id("R023"), 4);
        assert_eq!(model.id("never-seen"), UNK_ID);
        assert_eq!(model.num_classes(), 5);
        assert_eq!(model.dim(), 2);
    }

    #[test]
    fn test_attach_with_model() {
        let dir = tempfile::tempdir().unwrap();
        let model = WordModel::load(&model_fixture(dir.path())).unwrap().unwrap();

        let mut table = word_table(&["L012", "bogus"]);
        attach_word_columns(&mut table, Some(&model)).unwrap();

        let Some(Column::FloatVec(vecs)) = table.column("word_vec") else { panic!() };
        assert_eq!(vecs[0], vec![1.0, 2.0]);
        assert_eq!(vecs[1], vec![0.0, 0.0]);

        let Some(Column::Int(ids)) = table.column("word_id") else { panic!() };
        assert_eq!(ids, &vec![2, UNK_ID]);
    }

    #[test]
    fn test_attach_without_model_degrades_to_zeros() {
        let mut table = word_table(&["L012", "R023"]);
        attach_word_columns(&mut table, None).unwrap();

        let Some(Column::FloatVec(vecs)) = table.column("word_vec") else { panic!() };
        assert_eq!(vecs, &vec![vec![0.0], vec![0.0]]);
        let Some(Column::Int(ids)) = table.column("word_id") else { panic!() };
        assert_eq!(ids, &vec![MASK_ID, MASK_ID]);
    }

    #[test]
    fn test_ragged_model_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, r#"{"a": [1.0], "b": [1.0, 2.0]}"#).unwrap();
        assert!(matches!(
            WordModel::load(&path),
            Err(WordModelError::RaggedVectors(..))
        ));
    }
}
