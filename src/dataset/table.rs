use std::collections::BTreeMap;
use std::ops::Range;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Column {0} has {1} rows, expected {2}")]
    LengthMismatch(String, usize, usize),
    #[error("Schema mismatch: column {0} missing or differently typed")]
    SchemaMismatch(String),
    #[error("Column {0}: vector rows have inconsistent widths ({1} vs {2})")]
    RaggedColumn(String, usize, usize),
}

/// One typed column. Vector cells (`FloatVec`) hold one fixed-width vector
/// per row (cepstral frames, word embeddings).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Column {
    Float(Vec<f32>),
    FloatVec(Vec<Vec<f32>>),
    Int(Vec<i64>),
    Str(Vec<String>),
}

impl Column {
    pub fn len(&self) -> usize {
        match self {
            Column::Float(v) => v.len(),
            Column::FloatVec(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn same_kind(&self, other: &Column) -> bool {
        matches!(
            (self, other),
            (Column::Float(_), Column::Float(_))
                | (Column::FloatVec(_), Column::FloatVec(_))
                | (Column::Int(_), Column::Int(_))
                | (Column::Str(_), Column::Str(_))
        )
    }

    /// Empty column of the same kind.
    fn like(&self) -> Column {
        match self {
            Column::Float(_) => Column::Float(Vec::new()),
            Column::FloatVec(_) => Column::FloatVec(Vec::new()),
            Column::Int(_) => Column::Int(Vec::new()),
            Column::Str(_) => Column::Str(Vec::new()),
        }
    }

    fn extend_from(&mut self, src: &Column, range: Range<usize>) {
        match (self, src) {
            (Column::Float(dst), Column::Float(s)) => dst.extend_from_slice(&s[range]),
            (Column::FloatVec(dst), Column::FloatVec(s)) => dst.extend_from_slice(&s[range]),
            (Column::Int(dst), Column::Int(s)) => dst.extend_from_slice(&s[range]),
            (Column::Str(dst), Column::Str(s)) => dst.extend_from_slice(&s[range]),
            _ => unreachable!("column kinds verified at append time"),
        }
    }

    /// Shifted-by-one copy of `range`, first row replaced by a zero sentinel.
    fn lagged(&self, range: Range<usize>) -> Column {
        match self {
            Column::Float(v) => {
                let mut out = vec![0.0];
                out.extend_from_slice(&v[range.start..range.end - 1]);
                Column::Float(out)
            }
            Column::FloatVec(v) => {
                let width = v.get(range.start).map_or(0, |row| row.len());
                let mut out = vec![vec![0.0; width]];
                out.extend_from_slice(&v[range.start..range.end - 1]);
                Column::FloatVec(out)
            }
            Column::Int(v) => {
                let mut out = vec![0];
                out.extend_from_slice(&v[range.start..range.end - 1]);
                Column::Int(out)
            }
            Column::Str(v) => {
                let mut out = vec![String::new()];
                out.extend_from_slice(&v[range.start..range.end - 1]);
                Column::Str(out)
            }
        }
    }
}

/// One contiguous `(name, difficulty)` run of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    pub difficulty: String,
    pub len: usize,
}

/// Columnar table: contiguous song-difficulty groups over a shared column set.
/// All columns hold exactly as many rows as the group lengths sum to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    groups: Vec<Group>,
    columns: BTreeMap<String, Column>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn num_rows(&self) -> usize {
        self.groups.iter().map(|g| g.len).sum()
    }

    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Byte ranges of each group, in row indices.
    pub fn group_ranges(&self) -> Vec<(Group, Range<usize>)> {
        let mut out = Vec::with_capacity(self.groups.len());
        let mut start = 0;
        for group in &self.groups {
            out.push((group.clone(), start..start + group.len));
            start += group.len;
        }
        out
    }

    /// Append one group's rows. The first group defines the schema; later
    /// appends must match it column-for-column.
    pub fn push_group(
        &mut self,
        name: &str,
        difficulty: &str,
        columns: BTreeMap<String, Column>,
    ) -> Result<(), TableError> {
        let len = columns.values().next().map_or(0, Column::len);
        for (col_name, col) in &columns {
            if col.len() != len {
                return Err(TableError::LengthMismatch(col_name.clone(), col.len(), len));
            }
        }

        if self.groups.is_empty() {
            self.columns = columns;
        } else {
            if self.columns.len() != columns.len() {
                let missing = self
                    .columns
                    .keys()
                    .find(|k| !columns.contains_key(*k))
                    .or_else(|| columns.keys().find(|k| !self.columns.contains_key(*k)));
                return Err(TableError::SchemaMismatch(
                    missing.cloned().unwrap_or_default(),
                ));
            }
            for (col_name, col) in &columns {
                let existing = self
                    .columns
                    .get_mut(col_name)
                    .ok_or_else(|| TableError::SchemaMismatch(col_name.clone()))?;
                if !existing.same_kind(col) {
                    return Err(TableError::SchemaMismatch(col_name.clone()));
                }
                existing.extend_from(col, 0..col.len());
            }
        }
        self.groups.push(Group { name: name.to_string(), difficulty: difficulty.to_string(), len });
        Ok(())
    }

    /// Concatenate tables; group order follows input order.
    pub fn concat(tables: Vec<Table>) -> Result<Table, TableError> {
        let mut out = Table::new();
        for table in tables {
            let ranges = table.group_ranges();
            for (group, range) in ranges {
                let mut cols = BTreeMap::new();
                for (name, col) in &table.columns {
                    let mut dst = col.like();
                    dst.extend_from(col, range.clone());
                    cols.insert(name.clone(), dst);
                }
                out.push_group(&group.name, &group.difficulty, cols)?;
            }
        }
        Ok(out)
    }

    /// Insert or replace a full-length column.
    pub fn set_column(&mut self, name: &str, column: Column) -> Result<(), TableError> {
        let rows = self.num_rows();
        if column.len() != rows {
            return Err(TableError::LengthMismatch(name.to_string(), column.len(), rows));
        }
        self.columns.insert(name.to_string(), column);
        Ok(())
    }

    /// Mutable access for in-place normalization.
    pub fn column_mut(&mut self, name: &str) -> Option<&mut Column> {
        self.columns.get_mut(name)
    }

    /// Add a `prev_<col>` lag counterpart for every listed column that exists.
    /// The lag never crosses a group boundary; the first row of each group
    /// gets a zero sentinel.
    pub fn add_lag_columns(&mut self, source_columns: &[String]) -> Result<(), TableError> {
        let ranges = self.group_ranges();
        for col_name in source_columns {
            let Some(src) = self.columns.get(col_name) else {
                log::debug!("Lag source column {col_name} not present, skipping");
                continue;
            };
            let mut lagged = src.like();
            for (_, range) in &ranges {
                if range.is_empty() {
                    continue;
                }
                let piece = src.lagged(range.clone());
                lagged.extend_from(&piece, 0..piece.len());
            }
            self.columns.insert(format!("prev_{col_name}"), lagged);
        }
        Ok(())
    }

    /// Slice every group into fixed-length overlapping snippets.
    ///
    /// A group of L rows yields `floor((L - W) / S) + 1` snippets when
    /// `L >= W`, otherwise none; the trailing partial window is dropped.
    /// Each snippet becomes its own group and carries a corpus-wide
    /// `snippet` id so consumers can reshape into sequences.
    pub fn snippets(&self, window: usize, skip: usize) -> Result<Table, TableError> {
        let mut out = Table::new();
        let mut snippet_id: i64 = 0;
        for (group, range) in self.group_ranges() {
            if group.len < window {
                continue;
            }
            let count = (group.len - window) / skip + 1;
            for s in 0..count {
                let start = range.start + s * skip;
                let mut cols = BTreeMap::new();
                for (name, col) in &self.columns {
                    let mut dst = col.like();
                    dst.extend_from(col, start..start + window);
                    cols.insert(name.clone(), dst);
                }
                cols.insert("snippet".to_string(), Column::Int(vec![snippet_id; window]));
                out.push_group(&group.name, &group.difficulty, cols)?;
                snippet_id += 1;
            }
        }
        Ok(out)
    }

    /// Verify structural invariants: column lengths all equal the group-length
    /// sum, and vector columns are rectangular.
    pub fn check_consistency(&self) -> Result<(), TableError> {
        let rows = self.num_rows();
        for (name, col) in &self.columns {
            if col.len() != rows {
                return Err(TableError::LengthMismatch(name.clone(), col.len(), rows));
            }
            if let Column::FloatVec(cells) = col {
                if let Some(first) = cells.first() {
                    for cell in cells {
                        if cell.len() != first.len() {
                            return Err(TableError::RaggedColumn(
                                name.clone(),
                                first.len(),
                                cell.len(),
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_columns(n: usize, offset: f32) -> BTreeMap<String, Column> {
        let mut cols = BTreeMap::new();
        cols.insert(
            "x".to_string(),
            Column::Float((0..n).map(|i| i as f32 + offset).collect()),
        );
        cols.insert("id".to_string(), Column::Int((0..n).map(|i| i as i64).collect()));
        cols
    }

    fn table_with(groups: &[(&str, &str, usize)]) -> Table {
        let mut table = Table::new();
        for &(name, diff, n) in groups {
            table.push_group(name, diff, group_columns(n, 0.0)).unwrap();
        }
        table
    }

    #[test]
    fn test_push_and_concat() {
        let a = table_with(&[("s1", "Hard", 3)]);
        let b = table_with(&[("s2", "Expert", 2)]);
        let joined = Table::concat(vec![a, b]).unwrap();
        assert_eq!(joined.num_rows(), 5);
        assert_eq!(joined.num_groups(), 2);
        joined.check_consistency().unwrap();
    }

    #[test]
    fn test_schema_mismatch_rejected() {
        let mut table = table_with(&[("s1", "Hard", 3)]);
        let mut other = BTreeMap::new();
        other.insert("y".to_string(), Column::Float(vec![1.0]));
        other.insert("id".to_string(), Column::Int(vec![1]));
        assert!(matches!(
            table.push_group("s2", "Hard", other),
            Err(TableError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_ragged_lengths_rejected() {
        let mut cols = BTreeMap::new();
        cols.insert("x".to_string(), Column::Float(vec![1.0, 2.0]));
        cols.insert("id".to_string(), Column::Int(vec![1]));
        let mut table = Table::new();
        assert!(matches!(
            table.push_group("s", "Hard", cols),
            Err(TableError::LengthMismatch(..))
        ));
    }

    #[test]
    fn test_lag_columns_respect_group_boundaries() {
        let mut table = Table::new();
        table.push_group("s1", "Hard", group_columns(3, 10.0)).unwrap();
        table.push_group("s2", "Hard", group_columns(2, 20.0)).unwrap();
        table.add_lag_columns(&["x".to_string()]).unwrap();

        let Some(Column::Float(prev)) = table.column("prev_x") else {
            panic!("prev_x missing")
        };
        // group 1: sentinel, then shifted values; group 2 restarts at sentinel
        assert_eq!(prev, &vec![0.0, 10.0, 11.0, 0.0, 20.0]);
    }

    #[test]
    fn test_lag_vector_sentinel_keeps_width() {
        let mut cols = BTreeMap::new();
        cols.insert(
            "vec".to_string(),
            Column::FloatVec(vec![vec![1.0, 2.0], vec![3.0, 4.0]]),
        );
        let mut table = Table::new();
        table.push_group("s", "Hard", cols).unwrap();
        table.add_lag_columns(&["vec".to_string()]).unwrap();

        let Some(Column::FloatVec(prev)) = table.column("prev_vec") else {
            panic!("prev_vec missing")
        };
        assert_eq!(prev, &vec![vec![0.0, 0.0], vec![1.0, 2.0]]);
    }

    #[test]
    fn test_snippet_count_law() {
        // L=120, W=50, S=25 → floor((120-50)/25)+1 = 3 snippets at 0, 25, 50
        let table = table_with(&[("s", "Expert", 120)]);
        let snips = table.snippets(50, 25).unwrap();
        assert_eq!(snips.num_groups(), 3);
        assert_eq!(snips.num_rows(), 150);

        let Some(Column::Float(x)) = snips.column("x") else { panic!("x missing") };
        assert_eq!(x[0], 0.0);
        assert_eq!(x[50], 25.0);
        assert_eq!(x[100], 50.0);

        let Some(Column::Int(ids)) = snips.column("snippet") else { panic!("snippet missing") };
        assert_eq!(ids[0], 0);
        assert_eq!(ids[50], 1);
        assert_eq!(ids[149], 2);
    }

    #[test]
    fn test_short_group_yields_no_snippets() {
        let table = table_with(&[("tiny", "Easy", 49), ("big", "Easy", 50)]);
        let snips = table.snippets(50, 25).unwrap();
        assert_eq!(snips.num_groups(), 1);
        assert_eq!(snips.groups()[0].name, "big");
    }

    #[test]
    fn test_snippets_never_cross_groups() {
        let table = table_with(&[("a", "Hard", 60), ("b", "Hard", 60)]);
        let snips = table.snippets(50, 25).unwrap();
        // each group alone yields 1 snippet; a combined 120 rows would yield 3
        assert_eq!(snips.num_groups(), 2);
        for group in snips.groups() {
            assert_eq!(group.len, 50);
        }
    }
}
