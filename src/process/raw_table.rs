// src/process/raw_table.rs
use serde::Serialize;

/// An in-memory table of string cells.
///
/// Stages never edit a table they were handed; they derive a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Table {
    /// Column names, in document order.
    pub headers: Vec<String>,
    /// One entry per row, positionally aligned with `headers`. `None` is an absent cell.
    pub rows: Vec<Vec<Option<String>>>,
}

impl Table {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self { headers, rows }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn num_columns(&self) -> usize {
        self.headers.len()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Cell at `row`/`col`, absent cells and out of range positions give `None`.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|c| c.as_deref())
    }

    /// A new table holding only the rows `keep` accepts, in their original order.
    pub fn filter_rows<F>(&self, mut keep: F) -> Table
    where
        F: FnMut(&[Option<String>]) -> bool,
    {
        Table {
            headers: self.headers.clone(),
            rows: self.rows.iter().filter(|r| keep(r)).cloned().collect(),
        }
    }

    /// A new table with one extra column computed from each row. Short rows are padded first
    /// so the new cell lands under its header.
    pub fn with_column<F>(&self, name: impl Into<String>, mut derive: F) -> Table
    where
        F: FnMut(&[Option<String>]) -> Option<String>,
    {
        let mut headers = self.headers.clone();
        headers.push(name.into());
        let rows = self
            .rows
            .iter()
            .map(|r| {
                let mut out = r.clone();
                out.resize(self.headers.len(), None);
                out.push(derive(r));
                out
            })
            .collect();
        Table { headers, rows }
    }

    /// Values of one column, in row order.
    pub fn column_values(&self, col: usize) -> impl Iterator<Item = Option<&str>> + '_ {
        self.rows
            .iter()
            .map(move |r| r.get(col).and_then(|c| c.as_deref()))
    }
}
