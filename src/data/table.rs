//! Typed reader for wide-format CSV tables: a header row followed by string rows.
//!
//! Rows are exposed as (header, cell) pairs so the reshaping step never has to
//! guess at cell types.

use csv::{ReaderBuilder, Trim};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WideTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl WideTable {
    /// Parse CSV text with a header row. Ragged rows are accepted; missing
    /// trailing cells read as absent.
    pub fn parse(text: &str) -> Result<Self, csv::Error> {
        let text = text.trim_start_matches('\u{feff}');
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(text.as_bytes());

        let headers = reader.headers()?.iter().map(str::to_string).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(str::to_string).collect());
        }

        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Index of the first column whose header matches one of `names`, tried in order.
    pub fn column_index(&self, names: &[&str]) -> Option<usize> {
        names
            .iter()
            .find_map(|name| self.headers.iter().position(|h| h == name))
    }

    pub fn rows(&self) -> impl Iterator<Item = TableRow<'_>> {
        self.rows.iter().map(|cells| TableRow { cells })
    }
}

/// One data row. Cells are addressed by header position.
#[derive(Debug, Clone, Copy)]
pub struct TableRow<'a> {
    cells: &'a [String],
}

impl<'a> TableRow<'a> {
    pub fn cell(&self, index: usize) -> Option<&'a str> {
        self.cells.get(index).map(String::as_str)
    }
}
