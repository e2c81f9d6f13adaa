// Tabular record - the in-memory table that moves data between the reader,
// the mappers and the writer. Every cell is text; nothing is coerced.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Column names. Positional names ("0", "1", ...) when the source had
    /// no header row.
    columns: Vec<String>,

    /// Data rows, each exactly `columns.len()` cells wide.
    rows: Vec<Vec<String>>,

    /// Whether `columns` came from the file itself.
    has_header: bool,
}

impl Table {
    /// Build a table with named columns. Rows are padded (or widened) so that
    /// every row has the same width.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let mut table = Table {
            columns,
            rows,
            has_header: true,
        };
        table.normalize_width();
        table
    }

    /// Build a table whose columns are only positions.
    pub fn headerless(rows: Vec<Vec<String>>) -> Self {
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        let mut table = Table {
            columns: positional_names(width),
            rows,
            has_header: false,
        };
        table.normalize_width();
        table
    }

    /// Build from raw rows, promoting the first row to header when asked.
    pub fn from_rows(mut rows: Vec<Vec<String>>, first_row_is_header: bool) -> Self {
        if first_row_is_header && !rows.is_empty() {
            let header = rows.remove(0);
            Table::new(header, rows)
        } else {
            Table::headerless(rows)
        }
    }

    fn normalize_width(&mut self) {
        let width = self
            .rows
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(self.columns.len());

        while self.columns.len() < width {
            let next = self.columns.len();
            self.columns.push(next.to_string());
        }

        for row in &mut self.rows {
            row.resize(width, String::new());
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn has_header(&self) -> bool {
        self.has_header
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Exact (trimmed) column-name lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.trim() == name)
    }

    /// Cell text, empty when out of range.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<String>>) {
        (self.columns, self.rows)
    }
}

fn positional_names(width: usize) -> Vec<String> {
    (0..width).map(|i| i.to_string()).collect()
}

/// True when every cell of the row is blank after trimming.
pub fn is_blank_row(row: &[String]) -> bool {
    row.iter().all(|c| c.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn test_ragged_rows_are_padded() {
        let table = Table::headerless(vec![row(&["a"]), row(&["b", "c", "d"])]);

        assert_eq!(table.width(), 3);
        assert_eq!(table.rows()[0], row(&["a", "", ""]));
        assert_eq!(table.columns(), &row(&["0", "1", "2"])[..]);
        assert!(!table.has_header());
    }

    #[test]
    fn test_from_rows_promotes_header() {
        let table = Table::from_rows(
            vec![row(&["code", "name"]), row(&["102100099996", "PBC"])],
            true,
        );

        assert!(table.has_header());
        assert_eq!(table.len(), 1);
        assert_eq!(table.column_index("name"), Some(1));
        assert_eq!(table.cell(0, 0), "102100099996");
        assert_eq!(table.cell(5, 5), "");
    }

    #[test]
    fn test_header_narrower_than_rows_gets_positional_names() {
        let table = Table::new(row(&["code"]), vec![row(&["1", "2"])]);
        assert_eq!(table.columns(), &row(&["code", "1"])[..]);
    }
}
