// Import and export workflows tying reader, mapper, store and writer together.

use crate::error::{Error, Result};
use crate::mapper::ColumnMapper;
use crate::reader::read_table;
use crate::store::{BankCodeRecord, ReferenceTable, Store};
use crate::table::Table;
use crate::writer::{write_table, WriteOptions};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Clear the table first.
    Replace,
    /// Insert new codes, update existing ones.
    Merge,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImportMode::Replace => f.write_str("replace"),
            ImportMode::Merge => f.write_str("merge"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub table: ReferenceTable,
    pub mode: ImportMode,
    /// Records the mapper produced.
    pub mapped: usize,
    /// Records the store accepted.
    pub written: usize,
}

/// Read `path`, map it for `table` and store the result.
pub fn import_file(
    store: &Store,
    table: ReferenceTable,
    path: &Path,
    mode: ImportMode,
) -> Result<ImportSummary> {
    import_file_with(store, table, path, mode, &ColumnMapper::default())
}

pub fn import_file_with(
    store: &Store,
    table: ReferenceTable,
    path: &Path,
    mode: ImportMode,
    mapper: &ColumnMapper,
) -> Result<ImportSummary> {
    let source = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let parsed = read_table(path)?;
    let mapped = map_records(mapper, table, &parsed, &source);
    let mapped_count = mapped.len();
    let records: Vec<BankCodeRecord> = mapped
        .into_iter()
        .filter(BankCodeRecord::is_valid)
        .collect();

    // Nothing writable: a replace must not clear the table.
    if records.is_empty() {
        return Err(Error::NoValidRecords {
            table: table.to_string(),
            path: path.to_path_buf(),
        });
    }

    let written = match mode {
        ImportMode::Replace => store.replace_all(table, &records)?,
        ImportMode::Merge => store.upsert_merge(table, &records)?,
    };

    let summary = ImportSummary {
        table,
        mode,
        mapped: mapped_count,
        written,
    };
    info!(
        path = %path.display(),
        %table,
        %mode,
        mapped = summary.mapped,
        written = summary.written,
        "imported reference file"
    );
    Ok(summary)
}

fn map_records(
    mapper: &ColumnMapper,
    table: ReferenceTable,
    parsed: &Table,
    source: &str,
) -> Vec<BankCodeRecord> {
    match table {
        ReferenceTable::Ibps => mapper
            .map_ibps(parsed)
            .into_iter()
            .map(|r| r.into_bank_record(source))
            .collect(),
        ReferenceTable::Cnaps => mapper
            .map_cnaps(parsed)
            .into_iter()
            .map(|r| r.into_bank_record(source))
            .collect(),
    }
}

/// Write up to `limit` rows of `table` as a `code,name` sheet. An empty table
/// is reported as `NoValidRecords` and nothing is written.
pub fn export_table(
    store: &Store,
    table: ReferenceTable,
    path: &Path,
    options: &WriteOptions,
    limit: usize,
) -> Result<usize> {
    let records = store.search(table, "", limit)?;
    if records.is_empty() {
        return Err(Error::NoValidRecords {
            table: table.to_string(),
            path: path.to_path_buf(),
        });
    }

    let rows: Vec<Vec<String>> = records
        .into_iter()
        .map(|r| vec![r.code, r.name])
        .collect();
    let count = rows.len();
    let sheet = Table::new(vec!["code".to_string(), "name".to_string()], rows);

    write_table(&sheet, path, options)?;
    info!(path = %path.display(), %table, rows = count, "exported reference table");
    Ok(count)
}
