use crate::error::Result;
use chrono::NaiveDateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Rows per transaction for `upsert_merge`.
pub const DEFAULT_BATCH_SIZE: usize = 20_000;

const SQLITE_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// TABLE NAMES
// ============================================================================

/// The two reference tables. SQL only ever sees these fixed names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferenceTable {
    Ibps,
    Cnaps,
}

impl ReferenceTable {
    pub const ALL: [ReferenceTable; 2] = [ReferenceTable::Ibps, ReferenceTable::Cnaps];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceTable::Ibps => "ibps",
            ReferenceTable::Cnaps => "cnaps",
        }
    }
}

impl fmt::Display for ReferenceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// RECORD
// ============================================================================

/// One routing code row. `code` is the primary key within its table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankCodeRecord {
    pub code: String,
    pub name: String,
    pub raw_line: String,
    /// Origin file name
    pub source: String,
    /// Set by the database; `None` until the record has been stored.
    pub updated_at: Option<NaiveDateTime>,
}

impl BankCodeRecord {
    pub fn new(code: String, name: String, raw_line: String, source: &str) -> Self {
        BankCodeRecord {
            code,
            name,
            raw_line,
            source: source.to_string(),
            updated_at: None,
        }
    }

    /// Exactly 12 ASCII digits and a non-empty name.
    pub fn is_valid(&self) -> bool {
        is_valid_code(&self.code) && !self.name.trim().is_empty()
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let updated_at: Option<String> = row.get(4)?;
        Ok(BankCodeRecord {
            code: row.get(0)?,
            name: row.get(1)?,
            raw_line: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
            source: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
            updated_at: updated_at
                .and_then(|s| NaiveDateTime::parse_from_str(&s, SQLITE_DATETIME).ok()),
        })
    }
}

pub fn is_valid_code(code: &str) -> bool {
    code.len() == 12 && code.bytes().all(|b| b.is_ascii_digit())
}

// ============================================================================
// SCHEMA
// ============================================================================

pub fn setup_database(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;

    for table in ReferenceTable::ALL {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    code TEXT PRIMARY KEY,
                    name TEXT,
                    raw_line TEXT,
                    source TEXT,
                    updated_at TEXT DEFAULT (datetime('now'))
                )",
                table.as_str()
            ),
            [],
        )?;

        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_name ON {0}(name)",
                table.as_str()
            ),
            [],
        )?;
    }

    Ok(())
}

// ============================================================================
// STORE
// ============================================================================

/// Reference store backed by one SQLite file. Every operation opens its own
/// connection and drops it before returning.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    batch_size: usize,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Store {
            path: path.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the database, creating the file and schema on first use.
    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        setup_database(&conn)?;
        Ok(conn)
    }

    /// Create the database file and both tables if missing.
    pub fn ensure(&self) -> Result<()> {
        self.connect().map(|_| ())
    }

    /// Clear the table and insert `rows`, all in one transaction.
    pub fn replace_all(&self, table: ReferenceTable, rows: &[BankCodeRecord]) -> Result<usize> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        let cleared = tx.execute(&format!("DELETE FROM {}", table.as_str()), [])?;
        let written = upsert_rows(&tx, table, rows)?;

        tx.commit()?;
        info!(%table, cleared, written, "replaced reference table");
        Ok(written)
    }

    /// Insert-or-update by code, `batch_size` rows per transaction.
    ///
    /// Batches commit independently: a failure part way through leaves the
    /// earlier batches in place.
    pub fn upsert_merge(&self, table: ReferenceTable, rows: &[BankCodeRecord]) -> Result<usize> {
        let mut conn = self.connect()?;
        let mut written = 0;

        for (batch_no, batch) in rows.chunks(self.batch_size).enumerate() {
            let tx = conn.transaction()?;
            written += upsert_rows(&tx, table, batch)?;
            tx.commit()?;
            debug!(%table, batch = batch_no + 1, size = batch.len(), "committed upsert batch");
        }

        info!(%table, written, "merged into reference table");
        Ok(written)
    }

    /// Case-insensitive substring match on code or name, ordered by name.
    /// An empty keyword browses the first `limit` rows.
    pub fn search(
        &self,
        table: ReferenceTable,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<BankCodeRecord>> {
        let conn = self.connect()?;
        let pattern = like_pattern(keyword.trim());

        let mut stmt = conn.prepare(&format!(
            "SELECT code, name, raw_line, source, updated_at
             FROM {}
             WHERE code LIKE ?1 ESCAPE '\\' OR name LIKE ?1 ESCAPE '\\'
             ORDER BY name, code
             LIMIT ?2",
            table.as_str()
        ))?;

        let records = stmt
            .query_map(params![pattern, limit as i64], BankCodeRecord::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(records)
    }

    /// Best record whose name contains `bank_name`: the longest matching name
    /// wins so a generic head-office name does not shadow a branch.
    pub fn lookup_by_name(
        &self,
        table: ReferenceTable,
        bank_name: &str,
    ) -> Result<Option<BankCodeRecord>> {
        let bank_name = bank_name.trim();
        if bank_name.is_empty() {
            return Ok(None);
        }

        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT code, name, raw_line, source, updated_at
                     FROM {}
                     WHERE name LIKE ?1 ESCAPE '\\'
                     ORDER BY LENGTH(name) DESC, code
                     LIMIT 1",
                    table.as_str()
                ),
                params![like_pattern(bank_name)],
                BankCodeRecord::from_row,
            )
            .optional()?;

        Ok(record)
    }

    pub fn count(&self, table: ReferenceTable) -> Result<i64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", table.as_str()),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn get(&self, table: ReferenceTable, code: &str) -> Result<Option<BankCodeRecord>> {
        let conn = self.connect()?;
        let record = conn
            .query_row(
                &format!(
                    "SELECT code, name, raw_line, source, updated_at FROM {} WHERE code = ?1",
                    table.as_str()
                ),
                params![code],
                BankCodeRecord::from_row,
            )
            .optional()?;
        Ok(record)
    }
}

/// Shared insert path. Invalid records never reach the table.
fn upsert_rows(conn: &Connection, table: ReferenceTable, rows: &[BankCodeRecord]) -> Result<usize> {
    let mut stmt = conn.prepare_cached(&format!(
        "INSERT INTO {}(code, name, raw_line, source)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(code) DO UPDATE SET
            name = excluded.name,
            raw_line = excluded.raw_line,
            source = excluded.source,
            updated_at = datetime('now')",
        table.as_str()
    ))?;

    let mut written = 0;
    let mut rejected = 0;
    for row in rows {
        if !row.is_valid() {
            rejected += 1;
            continue;
        }
        stmt.execute(params![row.code, row.name.trim(), row.raw_line, row.source])?;
        written += 1;
    }

    if rejected > 0 {
        warn!(%table, rejected, "skipped records without a 12-digit code or name");
    }
    Ok(written)
}

/// `%keyword%` with LIKE wildcards in the keyword escaped.
fn like_pattern(keyword: &str) -> String {
    let mut pattern = String::with_capacity(keyword.len() + 2);
    pattern.push('%');
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("data").join("codebook.db"));
        (dir, store)
    }

    fn record(code: &str, name: &str) -> BankCodeRecord {
        BankCodeRecord::new(
            code.to_string(),
            name.to_string(),
            format!("{}|{}", code, name),
            "test.txt",
        )
    }

    #[test]
    fn test_setup_database_in_memory() {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        setup_database(&conn).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('ibps', 'cnaps')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_store_creates_file_on_first_use() {
        let (_dir, store) = temp_store();
        assert!(!store.path().exists());

        store.ensure().unwrap();
        assert!(store.path().exists());
        assert_eq!(store.count(ReferenceTable::Ibps).unwrap(), 0);
    }

    #[test]
    fn test_replace_all_with_empty_rows_then_browse() {
        let (_dir, store) = temp_store();
        store
            .replace_all(ReferenceTable::Ibps, &[record("102100099996", "PBC")])
            .unwrap();

        store.replace_all(ReferenceTable::Ibps, &[]).unwrap();
        let rows = store.search(ReferenceTable::Ibps, "", 10).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_replace_all_drops_previous_rows() {
        let (_dir, store) = temp_store();
        store
            .replace_all(
                ReferenceTable::Cnaps,
                &[record("102100099996", "A"), record("103100000026", "B")],
            )
            .unwrap();
        store
            .replace_all(ReferenceTable::Cnaps, &[record("104100000004", "C")])
            .unwrap();

        assert_eq!(store.count(ReferenceTable::Cnaps).unwrap(), 1);
        assert!(store.get(ReferenceTable::Cnaps, "102100099996").unwrap().is_none());
        // The other table is untouched.
        assert_eq!(store.count(ReferenceTable::Ibps).unwrap(), 0);
    }

    #[test]
    fn test_upsert_merge_is_idempotent() {
        let (_dir, store) = temp_store();
        let rows = vec![record("102100099996", "PBC"), record("103100000026", "ABC")];

        store.upsert_merge(ReferenceTable::Ibps, &rows).unwrap();
        let first = store.search(ReferenceTable::Ibps, "", 100).unwrap();
        store.upsert_merge(ReferenceTable::Ibps, &rows).unwrap();
        let second = store.search(ReferenceTable::Ibps, "", 100).unwrap();

        let strip = |rows: Vec<BankCodeRecord>| {
            rows.into_iter()
                .map(|r| (r.code, r.name, r.raw_line, r.source))
                .collect::<Vec<_>>()
        };
        assert_eq!(strip(first), strip(second));
        assert_eq!(store.count(ReferenceTable::Ibps).unwrap(), 2);
    }

    #[test]
    fn test_upsert_merge_updates_on_conflict() {
        let (_dir, store) = temp_store();
        store
            .upsert_merge(ReferenceTable::Ibps, &[record("102100099996", "Old")])
            .unwrap();

        let mut newer = record("102100099996", "New");
        newer.source = "second.xlsx".to_string();
        store.upsert_merge(ReferenceTable::Ibps, &[newer]).unwrap();

        let stored = store.get(ReferenceTable::Ibps, "102100099996").unwrap().unwrap();
        assert_eq!(stored.name, "New");
        assert_eq!(stored.source, "second.xlsx");
        assert!(stored.updated_at.is_some());
    }

    #[test]
    fn test_upsert_merge_in_small_batches() {
        let (_dir, store) = temp_store();
        let store = store.with_batch_size(3);
        let rows: Vec<BankCodeRecord> = (0..10)
            .map(|i| record(&format!("{:012}", 100_000_000_000u64 + i), &format!("Bank {}", i)))
            .collect();

        assert_eq!(store.upsert_merge(ReferenceTable::Cnaps, &rows).unwrap(), 10);
        assert_eq!(store.count(ReferenceTable::Cnaps).unwrap(), 10);

        let all = store.search(ReferenceTable::Cnaps, "", 100).unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(all[0].name, "Bank 0");
    }

    #[test]
    fn test_store_rejects_invalid_codes() {
        let (_dir, store) = temp_store();
        let rows = vec![
            record("102100099996", "Valid"),
            record("12345678901", "Eleven digits"),
            record("10210009999X", "Letter"),
            record("103100000026", "  "),
        ];

        assert_eq!(store.replace_all(ReferenceTable::Ibps, &rows).unwrap(), 1);
        let all = store.search(ReferenceTable::Ibps, "", 100).unwrap();
        assert!(all.iter().all(|r| is_valid_code(&r.code)));
    }

    #[test]
    fn test_search_matches_code_or_name_case_insensitive() {
        let (_dir, store) = temp_store();
        store
            .replace_all(
                ReferenceTable::Ibps,
                &[
                    record("102100099996", "Zeta Bank"),
                    record("103100000026", "alpha bank"),
                    record("104100000004", "Other"),
                ],
            )
            .unwrap();

        let by_name = store.search(ReferenceTable::Ibps, "BANK", 10).unwrap();
        let names: Vec<&str> = by_name.iter().map(|r| r.name.as_str()).collect();
        // Binary collation: upper case sorts before lower case.
        assert_eq!(names, vec!["Zeta Bank", "alpha bank"]);

        let by_code = store.search(ReferenceTable::Ibps, "1041", 10).unwrap();
        assert_eq!(by_code.len(), 1);
        assert_eq!(by_code[0].name, "Other");

        let limited = store.search(ReferenceTable::Ibps, "", 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_search_escapes_like_wildcards() {
        let (_dir, store) = temp_store();
        store
            .replace_all(
                ReferenceTable::Ibps,
                &[record("102100099996", "100% Bank"), record("103100000026", "Plain")],
            )
            .unwrap();

        let hits = store.search(ReferenceTable::Ibps, "%", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "100% Bank");
    }

    #[test]
    fn test_lookup_by_name_prefers_longest() {
        let (_dir, store) = temp_store();
        store
            .replace_all(
                ReferenceTable::Cnaps,
                &[
                    record("102100099996", "Bank A"),
                    record("102100099997", "Bank A Branch 2"),
                    record("103100000026", "Bank B"),
                ],
            )
            .unwrap();

        let hit = store
            .lookup_by_name(ReferenceTable::Cnaps, "Bank A")
            .unwrap()
            .unwrap();
        assert_eq!(hit.name, "Bank A Branch 2");
        assert_eq!(hit.code, "102100099997");

        assert!(store
            .lookup_by_name(ReferenceTable::Cnaps, "Nowhere")
            .unwrap()
            .is_none());
        assert!(store
            .lookup_by_name(ReferenceTable::Cnaps, "  ")
            .unwrap()
            .is_none());
    }
}
