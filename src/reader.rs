// Tabular Reader - one entry point for every supported input file
//
// Dispatch is purely by extension. Every reader returns text cells only;
// long digit codes must never pass through a numeric type.

use crate::error::{Error, Result, UnsupportedFormat, RESAVE_HINT};
use crate::sniff::{
    decode_candidates, sniff_delimiter, sniff_header, split_whitespace_runs, TextEncoding,
    DELIMITER_CANDIDATES,
};
use crate::table::{is_blank_row, Table};
use calamine::{open_workbook_from_rs, Data, Ods, Reader, Sheets, Xls, Xlsb, Xlsx};
use serde::Serialize;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, info, warn};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const OLE2_MAGIC: &[u8] = b"\xD0\xCF\x11\xE0\xA1\xB1\x1A\xE1";

// ============================================================================
// SOURCE KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkbookFormat {
    /// Office Open XML (.xlsx .xlsm .xltx .xltm)
    Xlsx,
    Xlsb,
    Ods,
    /// Legacy BIFF (.xls)
    Xls,
}

impl WorkbookFormat {
    fn container_name(&self) -> &'static str {
        match self {
            WorkbookFormat::Xlsx | WorkbookFormat::Xlsb | WorkbookFormat::Ods => {
                "ZIP-based spreadsheet"
            }
            WorkbookFormat::Xls => "legacy OLE2 spreadsheet",
        }
    }

    fn content_matches(&self, bytes: &[u8]) -> bool {
        match self {
            WorkbookFormat::Xls => bytes.starts_with(OLE2_MAGIC),
            _ => bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceKind {
    Workbook(WorkbookFormat),
    Csv,
    /// .txt / .dat with unknown encoding and delimiter
    DelimitedText,
}

/// Map a file extension (case-insensitive) to a reader.
pub fn detect_kind(path: &Path) -> Result<SourceKind> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase();

    let kind = match extension.as_str() {
        "xlsx" | "xlsm" | "xltx" | "xltm" => SourceKind::Workbook(WorkbookFormat::Xlsx),
        "xlsb" => SourceKind::Workbook(WorkbookFormat::Xlsb),
        "ods" => SourceKind::Workbook(WorkbookFormat::Ods),
        "xls" => SourceKind::Workbook(WorkbookFormat::Xls),
        "csv" => SourceKind::Csv,
        "txt" | "dat" => SourceKind::DelimitedText,
        _ => return Err(UnsupportedFormat::UnknownExtension(extension).into()),
    };

    Ok(kind)
}

// ============================================================================
// READER TRAIT + FACTORY
// ============================================================================

/// A parser for one family of input files.
pub trait TableReader {
    /// Read the whole file into a text table.
    fn read(&self, path: &Path) -> Result<Table>;

    fn kind(&self) -> SourceKind;
}

pub fn get_reader(kind: SourceKind) -> Box<dyn TableReader> {
    match kind {
        SourceKind::Workbook(format) => Box::new(WorkbookReader::new(format)),
        SourceKind::Csv => Box::new(CsvReader::new()),
        SourceKind::DelimitedText => Box::new(TextReader::new()),
    }
}

/// Read any supported file into a table.
pub fn read_table(path: &Path) -> Result<Table> {
    let reader = get_reader(detect_kind(path)?);
    let table = reader.read(path)?;
    info!(
        path = %path.display(),
        kind = ?reader.kind(),
        header = table.has_header(),
        rows = table.len(),
        columns = table.width(),
        "read table"
    );
    Ok(table)
}

// ============================================================================
// SPREADSHEETS
// ============================================================================

pub struct WorkbookReader {
    format: WorkbookFormat,
}

impl WorkbookReader {
    pub fn new(format: WorkbookFormat) -> Self {
        WorkbookReader { format }
    }

    fn open(&self, path: &Path, bytes: Vec<u8>) -> Result<Sheets<Cursor<Vec<u8>>>> {
        let cursor = Cursor::new(bytes);
        let opened = match self.format {
            WorkbookFormat::Xlsx => open_workbook_from_rs::<Xlsx<_>, _>(cursor)
                .map(Sheets::Xlsx)
                .map_err(|e| e.to_string()),
            WorkbookFormat::Xlsb => open_workbook_from_rs::<Xlsb<_>, _>(cursor)
                .map(Sheets::Xlsb)
                .map_err(|e| e.to_string()),
            WorkbookFormat::Ods => open_workbook_from_rs::<Ods<_>, _>(cursor)
                .map(Sheets::Ods)
                .map_err(|e| e.to_string()),
            WorkbookFormat::Xls => open_workbook_from_rs::<Xls<_>, _>(cursor)
                .map(Sheets::Xls)
                .map_err(|e| e.to_string()),
        };

        opened.map_err(|message| Error::Spreadsheet {
            path: path.to_path_buf(),
            message,
            hint: RESAVE_HINT.to_string(),
        })
    }
}

impl TableReader for WorkbookReader {
    fn read(&self, path: &Path) -> Result<Table> {
        let bytes = fs::read(path)?;

        // Fail fast before handing garbage to the container parser.
        if !self.format.content_matches(&bytes) {
            return Err(UnsupportedFormat::MismatchedExtension {
                path: path.to_path_buf(),
                extension: path
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_lowercase(),
                expected: self.format.container_name(),
            }
            .into());
        }

        let mut workbook = self.open(path, bytes)?;

        // First sheet that actually holds data.
        for name in workbook.sheet_names() {
            let range = match workbook.worksheet_range(&name) {
                Ok(range) => range,
                Err(e) => {
                    warn!(sheet = %name, error = %e, "skipping unreadable sheet");
                    continue;
                }
            };

            let rows: Vec<Vec<String>> = range
                .rows()
                .map(|row| row.iter().map(cell_to_string).collect::<Vec<_>>())
                .filter(|row| !is_blank_row(row))
                .collect();

            if rows.is_empty() {
                continue;
            }

            let has_header = first_row_is_header(&rows);
            debug!(sheet = %name, rows = rows.len(), has_header, "using sheet");
            return Ok(Table::from_rows(rows, has_header));
        }

        Err(Error::Structure {
            path: path.to_path_buf(),
            hint: format!("the workbook has no sheet with data; {}", RESAVE_HINT),
        })
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Workbook(self.format)
    }
}

/// Render a spreadsheet cell as text.
///
/// Whole floats lose the ".0" a numeric cell would otherwise carry, so a
/// code stored as a number still reads back as its digits.
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => {
            if f.fract() == 0.0 && f.abs() < 1e15 {
                format!("{}", *f as i64)
            } else {
                format!("{}", f)
            }
        }
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(naive) if naive.time() == chrono::NaiveTime::MIN => {
                naive.format("%Y-%m-%d").to_string()
            }
            Some(naive) => naive.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => dt.as_f64().to_string(),
        },
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(_) => String::new(),
    }
}

// ============================================================================
// CSV
// ============================================================================

/// Permissive CSV: sniffed encoding and separator, ragged rows allowed,
/// malformed records skipped.
pub struct CsvReader;

impl CsvReader {
    pub fn new() -> Self {
        CsvReader
    }
}

impl Default for CsvReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TableReader for CsvReader {
    fn read(&self, path: &Path) -> Result<Table> {
        let bytes = fs::read(path)?;
        let candidates = decode_candidates(&bytes);
        if candidates.is_empty() {
            return Err(decode_error(path));
        }

        for decoded in candidates {
            let delimiter = sniff_delimiter(&decoded.text);
            let rows = parse_csv_records(&decoded.text, delimiter, path);
            if rows.is_empty() {
                debug!(encoding = decoded.encoding.name(), "no CSV rows under this encoding");
                continue;
            }
            let has_header = first_row_is_header(&rows);
            return Ok(Table::from_rows(rows, has_header));
        }

        Err(structure_error(path))
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Csv
    }
}

fn parse_csv_records(text: &str, delimiter: char, path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (index, result) in reader.records().enumerate() {
        match result {
            Ok(record) => {
                let row: Vec<String> = record.iter().map(str::to_string).collect();
                if !is_blank_row(&row) {
                    rows.push(row);
                }
            }
            Err(e) => {
                warn!(
                    path = %path.display(),
                    record = index + 1,
                    error = %e,
                    "skipping malformed CSV record"
                );
            }
        }
    }
    rows
}

// ============================================================================
// DELIMITED TEXT (.txt / .dat)
// ============================================================================

/// How a text file was split into fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Split {
    Delimiter(char),
    WhitespaceRuns,
}

/// What the text reader decided about a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextProfile {
    pub encoding: TextEncoding,
    pub split: Split,
    pub has_header: bool,
}

pub struct TextReader;

impl TextReader {
    pub fn new() -> Self {
        TextReader
    }

    /// Read a text file and report the encoding, split and header decisions.
    pub fn read_profiled(&self, path: &Path) -> Result<(Table, TextProfile)> {
        let bytes = fs::read(path)?;
        let candidates = decode_candidates(&bytes);
        if candidates.is_empty() {
            return Err(decode_error(path));
        }

        for decoded in candidates {
            let detected = sniff_delimiter(&decoded.text);
            let Some((rows, split)) = split_with_fallback(&decoded.text, detected) else {
                debug!(encoding = decoded.encoding.name(), "no rows under this encoding");
                continue;
            };

            let has_header = sniff_header(&rows);
            let profile = TextProfile {
                encoding: decoded.encoding,
                split,
                has_header,
            };
            debug!(?profile, rows = rows.len(), "parsed text file");
            return Ok((Table::from_rows(rows, has_header), profile));
        }

        Err(structure_error(path))
    }
}

impl Default for TextReader {
    fn default() -> Self {
        Self::new()
    }
}

impl TableReader for TextReader {
    fn read(&self, path: &Path) -> Result<Table> {
        self.read_profiled(path).map(|(table, _)| table)
    }

    fn kind(&self) -> SourceKind {
        SourceKind::DelimitedText
    }
}

/// Split with the detected delimiter; a single-column result retries every
/// other candidate and then whitespace runs. When nothing splits, the
/// single-column rows are returned as they are.
fn split_with_fallback(text: &str, detected: char) -> Option<(Vec<Vec<String>>, Split)> {
    let first = split_lines(text, detected);
    if first.is_empty() {
        return None;
    }
    if max_width(&first) > 1 {
        return Some((first, Split::Delimiter(detected)));
    }

    for candidate in DELIMITER_CANDIDATES.iter().copied().filter(|c| *c != detected) {
        let rows = split_lines(text, candidate);
        if max_width(&rows) > 1 {
            debug!(delimiter = ?candidate, "fallback delimiter produced columns");
            return Some((rows, Split::Delimiter(candidate)));
        }
    }

    let runs: Vec<Vec<String>> = text
        .lines()
        .map(split_whitespace_runs)
        .filter(|row| !row.is_empty())
        .collect();
    if max_width(&runs) > 1 {
        return Some((runs, Split::WhitespaceRuns));
    }

    Some((first, Split::Delimiter(detected)))
}

/// Quote-aware split of every non-blank line. A space delimiter splits on
/// whitespace runs so aligned columns do not produce empty fields.
fn split_lines(text: &str, delimiter: char) -> Vec<Vec<String>> {
    if delimiter == ' ' {
        return text
            .lines()
            .map(split_whitespace_runs)
            .filter(|row| !row.is_empty())
            .collect();
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter as u8)
        .from_reader(text.as_bytes());

    reader
        .records()
        .filter_map(|r| r.ok())
        .map(|record| record.iter().map(str::to_string).collect::<Vec<_>>())
        .filter(|row| !is_blank_row(row))
        .collect()
}

/// Header decision for spreadsheets and CSV: a lone row is taken as a header,
/// otherwise the column vote decides. Rows the vote rejects stay data.
fn first_row_is_header(rows: &[Vec<String>]) -> bool {
    rows.len() == 1 || sniff_header(rows)
}

fn max_width(rows: &[Vec<String>]) -> usize {
    rows.iter().map(Vec::len).max().unwrap_or(0)
}

fn decode_error(path: &Path) -> Error {
    Error::Decode {
        path: path.to_path_buf(),
        hint: RESAVE_HINT.to_string(),
    }
}

fn structure_error(path: &Path) -> Error {
    Error::Structure {
        path: path.to_path_buf(),
        hint: format!("check the encoding and delimiter, or {}", RESAVE_HINT),
    }
}
