// Column Mapper / Record Extractor
//
// Turns an arbitrary table into IBPS (code + name) or CNAPS (code + class +
// city + name) records. Rows that do not yield a 12-digit code and a name are
// dropped silently; an empty result is the caller's problem, never an error
// here.

use crate::sniff::{split_whitespace_runs, DELIMITER_CANDIDATES};
use crate::store::BankCodeRecord;
use crate::table::{is_blank_row, Table};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// Rows examined when looking for a header line below a title block.
pub const DEFAULT_HEADER_SCAN_ROWS: usize = 30;

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

// ASCII digits only.
re!(re_float_artifact, r"^([0-9]+)\.0+$");
re!(re_digit_run, r"[0-9]+");

const IBPS_CODE_ALIASES: &[&str] = &[
    "清算行行号",
    "清算行号",
    "参与者行号",
    "支付行号",
    "联行号",
    "银行行号",
    "行号",
    "clearing bank number",
    "clearing bank no",
    "routing number",
    "routing code",
    "bank code",
    "bank no",
    "bank number",
    "bnkcode",
    "code",
];

const IBPS_NAME_ALIASES: &[&str] = &[
    "清算行名称",
    "参与者名称",
    "银行名称",
    "行名",
    "名称",
    "clearing bank name",
    "bank name",
    "lname",
    "name",
];

const CNAPS_HEADERS: [(Field, &str); 4] = [
    (Field::Code, "BNKCODE"),
    (Field::ClassCode, "CLSCODE"),
    (Field::CityCode, "CITYCODE"),
    (Field::Name, "LNAME"),
];

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IbpsRecord {
    pub code: String,
    pub name: String,
    /// Source row, cells joined with '|'.
    pub raw_line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnapsRecord {
    pub code: String,
    pub class_code: String,
    pub city_code: String,
    pub name: String,
    pub raw_line: String,
}

impl IbpsRecord {
    pub fn into_bank_record(self, source: &str) -> BankCodeRecord {
        BankCodeRecord::new(self.code, self.name, self.raw_line, source)
    }
}

impl CnapsRecord {
    pub fn into_bank_record(self, source: &str) -> BankCodeRecord {
        BankCodeRecord::new(self.code, self.name, self.raw_line, source)
    }
}

/// Records keyed by routing code, so the mapper can de-duplicate.
trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for IbpsRecord {
    fn key(&self) -> &str {
        &self.code
    }
}

impl Keyed for CnapsRecord {
    fn key(&self) -> &str {
        &self.code
    }
}

// ============================================================================
// LAYOUT DETECTION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Field {
    Code,
    ClassCode,
    CityCode,
    Name,
}

/// Where a detected header lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HeaderRow {
    /// The table's own column names.
    Columns,
    /// A data row; everything above it is discarded.
    Row(usize),
}

/// How the mapper will address columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Layout {
    Positional {
        width: usize,
    },
    Headered {
        columns: HashMap<Field, usize>,
        header_row: HeaderRow,
    },
}

impl Layout {
    /// Rows that carry data under this layout. A positional layout over a
    /// table whose reader promoted a header puts that row back: the mapper
    /// found no header there, so it is data.
    fn data_rows<'t>(&self, table: &'t Table) -> Vec<&'t [String]> {
        let rows = table.rows().iter().map(Vec::as_slice);
        match self {
            Layout::Headered {
                header_row: HeaderRow::Row(index),
                ..
            } => rows.skip(index + 1).collect(),
            Layout::Headered { .. } => rows.collect(),
            Layout::Positional { .. } if table.has_header() => {
                std::iter::once(table.columns()).chain(rows).collect()
            }
            Layout::Positional { .. } => rows.collect(),
        }
    }
}

/// Scan the column names, then the first `scan_rows` rows, for a header that
/// `matcher` accepts. A row that already carries a valid code is data, never
/// a header.
fn find_header<F>(table: &Table, scan_rows: usize, matcher: F) -> Layout
where
    F: Fn(&[String]) -> Option<HashMap<Field, usize>>,
{
    let header_like = |cells: &[String]| {
        let filled = cells.iter().filter(|c| !c.trim().is_empty()).count();
        filled >= 2 && !cells.iter().any(|c| extract_code(c).is_some())
    };

    if table.has_header() && header_like(table.columns()) {
        if let Some(columns) = matcher(table.columns()) {
            return Layout::Headered {
                columns,
                header_row: HeaderRow::Columns,
            };
        }
    }

    for (index, row) in table.rows().iter().take(scan_rows).enumerate() {
        if !header_like(row) {
            continue;
        }
        if let Some(columns) = matcher(row) {
            debug!(row = index, "promoted data row to header");
            return Layout::Headered {
                columns,
                header_row: HeaderRow::Row(index),
            };
        }
    }

    Layout::Positional {
        width: table.width(),
    }
}

fn normalize_header(cell: &str) -> String {
    normalize_name(cell).to_lowercase()
}

/// Best column for an alias list: exact matches beat containment, and earlier
/// aliases beat later ones.
fn match_alias(cells: &[String], aliases: &[&str], exclude: Option<usize>) -> Option<usize> {
    let normalized: Vec<String> = cells.iter().map(|c| normalize_header(c)).collect();
    let allowed = |i: &usize| Some(*i) != exclude && !normalized[*i].is_empty();

    for alias in aliases {
        if let Some(i) = (0..normalized.len())
            .filter(allowed)
            .find(|&i| normalized[i] == *alias)
        {
            return Some(i);
        }
    }
    for alias in aliases {
        if let Some(i) = (0..normalized.len())
            .filter(allowed)
            .find(|&i| normalized[i].contains(alias))
        {
            return Some(i);
        }
    }
    None
}

fn ibps_header(cells: &[String]) -> Option<HashMap<Field, usize>> {
    let code = match_alias(cells, IBPS_CODE_ALIASES, None)?;
    let name = match_alias(cells, IBPS_NAME_ALIASES, Some(code))?;
    Some(HashMap::from([(Field::Code, code), (Field::Name, name)]))
}

fn cnaps_header(cells: &[String]) -> Option<HashMap<Field, usize>> {
    let mut columns = HashMap::new();
    for (field, header) in CNAPS_HEADERS {
        if let Some(i) = cells
            .iter()
            .position(|c| c.trim().eq_ignore_ascii_case(header))
        {
            columns.insert(field, i);
        }
    }
    (columns.contains_key(&Field::Code) && columns.contains_key(&Field::Name)).then_some(columns)
}

pub fn detect_ibps_layout(table: &Table, scan_rows: usize) -> Layout {
    find_header(table, scan_rows, ibps_header)
}

pub fn detect_cnaps_layout(table: &Table, scan_rows: usize) -> Layout {
    find_header(table, scan_rows, cnaps_header)
}

// ============================================================================
// FIELD CLEANING
// ============================================================================

/// Pull exactly one 12-digit routing code out of a cell.
///
/// Handles spreadsheet float artifacts ("123456789012.0"), separators inside
/// the code ("1021-0009-9996") and a code embedded in other text, as long as
/// there is only one 12-digit run.
pub fn extract_code(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    let trimmed = re_float_artifact().replace(trimmed, "$1");

    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 12 {
        return Some(digits);
    }

    let mut runs = re_digit_run()
        .find_iter(&trimmed)
        .filter(|m| m.as_str().len() == 12);
    match (runs.next(), runs.next()) {
        (Some(run), None) => Some(run.as_str().to_string()),
        _ => None,
    }
}

/// Trim, turn full-width spaces into ASCII spaces, collapse whitespace runs.
pub fn normalize_name(name: &str) -> String {
    name.replace('\u{3000}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn raw_line(cells: &[String]) -> String {
    let end = cells
        .iter()
        .rposition(|c| !c.trim().is_empty())
        .map_or(0, |i| i + 1);
    cells[..end].join("|")
}

/// Keep one record per code: the last occurrence wins, in first-seen order.
fn dedup_by_code<T: Keyed>(records: Vec<T>) -> Vec<T> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<T> = Vec::with_capacity(records.len());

    for record in records {
        match positions.get(record.key()) {
            Some(&at) => unique[at] = record,
            None => {
                positions.insert(record.key().to_string(), unique.len());
                unique.push(record);
            }
        }
    }
    unique
}

// ============================================================================
// MAPPER
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct ColumnMapper {
    header_scan_rows: usize,
}

impl Default for ColumnMapper {
    fn default() -> Self {
        ColumnMapper {
            header_scan_rows: DEFAULT_HEADER_SCAN_ROWS,
        }
    }
}

impl ColumnMapper {
    pub fn new(header_scan_rows: usize) -> Self {
        ColumnMapper { header_scan_rows }
    }

    /// IBPS: header by alias, else the first two columns.
    pub fn map_ibps(&self, table: &Table) -> Vec<IbpsRecord> {
        let layout = detect_ibps_layout(table, self.header_scan_rows);
        let (code_col, name_col) = match &layout {
            Layout::Headered { columns, .. } => (columns[&Field::Code], columns[&Field::Name]),
            Layout::Positional { .. } => (0, 1),
        };

        let records: Vec<IbpsRecord> = layout
            .data_rows(table)
            .into_iter()
            .filter(|row| !is_blank_row(row))
            .filter_map(|row| {
                let code = extract_code(row.get(code_col)?)?;
                let name = normalize_name(row.get(name_col)?);
                (!name.is_empty()).then(|| IbpsRecord {
                    code,
                    name,
                    raw_line: raw_line(row),
                })
            })
            .collect();

        let unique = dedup_by_code(records);
        debug!(?layout, records = unique.len(), "mapped IBPS rows");
        unique
    }

    /// CNAPS: exact BNKCODE/CLSCODE/CITYCODE/LNAME header, else positional
    /// fields, else re-splitting a collapsed single column.
    pub fn map_cnaps(&self, table: &Table) -> Vec<CnapsRecord> {
        let layout = detect_cnaps_layout(table, self.header_scan_rows);

        let records: Vec<CnapsRecord> = match &layout {
            Layout::Headered { columns, .. } => layout
                .data_rows(table)
                .into_iter()
                .filter(|row| !is_blank_row(row))
                .filter_map(|row| {
                    let get = |field: Field| {
                        columns
                            .get(&field)
                            .and_then(|&i| row.get(i))
                            .map(String::as_str)
                            .unwrap_or("")
                    };
                    cnaps_record(
                        get(Field::Code),
                        get(Field::ClassCode),
                        get(Field::CityCode),
                        get(Field::Name),
                        raw_line(row),
                    )
                })
                .collect(),
            Layout::Positional { width } if *width <= 1 => {
                resplit_single_column(&layout.data_rows(table))
            }
            Layout::Positional { .. } => layout
                .data_rows(table)
                .into_iter()
                .filter(|row| !is_blank_row(row))
                .filter_map(|row| positional_cnaps(row, raw_line(row)))
                .collect(),
        };

        let unique = dedup_by_code(records);
        debug!(?layout, records = unique.len(), "mapped CNAPS rows");
        unique
    }
}

fn cnaps_record(
    code: &str,
    class_code: &str,
    city_code: &str,
    name: &str,
    raw_line: String,
) -> Option<CnapsRecord> {
    let code = extract_code(code)?;
    let name = normalize_name(name);
    if name.is_empty() {
        return None;
    }
    Some(CnapsRecord {
        code,
        class_code: class_code.trim().to_string(),
        city_code: city_code.trim().to_string(),
        name,
        raw_line,
    })
}

/// First four fields; anything after the fourth belongs to the name, which
/// a delimiter collision split apart. Narrower rows keep code first and name
/// last.
fn positional_cnaps<S: AsRef<str>>(fields: &[S], raw_line: String) -> Option<CnapsRecord> {
    let fields: Vec<&str> = fields.iter().map(AsRef::as_ref).collect();
    match fields.len() {
        0 | 1 => None,
        2 => cnaps_record(fields[0], "", "", fields[1], raw_line),
        3 => cnaps_record(fields[0], fields[1], "", fields[2], raw_line),
        _ => {
            let name = fields[3..]
                .iter()
                .map(|f| f.trim())
                .filter(|f| !f.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            cnaps_record(fields[0], fields[1], fields[2], &name, raw_line)
        }
    }
}

/// The upstream delimiter guess failed and every row is one cell. Try each
/// candidate delimiter, then whitespace runs (which covers the space
/// candidate); a split is accepted when at
/// least half of the rows yield four or more fields. Rows that still do not
/// split fall back to "12-digit code, then the name".
fn resplit_single_column(rows: &[&[String]]) -> Vec<CnapsRecord> {
    let lines: Vec<&str> = rows
        .iter()
        .filter_map(|row| row.first())
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let mut chosen: Option<Vec<Vec<String>>> = None;
    for candidate in DELIMITER_CANDIDATES.iter().copied().filter(|c| *c != ' ') {
        let split: Vec<Vec<String>> = lines
            .iter()
            .map(|line| line.split(candidate).map(str::to_string).collect())
            .collect();
        if mostly_four_fields(&split) {
            debug!(delimiter = ?candidate, "re-split single CNAPS column");
            chosen = Some(split);
            break;
        }
    }
    if chosen.is_none() {
        let split: Vec<Vec<String>> = lines.iter().map(|l| split_whitespace_runs(l)).collect();
        if mostly_four_fields(&split) {
            debug!("re-split single CNAPS column on whitespace");
            chosen = Some(split);
        }
    }

    lines
        .iter()
        .enumerate()
        .filter_map(|(i, line)| {
            let fields = chosen.as_ref().map(|split| &split[i]);
            match fields {
                Some(fields) if fields.len() >= 4 => {
                    positional_cnaps(fields.as_slice(), line.to_string())
                }
                _ => code_then_name(line),
            }
        })
        .collect()
}

fn mostly_four_fields(split: &[Vec<String>]) -> bool {
    split.iter().filter(|fields| fields.len() >= 4).count() * 2 >= split.len()
}

/// Last resort: one 12-digit run is the code, everything after it the name.
fn code_then_name(line: &str) -> Option<CnapsRecord> {
    let mut runs = re_digit_run()
        .find_iter(line)
        .filter(|m| m.as_str().len() == 12);
    let run = runs.next()?;

    let rest = line[run.end()..]
        .trim_matches(|c: char| c.is_whitespace() || DELIMITER_CANDIDATES.contains(&c));
    cnaps_record(run.as_str(), "", "", rest, line.to_string())
}

// ============================================================================
// CONVENIENCE
// ============================================================================

pub fn map_to_ibps(table: &Table) -> Vec<IbpsRecord> {
    ColumnMapper::default().map_ibps(table)
}

pub fn map_to_cnaps(table: &Table) -> Vec<CnapsRecord> {
    ColumnMapper::default().map_cnaps(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    // ------------------------------------------------------------------------
    // extract_code / normalize_name
    // ------------------------------------------------------------------------

    #[test]
    fn test_extract_code_variants() {
        assert_eq!(extract_code("102100099996").as_deref(), Some("102100099996"));
        assert_eq!(extract_code(" 123456789012.0 ").as_deref(), Some("123456789012"));
        assert_eq!(extract_code("1021-0009-9996").as_deref(), Some("102100099996"));
        assert_eq!(extract_code("No.102100099996号").as_deref(), Some("102100099996"));
    }

    #[test]
    fn test_extract_code_rejects_wrong_length() {
        assert_eq!(extract_code("12345678901"), None);
        assert_eq!(extract_code("1234567890123"), None);
        assert_eq!(extract_code(""), None);
        assert_eq!(extract_code("102100099996 103100000026"), None);
    }

    #[test]
    fn test_extract_code_ignores_non_ascii_digits() {
        assert_eq!(extract_code("１２３４"), None);
        assert_eq!(extract_code("１０２１０００９９９９６"), None);
        assert_eq!(extract_code("No.１２３４号"), None);
    }

    #[test]
    fn test_normalize_name_collapses_fullwidth_spaces() {
        assert_eq!(normalize_name("\u{3000}中国银行\u{3000}北京分行 "), "中国银行 北京分行");
    }

    // ------------------------------------------------------------------------
    // IBPS
    // ------------------------------------------------------------------------

    #[test]
    fn test_ibps_positional_two_columns() {
        let table = Table::headerless(rows(&[&["102100099996", "中国人民银行清算总中心"]]));
        let records = map_to_ibps(&table);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "102100099996");
        assert_eq!(records[0].name, "中国人民银行清算总中心");
        assert_eq!(records[0].raw_line, "102100099996|中国人民银行清算总中心");
    }

    #[test]
    fn test_ibps_header_below_title_block() {
        let table = Table::headerless(rows(&[
            &["清算行行号清单", "", ""],
            &["导出日期", "2024-01-01", ""],
            &["序号", "清算行名称", "清算行行号"],
            &["1", "中国工商银行", "102100099996"],
            &["2", "中国农业银行", "103100000026"],
        ]));

        let layout = detect_ibps_layout(&table, DEFAULT_HEADER_SCAN_ROWS);
        assert_eq!(
            layout,
            Layout::Headered {
                columns: HashMap::from([(Field::Code, 2), (Field::Name, 1)]),
                header_row: HeaderRow::Row(2),
            }
        );

        let records = map_to_ibps(&table);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].code, "103100000026");
        assert_eq!(records[1].name, "中国农业银行");
    }

    #[test]
    fn test_ibps_header_from_column_names() {
        let table = Table::new(
            vec!["Bank Name".to_string(), "Routing Number".to_string()],
            rows(&[&["Bank A", "102100099996"]]),
        );
        let records = map_to_ibps(&table);
        assert_eq!(records[0].code, "102100099996");
        assert_eq!(records[0].name, "Bank A");
    }

    #[test]
    fn test_ibps_drops_invalid_rows_and_dedups() {
        let table = Table::headerless(rows(&[
            &["102100099996", "Old name"],
            &["12345678901", "Too short"],
            &["103100000026", "   "],
            &["", ""],
            &["102100099996", "New name"],
        ]));

        let records = map_to_ibps(&table);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "New name");
    }

    #[test]
    fn test_ibps_97_of_100_rows_survive() {
        let mut data = Vec::new();
        for i in 0..100 {
            let code = if i % 33 == 0 && i > 0 {
                format!("{:011}", i) // 3 invalid: i = 33, 66, 99
            } else {
                format!("{:012}", 100_000_000_000u64 + i)
            };
            data.push(vec![code, format!("Bank {}", i)]);
        }
        let records = map_to_ibps(&Table::headerless(data));
        assert_eq!(records.len(), 97);
        assert!(records.iter().all(|r| r.code.len() == 12));
    }

    #[test]
    fn test_ibps_positional_keeps_promoted_first_row() {
        let table = Table::new(
            vec!["102100099996".to_string(), "Bank A".to_string()],
            rows(&[&["103100000026", "Bank B"]]),
        );
        assert_eq!(
            detect_ibps_layout(&table, DEFAULT_HEADER_SCAN_ROWS),
            Layout::Positional { width: 2 }
        );

        let records = map_to_ibps(&table);
        let codes: Vec<&str> = records.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["102100099996", "103100000026"]);
        assert_eq!(records[0].name, "Bank A");
    }

    // ------------------------------------------------------------------------
    // CNAPS
    // ------------------------------------------------------------------------

    #[test]
    fn test_cnaps_exact_header() {
        let table = Table::new(
            vec![
                "lname".to_string(),
                "BNKCODE".to_string(),
                "CITYCODE".to_string(),
                "CLSCODE".to_string(),
            ],
            rows(&[&["Bank X", "102100099996", "1000", "102"]]),
        );

        let records = map_to_cnaps(&table);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "102100099996");
        assert_eq!(records[0].class_code, "102");
        assert_eq!(records[0].city_code, "1000");
        assert_eq!(records[0].name, "Bank X");
    }

    #[test]
    fn test_cnaps_positional_joins_extra_columns_into_name() {
        let table = Table::headerless(rows(&[&[
            "102100099996",
            "102",
            "1000",
            "Bank",
            "of",
            "Somewhere",
        ]]));

        let records = map_to_cnaps(&table);
        assert_eq!(records[0].name, "Bank of Somewhere");
        assert_eq!(records[0].class_code, "102");
    }

    #[test]
    fn test_cnaps_single_column_resplit_on_semicolon() {
        let table = Table::headerless(rows(&[&["102100099996;001;0100;Bank X"]]));

        let records = map_to_cnaps(&table);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "102100099996");
        assert_eq!(records[0].class_code, "001");
        assert_eq!(records[0].city_code, "0100");
        assert_eq!(records[0].name, "Bank X");
    }

    #[test]
    fn test_cnaps_single_column_keeps_promoted_first_row() {
        let table = Table::new(
            vec!["102100099996;001;0100;Bank X".to_string()],
            rows(&[&["103100000026;001;0100;Bank Y"]]),
        );

        let records = map_to_cnaps(&table);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].code, "102100099996");
        assert_eq!(records[0].name, "Bank X");
        assert_eq!(records[1].name, "Bank Y");
    }

    #[test]
    fn test_cnaps_single_column_whitespace_split() {
        let table = Table::headerless(rows(&[
            &["102100099996  001\u{3000}0100  中国人民银行"],
            &["103100000026  001  0100  中国农业银行"],
        ]));

        let records = map_to_cnaps(&table);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].city_code, "0100");
        assert_eq!(records[1].name, "中国农业银行");
    }

    #[test]
    fn test_cnaps_single_column_regex_fallback() {
        let table = Table::headerless(rows(&[&["102100099996中国人民银行清算总中心"]]));

        let records = map_to_cnaps(&table);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].code, "102100099996");
        assert_eq!(records[0].name, "中国人民银行清算总中心");
        assert_eq!(records[0].class_code, "");
        assert_eq!(records[0].city_code, "");
    }

    #[test]
    fn test_cnaps_never_fails_on_garbage() {
        let table = Table::headerless(rows(&[&["hello"], &["12345"], &[""]]));
        assert!(map_to_cnaps(&table).is_empty());
    }

    #[test]
    fn test_into_bank_record_sets_source() {
        let record = IbpsRecord {
            code: "102100099996".to_string(),
            name: "PBC".to_string(),
            raw_line: "102100099996|PBC".to_string(),
        }
        .into_bank_record("ibps.txt");

        assert_eq!(record.source, "ibps.txt");
        assert!(record.updated_at.is_none());
    }
}
