// Error taxonomy for the ingestion core
//
// Parsing and mapping failures are typed; row-level validation problems are
// NOT errors, they are collected as `RowIssue`s (see entries.rs).

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used across the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Remedy shown whenever a file cannot be turned into a table.
pub const RESAVE_HINT: &str = "re-save the file as CSV (UTF-8) or .xlsx and try again";

#[derive(Debug, Error)]
pub enum Error {
    /// No candidate encoding could decode the file.
    #[error("cannot decode {path}: no supported text encoding matched; {hint}")]
    Decode { path: PathBuf, hint: String },

    /// The file decoded, but no delimiter/layout produced a usable table.
    #[error("cannot find a table in {path}; {hint}")]
    Structure { path: PathBuf, hint: String },

    /// Unknown extension, or an extension the content contradicts.
    #[error(transparent)]
    UnsupportedFormat(#[from] UnsupportedFormat),

    /// The file parsed, but not a single row carried a valid 12-digit code.
    #[error("no valid 12-digit routing codes found for table '{table}' in {path}")]
    NoValidRecords { table: String, path: PathBuf },

    /// Entry list command pointed outside the list.
    #[error("row {index} is out of range (list has {len} rows)")]
    RowOutOfRange { index: usize, len: usize },

    #[error("spreadsheet error in {path}: {message}; {hint}")]
    Spreadsheet {
        path: PathBuf,
        message: String,
        hint: String,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("xlsx write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum UnsupportedFormat {
    #[error("unsupported file type '{0}'; {hint}", hint = RESAVE_HINT)]
    UnknownExtension(String),

    /// Extension claims one container format, bytes say otherwise.
    #[error("{path} has a .{extension} extension but is not a {expected} file (mismatched extension); {hint}", hint = RESAVE_HINT)]
    MismatchedExtension {
        path: PathBuf,
        extension: String,
        expected: &'static str,
    },
}

impl Error {
    /// True for the "parsed fine, nothing usable" outcome that callers report
    /// as a warning instead of a failure.
    pub fn is_no_valid_records(&self) -> bool {
        matches!(self, Error::NoValidRecords { .. })
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(e.to_string())
    }
}
