// Bank routing code book - core library
// Reads loosely structured IBPS/CNAPS code files, keeps them in SQLite and
// edits payroll/transfer sheets. Used by the CLI and the tests.

pub mod config;
pub mod entries;
pub mod error;
pub mod import;
pub mod mapper;
pub mod reader;
pub mod sniff;
pub mod store;
pub mod table;
pub mod writer;

// Re-export commonly used types
pub use config::{Config, DatabaseConfig, ImportConfig};
pub use entries::{
    fill_routing_codes, Entry, EntryCommand, EntryList, PayrollEntry, RowIssue, TransferEntry,
};
pub use error::{Error, Result, UnsupportedFormat};
pub use import::{export_table, import_file, import_file_with, ImportMode, ImportSummary};
pub use mapper::{
    extract_code, map_to_cnaps, map_to_ibps, CnapsRecord, ColumnMapper, IbpsRecord, Layout,
};
pub use reader::{
    detect_kind, get_reader, read_table, SourceKind, TableReader, TextProfile, TextReader,
    WorkbookFormat,
};
pub use sniff::{sniff, sniff_delimiter, TextEncoding};
pub use store::{is_valid_code, setup_database, BankCodeRecord, ReferenceTable, Store};
pub use table::Table;
pub use writer::{write_table, WriteOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
