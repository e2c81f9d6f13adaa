// Table export: BOM-prefixed UTF-8 CSV, or an xlsx where every cell is text.

use crate::error::Result;
use crate::table::Table;
use rust_xlsxwriter::{Format, Workbook};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::info;

const SHEET_NAME: &str = "Sheet1";

/// Excel's "Text" number format.
const TEXT_FORMAT: &str = "@";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub include_header: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            include_header: true,
        }
    }
}

/// Write `table` to `path`. The extension picks the format: `.csv` gets CSV,
/// anything else an xlsx workbook.
pub fn write_table(table: &Table, path: &Path, options: &WriteOptions) -> Result<()> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    if is_csv {
        write_csv(table, path, options)?;
    } else {
        write_xlsx(table, path, options)?;
    }

    info!(
        path = %path.display(),
        rows = table.len(),
        header = options.include_header,
        "wrote table"
    );
    Ok(())
}

fn write_csv(table: &Table, path: &Path, options: &WriteOptions) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    // BOM so spreadsheet programs pick UTF-8.
    file.write_all(b"\xEF\xBB\xBF")?;

    let mut writer = csv::Writer::from_writer(file);
    if options.include_header {
        writer.write_record(table.columns())?;
    }
    for row in table.rows() {
        writer.write_record(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_xlsx(table: &Table, path: &Path, options: &WriteOptions) -> Result<()> {
    let mut workbook = Workbook::new();
    let text = Format::new().set_num_format(TEXT_FORMAT);

    let sheet = workbook.add_worksheet();
    sheet.set_name(SHEET_NAME)?;

    let mut row_index: u32 = 0;
    if options.include_header {
        for (col, header) in table.columns().iter().enumerate() {
            sheet.write_string_with_format(row_index, col as u16, header, &text)?;
        }
        row_index += 1;
    }

    for row in table.rows() {
        for (col, value) in row.iter().enumerate() {
            sheet.write_string_with_format(row_index, col as u16, value, &text)?;
        }
        row_index += 1;
    }

    workbook.save(path)?;
    Ok(())
}
