// Payment entry lists: payroll and batch-transfer sheets that are loaded,
// edited, validated and exported. Entries never reach the reference store.

use crate::error::{Error, Result};
use crate::store::{ReferenceTable, Store};
use crate::table::{is_blank_row, Table};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

// ============================================================================
// VALIDATION
// ============================================================================

/// A non-fatal problem with one entry. Validation collects every issue of a
/// list instead of stopping at the first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowIssue {
    /// Zero-based position in the list.
    pub row: usize,
    pub field: &'static str,
    pub message: String,
}

impl RowIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        RowIssue {
            row: 0,
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for RowIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {}: {}", self.row + 1, self.field, self.message)
    }
}

fn require_text(value: &str, field: &'static str, issues: &mut Vec<RowIssue>) {
    if value.trim().is_empty() {
        issues.push(RowIssue::new(field, "must not be empty"));
    }
}

/// Account and card numbers: 6 to 32 digits.
fn require_account_number(value: &str, field: &'static str, issues: &mut Vec<RowIssue>) {
    let value = value.trim();
    let ok = (6..=32).contains(&value.len()) && value.bytes().all(|b| b.is_ascii_digit());
    if !ok {
        issues.push(RowIssue::new(field, "must be 6-32 digits"));
    }
}

fn require_positive_amount(value: &str, field: &'static str, issues: &mut Vec<RowIssue>) {
    match value.trim().parse::<f64>() {
        Ok(amount) if amount.is_finite() && amount > 0.0 => {}
        Ok(_) => issues.push(RowIssue::new(field, "must be greater than 0")),
        Err(_) => issues.push(RowIssue::new(field, "is not a valid number")),
    }
}

// ============================================================================
// ENTRY TRAIT
// ============================================================================

/// One row of a payment sheet with a fixed set of named columns.
pub trait Entry: Clone {
    /// Column headers, in export order.
    const COLUMNS: &'static [&'static str];

    /// Build from cells given in `COLUMNS` order; missing cells are empty.
    fn from_cells(cells: &[String]) -> Self;

    fn to_cells(&self) -> Vec<String>;

    /// Problems with this entry. `row` is left at zero; lists fill it in.
    fn validate(&self) -> Vec<RowIssue>;

    fn columns() -> Vec<String> {
        Self::COLUMNS.iter().map(|c| c.to_string()).collect()
    }
}

fn cell(cells: &[String], index: usize) -> String {
    cells.get(index).map(|c| c.trim().to_string()).unwrap_or_default()
}

// ============================================================================
// PAYROLL
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayrollEntry {
    pub bank_name: String,
    pub card_number: String,
    pub payee_name: String,
    pub amount: String,
}

impl Entry for PayrollEntry {
    const COLUMNS: &'static [&'static str] = &["收款人银行名称", "收款人卡号", "收款人名称", "金额"];

    fn from_cells(cells: &[String]) -> Self {
        PayrollEntry {
            bank_name: cell(cells, 0),
            card_number: cell(cells, 1),
            payee_name: cell(cells, 2),
            amount: cell(cells, 3),
        }
    }

    fn to_cells(&self) -> Vec<String> {
        vec![
            self.bank_name.clone(),
            self.card_number.clone(),
            self.payee_name.clone(),
            self.amount.clone(),
        ]
    }

    fn validate(&self) -> Vec<RowIssue> {
        let mut issues = Vec::new();
        require_text(&self.bank_name, Self::COLUMNS[0], &mut issues);
        require_account_number(&self.card_number, Self::COLUMNS[1], &mut issues);
        require_text(&self.payee_name, Self::COLUMNS[2], &mut issues);
        require_positive_amount(&self.amount, Self::COLUMNS[3], &mut issues);
        issues
    }
}

// ============================================================================
// TRANSFER
// ============================================================================

/// Transfer mode value for an inter-bank transfer.
pub const INTERBANK_TRANSFER: &str = "1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferEntry {
    pub account: String,
    pub account_name: String,
    pub amount: String,
    pub transfer_mode: String,
    pub bank_info_type: String,
    pub bank_name: String,
    pub routing_code: String,
    pub purpose: String,
    pub detail_note: String,
}

impl TransferEntry {
    const ROUTING_CODE_COLUMN: &'static str = "收款方银行大额支付行号/跨行清算行号";

    pub fn is_interbank(&self) -> bool {
        self.transfer_mode.trim() == INTERBANK_TRANSFER
    }
}

impl Entry for TransferEntry {
    const COLUMNS: &'static [&'static str] = &[
        "收款方账号",
        "收款方户名",
        "金额",
        "转账方式",
        "行别信息类型",
        "收款方银行名称",
        TransferEntry::ROUTING_CODE_COLUMN,
        "用途",
        "明细标注",
    ];

    fn from_cells(cells: &[String]) -> Self {
        TransferEntry {
            account: cell(cells, 0),
            account_name: cell(cells, 1),
            amount: cell(cells, 2),
            transfer_mode: cell(cells, 3),
            bank_info_type: cell(cells, 4),
            bank_name: cell(cells, 5),
            routing_code: cell(cells, 6),
            purpose: cell(cells, 7),
            detail_note: cell(cells, 8),
        }
    }

    fn to_cells(&self) -> Vec<String> {
        vec![
            self.account.clone(),
            self.account_name.clone(),
            self.amount.clone(),
            self.transfer_mode.clone(),
            self.bank_info_type.clone(),
            self.bank_name.clone(),
            self.routing_code.clone(),
            self.purpose.clone(),
            self.detail_note.clone(),
        ]
    }

    fn validate(&self) -> Vec<RowIssue> {
        let mut issues = Vec::new();
        require_text(&self.account_name, Self::COLUMNS[1], &mut issues);
        require_account_number(&self.account, Self::COLUMNS[0], &mut issues);
        require_positive_amount(&self.amount, Self::COLUMNS[2], &mut issues);
        if self.is_interbank() && self.routing_code.trim().is_empty() {
            issues.push(RowIssue::new(
                Self::ROUTING_CODE_COLUMN,
                "inter-bank transfers need a routing code (IBPS or CNAPS)",
            ));
        }
        issues
    }
}

// ============================================================================
// ENTRY LIST
// ============================================================================

/// Edit applied to an entry list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryCommand<T> {
    Add(T),
    Edit { index: usize, entry: T },
    Delete { index: usize },
}

/// Immutable list of entries. Commands produce a new list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryList<T> {
    entries: Vec<T>,
}

impl<T> Default for EntryList<T> {
    fn default() -> Self {
        EntryList {
            entries: Vec::new(),
        }
    }
}

impl<T: Entry> EntryList<T> {
    pub fn new(entries: Vec<T>) -> Self {
        EntryList { entries }
    }

    pub fn entries(&self) -> &[T] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn apply(&self, command: EntryCommand<T>) -> Result<EntryList<T>> {
        let mut entries = self.entries.clone();
        match command {
            EntryCommand::Add(entry) => entries.push(entry),
            EntryCommand::Edit { index, entry } => {
                let slot = entries.get_mut(index).ok_or(Error::RowOutOfRange {
                    index,
                    len: self.entries.len(),
                })?;
                *slot = entry;
            }
            EntryCommand::Delete { index } => {
                if index >= entries.len() {
                    return Err(Error::RowOutOfRange {
                        index,
                        len: self.entries.len(),
                    });
                }
                entries.remove(index);
            }
        }
        Ok(EntryList { entries })
    }

    /// Every issue of every entry, in row order.
    pub fn validate(&self) -> Vec<RowIssue> {
        self.entries
            .iter()
            .enumerate()
            .flat_map(|(row, entry)| {
                entry
                    .validate()
                    .into_iter()
                    .map(move |issue| RowIssue { row, ..issue })
            })
            .collect()
    }

    /// Pick columns by exact header name. Missing columns become empty cells
    /// and blank rows are dropped.
    pub fn from_table(table: &Table) -> Self {
        let positions: Vec<Option<usize>> = T::COLUMNS
            .iter()
            .map(|name| table.column_index(name))
            .collect();

        let missing: Vec<&str> = T::COLUMNS
            .iter()
            .zip(&positions)
            .filter(|(_, pos)| pos.is_none())
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            debug!(?missing, "columns missing from sheet, left empty");
        }

        let entries = table
            .rows()
            .iter()
            .filter(|row| !is_blank_row(row))
            .map(|row| {
                let cells: Vec<String> = positions
                    .iter()
                    .map(|pos| pos.and_then(|i| row.get(i)).cloned().unwrap_or_default())
                    .collect();
                T::from_cells(&cells)
            })
            .collect();

        EntryList { entries }
    }

    pub fn to_table(&self) -> Table {
        Table::new(
            T::columns(),
            self.entries.iter().map(T::to_cells).collect(),
        )
    }
}

/// Fill the routing-code column from the reference store, matching on the
/// payee bank name. Rows without a bank name, or without a hit, are left as
/// they are. Returns the new list and how many rows were filled.
pub fn fill_routing_codes(
    list: &EntryList<TransferEntry>,
    store: &Store,
    table: ReferenceTable,
) -> Result<(EntryList<TransferEntry>, usize)> {
    let mut entries = Vec::with_capacity(list.len());
    let mut filled = 0;

    for entry in list.entries() {
        let mut entry = entry.clone();
        if !entry.bank_name.trim().is_empty() {
            if let Some(hit) = store.lookup_by_name(table, &entry.bank_name)? {
                debug!(bank = %entry.bank_name, code = %hit.code, "filled routing code");
                entry.routing_code = hit.code;
                filled += 1;
            }
        }
        entries.push(entry);
    }

    info!(%table, filled, rows = list.len(), "filled routing codes");
    Ok((EntryList::new(entries), filled))
}
