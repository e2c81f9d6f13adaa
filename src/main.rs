mod cli;

use anyhow::{Context, Result};
use bankcodes::{
    detect_kind, export_table, fill_routing_codes, import_file_with, is_valid_code, read_table,
    write_table, ColumnMapper, Config, Entry, EntryList, ImportMode, PayrollEntry, ReferenceTable, RowIssue,
    SourceKind, Store, Table, TextReader, TransferEntry, WriteOptions,
};
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Rows shown by `inspect`.
const PREVIEW_ROWS: usize = 10;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(db) = cli.db {
        config.database.path = db;
    }
    let store = config.store();
    store
        .ensure()
        .with_context(|| format!("failed to open database {}", store.path().display()))?;

    match cli.command {
        Commands::Import { table, file, mode } => {
            run_import(&config, &store, table.into(), &file, mode.into())
        }
        Commands::Search {
            table,
            keyword,
            limit,
            json,
        } => run_search(
            &store,
            table.into(),
            &keyword,
            limit.unwrap_or(config.import.search_limit),
            json,
        ),
        Commands::Lookup { table, name, json } => run_lookup(&store, table.into(), &name, json),
        Commands::Export {
            table,
            out,
            no_header,
        } => run_export(&config, &store, table.into(), &out, !no_header),
        Commands::Inspect { file } => run_inspect(&file),
        Commands::Payroll { file, out } => run_payroll(&file, &out),
        Commands::Transfer {
            file,
            out,
            fill_from,
        } => run_transfer(&store, &file, &out, fill_from.map(Into::into)),
    }
}

fn init_tracing(verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// REFERENCE TABLES
// ============================================================================

fn run_import(
    config: &Config,
    store: &Store,
    table: ReferenceTable,
    file: &Path,
    mode: ImportMode,
) -> Result<()> {
    let mapper = ColumnMapper::new(config.import.header_scan_rows);

    match import_file_with(store, table, file, mode, &mapper) {
        Ok(summary) => {
            println!(
                "✓ {} rows written to {} ({} mapped, mode {})",
                summary.written, summary.table, summary.mapped, summary.mode
            );
            Ok(())
        }
        // Parsed fine but nothing usable: a warning, not a failure.
        Err(e) if e.is_no_valid_records() => {
            warn!("{}", e);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("failed to import {}", file.display())),
    }
}

fn run_search(
    store: &Store,
    table: ReferenceTable,
    keyword: &str,
    limit: usize,
    json: bool,
) -> Result<()> {
    let records = store
        .search(table, keyword, limit)
        .with_context(|| format!("failed to search {}", table))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    for record in &records {
        println!("{}  {}", record.code, record.name);
    }
    info!(%table, hits = records.len(), "search finished");
    Ok(())
}

fn run_lookup(store: &Store, table: ReferenceTable, name: &str, json: bool) -> Result<()> {
    let key = name.trim();
    let hit = if is_valid_code(key) {
        store.get(table, key)
    } else {
        store.lookup_by_name(table, key)
    }
    .with_context(|| format!("failed to look up '{}' in {}", name, table))?;

    match (hit, json) {
        (hit, true) => println!("{}", serde_json::to_string_pretty(&hit)?),
        (Some(record), false) => println!("{}  {}", record.code, record.name),
        (None, false) => println!("no match for '{}' in {}", name, table),
    }
    Ok(())
}

fn run_export(
    config: &Config,
    store: &Store,
    table: ReferenceTable,
    out: &Path,
    include_header: bool,
) -> Result<()> {
    let options = WriteOptions { include_header };

    match export_table(store, table, out, &options, config.import.export_limit) {
        Ok(rows) => {
            println!("✓ exported {} rows to {}", rows, out.display());
            Ok(())
        }
        Err(e) if e.is_no_valid_records() => {
            warn!("{} is empty, nothing exported", table);
            Ok(())
        }
        Err(e) => Err(e).with_context(|| format!("failed to export to {}", out.display())),
    }
}

fn run_inspect(file: &Path) -> Result<()> {
    let kind = detect_kind(file)?;

    let table = if kind == SourceKind::DelimitedText {
        let (table, profile) = TextReader::new()
            .read_profiled(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        println!("encoding:  {}", profile.encoding.name());
        println!("split:     {:?}", profile.split);
        println!("header:    {}", profile.has_header);
        table
    } else {
        read_table(file).with_context(|| format!("failed to read {}", file.display()))?
    };

    println!("kind:      {:?}", kind);
    println!("rows:      {}", table.len());
    println!("columns:   {}", table.columns().join(" | "));
    for row in table.rows().iter().take(PREVIEW_ROWS) {
        println!("  {}", row.join(" | "));
    }
    Ok(())
}

// ============================================================================
// PAYMENT SHEETS
// ============================================================================

fn load_sheet(file: &Path) -> Result<Table> {
    read_table(file).with_context(|| format!("failed to read {}", file.display()))
}

fn report_issues(issues: &[RowIssue]) {
    if issues.is_empty() {
        println!("✓ all rows valid");
        return;
    }
    for issue in issues {
        warn!("{}", issue);
    }
    println!("⚠ {} validation issue(s), exported anyway", issues.len());
}

fn export_entries<T: Entry>(list: &EntryList<T>, out: &Path) -> Result<()> {
    write_table(&list.to_table(), out, &WriteOptions::default())
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("✓ exported {} rows to {}", list.len(), out.display());
    Ok(())
}

fn run_payroll(file: &Path, out: &Path) -> Result<()> {
    let list = EntryList::<PayrollEntry>::from_table(&load_sheet(file)?);
    report_issues(&list.validate());
    export_entries(&list, out)
}

fn run_transfer(
    store: &Store,
    file: &Path,
    out: &Path,
    fill_from: Option<ReferenceTable>,
) -> Result<()> {
    let mut list = EntryList::<TransferEntry>::from_table(&load_sheet(file)?);

    if let Some(table) = fill_from {
        let (filled_list, filled) = fill_routing_codes(&list, store, table)
            .with_context(|| format!("failed to fill routing codes from {}", table))?;
        println!("✓ filled {} routing code(s) from {}", filled, table);
        list = filled_list;
    }

    report_issues(&list.validate());
    export_entries(&list, out)
}
