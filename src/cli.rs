use bankcodes::{ImportMode, ReferenceTable};
use clap::{Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Offline bank routing code book and payment sheet editor", long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to ./bankcodes.toml when present)
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Database file, overrides the configuration
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub db: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Import a routing code file into a reference table
    Import {
        #[arg(value_enum)]
        table: TableArg,
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, value_enum, default_value_t = ModeArg::Replace)]
        mode: ModeArg,
    },
    /// Search codes or names (empty keyword lists the first rows)
    Search {
        #[arg(value_enum)]
        table: TableArg,
        #[arg(default_value = "")]
        keyword: String,
        #[arg(long)]
        limit: Option<usize>,
        /// Print JSON instead of a plain listing
        #[arg(long)]
        json: bool,
    },
    /// Find the best routing code for a bank name, or the bank for a code
    Lookup {
        #[arg(value_enum)]
        table: TableArg,
        name: String,
        #[arg(long)]
        json: bool,
    },
    /// Export a reference table to .xlsx or .csv
    Export {
        #[arg(value_enum)]
        table: TableArg,
        #[arg(value_hint = ValueHint::FilePath)]
        out: PathBuf,
        #[arg(long)]
        no_header: bool,
    },
    /// Show how a file is read: encoding, delimiter, columns, first rows
    Inspect {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
    },
    /// Validate a payroll sheet and export it as text cells
    Payroll {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, value_hint = ValueHint::FilePath)]
        out: PathBuf,
    },
    /// Validate a batch-transfer sheet, optionally filling routing codes
    Transfer {
        #[arg(value_hint = ValueHint::FilePath)]
        file: PathBuf,
        #[arg(long, value_hint = ValueHint::FilePath)]
        out: PathBuf,
        /// Fill routing codes by bank name from this table
        #[arg(long, value_enum)]
        fill_from: Option<TableArg>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TableArg {
    Ibps,
    Cnaps,
}

impl From<TableArg> for ReferenceTable {
    fn from(arg: TableArg) -> Self {
        match arg {
            TableArg::Ibps => ReferenceTable::Ibps,
            TableArg::Cnaps => ReferenceTable::Cnaps,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Replace,
    Merge,
}

impl From<ModeArg> for ImportMode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Replace => ImportMode::Replace,
            ModeArg::Merge => ImportMode::Merge,
        }
    }
}
