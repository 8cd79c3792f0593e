use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

use crate::{
    config::{DEFAULT_CHUNK_SIZE, DEFAULT_PROFILE},
    data::parse_naive_date,
    diagnostics::DEFAULT_BLOCK_SIZE,
    runner::OutputFormat,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Trip report builder and incremental sync engine", long_about = None)]
pub struct Cli {
    /// YAML configuration file (profiles, local database, refresh schedule)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
    /// Local SQLite database, overriding the configuration
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the local schema and seed the refresh settings
    Init,
    /// Append new remote rows past the local cursor
    Sync(SyncArgs),
    /// List sample rows whose numeric columns do not convert
    Diagnose(DiagnoseArgs),
    /// Find the columns whose conversion breaks the remote select
    LocateColumns(LocateColumnsArgs),
    /// Render a saved report
    Report(ReportArgs),
    /// List, import, duplicate or delete saved reports
    Reports(ReportsArgs),
    /// Run the daily refresh loop in the foreground
    Schedule,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    /// Connection profile name
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,
    /// Rows fetched and committed per transaction
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    /// Ignore remote rows dated before this day
    #[arg(long, alias = "min-ritdatum", value_parser = parse_date)]
    pub min_date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub struct DiagnoseArgs {
    /// Connection profile name
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,
    /// Only rows with a trip number above this one
    #[arg(long, default_value_t = 0)]
    pub cursor: i64,
    /// Ignore remote rows dated before this day
    #[arg(long, alias = "min-ritdatum", value_parser = parse_date)]
    pub min_date: Option<NaiveDate>,
}

#[derive(Debug, Args)]
pub struct LocateColumnsArgs {
    /// Connection profile name
    #[arg(short, long, default_value = DEFAULT_PROFILE)]
    pub profile: String,
    /// Columns per probe block
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE)]
    pub block_size: usize,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    /// Report definition id
    pub id: i64,
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Html)]
    pub format: OutputFormat,
    /// Row limit for this render only
    #[arg(long)]
    pub limit: Option<i64>,
    /// Output file; csv goes to stdout and binary formats to `<name>.<ext>` when omitted
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Request-time filter parameter such as `rt_val_status=done` or `rt_from_ritdatum=2024-01-01`
    #[arg(long = "param", value_parser = parse_param, action = clap::ArgAction::Append)]
    pub params: Vec<(String, String)>,
}

#[derive(Debug, Args)]
pub struct ReportsArgs {
    /// Create a report from a JSON or YAML definition file
    #[arg(long, conflicts_with_all = ["duplicate", "delete"])]
    pub import: Option<PathBuf>,
    /// Copy the report with this id
    #[arg(long, conflicts_with = "delete")]
    pub duplicate: Option<i64>,
    /// Delete the report with this id
    #[arg(long)]
    pub delete: Option<i64>,
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    parse_naive_date(value).map_err(|err| err.to_string())
}

pub fn parse_param(value: &str) -> Result<(String, String), String> {
    let (key, raw) = value
        .split_once('=')
        .ok_or_else(|| format!("Parameter '{value}' must look like key=value"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err("Parameter name cannot be empty".to_string());
    }
    Ok((key.to_string(), raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_split_on_first_equals() {
        assert_eq!(
            parse_param("rt_val_status=a=b").unwrap(),
            ("rt_val_status".to_string(), "a=b".to_string())
        );
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn sync_defaults_follow_configuration_defaults() {
        let cli = Cli::try_parse_from(["trip-reports", "sync", "--min-ritdatum", "2024-01-01"]).unwrap();
        let Commands::Sync(args) = cli.command else {
            panic!("expected sync");
        };
        assert_eq!(args.profile, "Historie");
        assert_eq!(args.chunk_size, 1000);
        assert_eq!(args.min_date, NaiveDate::from_ymd_opt(2024, 1, 1));
    }
}
