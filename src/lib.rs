pub mod catalog;
pub mod cli;
pub mod config;
pub mod data;
pub mod derived;
pub mod diagnostics;
pub mod dialect;
pub mod error;
pub mod export;
pub mod filter;
pub mod order;
pub mod pivot;
pub mod query;
pub mod remote;
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod store;
pub mod sync;
pub mod table;

use std::{
    env,
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use anyhow::{Context, Result};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};

use crate::{
    cli::{Cli, Commands},
    config::AppConfig,
    filter::RuntimeFilters,
    remote::{ConnectorRegistry, RemoteSources},
    report::ReportSettings,
    runner::{OutputFormat, RenderOutcome, ReportPlan},
    store::LocalStore,
    sync::SyncRequest,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("trip_reports", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        config.database = database.clone();
    }
    debug!("Using local database {:?}", config.database);
    match cli.command {
        Commands::Init => handle_init(&config),
        Commands::Sync(args) => handle_sync(&config, &args),
        Commands::Diagnose(args) => handle_diagnose(&config, &args),
        Commands::LocateColumns(args) => handle_locate_columns(&config, &args),
        Commands::Report(args) => handle_report(&config, &args),
        Commands::Reports(args) => handle_reports(&config, &args),
        Commands::Schedule => handle_schedule(&config),
    }
}

fn open_store(config: &AppConfig) -> Result<LocalStore> {
    let store = LocalStore::open(&config.database)
        .with_context(|| format!("Opening local database {:?}", config.database))?;
    store.seed_refresh_settings(&config.refresh)?;
    Ok(store)
}

fn remote_sources(config: &AppConfig) -> RemoteSources {
    RemoteSources::new(config.profiles.clone(), ConnectorRegistry::with_builtin())
}

fn handle_init(config: &AppConfig) -> Result<()> {
    let store = open_store(config)?;
    info!(
        "Local store ready with {} trip row(s)",
        store.count_rows()?
    );
    println!("Initialized local store at {}", config.database.display());
    Ok(())
}

fn handle_sync(config: &AppConfig, args: &cli::SyncArgs) -> Result<()> {
    let mut store = open_store(config)?;
    let sources = remote_sources(config);
    let request = SyncRequest::new(&args.profile, args.chunk_size, args.min_date);
    let report = sync::sync(&mut store, &sources, &request)?;
    println!(
        "Synced {} rows (ritnummer {} -> {})",
        report.inserted, report.from_trip_number, report.through_trip_number
    );
    Ok(())
}

fn handle_diagnose(config: &AppConfig, args: &cli::DiagnoseArgs) -> Result<()> {
    let sources = remote_sources(config);
    let issues = diagnostics::find_conversion_issues(&sources, &args.profile, args.cursor, args.min_date)?;
    if issues.is_empty() {
        println!("No conversion issues detected.");
        return Ok(());
    }
    for issue in issues {
        println!(
            "Column {} has non-convertible value '{}' at ritnummer {}",
            issue.column, issue.value, issue.trip_number
        );
    }
    Ok(())
}

fn handle_locate_columns(config: &AppConfig, args: &cli::LocateColumnsArgs) -> Result<()> {
    let sources = remote_sources(config);
    let columns = diagnostics::locate_offending_columns(&sources, &args.profile, args.block_size)?;
    if columns.is_empty() {
        println!("No offending columns detected.");
        return Ok(());
    }
    println!("Columns failing selection:");
    for column in columns {
        println!("- {column}");
    }
    Ok(())
}

fn handle_report(config: &AppConfig, args: &cli::ReportArgs) -> Result<()> {
    let store = open_store(config)?;
    let runtime = RuntimeFilters::from_params(
        args.params
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str())),
    );

    // CSV streams row by row into the output file or stdout.
    if args.format == OutputFormat::Csv {
        let definition = match runner::load_renderable(&store, args.id)? {
            Ok(definition) => definition,
            Err(message) => {
                warn!("{message}");
                println!("{message}");
                return Ok(());
            }
        };
        let plan = ReportPlan::compile(&definition, args.limit, &runtime);
        match &args.output {
            Some(target) => {
                let file = File::create(target).with_context(|| format!("Creating report output {target:?}"))?;
                let mut sink = plan.write_csv(&store, BufWriter::new(file))?;
                sink.flush().with_context(|| format!("Writing report output to {target:?}"))?;
                println!("Wrote {}", target.display());
            }
            None => {
                let stdout = io::stdout();
                let mut sink = plan.write_csv(&store, stdout.lock())?;
                sink.flush().context("Flushing stdout")?;
            }
        }
        return Ok(());
    }

    match runner::run_report(&store, args.id, args.format, args.limit, &runtime)? {
        RenderOutcome::Table(view) => table::print_view(&view),
        RenderOutcome::Csv { filename, bytes }
        | RenderOutcome::Xlsx { filename, bytes }
        | RenderOutcome::Pdf { filename, bytes } => {
            let target = args.output.clone().unwrap_or_else(|| PathBuf::from(&filename));
            write_output(&target, &bytes)?;
            println!("Wrote {}", target.display());
        }
        RenderOutcome::Redirect { message } => {
            warn!("{message}");
            println!("{message}");
        }
    }
    Ok(())
}

fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("Writing report output to {path:?}"))
}

fn handle_reports(config: &AppConfig, args: &cli::ReportsArgs) -> Result<()> {
    let store = open_store(config)?;
    if let Some(path) = &args.import {
        let raw = fs::read_to_string(path).with_context(|| format!("Reading report definition {path:?}"))?;
        let settings: ReportSettings = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&raw).with_context(|| format!("Parsing report definition {path:?}"))?
        } else {
            serde_yaml::from_str(&raw).with_context(|| format!("Parsing report definition {path:?}"))?
        };
        let created = store.create_report(settings)?;
        println!("Created report {} ({})", created.id, created.settings.name);
        return Ok(());
    }
    if let Some(id) = args.duplicate {
        let copy = store.duplicate_report(id)?;
        println!("Created report {} ({})", copy.id, copy.settings.name);
        return Ok(());
    }
    if let Some(id) = args.delete {
        store.delete_report(id)?;
        println!("Deleted report {id}");
        return Ok(());
    }

    let headers = ["id", "name", "dataset", "pivot", "created_at"]
        .iter()
        .map(|h| h.to_string())
        .collect::<Vec<_>>();
    let rows = store
        .list_reports()?
        .into_iter()
        .map(|definition| {
            vec![
                definition.id.to_string(),
                definition.settings.name,
                definition.settings.dataset,
                definition.settings.pivot_enabled.to_string(),
                definition.created_at.format(data::DATETIME_FORMAT).to_string(),
            ]
        })
        .collect::<Vec<_>>();
    print!("{}", table::render_table(&headers, &rows));
    Ok(())
}

fn handle_schedule(config: &AppConfig) -> Result<()> {
    let mut store = open_store(config)?;
    let sources = remote_sources(config);
    info!("Starting refresh scheduler");
    scheduler::run_forever(&mut store, &sources)
}
