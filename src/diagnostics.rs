//! Read-only probes that localize conversion problems in the remote source
//! without running a full sync.

use chrono::NaiveDate;
use itertools::Itertools;
use log::{debug, info, warn};
use serde::Serialize;

use crate::{
    catalog::{Column, TRIP_COLUMNS},
    data::Value,
    dialect::{issue_probe, probe_select},
    error::EngineResult,
    remote::RemoteSources,
};

pub const DEFAULT_BLOCK_SIZE: usize = 8;
pub const ISSUE_SAMPLE_SIZE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionIssue {
    pub column: String,
    pub trip_number: i64,
    pub value: String,
}

/// Names the columns whose coerced select fails on its own.
///
/// One probe over every column first; when that passes nothing is
/// suspect. Otherwise blocks of `block_size` columns are probed and the
/// columns of each failing block are probed one by one. A failure that
/// only shows up for a combination of columns is not attributed to any of
/// them.
pub fn locate_offending_columns(
    sources: &RemoteSources,
    profile_name: &str,
    block_size: usize,
) -> EngineResult<Vec<String>> {
    let profile = sources.profile(profile_name)?;
    let block_size = block_size.max(1);
    let all = TRIP_COLUMNS.iter().collect::<Vec<&'static Column>>();
    let probe = |columns: &[&'static Column]| -> bool {
        let outcome = sources.connect(profile).and_then(|mut connection| {
            let query = probe_select(connection.dialect(), &profile.source_table, columns);
            connection.fetch_all(&query)
        });
        match outcome {
            Ok(_) => true,
            Err(err) => {
                debug!(
                    "Probe over {} column(s) failed: {err}",
                    columns.len()
                );
                false
            }
        }
    };

    if probe(&all) {
        info!("Full column probe for '{}' passed", profile.name);
        return Ok(Vec::new());
    }

    let mut offending = Vec::new();
    for (block_idx, block) in all.chunks(block_size).enumerate() {
        if probe(block) {
            continue;
        }
        info!(
            "Block {} ({}) is suspect",
            block_idx + 1,
            block.iter().map(|column| column.name).join(", ")
        );
        for column in block {
            if !probe(std::slice::from_ref(column)) {
                info!("Column '{}' fails on its own", column.name);
                offending.push(column.name.to_string());
            }
        }
    }
    Ok(offending)
}

/// Samples rows past `after_trip_number` whose numeric columns hold values
/// that do not convert to a float. Columns are probed in name order; a
/// column whose probe fails is skipped with a warning.
pub fn find_conversion_issues(
    sources: &RemoteSources,
    profile_name: &str,
    after_trip_number: i64,
    min_date: Option<NaiveDate>,
) -> EngineResult<Vec<ConversionIssue>> {
    let profile = sources.profile(profile_name)?;
    let mut connection = sources.connect(profile)?;
    let columns = TRIP_COLUMNS
        .iter()
        .filter(|column| column.class.is_numeric_probe())
        .map(|column| column.name)
        .sorted_unstable()
        .collect::<Vec<_>>();
    debug!("Checking {} numeric column(s) for conversion issues", columns.len());

    let mut issues = Vec::new();
    for column in columns {
        let query = issue_probe(
            connection.dialect(),
            &profile.source_table,
            column,
            after_trip_number,
            min_date,
            ISSUE_SAMPLE_SIZE,
        );
        let rows = match connection.fetch_all(&query) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Skipping column '{column}': {err}");
                continue;
            }
        };
        for row in rows {
            let mut cells = row.into_iter();
            let trip_number = match cells.next().flatten() {
                Some(Value::Integer(n)) => n,
                _ => continue,
            };
            let Some(raw) = cells.next().flatten() else {
                continue;
            };
            issues.push(ConversionIssue {
                column: column.to_string(),
                trip_number,
                value: raw.as_display(),
            });
        }
    }
    info!("Found {} conversion issue(s)", issues.len());
    Ok(issues)
}
