//! Incremental append-only replication of the remote trip source.
//!
//! A run reads the local cursor, issues one remote select past it and
//! commits the result chunk by chunk. A failed run keeps every chunk
//! committed before the failure, and the next run resumes from there.

use std::fmt;

use chrono::{NaiveDate, NaiveTime, Utc};
use log::{debug, error, info};
use serde::Serialize;

use crate::{
    catalog::{Column, ColumnClass, TRIP_COLUMNS, TRIP_DATE, TRIP_NUMBER, column_index},
    data::{
        Value, normalize_decimal, parse_decimal_literal, parse_naive_date, parse_naive_datetime,
        parse_naive_time,
    },
    dialect::{SyncSelect, sync_select},
    error::{EngineError, EngineResult},
    remote::{RemoteRow, RemoteSources},
    store::LocalStore,
};

/// Resumption point: the largest `(date, trip number)` ingested so far.
/// Ordering is lexicographic, date first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Cursor {
    pub date: NaiveDate,
    pub trip_number: i64,
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.date, self.trip_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub profile: String,
    pub chunk_size: usize,
    pub min_date: Option<NaiveDate>,
}

impl SyncRequest {
    pub fn new(profile: impl Into<String>, chunk_size: usize, min_date: Option<NaiveDate>) -> Self {
        Self {
            profile: profile.into(),
            chunk_size,
            min_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub profile: String,
    pub inserted: usize,
    pub from_date: Option<NaiveDate>,
    pub from_trip_number: i64,
    pub through_date: Option<NaiveDate>,
    pub through_trip_number: i64,
}

pub fn sync(
    store: &mut LocalStore,
    sources: &RemoteSources,
    request: &SyncRequest,
) -> EngineResult<SyncReport> {
    if request.chunk_size < 1 {
        return Err(EngineError::validation("chunk_size must be at least 1"));
    }
    let profile = sources.profile(&request.profile)?;
    let start = store.max_cursor()?;
    match &start {
        Some(cursor) => info!("Syncing profile '{}' after cursor {cursor}", profile.name),
        None => info!("Syncing profile '{}' from the beginning", profile.name),
    }

    let mut connection = sources.connect(profile)?;
    let columns = TRIP_COLUMNS.iter().collect::<Vec<&'static Column>>();
    let query = sync_select(
        connection.dialect(),
        &profile.source_table,
        &columns,
        SyncSelect {
            min_date: request.min_date,
            cursor: start.as_ref(),
            limit: None,
        },
    );
    debug!("Remote select: {}", query.sql);

    let date_idx = column_index(TRIP_DATE);
    let trip_idx = column_index(TRIP_NUMBER);
    let mut through = start;
    let mut inserted = 0usize;

    let outcome = connection.fetch_chunks(&query, request.chunk_size, &mut |chunk| {
        let rows = chunk.into_iter().map(coerce_row).collect::<Vec<_>>();
        let chunk_max = rows
            .iter()
            .filter_map(|row| row_cursor(row, date_idx, trip_idx))
            .max();
        store.append_chunk(&rows, Utc::now().naive_utc())?;
        inserted += rows.len();
        through = through.max(chunk_max);
        debug!("Committed {} row(s), {inserted} so far", rows.len());
        Ok(())
    });
    if let Err(err) = outcome {
        error!(
            "Sync of profile '{}' failed after {inserted} row(s): {err}",
            profile.name
        );
        return Err(err);
    }

    let report = SyncReport {
        profile: profile.name.clone(),
        inserted,
        from_date: start.map(|c| c.date),
        from_trip_number: start.map_or(0, |c| c.trip_number),
        through_date: through.map(|c| c.date),
        through_trip_number: through.map_or(0, |c| c.trip_number),
    };
    info!(
        "Synced {} row(s) for '{}' (trip number {} -> {})",
        report.inserted, report.profile, report.from_trip_number, report.through_trip_number
    );
    Ok(report)
}

fn row_cursor(row: &[Option<Value>], date_idx: Option<usize>, trip_idx: Option<usize>) -> Option<Cursor> {
    let date = row.get(date_idx?)?.as_ref()?.date_component()?;
    let trip_number = match row.get(trip_idx?)?.as_ref()? {
        Value::Integer(n) => *n,
        _ => return None,
    };
    Some(Cursor { date, trip_number })
}

/// Maps a fetched row onto the local column classes. Cells that do not fit
/// their class become empty; arbitrary-precision decimals are narrowed.
pub fn coerce_row(row: RemoteRow) -> Vec<Option<Value>> {
    let mut cells = row.into_iter();
    TRIP_COLUMNS
        .iter()
        .map(|column| cells.next().flatten().and_then(|value| coerce_cell(value, column.class)))
        .collect()
}

pub fn coerce_cell(value: Value, class: ColumnClass) -> Option<Value> {
    match class {
        ColumnClass::Text => Some(match value {
            Value::Decimal(d) => normalize_decimal(d),
            other => other,
        }),
        ColumnClass::Numeric | ColumnClass::Decimal => match value {
            Value::Integer(_) | Value::Float(_) => Some(value),
            Value::Decimal(d) => Some(normalize_decimal(d)),
            Value::String(s) => parse_decimal_literal(&s).map(normalize_decimal),
            _ => None,
        },
        ColumnClass::TripNumber => match value {
            Value::Integer(_) => Some(value),
            Value::Decimal(d) => match normalize_decimal(d) {
                integer @ Value::Integer(_) => Some(integer),
                _ => None,
            },
            Value::String(s) => s.trim().parse().ok().map(Value::Integer),
            _ => None,
        },
        ColumnClass::DateTime => match value {
            Value::DateTime(_) => Some(value),
            Value::Date(d) => Some(Value::DateTime(d.and_time(NaiveTime::MIN))),
            Value::String(s) => parse_naive_datetime(&s)
                .ok()
                .or_else(|| parse_naive_date(&s).ok().map(|d| d.and_time(NaiveTime::MIN)))
                .map(Value::DateTime),
            _ => None,
        },
        ColumnClass::Time => match value {
            Value::Time(_) => Some(value),
            Value::DateTime(dt) => Some(Value::Time(dt.time())),
            Value::String(s) => parse_naive_time(&s).ok().map(Value::Time),
            _ => None,
        },
    }
}
