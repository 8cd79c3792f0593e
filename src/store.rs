//! Local relational store on SQLite.
//!
//! Holds the append-only trip table, the report definitions and the single
//! refresh settings row. Temporal values are stored as text in layouts that
//! sort chronologically.

use std::{fmt::Write as _, path::Path};

use anyhow::Context;
use chrono::{NaiveDate, NaiveDateTime, Utc};
use log::debug;
use rusqlite::{
    Connection, OptionalExtension, Row, ToSql,
    types::{ToSqlOutput, Value as SqlValue, ValueRef},
};

use crate::{
    catalog::{ColumnClass, TRIP_COLUMNS, TRIP_DATE, TRIP_NUMBER},
    config::{RefreshSettings, hh_mm},
    data::{
        DATE_FORMAT, STORED_DATETIME_FORMAT, STORED_TIME_FORMAT, Value, normalize_decimal,
        parse_decimal_literal, parse_naive_date, parse_naive_datetime, parse_naive_time,
    },
    error::{EngineError, EngineResult},
    query::{LOCAL_TABLE, SelectQuery, quote_ident},
    report::{ReportDefinition, ReportSettings},
    sync::Cursor,
};

const INGESTED_AT: &str = "ingested_at";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let output = match self {
            Value::String(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Integer(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Value::Decimal(d) => ToSqlOutput::Owned(match normalize_decimal(*d) {
                Value::Integer(i) => SqlValue::Integer(i),
                Value::Float(f) => SqlValue::Real(f),
                other => SqlValue::Text(other.as_display()),
            }),
            Value::Date(d) => ToSqlOutput::Owned(SqlValue::Text(d.format(DATE_FORMAT).to_string())),
            Value::DateTime(dt) => ToSqlOutput::Owned(SqlValue::Text(
                dt.format(STORED_DATETIME_FORMAT).to_string(),
            )),
            Value::Time(t) => {
                ToSqlOutput::Owned(SqlValue::Text(t.format(STORED_TIME_FORMAT).to_string()))
            }
        };
        Ok(output)
    }
}

/// Reads a stored cell back into the value model of its column class.
pub fn decode_cell(raw: ValueRef<'_>, class: ColumnClass) -> Option<Value> {
    match raw {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Value::Integer(i)),
        ValueRef::Real(f) => Some(Value::Float(f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            Some(decode_text(&text, class))
        }
    }
}

fn decode_text(text: &str, class: ColumnClass) -> Value {
    let parsed = match class {
        ColumnClass::DateTime => parse_naive_datetime(text).ok().map(Value::DateTime).or_else(|| {
            parse_naive_date(text)
                .ok()
                .map(|d| Value::DateTime(d.and_time(chrono::NaiveTime::MIN)))
        }),
        ColumnClass::Time => parse_naive_time(text).ok().map(Value::Time),
        ColumnClass::Numeric | ColumnClass::Decimal | ColumnClass::TripNumber => {
            parse_decimal_literal(text).map(normalize_decimal)
        }
        ColumnClass::Text => None,
    };
    parsed.unwrap_or_else(|| Value::String(text.to_string()))
}

pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    pub fn open(path: &Path) -> EngineResult<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Opening local store {path:?}"))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> EngineResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> EngineResult<Self> {
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn migrate(&self) -> EngineResult<()> {
        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    id INTEGER PRIMARY KEY AUTOINCREMENT,\n    {INGESTED_AT} TEXT NOT NULL",
            quote_ident(LOCAL_TABLE)
        );
        for column in TRIP_COLUMNS {
            let _ = write!(
                ddl,
                ",\n    {} {}",
                quote_ident(column.name),
                column.class.local_sql_type()
            );
        }
        ddl.push_str("\n);\n");
        let _ = writeln!(
            ddl,
            "CREATE INDEX IF NOT EXISTS ix_rgritten_cursor ON {} ({}, {});",
            quote_ident(LOCAL_TABLE),
            quote_ident(TRIP_DATE),
            quote_ident(TRIP_NUMBER)
        );
        ddl.push_str(
            "CREATE TABLE IF NOT EXISTS report_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    dataset TEXT NOT NULL,
    row_limit INTEGER NOT NULL,
    include_fields TEXT NOT NULL,
    filter_fields TEXT NOT NULL,
    group_fields TEXT NOT NULL,
    sort_fields TEXT NOT NULL,
    pivot_enabled INTEGER NOT NULL DEFAULT 0,
    pivot_row_fields TEXT NOT NULL,
    pivot_col_field TEXT,
    pivot_values TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS data_refresh_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    enabled INTEGER NOT NULL DEFAULT 0,
    run_time TEXT NOT NULL,
    profile_name TEXT NOT NULL,
    chunk_size INTEGER NOT NULL,
    min_ritdatum TEXT,
    last_run_date TEXT
);",
        );
        self.conn.execute_batch(&ddl)?;
        Ok(())
    }

    // --- trip rows -------------------------------------------------------

    /// Largest `(date, trip number)` present locally.
    pub fn max_cursor(&self) -> EngineResult<Option<Cursor>> {
        let sql = format!(
            "SELECT date({date}), {trip} FROM {table} \
             WHERE date({date}) IS NOT NULL AND {trip} IS NOT NULL \
             ORDER BY date({date}) DESC, {trip} DESC LIMIT 1",
            date = quote_ident(TRIP_DATE),
            trip = quote_ident(TRIP_NUMBER),
            table = quote_ident(LOCAL_TABLE),
        );
        let found = self
            .conn
            .query_row(&sql, [], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .optional()?;
        let Some((date, trip_number)) = found else {
            return Ok(None);
        };
        let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
            .with_context(|| format!("Stored cursor date '{date}' is not a date"))?;
        Ok(Some(Cursor { date, trip_number }))
    }

    /// Inserts one chunk of rows aligned to [`TRIP_COLUMNS`] in a single
    /// transaction. Nothing is kept if any row fails.
    pub fn append_chunk(
        &mut self,
        rows: &[Vec<Option<Value>>],
        ingested_at: NaiveDateTime,
    ) -> EngineResult<usize> {
        let columns = TRIP_COLUMNS
            .iter()
            .map(|column| quote_ident(column.name))
            .chain(std::iter::once(INGESTED_AT.to_string()))
            .collect::<Vec<_>>();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(LOCAL_TABLE),
            columns.join(", ")
        );
        let ingested_at = Value::DateTime(ingested_at);

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&sql)?;
            for row in rows {
                if row.len() != TRIP_COLUMNS.len() {
                    return Err(EngineError::validation(format!(
                        "row has {} values, expected {}",
                        row.len(),
                        TRIP_COLUMNS.len()
                    )));
                }
                let mut params: Vec<&dyn ToSql> = row.iter().map(|cell| cell as &dyn ToSql).collect();
                params.push(&ingested_at);
                stmt.execute(params.as_slice())?;
            }
        }
        tx.commit()?;
        debug!("Committed chunk of {} row(s)", rows.len());
        Ok(rows.len())
    }

    pub fn count_rows(&self) -> EngineResult<usize> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(LOCAL_TABLE));
        let count: i64 = self.conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }

    /// Runs `query` and hands each decoded row to `visit` as it is read.
    pub fn for_each_row<F>(&self, query: &SelectQuery, mut visit: F) -> EngineResult<()>
    where
        F: FnMut(Vec<Option<Value>>) -> anyhow::Result<()>,
    {
        let (sql, params) = query.to_sql();
        debug!("Local query: {sql}");
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(params.iter()))?;
        let width = query.columns.len().max(1);
        while let Some(row) = rows.next()? {
            let mut decoded = Vec::with_capacity(width);
            if query.columns.is_empty() {
                decoded.push(decode_cell(row.get_ref(0)?, ColumnClass::TripNumber));
            }
            for (idx, column) in query.columns.iter().enumerate() {
                decoded.push(decode_cell(row.get_ref(idx)?, column.class));
            }
            visit(decoded)?;
        }
        Ok(())
    }

    // --- report definitions ----------------------------------------------

    pub fn create_report(&self, mut settings: ReportSettings) -> EngineResult<ReportDefinition> {
        settings.validate()?;
        let created_at = Utc::now().naive_utc();
        self.conn.execute(
            "INSERT INTO report_templates (name, dataset, row_limit, include_fields, filter_fields,
                group_fields, sort_fields, pivot_enabled, pivot_row_fields, pivot_col_field,
                pivot_values, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                settings.name,
                settings.dataset,
                settings.row_limit,
                to_json(&settings.include_fields)?,
                to_json(&settings.filter_fields)?,
                to_json(&settings.group_fields)?,
                to_json(&settings.sort_fields)?,
                settings.pivot_enabled,
                to_json(&settings.pivot_row_fields)?,
                settings.pivot_col_field,
                to_json(&settings.pivot_values)?,
                Value::DateTime(created_at),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        debug!("Created report {id} '{}'", settings.name);
        self.get_report(id)
    }

    pub fn update_report(&self, id: i64, mut settings: ReportSettings) -> EngineResult<ReportDefinition> {
        settings.validate()?;
        let changed = self.conn.execute(
            "UPDATE report_templates SET name = ?1, dataset = ?2, row_limit = ?3,
                include_fields = ?4, filter_fields = ?5, group_fields = ?6, sort_fields = ?7,
                pivot_enabled = ?8, pivot_row_fields = ?9, pivot_col_field = ?10,
                pivot_values = ?11
             WHERE id = ?12",
            rusqlite::params![
                settings.name,
                settings.dataset,
                settings.row_limit,
                to_json(&settings.include_fields)?,
                to_json(&settings.filter_fields)?,
                to_json(&settings.group_fields)?,
                to_json(&settings.sort_fields)?,
                settings.pivot_enabled,
                to_json(&settings.pivot_row_fields)?,
                settings.pivot_col_field,
                to_json(&settings.pivot_values)?,
                id,
            ],
        )?;
        if changed == 0 {
            return Err(EngineError::not_found("report", id.to_string()));
        }
        self.get_report(id)
    }

    pub fn get_report(&self, id: i64) -> EngineResult<ReportDefinition> {
        let found = self
            .conn
            .query_row(
                &format!("{REPORT_SELECT} WHERE id = ?1"),
                [id],
                |row| Ok(read_report_row(row)),
            )
            .optional()?;
        match found {
            Some(definition) => definition,
            None => Err(EngineError::not_found("report", id.to_string())),
        }
    }

    /// All definitions, newest first.
    pub fn list_reports(&self) -> EngineResult<Vec<ReportDefinition>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{REPORT_SELECT} ORDER BY created_at DESC, id DESC"))?;
        let mut rows = stmt.query([])?;
        let mut reports = Vec::new();
        while let Some(row) = rows.next()? {
            reports.push(read_report_row(row)?);
        }
        Ok(reports)
    }

    pub fn duplicate_report(&self, id: i64) -> EngineResult<ReportDefinition> {
        let source = self.get_report(id)?;
        self.create_report(source.settings.duplicated())
    }

    pub fn delete_report(&self, id: i64) -> EngineResult<()> {
        let removed = self
            .conn
            .execute("DELETE FROM report_templates WHERE id = ?1", [id])?;
        if removed == 0 {
            return Err(EngineError::not_found("report", id.to_string()));
        }
        Ok(())
    }

    // --- refresh settings ------------------------------------------------

    /// Stores `defaults` as the refresh settings unless a row already exists.
    pub fn seed_refresh_settings(&self, defaults: &RefreshSettings) -> EngineResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO data_refresh_config
                (id, enabled, run_time, profile_name, chunk_size, min_ritdatum)
             VALUES (1, ?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                defaults.enabled,
                defaults.run_time.format(hh_mm::FORMAT).to_string(),
                defaults.profile,
                i64::try_from(defaults.chunk_size).unwrap_or(i64::MAX),
                defaults.min_date.map(Value::Date),
            ],
        )?;
        Ok(())
    }

    pub fn save_refresh_settings(&self, settings: &RefreshSettings) -> EngineResult<()> {
        self.seed_refresh_settings(settings)?;
        self.conn.execute(
            "UPDATE data_refresh_config SET enabled = ?1, run_time = ?2, profile_name = ?3,
                chunk_size = ?4, min_ritdatum = ?5
             WHERE id = 1",
            rusqlite::params![
                settings.enabled,
                settings.run_time.format(hh_mm::FORMAT).to_string(),
                settings.profile,
                i64::try_from(settings.chunk_size).unwrap_or(i64::MAX),
                settings.min_date.map(Value::Date),
            ],
        )?;
        Ok(())
    }

    pub fn refresh_settings(&self) -> EngineResult<Option<RefreshSettings>> {
        let found = self
            .conn
            .query_row(
                "SELECT enabled, run_time, profile_name, chunk_size, min_ritdatum
                 FROM data_refresh_config WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, bool>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((enabled, run_time, profile, chunk_size, min_date)) = found else {
            return Ok(None);
        };
        let run_time = parse_naive_time(&run_time)
            .with_context(|| format!("Stored refresh time '{run_time}' is invalid"))?;
        let min_date = min_date
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| parse_naive_date(&raw))
            .transpose()
            .context("Stored minimum refresh date is invalid")?;
        Ok(Some(RefreshSettings {
            enabled,
            run_time,
            profile,
            chunk_size: usize::try_from(chunk_size).unwrap_or_default(),
            min_date,
        }))
    }

    pub fn last_refresh_run(&self) -> EngineResult<Option<NaiveDate>> {
        let raw = self
            .conn
            .query_row(
                "SELECT last_run_date FROM data_refresh_config WHERE id = 1",
                [],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?
            .flatten();
        raw.map(|raw| parse_naive_date(&raw).map_err(EngineError::from))
            .transpose()
    }

    pub fn record_refresh_run(&self, day: NaiveDate) -> EngineResult<()> {
        self.conn.execute(
            "UPDATE data_refresh_config SET last_run_date = ?1 WHERE id = 1",
            [Value::Date(day)],
        )?;
        Ok(())
    }
}

const REPORT_SELECT: &str = "SELECT id, name, dataset, row_limit, include_fields, filter_fields,
    group_fields, sort_fields, pivot_enabled, pivot_row_fields, pivot_col_field, pivot_values,
    created_at FROM report_templates";

fn read_report_row(row: &Row<'_>) -> EngineResult<ReportDefinition> {
    let created_at: String = row.get(12)?;
    let created_at = parse_naive_datetime(&created_at)
        .with_context(|| format!("Stored report timestamp '{created_at}' is invalid"))?;
    Ok(ReportDefinition {
        id: row.get(0)?,
        created_at,
        settings: ReportSettings {
            name: row.get(1)?,
            dataset: row.get(2)?,
            row_limit: row.get(3)?,
            include_fields: from_json(row, 4)?,
            filter_fields: from_json(row, 5)?,
            group_fields: from_json(row, 6)?,
            sort_fields: from_json(row, 7)?,
            pivot_enabled: row.get(8)?,
            pivot_row_fields: from_json(row, 9)?,
            pivot_col_field: row.get(10)?,
            pivot_values: from_json(row, 11)?,
        },
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> EngineResult<String> {
    Ok(serde_json::to_string(value).context("Serializing report settings")?)
}

fn from_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> EngineResult<T> {
    let raw: Option<String> = row.get(idx)?;
    let raw = raw.unwrap_or_else(|| "[]".to_string());
    Ok(serde_json::from_str(&raw)
        .with_context(|| format!("Decoding stored report column {idx}"))?)
}
