//! Remote source access.
//!
//! A [`RemoteConnector`] opens [`RemoteConnection`]s for a connection
//! profile; connectors are looked up by the profile's `backend` token in a
//! [`ConnectorRegistry`]. The built-in `sqlite` backend reads a SQLite file
//! and registers the `try_*` conversion functions its dialect relies on.

use std::{collections::HashMap, path::Path, sync::Arc};

use log::debug;
use rusqlite::{
    Connection, OpenFlags,
    functions::{Context as FunctionContext, FunctionFlags},
    types::{Value as SqlValue, ValueRef},
};

use crate::{
    config::ConnectionProfile,
    data::{
        DATE_FORMAT, STORED_DATETIME_FORMAT, STORED_TIME_FORMAT, Value, parse_decimal_literal,
        parse_naive_date, parse_naive_datetime, parse_naive_time,
    },
    dialect::{Dialect, RemoteQuery, Sqlite},
    error::{EngineError, EngineResult},
};

pub type RemoteRow = Vec<Option<Value>>;

pub trait RemoteConnection {
    fn dialect(&self) -> &dyn Dialect;

    /// Runs `query` and hands the result to `sink` in chunks of at most
    /// `chunk_size` rows, in result order. Stops at the first error from
    /// either side.
    fn fetch_chunks(
        &mut self,
        query: &RemoteQuery,
        chunk_size: usize,
        sink: &mut dyn FnMut(Vec<RemoteRow>) -> EngineResult<()>,
    ) -> EngineResult<()>;

    fn fetch_all(&mut self, query: &RemoteQuery) -> EngineResult<Vec<RemoteRow>> {
        let mut rows = Vec::new();
        self.fetch_chunks(query, 256, &mut |chunk| {
            rows.extend(chunk);
            Ok(())
        })?;
        Ok(rows)
    }
}

pub trait RemoteConnector: Send + Sync {
    fn connect(&self, profile: &ConnectionProfile) -> EngineResult<Box<dyn RemoteConnection>>;
}

#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: HashMap<String, Arc<dyn RemoteConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("sqlite", Arc::new(SqliteConnector));
        registry
    }

    pub fn register(&mut self, backend: impl Into<String>, connector: Arc<dyn RemoteConnector>) {
        self.connectors.insert(backend.into(), connector);
    }

    pub fn connector_for(&self, profile: &ConnectionProfile) -> EngineResult<Arc<dyn RemoteConnector>> {
        self.connectors
            .get(&profile.backend)
            .cloned()
            .ok_or_else(|| {
                EngineError::remote(format!(
                    "no connector available for backend '{}' (profile '{}')",
                    profile.backend, profile.name
                ))
            })
    }
}

/// Connection profiles plus the connectors able to reach them.
#[derive(Clone, Default)]
pub struct RemoteSources {
    profiles: Vec<ConnectionProfile>,
    connectors: ConnectorRegistry,
}

impl RemoteSources {
    pub fn new(profiles: Vec<ConnectionProfile>, connectors: ConnectorRegistry) -> Self {
        Self {
            profiles,
            connectors,
        }
    }

    pub fn profile(&self, name: &str) -> EngineResult<&ConnectionProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.name == name)
            .ok_or_else(|| EngineError::not_found("connection profile", name))
    }

    pub fn connector(&self, profile: &ConnectionProfile) -> EngineResult<Arc<dyn RemoteConnector>> {
        self.connectors.connector_for(profile)
    }

    pub fn connect(&self, profile: &ConnectionProfile) -> EngineResult<Box<dyn RemoteConnection>> {
        debug!("Connecting to profile '{}' ({})", profile.name, profile.backend);
        self.connector(profile)?.connect(profile)
    }
}

/// Reads a SQLite file named by the profile's `database`, read-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl RemoteConnector for SqliteConnector {
    fn connect(&self, profile: &ConnectionProfile) -> EngineResult<Box<dyn RemoteConnection>> {
        let conn = Connection::open_with_flags(
            Path::new(&profile.database),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(remote_error)?;
        register_coercions(&conn).map_err(remote_error)?;
        Ok(Box::new(SqliteConnection { conn }))
    }
}

struct SqliteConnection {
    conn: Connection,
}

impl RemoteConnection for SqliteConnection {
    fn dialect(&self) -> &dyn Dialect {
        &Sqlite
    }

    fn fetch_chunks(
        &mut self,
        query: &RemoteQuery,
        chunk_size: usize,
        sink: &mut dyn FnMut(Vec<RemoteRow>) -> EngineResult<()>,
    ) -> EngineResult<()> {
        let chunk_size = chunk_size.max(1);
        let mut stmt = self.conn.prepare(&query.sql).map_err(remote_error)?;
        let width = stmt.column_count();
        let mut rows = stmt
            .query(rusqlite::params_from_iter(query.params.iter()))
            .map_err(remote_error)?;
        let mut chunk = Vec::with_capacity(chunk_size);
        while let Some(row) = rows.next().map_err(remote_error)? {
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(raw_value(row.get_ref(idx).map_err(remote_error)?));
            }
            chunk.push(values);
            if chunk.len() == chunk_size {
                sink(std::mem::replace(&mut chunk, Vec::with_capacity(chunk_size)))?;
            }
        }
        if !chunk.is_empty() {
            sink(chunk)?;
        }
        Ok(())
    }
}

fn raw_value(raw: ValueRef<'_>) -> Option<Value> {
    match raw {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(Value::Integer(i)),
        ValueRef::Real(f) => Some(Value::Float(f)),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Some(Value::String(String::from_utf8_lossy(bytes).into_owned()))
        }
    }
}

fn remote_error(err: rusqlite::Error) -> EngineError {
    EngineError::remote(err.to_string())
}

/// Registers the non-throwing conversions used by the SQLite dialect.
pub fn register_coercions(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;
    conn.create_scalar_function("try_decimal", 1, flags, try_decimal)?;
    conn.create_scalar_function("try_datetime", 1, flags, try_datetime)?;
    conn.create_scalar_function("try_date", 1, flags, try_date)?;
    conn.create_scalar_function("try_time", 1, flags, try_time)?;
    conn.create_scalar_function("try_bigint", 1, flags, try_bigint)?;
    conn.create_scalar_function("try_float", 1, flags, try_float)?;
    Ok(())
}

fn text_arg(ctx: &FunctionContext<'_>) -> Option<String> {
    match ctx.get_raw(0) {
        ValueRef::Text(bytes) => std::str::from_utf8(bytes).ok().map(|s| s.trim().to_string()),
        _ => None,
    }
}

/// Exact decimals travel as text so no precision is lost in transit.
fn try_decimal(ctx: &FunctionContext<'_>) -> rusqlite::Result<SqlValue> {
    Ok(match ctx.get_raw(0) {
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) => SqlValue::Real(f),
        _ => text_arg(ctx)
            .and_then(|raw| parse_decimal_literal(&raw))
            .map(|d| SqlValue::Text(d.normalize().to_string()))
            .unwrap_or(SqlValue::Null),
    })
}

fn try_datetime(ctx: &FunctionContext<'_>) -> rusqlite::Result<SqlValue> {
    let parsed = text_arg(ctx).and_then(|raw| {
        parse_naive_datetime(&raw)
            .ok()
            .or_else(|| parse_naive_date(&raw).ok().map(|d| d.and_time(chrono::NaiveTime::MIN)))
    });
    Ok(parsed
        .map(|dt| SqlValue::Text(dt.format(STORED_DATETIME_FORMAT).to_string()))
        .unwrap_or(SqlValue::Null))
}

fn try_date(ctx: &FunctionContext<'_>) -> rusqlite::Result<SqlValue> {
    let parsed = text_arg(ctx).and_then(|raw| {
        parse_naive_datetime(&raw)
            .map(|dt| dt.date())
            .ok()
            .or_else(|| parse_naive_date(&raw).ok())
    });
    Ok(parsed
        .map(|d| SqlValue::Text(d.format(DATE_FORMAT).to_string()))
        .unwrap_or(SqlValue::Null))
}

fn try_time(ctx: &FunctionContext<'_>) -> rusqlite::Result<SqlValue> {
    let parsed = text_arg(ctx).and_then(|raw| {
        parse_naive_time(&raw)
            .ok()
            .or_else(|| parse_naive_datetime(&raw).ok().map(|dt| dt.time()))
    });
    Ok(parsed
        .map(|t| SqlValue::Text(t.format(STORED_TIME_FORMAT).to_string()))
        .unwrap_or(SqlValue::Null))
}

fn try_bigint(ctx: &FunctionContext<'_>) -> rusqlite::Result<SqlValue> {
    Ok(match ctx.get_raw(0) {
        ValueRef::Integer(i) => SqlValue::Integer(i),
        ValueRef::Real(f) if f.fract() == 0.0 && f.abs() < 9.0e18 => SqlValue::Integer(f as i64),
        _ => text_arg(ctx)
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(SqlValue::Integer)
            .unwrap_or(SqlValue::Null),
    })
}

fn try_float(ctx: &FunctionContext<'_>) -> rusqlite::Result<SqlValue> {
    Ok(match ctx.get_raw(0) {
        ValueRef::Integer(i) => SqlValue::Real(i as f64),
        ValueRef::Real(f) => SqlValue::Real(f),
        _ => text_arg(ctx)
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|f| f.is_finite())
            .map(SqlValue::Real)
            .unwrap_or(SqlValue::Null),
    })
}
