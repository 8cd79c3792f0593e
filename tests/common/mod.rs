#![allow(dead_code)]

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, params_from_iter};
use tempfile::{TempDir, tempdir};
use trip_reports::{
    catalog::{TRIP_COLUMNS, column_index},
    config::ConnectionProfile,
    data::Value,
    dialect::{Dialect, RemoteQuery, SqlServer},
    error::{EngineError, EngineResult},
    remote::{ConnectorRegistry, RemoteConnection, RemoteConnector, RemoteRow, RemoteSources, SqliteConnector},
    store::LocalStore,
};

pub const REMOTE_TABLE: &str = "RGRitten";
pub const PROFILE: &str = "Historie";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }
}

/// Local row for a trip on `date` at 09:30 with extra cells by column name.
pub fn local_trip(date: NaiveDate, trip_number: i64, cells: &[(&str, Value)]) -> Vec<Option<Value>> {
    let mut row = vec![None; TRIP_COLUMNS.len()];
    let at = date.and_hms_opt(9, 30, 0).expect("valid time");
    row[column_index("ritdatum").expect("ritdatum")] = Some(Value::DateTime(at));
    row[column_index("ritnummer").expect("ritnummer")] = Some(Value::Integer(trip_number));
    for (name, value) in cells {
        let idx = column_index(name).unwrap_or_else(|| panic!("unknown column {name}"));
        row[idx] = Some(value.clone());
    }
    row
}

/// In-memory store holding `rows`.
pub fn store_with(rows: &[Vec<Option<Value>>]) -> LocalStore {
    let mut store = LocalStore::open_in_memory().expect("local store");
    store
        .append_chunk(rows, Utc::now().naive_utc())
        .expect("seed local rows");
    store
}

/// SQLite file standing in for the remote trip table. Every column is
/// TEXT, so values arrive raw and go through the dialect's conversions.
pub struct RemoteFixture {
    path: PathBuf,
    conn: Connection,
}

impl RemoteFixture {
    pub fn create(workspace: &TestWorkspace) -> Self {
        let path = workspace.path().join("remote.db");
        let conn = Connection::open(&path).expect("open remote fixture");
        let columns = TRIP_COLUMNS
            .iter()
            .map(|column| format!("\"{}\" TEXT", column.name))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute_batch(&format!("CREATE TABLE {REMOTE_TABLE} ({columns});"))
            .expect("create remote table");
        Self { path, conn }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Inserts one remote row; columns not named stay NULL.
    pub fn insert(&self, cells: &[(&str, &str)]) {
        let names = cells
            .iter()
            .map(|(name, _)| format!("\"{name}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; cells.len()].join(", ");
        self.conn
            .execute(
                &format!("INSERT INTO {REMOTE_TABLE} ({names}) VALUES ({placeholders})"),
                params_from_iter(cells.iter().map(|(_, value)| *value)),
            )
            .expect("insert remote row");
    }

    /// Trip on `date` (`YYYY-MM-DD`) at 08:00 with the given number.
    pub fn insert_trip(&self, date: &str, trip_number: &str) {
        let stamp = format!("{date} 08:00:00");
        self.insert(&[
            ("ritdatum", stamp.as_str()),
            ("ritnummer", trip_number),
            ("status", "done"),
            ("afstand", "4.5"),
        ]);
    }

    pub fn profile(&self) -> ConnectionProfile {
        ConnectionProfile {
            name: PROFILE.to_string(),
            backend: "sqlite".to_string(),
            database: self.path.display().to_string(),
            source_table: REMOTE_TABLE.to_string(),
            ..ConnectionProfile::default()
        }
    }

    pub fn sources(&self) -> RemoteSources {
        RemoteSources::new(vec![self.profile()], ConnectorRegistry::with_builtin())
    }

    /// Sources whose `sqlite` backend is replaced by `connector`.
    pub fn sources_with(&self, connector: Arc<dyn RemoteConnector>) -> RemoteSources {
        let mut registry = ConnectorRegistry::new();
        registry.register("sqlite", connector);
        RemoteSources::new(vec![self.profile()], registry)
    }
}

/// Reads the SQLite fixture but drops the connection after `fail_after`
/// chunks have been handed over.
pub struct FlakyConnector {
    pub fail_after: usize,
}

impl RemoteConnector for FlakyConnector {
    fn connect(&self, profile: &ConnectionProfile) -> EngineResult<Box<dyn RemoteConnection>> {
        Ok(Box::new(FlakyConnection {
            inner: SqliteConnector.connect(profile)?,
            fail_after: self.fail_after,
        }))
    }
}

struct FlakyConnection {
    inner: Box<dyn RemoteConnection>,
    fail_after: usize,
}

impl RemoteConnection for FlakyConnection {
    fn dialect(&self) -> &dyn Dialect {
        self.inner.dialect()
    }

    fn fetch_chunks(
        &mut self,
        query: &RemoteQuery,
        chunk_size: usize,
        sink: &mut dyn FnMut(Vec<RemoteRow>) -> EngineResult<()>,
    ) -> EngineResult<()> {
        let fail_after = self.fail_after;
        let mut delivered = 0usize;
        self.inner.fetch_chunks(query, chunk_size, &mut |chunk| {
            if delivered == fail_after {
                return Err(EngineError::remote("connection reset by peer"));
            }
            delivered += 1;
            sink(chunk)
        })
    }
}

/// Remote that fails any select naming a poisoned column, or naming every
/// column of a poisoned pair, and returns canned rows for issue probes.
#[derive(Default)]
pub struct ScriptedConnector {
    pub poisoned: Vec<&'static str>,
    pub poisoned_pairs: Vec<(&'static str, &'static str)>,
    pub issue_rows: Vec<(&'static str, RemoteRow)>,
    pub probes: Arc<AtomicUsize>,
    pub seen: Arc<Mutex<Vec<RemoteQuery>>>,
}

impl ScriptedConnector {
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl RemoteConnector for ScriptedConnector {
    fn connect(&self, _profile: &ConnectionProfile) -> EngineResult<Box<dyn RemoteConnection>> {
        Ok(Box::new(ScriptedConnection {
            poisoned: self.poisoned.clone(),
            poisoned_pairs: self.poisoned_pairs.clone(),
            issue_rows: self.issue_rows.clone(),
            probes: Arc::clone(&self.probes),
            seen: Arc::clone(&self.seen),
        }))
    }
}

struct ScriptedConnection {
    poisoned: Vec<&'static str>,
    poisoned_pairs: Vec<(&'static str, &'static str)>,
    issue_rows: Vec<(&'static str, RemoteRow)>,
    probes: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<RemoteQuery>>>,
}

impl RemoteConnection for ScriptedConnection {
    fn dialect(&self) -> &dyn Dialect {
        &SqlServer
    }

    fn fetch_chunks(
        &mut self,
        query: &RemoteQuery,
        _chunk_size: usize,
        sink: &mut dyn FnMut(Vec<RemoteRow>) -> EngineResult<()>,
    ) -> EngineResult<()> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().expect("query log").push(query.clone());
        let names = &query.columns;
        if let Some(column) = self.poisoned.iter().find(|column| names.contains(column)) {
            return Err(EngineError::remote(format!(
                "Error converting data type nvarchar to numeric ({column})"
            )));
        }
        if self
            .poisoned_pairs
            .iter()
            .any(|(left, right)| names.contains(left) && names.contains(right))
        {
            return Err(EngineError::remote("Arithmetic overflow error"));
        }
        let rows = self
            .issue_rows
            .iter()
            .filter(|(column, _)| names.len() == 2 && names[1] == *column)
            .map(|(_, row)| row.clone())
            .collect::<Vec<_>>();
        if !rows.is_empty() {
            sink(rows)?;
        }
        Ok(())
    }
}
