//! Application configuration: local database path, connection profiles and
//! daily refresh settings, read from YAML and overridden from the
//! environment.

use std::{
    env, fmt,
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::{
    data::{parse_naive_date, parse_naive_time},
    error::{EngineError, EngineResult},
};

pub const DEFAULT_DATABASE: &str = "trip_reports.db";
pub const DEFAULT_PROFILE: &str = "Historie";
pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_SOURCE_TABLE: &str = "rpt.RGRitten";
pub const DEFAULT_ODBC_DRIVER: &str = "ODBC Driver 18 for SQL Server";

const ENV_DATABASE: &str = "TRIP_REPORTS_DATABASE";
const ENV_REFRESH_ENABLED: &str = "DATA_REFRESH_ENABLED";
const ENV_REFRESH_TIME: &str = "DATA_REFRESH_TIME";
const ENV_REFRESH_PROFILE: &str = "DATA_REFRESH_PROFILE";
const ENV_REFRESH_CHUNK_SIZE: &str = "DATA_REFRESH_CHUNK_SIZE";
const ENV_REFRESH_MIN_DATE: &str = "DATA_REFRESH_MIN_DATE";
const ENV_REFRESH_MIN_DATE_LEGACY: &str = "DATA_REFRESH_MIN_RITDATUM";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: PathBuf,
    pub profiles: Vec<ConnectionProfile>,
    pub refresh: RefreshSettings,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from(DEFAULT_DATABASE),
            profiles: Vec::new(),
            refresh: RefreshSettings::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let mut file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let mut raw = String::new();
        file.read_to_string(&mut raw)
            .with_context(|| format!("Reading config file {path:?}"))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Parsing config file {path:?}"))
    }

    /// Loads `path` when given (defaults otherwise) and applies the
    /// process environment on top.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.trim().is_empty()) {
            self.database = PathBuf::from(database.trim());
        }
        if let Some(enabled) = lookup(ENV_REFRESH_ENABLED) {
            self.refresh.enabled = enabled.trim() == "1";
        }
        if let Some(time) = lookup(ENV_REFRESH_TIME).filter(|v| !v.trim().is_empty()) {
            self.refresh.run_time = parse_naive_time(&time)
                .with_context(|| format!("Invalid {ENV_REFRESH_TIME} value '{time}'"))?;
        }
        if let Some(profile) = lookup(ENV_REFRESH_PROFILE).filter(|v| !v.trim().is_empty()) {
            self.refresh.profile = profile.trim().to_string();
        }
        if let Some(chunk) = lookup(ENV_REFRESH_CHUNK_SIZE).filter(|v| !v.trim().is_empty()) {
            self.refresh.chunk_size = chunk
                .trim()
                .parse()
                .with_context(|| format!("Invalid {ENV_REFRESH_CHUNK_SIZE} value '{chunk}'"))?;
        }
        let min_date = lookup(ENV_REFRESH_MIN_DATE).or_else(|| lookup(ENV_REFRESH_MIN_DATE_LEGACY));
        if let Some(min_date) = min_date {
            self.refresh.min_date = if min_date.trim().is_empty() {
                None
            } else {
                Some(
                    parse_naive_date(&min_date)
                        .with_context(|| format!("Invalid minimum refresh date '{min_date}'"))?,
                )
            };
        }
        Ok(())
    }

    pub fn profile(&self, name: &str) -> EngineResult<&ConnectionProfile> {
        self.profiles
            .iter()
            .find(|profile| profile.name == name)
            .ok_or_else(|| EngineError::not_found("connection profile", name))
    }

    pub fn validate(&self) -> Result<()> {
        for (idx, profile) in self.profiles.iter().enumerate() {
            if self.profiles[..idx].iter().any(|p| p.name == profile.name) {
                return Err(anyhow!("Duplicate connection profile '{}'", profile.name));
            }
        }
        Ok(())
    }
}

/// Named remote target. `backend` selects the connector and SQL dialect.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionProfile {
    pub name: String,
    pub project: String,
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub odbc_driver: String,
    pub trust_server_cert: bool,
    pub source_table: String,
}

impl Default for ConnectionProfile {
    fn default() -> Self {
        Self {
            name: "Default".to_string(),
            project: "Algemeen".to_string(),
            backend: "mssql".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1433,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            odbc_driver: DEFAULT_ODBC_DRIVER.to_string(),
            trust_server_cert: true,
            source_table: DEFAULT_SOURCE_TABLE.to_string(),
        }
    }
}

impl ConnectionProfile {
    /// ODBC-style SQL Server URI. Contains the password; never log it.
    pub fn build_uri(&self) -> String {
        let trust = if self.trust_server_cert { "yes" } else { "no" };
        format!(
            "mssql+pyodbc://{}:{}@{}:{}/{}?driver={}&TrustServerCertificate={trust}",
            self.username,
            self.password,
            self.host,
            self.port,
            self.database,
            self.odbc_driver.replace(' ', "+"),
        )
    }
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("name", &self.name)
            .field("project", &self.project)
            .field("backend", &self.backend)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("source_table", &self.source_table)
            .finish()
    }
}

/// Daily refresh schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshSettings {
    pub enabled: bool,
    #[serde(with = "hh_mm")]
    pub run_time: NaiveTime,
    pub profile: String,
    pub chunk_size: usize,
    pub min_date: Option<NaiveDate>,
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            run_time: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or(NaiveTime::MIN),
            profile: DEFAULT_PROFILE.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_date: None,
        }
    }
}

pub(crate) mod hh_mm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::data::parse_naive_time;

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_naive_time(&raw).map_err(serde::de::Error::custom)
    }
}
