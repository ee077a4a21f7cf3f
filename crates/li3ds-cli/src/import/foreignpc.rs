//! Foreign point-cloud records shared by the trajectory, sbet and ept importers
//!
//! A data file is exposed to the datastore through a foreign server (one
//! per driver), a foreign table reading the file and a view over that
//! table. Datasources then address the `points` column of the view.

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use clap::Args;
use li3ds_core::time::Timestamp;
use li3ds_core::{RecordRef, SchemaError};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};

/// Number of points per patch in foreign tables
pub const PATCH_SIZE: u64 = 100;

/// Foreign data wrapper reading the data files
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Sbet,
    EchoPulse,
}

impl Driver {
    pub fn as_str(self) -> &'static str {
        match self {
            Driver::Sbet => "fdwli3ds.Sbet",
            Driver::EchoPulse => "fdwli3ds.EchoPulse",
        }
    }

    pub fn default_server(self) -> &'static str {
        match self {
            Driver::Sbet => "sbet",
            Driver::EchoPulse => "echopulse",
        }
    }

    /// Table option holding the data path
    fn source_option(self) -> &'static str {
        match self {
            Driver::Sbet => "sources",
            Driver::EchoPulse => "directory",
        }
    }
}

/// Options shared by the point-cloud importers
#[derive(Args, Debug, Clone)]
pub struct PointCloudArgs {
    /// Database schema of the foreign tables
    #[arg(short = 's', long, default_value = "public")]
    pub database_schema: String,

    /// Base directory searched for data files
    #[arg(short = 'f', long, default_value = ".")]
    pub chdir: PathBuf,

    /// Regex the data file names must match, from their first character
    #[arg(short = 'p', long)]
    pub filename_pattern: Option<String>,

    /// Foreign server name (defaults to the driver's: sbet or echopulse)
    #[arg(short = 'n', long)]
    pub server_name: Option<String>,
}

impl Default for PointCloudArgs {
    fn default() -> Self {
        Self {
            database_schema: "public".to_string(),
            chdir: PathBuf::from("."),
            filename_pattern: None,
            server_name: None,
        }
    }
}

impl PointCloudArgs {
    /// Data files under `chdir` matching any of the glob `patterns`
    pub fn matching(&self, patterns: &[String]) -> Result<Vec<PathBuf>> {
        let filter = super::name_filter(self.filename_pattern.as_deref())?;
        let mut paths = Vec::new();
        for pattern in patterns {
            paths.extend(super::find(&self.chdir, pattern, filter.as_ref())?);
        }
        Ok(paths)
    }

    fn server(&self, driver: Driver) -> &str {
        self.server_name.as_deref().unwrap_or(driver.default_server())
    }
}

/// Foreign table description of one data file
#[derive(Debug, Clone)]
pub struct ForeignTable<'a> {
    pub driver: Driver,
    pub args: &'a PointCloudArgs,
    /// Table name, the file name up to its first dot
    pub name: String,
    pub path: &'a Path,
    pub srid: Option<i64>,
    pub time_offset: Option<f64>,
}

impl<'a> ForeignTable<'a> {
    pub fn new(driver: Driver, args: &'a PointCloudArgs, path: &'a Path) -> Self {
        Self {
            driver,
            args,
            name: table_name(path),
            path,
            srid: None,
            time_offset: None,
        }
    }

    /// Server, table and view exposing the file; `sbet` and `srid` describe the view
    pub fn view(&self, sbet: Option<bool>, srid: Option<i64>) -> Result<RecordRef, SchemaError> {
        let schema = &self.args.database_schema;
        let server = RecordRef::foreignpc_server(json!({
            "name": self.args.server(self.driver),
            "driver": self.driver.as_str(),
            "options": {},
        }))?;

        let mut options = Map::new();
        options.insert("patch_size".to_string(), json!(PATCH_SIZE));
        if let Some(offset) = self.time_offset {
            options.insert("time_offset".to_string(), json!(offset));
        }
        options.insert(
            self.driver.source_option().to_string(),
            json!(self.path.display().to_string()),
        );
        let table = RecordRef::foreignpc_table(
            &server,
            json!({
                "table": format!("{schema}.{}", self.name),
                "srid": self.srid,
                "options": Value::Object(options),
            }),
        )?;

        RecordRef::foreignpc_view(
            &table,
            json!({
                "view": format!("{schema}.{}_view", self.name),
                "sbet": sbet,
                "srid": srid,
            }),
        )
    }

    /// URI of the view's point column
    pub fn datasource_uri(&self) -> String {
        format!("column:{}.{}_view.points", self.args.database_schema, self.name)
    }
}

/// File name up to its first dot
pub fn table_name(path: &Path) -> String {
    let name = super::basename(path);
    name.split('.').next().unwrap_or_default().to_string()
}

/// Session time from a `strftime` field of a file name, in UTC
pub fn session_time(field: &str, format: &str) -> Result<Timestamp> {
    // date-only formats are padded to midnight
    let padded = format!("{field}0000");
    let parsed = NaiveDateTime::parse_from_str(field, format)
        .or_else(|_| NaiveDateTime::parse_from_str(&padded, &format!("{format}%H%M")))
        .with_context(|| format!("invalid session time {field:?}, expected {format}"))?;
    Ok(Timestamp::Aware(parsed.and_utc().fixed_offset()))
}
