//! Lidar echo/pulse directories (ept) of a platform session
//!
//! Directory names follow `NAME_yymmddHHMM_SECTION`, e.g.
//! `LaVillette_1705160610_00.ept`. The import exposes the directory as a
//! foreign point cloud and adds a `pointcloud` datasource in the lidar
//! spherical referential, with the spherical to cartesian transfo.

use anyhow::{bail, Context, Result};
use clap::Args;
use li3ds_core::{Attributes, Backend, Collection, RecordRef, ResourceKind, Store};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

use super::foreignpc::{self, Driver, ForeignTable, PointCloudArgs};
use super::{attributes, basename};
use crate::template::{fill, Metadata};

#[derive(Args, Debug, Clone)]
pub struct EptArgs {
    #[command(flatten)]
    pub pointcloud: PointCloudArgs,

    /// Project name
    #[arg(long, required = true)]
    pub project: String,

    /// SRID of the lidar coordinates
    #[arg(short = 'r', long, default_value_t = 0)]
    pub srid: i64,

    /// Time offset in seconds
    #[arg(short = 'x', long, default_value_t = 0.0)]
    pub time_offset: f64,

    /// Directory holding the ept files, relative to --chdir
    pub directory: PathBuf,
}

/// Table name, session time and section of an ept directory
fn parse_path(path: &Path) -> Result<(String, Value, String)> {
    let name = foreignpc::table_name(path);
    let parts: Vec<&str> = name.split('_').collect();
    if parts.len() < 3 {
        bail!("unknown ept directory name structure {name:?}, expected NAME_yymmddHHMM_SECTION");
    }
    let time = foreignpc::session_time(parts[1], "%y%m%d%H%M")?;
    Ok((name.clone(), json!(time.isoformat()), parts[2].to_string()))
}

fn build(args: &EptArgs) -> Result<Collection> {
    let (name, session_time, section) = parse_path(&args.directory)?;
    let path = args.pointcloud.chdir.join(&args.directory);

    let mut metadata = Metadata::new();
    metadata.insert("basename".to_string(), Some(basename(&path)));
    metadata.insert("table".to_string(), Some(name));
    metadata.insert("session_time".to_string(), session_time.as_str().map(str::to_string));
    metadata.insert("section_name".to_string(), Some(format!("/{section}")));

    let mut table = ForeignTable::new(Driver::EchoPulse, &args.pointcloud, &path);
    table.srid = Some(args.srid);
    table.time_offset = Some(args.time_offset);

    let mut sensor = attributes([("type", Some(json!("lidar"))), ("name", Some(json!("lidar")))]);
    fill(ResourceKind::Sensor, &mut sensor, None, &metadata)?;
    let mut spherical = attributes([("name", Some(json!("lidar spherical")))]);
    fill(ResourceKind::Referential, &mut spherical, None, &metadata)?;
    let mut cartesian = attributes([("name", Some(json!("lidar cartesian")))]);
    fill(ResourceKind::Referential, &mut cartesian, None, &metadata)?;
    let mut platform = attributes([("name", Some(json!("Stereopolis II")))]);
    fill(ResourceKind::Platform, &mut platform, None, &metadata)?;
    let mut project = attributes([("name", Some(json!(args.project)))]);
    fill(ResourceKind::Project, &mut project, None, &metadata)?;
    let mut session = attributes([("name", Some(json!("{session_time:%y%m%d}{section_name}")))]);
    fill(ResourceKind::Session, &mut session, None, &metadata)?;
    let mut transfo = attributes([("name", Some(json!("lidar")))]);
    fill(ResourceKind::Transfo, &mut transfo, None, &metadata)?;
    transfo.insert("parameters".to_string(), json!([]));
    let mut tree = Attributes::new();
    fill(ResourceKind::Transfotree, &mut tree, None, &metadata)?;

    let sensor = RecordRef::sensor(Value::Object(sensor))?;
    let project = RecordRef::project(Value::Object(project))?;
    let platform = RecordRef::platform(Value::Object(platform))?;
    let session = RecordRef::session(&project, &platform, Value::Object(session))?;
    let spherical = RecordRef::referential(&sensor, Value::Object(spherical))?;
    let cartesian = RecordRef::referential(&sensor, Value::Object(cartesian))?;

    let mut collection = Collection::new();
    collection.add(table.view(Some(false), None)?);
    collection.add(RecordRef::datasource(
        &session,
        &spherical,
        json!({"type": "pointcloud", "uri": table.datasource_uri()}),
    )?);
    let transfo = RecordRef::transfo(
        &spherical,
        &cartesian,
        Some(RecordRef::transfo_type_with_signature("spherical_to_cartesian", &[])?),
        Value::Object(transfo),
    )?;
    collection.add(RecordRef::transfotree([transfo], Value::Object(tree))?);
    Ok(collection)
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &EptArgs) -> Result<()> {
    info!("Importing {}", args.directory.display());
    let collection = build(args).with_context(|| format!("importing {}", args.directory.display()))?;
    super::publish(store, &collection, &args.directory.display().to_string())
}
