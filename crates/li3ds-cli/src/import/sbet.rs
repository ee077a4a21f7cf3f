//! INS trajectories (sbet files) of a platform session
//!
//! File names follow `NAME_YYYYMMDD_HHMMSS_SUFFIX`, e.g.
//! `LANDINS_20170516_075157_PP.popout.out`. Besides the foreign view, each
//! file gets a `trajectory` datasource and the two INS transfos, world to
//! INS and back, whose parameters are read from the view's `points`
//! column.

use anyhow::{bail, Context, Result};
use clap::Args;
use li3ds_core::{Attributes, Backend, Collection, RecordRef, ResourceKind, Store};
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

use super::foreignpc::{self, Driver, ForeignTable, PointCloudArgs};
use super::{attributes, basename};
use crate::template::{fill, Metadata};

#[derive(Args, Debug, Clone)]
pub struct SbetArgs {
    #[command(flatten)]
    pub pointcloud: PointCloudArgs,

    /// Project name
    #[arg(long, required = true)]
    pub project: String,

    /// SRID of the input trajectories
    #[arg(short = 'r', long, default_value_t = 4326)]
    pub srid_input: i64,

    /// SRID of the trajectories in the datastore
    #[arg(short = 't', long, default_value_t = 2154)]
    pub srid_output: i64,

    /// Sbet file names, may be patterns (e.g. *.sbet)
    #[arg(required = true)]
    pub patterns: Vec<String>,
}

/// Table name and session time of an sbet file
fn parse_path(path: &Path) -> Result<(String, Value)> {
    let name = foreignpc::table_name(path);
    let parts: Vec<&str> = name.split('_').collect();
    if parts.len() < 4 {
        bail!("unknown trajectory file name structure {name:?}, expected NAME_YYYYMMDD_HHMMSS_SUFFIX");
    }
    let time = foreignpc::session_time(parts[1], "%Y%m%d")?;
    Ok((name, json!(time.isoformat())))
}

/// Transfo between the INS and world referentials, read from `column`
fn ins_transfo(
    ins: &RecordRef,
    world: &RecordRef,
    template: &Attributes,
    column: &str,
    forward: bool,
) -> Result<RecordRef> {
    let (source, target, quat, vec3) = if forward {
        (world, ins, ["qw", "-qx", "-qy", "-qz"], ["-x", "-y", "-z"])
    } else {
        (ins, world, ["qw", "qx", "qy", "qz"], ["x", "y", "z"])
    };
    let mut attrs = template.clone();
    attrs.insert("parameters_column".to_string(), json!(column));
    attrs.insert(
        "parameters".to_string(),
        json!([{"quat": quat, "vec3": vec3, "_time": "time"}]),
    );
    let ttype = RecordRef::transfo_type_with_signature("affine_quat", &["quat", "vec3", "_time"])?;
    Ok(RecordRef::transfo(source, target, Some(ttype), Value::Object(attrs))?)
}

fn build(collection: &mut Collection, path: &Path, args: &SbetArgs) -> Result<()> {
    let (name, session_time) = parse_path(path)?;
    let schema = &args.pointcloud.database_schema;

    let mut metadata = Metadata::new();
    metadata.insert("basename".to_string(), Some(basename(path)));
    metadata.insert("table".to_string(), Some(name.clone()));
    metadata.insert("session_time".to_string(), session_time.as_str().map(str::to_string));
    metadata.insert("section_name".to_string(), Some(String::new()));

    let mut table = ForeignTable::new(Driver::Sbet, &args.pointcloud, path);
    table.srid = Some(args.srid_input);
    collection.add(table.view(Some(true), Some(args.srid_output))?);

    let mut sensor = attributes([("type", Some(json!("ins"))), ("name", Some(json!("ins")))]);
    fill(ResourceKind::Sensor, &mut sensor, None, &metadata)?;
    let mut ins = attributes([("name", Some(json!("ins"))), ("srid", Some(json!(args.srid_input)))]);
    fill(ResourceKind::Referential, &mut ins, None, &metadata)?;
    let mut world = attributes([
        ("name", Some(json!("world"))),
        ("srid", Some(json!(args.srid_output))),
    ]);
    fill(ResourceKind::Referential, &mut world, None, &metadata)?;
    let mut platform = attributes([("name", Some(json!("Stereopolis II")))]);
    fill(ResourceKind::Platform, &mut platform, None, &metadata)?;
    let mut project = attributes([("name", Some(json!(args.project)))]);
    fill(ResourceKind::Project, &mut project, None, &metadata)?;
    let mut session = attributes([("name", Some(json!("{session_time:%y%m%d}{section_name}")))]);
    fill(ResourceKind::Session, &mut session, None, &metadata)?;
    let mut transfo = attributes([("name", Some(json!("{table}_view")))]);
    fill(ResourceKind::Transfo, &mut transfo, None, &metadata)?;
    let mut tree = Attributes::new();
    fill(ResourceKind::Transfotree, &mut tree, None, &metadata)?;

    let sensor = RecordRef::sensor(Value::Object(sensor))?;
    let project = RecordRef::project(Value::Object(project))?;
    let platform = RecordRef::platform(Value::Object(platform))?;
    let session = RecordRef::session(&project, &platform, Value::Object(session))?;
    let ins = RecordRef::referential(&sensor, Value::Object(ins))?;
    let world = RecordRef::referential(&sensor, Value::Object(world))?;

    collection.add(RecordRef::datasource(
        &session,
        &ins,
        json!({"type": "trajectory", "uri": table.datasource_uri()}),
    )?);

    let column = format!("{schema}.{name}_view.points");
    for forward in [true, false] {
        let transfo = ins_transfo(&ins, &world, &transfo, &column, forward)?;
        collection.add(RecordRef::transfotree([transfo], Value::Object(tree.clone()))?);
    }
    Ok(())
}

pub fn read(args: &SbetArgs) -> Result<Collection> {
    let mut collection = Collection::new();
    for path in args.pointcloud.matching(&args.patterns)? {
        info!("Importing {}", path.display());
        build(&mut collection, &path, args).with_context(|| format!("importing {}", path.display()))?;
    }
    Ok(collection)
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &SbetArgs) -> Result<()> {
    let collection = read(args)?;
    super::publish(store, &collection, &args.pointcloud.chdir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use li3ds_core::StagingBackend;
    use std::fs;
    use std::path::PathBuf;

    fn args(dir: &Path) -> SbetArgs {
        SbetArgs {
            pointcloud: PointCloudArgs {
                chdir: dir.to_path_buf(),
                ..Default::default()
            },
            project: "Paris".to_string(),
            srid_input: 4326,
            srid_output: 2154,
            patterns: vec!["*.out".to_string()],
        }
    }

    #[test]
    fn test_import_sbet() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("LANDINS_20170516_075157_PP.popout.out"), "").unwrap();

        let mut store = Store::new(StagingBackend::new());
        import(&mut store, &args(dir.path())).unwrap();
        let backend = store.backend();

        let session = &backend.table(&ResourceKind::Session.path(None).unwrap())[0];
        assert_eq!(session["name"], json!("170516"));
        let datasource = &backend.table(&ResourceKind::Datasource.path(None).unwrap())[0];
        assert_eq!(datasource["type"], json!("trajectory"));
        assert_eq!(
            datasource["uri"],
            json!("column:public.LANDINS_20170516_075157_PP_view.points")
        );

        let transfos = backend.table(&ResourceKind::Transfo.path(None).unwrap());
        assert_eq!(transfos.len(), 2);
        for transfo in transfos {
            assert_eq!(transfo["name"], json!("LANDINS_20170516_075157_PP_view"));
            assert_eq!(
                transfo["parameters_column"],
                json!("public.LANDINS_20170516_075157_PP_view.points")
            );
        }
        // world -> ins first, with the inverse rotation
        assert_eq!(transfos[0]["parameters"][0]["vec3"], json!(["-x", "-y", "-z"]));
        assert_eq!(transfos[1]["parameters"][0]["quat"], json!(["qw", "qx", "qy", "qz"]));
        assert_eq!(backend.rows(ResourceKind::Transfotree), 2);

        let referentials = backend.table(&ResourceKind::Referential.path(None).unwrap());
        let world = referentials.iter().find(|r| r["name"] == json!("world")).unwrap();
        assert_eq!(world["srid"], json!(2154));
        let view = &backend.table(&ResourceKind::ForeignpcView.path(None).unwrap())[0];
        assert_eq!(view["sbet"], json!(true));
    }

    #[test]
    fn test_unknown_file_name() {
        let err = parse_path(&PathBuf::from("trajectory.out")).unwrap_err();
        assert!(err.to_string().contains("unknown trajectory file name"));
        let (name, time) = parse_path(&PathBuf::from("A_20170516_0_PP.out")).unwrap();
        assert_eq!(name, "A_20170516_0_PP");
        assert_eq!(time, json!("2017-05-16T00:00:00+00:00"));
    }
}
