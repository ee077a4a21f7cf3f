//! External calibration of a camera block
//!
//! The input is either a blinis XML file or a Stereopolis
//! `cameraMetaData.json` array (`id`, `position`, row-major `rotation`).
//! Unlike `import-blinis`, every camera gets its own sensor, whose
//! referential is the target of the block transfo.

use anyhow::{Context, Result};
use clap::Args;
use li3ds_core::attrs::display_value;
use li3ds_core::{Attributes, Backend, Collection, RecordRef, ResourceKind, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

use super::blinis::{self, BlockCamera};
use super::{attributes, basename, xml, CalibrationArgs};
use crate::template::{fill, Metadata};

#[derive(Args, Debug, Clone, Default)]
pub struct ExtcalibArgs {
    #[command(flatten)]
    pub calibration: CalibrationArgs,

    /// Camera sensor name prefix
    #[arg(long, default_value = "")]
    pub sensor_prefix: String,

    /// Referential name prefix
    #[arg(long, default_value = "")]
    pub referential_prefix: String,
}

#[derive(Debug, Deserialize)]
struct CameraMetaData {
    id: Value,
    position: [f64; 3],
    rotation: [f64; 9],
}

impl CameraMetaData {
    fn block_camera(&self) -> BlockCamera {
        let r = &self.rotation;
        BlockCamera {
            id: display_value(&self.id),
            mat4x3: xml::mat4x3(
                [[r[0], r[1], r[2]], [r[3], r[4], r[5]], [r[6], r[7], r[8]]],
                self.position,
            ),
        }
    }
}

/// Block name and cameras from either supported format
fn block(text: &str) -> Result<(Option<String>, Vec<BlockCamera>)> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => {
            let cameras: Vec<CameraMetaData> =
                serde_json::from_value(value).context("camera metadata should be an array of cameras")?;
            Ok((None, cameras.iter().map(CameraMetaData::block_camera).collect()))
        }
        Err(_) => Ok(blinis::cameras(text)?),
    }
}

fn build(
    sensor_name: Option<String>,
    cameras: &[BlockCamera],
    basename: &str,
    args: &ExtcalibArgs,
    owner: &str,
) -> Result<Collection> {
    let mut metadata = Metadata::new();
    metadata.insert("basename".to_string(), Some(basename.to_string()));

    let overrides = args.calibration.overrides(owner)?;

    let mut group = attributes([("type", Some(json!("group")))]);
    if sensor_name.is_some() {
        group.insert("name".to_string(), json!("{sensor_name}"));
        metadata.insert("sensor_name".to_string(), sensor_name);
    }
    fill(ResourceKind::Sensor, &mut group, Some(&overrides.sensor), &metadata)?;
    let mut base = attributes([("name", Some(json!(format!("{}base", args.referential_prefix))))]);
    fill(ResourceKind::Referential, &mut base, None, &metadata)?;
    let mut tree = Attributes::new();
    fill(ResourceKind::Transfotree, &mut tree, Some(&overrides.transfotree), &metadata)?;

    let group = RecordRef::sensor(Value::Object(group))?;
    let base = RecordRef::referential(&group, Value::Object(base))?;
    let affine = RecordRef::transfo_type_with_signature("affine_mat4x3", &["mat4x3"])?;

    let mut transfos = Vec::with_capacity(cameras.len());
    for camera in cameras {
        metadata.insert("IdGrp".to_string(), Some(camera.id.clone()));

        let mut sensor = attributes([
            ("name", Some(json!(format!("{}{{IdGrp}}", args.sensor_prefix)))),
            ("type", Some(json!("camera"))),
        ]);
        fill(ResourceKind::Sensor, &mut sensor, None, &metadata)?;
        let mut referential =
            attributes([("name", Some(json!(format!("{}{{IdGrp}}", args.referential_prefix))))]);
        fill(ResourceKind::Referential, &mut referential, None, &metadata)?;
        let mut transfo = attributes([("name", Some(json!("{IdGrp}")))]);
        fill(ResourceKind::Transfo, &mut transfo, Some(&overrides.transfo), &metadata)?;
        transfo.insert("parameters".to_string(), json!([{"mat4x3": camera.mat4x3}]));

        let sensor = RecordRef::sensor(Value::Object(sensor))?;
        let target = RecordRef::referential(&sensor, Value::Object(referential))?;
        transfos.push(RecordRef::transfo(
            &base,
            &target,
            Some(affine.clone()),
            Value::Object(transfo),
        )?);
    }

    let mut collection = Collection::new();
    collection.add(RecordRef::transfotree(transfos, Value::Object(tree))?);
    Ok(collection)
}

/// Read one calibration file into a collection
pub fn read(path: &Path, args: &ExtcalibArgs, owner: &str) -> Result<Collection> {
    let text = super::read_text(path)?;
    let (sensor_name, cameras) = block(&text).with_context(|| format!("parsing {}", path.display()))?;
    build(sensor_name, &cameras, &basename(path), args, owner)
        .with_context(|| format!("importing {}", path.display()))
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &ExtcalibArgs, owner: &str) -> Result<()> {
    for path in &args.calibration.files {
        info!("Importing {}", path.display());
        let collection = read(path, args, owner)?;
        super::publish(store, &collection, &path.display().to_string())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use li3ds_core::StagingBackend;
    use std::fs;
    use std::path::PathBuf;

    const CAMERAS: &str = r#"[
        {"id": 300, "position": [1, 2, 3], "rotation": [1, 0, 0, 0, 1, 0, 0, 0, 1]},
        {"id": 301, "position": [0, 0, 0.5], "rotation": [0, 1, 0, -1, 0, 0, 0, 0, 1]}
    ]"#;

    const BLINIS: &str = r#"<StructBlockCam>
    <KeyIm2TimeCam>Stereopolis</KeyIm2TimeCam>
    <LiaisonsSHC>
        <ParamOrientSHC>
            <IdGrp>cam1</IdGrp>
            <Vecteur>1 2 3</Vecteur>
            <Rot><L1>1 0 0</L1><L2>0 1 0</L2><L3>0 0 1</L3></Rot>
        </ParamOrientSHC>
    </LiaisonsSHC>
</StructBlockCam>"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn args(files: Vec<PathBuf>) -> ExtcalibArgs {
        ExtcalibArgs {
            calibration: CalibrationArgs {
                files,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_camera_metadata_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "cameraMetaData.json", CAMERAS);
        let args = ExtcalibArgs {
            sensor_prefix: "cam_".to_string(),
            referential_prefix: "ref_".to_string(),
            ..args(vec![path])
        };
        let mut store = Store::new(StagingBackend::new());
        import(&mut store, &args, "alice").unwrap();

        let backend = store.backend();
        let sensors: Vec<(&Value, &Value)> = backend
            .table(&ResourceKind::Sensor.path(None).unwrap())
            .iter()
            .map(|s| (&s["name"], &s["type"]))
            .collect();
        assert_eq!(
            sensors,
            [
                (&json!("cameraMetaData.json"), &json!("group")),
                (&json!("cam_300"), &json!("camera")),
                (&json!("cam_301"), &json!("camera")),
            ]
        );

        let referentials = backend.table(&ResourceKind::Referential.path(None).unwrap());
        assert_eq!(referentials[0]["name"], json!("ref_base"));
        assert_eq!(referentials[0]["sensor"], json!(0));
        assert_eq!(referentials[1]["name"], json!("ref_300"));
        assert_eq!(referentials[1]["sensor"], json!(1));

        let transfos = backend.table(&ResourceKind::Transfo.path(None).unwrap());
        assert_eq!(transfos[1]["name"], json!("301"));
        assert_eq!(
            transfos[1]["parameters"],
            json!([{"mat4x3": [0.0, 1.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.5]}])
        );
        let tree = &backend.table(&ResourceKind::Transfotree.path(None).unwrap())[0];
        assert_eq!(tree["transfos"], json!([0, 1]));
    }

    #[test]
    fn test_blinis_xml() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "blinis.xml", BLINIS);
        let mut store = Store::new(StagingBackend::new());
        import(&mut store, &args(vec![path]), "alice").unwrap();

        let backend = store.backend();
        let sensors = backend.table(&ResourceKind::Sensor.path(None).unwrap());
        assert_eq!(sensors[0]["name"], json!("Stereopolis"));
        assert_eq!(sensors[1]["name"], json!("cam1"));
        assert_eq!(backend.rows(ResourceKind::Transfo), 1);
    }

    #[test]
    fn test_invalid_camera_metadata() {
        let err = block(r#"{"id": 1}"#).unwrap_err();
        assert!(err.to_string().contains("array of cameras"));
        assert!(block("<StructBlockCam/>").is_err());
    }
}
