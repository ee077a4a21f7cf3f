//! MicMac blinis files (`StructBlockCam`)
//!
//! A blinis file describes a rigid camera block: one `ParamOrientSHC` per
//! camera gives its rotation and offset in the block frame. The import
//! creates a sensor group with a `base` referential, one referential and
//! one `affine_mat4x3` transfo per camera, and a transfotree joining them.

use anyhow::{Context, Result};
use li3ds_core::{Attributes, Backend, Collection, RecordRef, ResourceKind, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

use super::xml::{self, XmlError};
use super::{attributes, basename, CalibrationArgs};
use crate::template::{fill, Metadata};

#[derive(Debug, Deserialize)]
struct StructBlockCam {
    #[serde(rename = "KeyIm2TimeCam", default)]
    key_im2_time_cam: Option<String>,
    #[serde(rename = "LiaisonsSHC", default)]
    liaisons: Option<LiaisonsShc>,
}

#[derive(Debug, Deserialize)]
struct LiaisonsShc {
    #[serde(rename = "ParamOrientSHC", default)]
    params: Vec<ParamOrientShc>,
}

#[derive(Debug, Deserialize)]
struct ParamOrientShc {
    #[serde(rename = "IdGrp")]
    id_grp: String,
    #[serde(rename = "Vecteur")]
    vecteur: String,
    #[serde(rename = "Rot")]
    rot: Rot,
}

#[derive(Debug, Deserialize)]
struct Rot {
    #[serde(rename = "L1")]
    l1: String,
    #[serde(rename = "L2")]
    l2: String,
    #[serde(rename = "L3")]
    l3: String,
}

impl ParamOrientShc {
    /// Row-major 3x4 matrix: each rotation row followed by the offset
    fn mat4x3(&self) -> Result<Vec<f64>, XmlError> {
        let rows = [
            xml::floats("Rot/L1", &self.rot.l1)?,
            xml::floats("Rot/L2", &self.rot.l2)?,
            xml::floats("Rot/L3", &self.rot.l3)?,
        ];
        Ok(xml::mat4x3(rows, xml::floats("Vecteur", &self.vecteur)?))
    }
}

fn parse(text: &str) -> Result<StructBlockCam, XmlError> {
    xml::parse(text)
}

/// One camera of a rigid block: its group id and block-to-camera matrix
#[derive(Debug, Clone, PartialEq)]
pub struct BlockCamera {
    pub id: String,
    pub mat4x3: Vec<f64>,
}

impl StructBlockCam {
    fn params(&self) -> Result<&[ParamOrientShc], XmlError> {
        self.liaisons
            .as_ref()
            .map(|l| l.params.as_slice())
            .filter(|params| !params.is_empty())
            .ok_or(XmlError::MissingTag("LiaisonsSHC/ParamOrientSHC"))
    }
}

/// Block name and cameras of a blinis document
pub fn cameras(text: &str) -> Result<(Option<String>, Vec<BlockCamera>), XmlError> {
    let block = parse(text)?;
    let cameras = block
        .params()?
        .iter()
        .map(|node| {
            Ok(BlockCamera {
                id: node.id_grp.trim().to_string(),
                mat4x3: node.mat4x3()?,
            })
        })
        .collect::<Result<Vec<_>, XmlError>>()?;
    Ok((block.key_im2_time_cam.clone(), cameras))
}

fn build(block: &StructBlockCam, basename: &str, args: &CalibrationArgs, owner: &str) -> Result<Collection> {
    let params = block.params()?;

    let mut metadata = Metadata::new();
    metadata.insert("basename".to_string(), Some(basename.to_string()));
    metadata.insert("sensor_name".to_string(), block.key_im2_time_cam.clone());

    let overrides = args.overrides(owner)?;

    let mut sensor = attributes([
        ("name", Some(json!("{sensor_name}"))),
        ("type", Some(json!("group"))),
    ]);
    fill(ResourceKind::Sensor, &mut sensor, Some(&overrides.sensor), &metadata)?;
    let mut base = attributes([("name", Some(json!("base")))]);
    fill(ResourceKind::Referential, &mut base, None, &metadata)?;
    let mut tree = Attributes::new();
    fill(ResourceKind::Transfotree, &mut tree, Some(&overrides.transfotree), &metadata)?;

    let sensor = RecordRef::sensor(Value::Object(sensor))?;
    let base = RecordRef::referential(&sensor, Value::Object(base))?;
    let affine = RecordRef::transfo_type_with_signature("affine_mat4x3", &["mat4x3"])?;

    let mut transfos = Vec::with_capacity(params.len());
    for node in params {
        metadata.insert("IdGrp".to_string(), Some(node.id_grp.trim().to_string()));

        let mut referential = attributes([("name", Some(json!("{IdGrp}")))]);
        fill(ResourceKind::Referential, &mut referential, None, &metadata)?;
        let mut transfo = attributes([("name", Some(json!("{IdGrp}")))]);
        fill(ResourceKind::Transfo, &mut transfo, Some(&overrides.transfo), &metadata)?;
        transfo.insert("parameters".to_string(), json!([{"mat4x3": node.mat4x3()?}]));

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

/// Read one blinis file into a collection
pub fn read(path: &Path, args: &CalibrationArgs, owner: &str) -> Result<Collection> {
    let xml = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let block = parse(&xml).with_context(|| format!("parsing {}", path.display()))?;
    build(&block, &basename(path), args, owner)
        .with_context(|| format!("importing {}", path.display()))
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &CalibrationArgs, owner: &str) -> Result<()> {
    for path in &args.files {
        info!("Importing {}", path.display());
        let collection = read(path, args, owner)?;
        super::publish(store, &collection, &path.display().to_string())?;
    }
    Ok(())
}
