//! MicMac camera orientations (`OrientationConique`)
//!
//! An orientation file poses one image: the intrinsic calibration, given
//! inline (`Interne`) or by file name (`FileInterne`), the exterior pose
//! (`Externe`) and the image affinity (`OrIntImaM2C`). Two transfotrees
//! are published: the intrinsic one and one holding every transfo from
//! `world` to `image`.

use anyhow::{Context, Result};
use clap::Args;
use li3ds_core::{Attributes, Backend, Collection, RecordRef, ResourceKind, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use tracing::info;

use super::autocal::{self, Affinite, CalibrationInternConique};
use super::xml::{self, XmlError};
use super::{attributes, basename, named_transfo, oriented_transfo, CalibrationArgs};
use crate::template::{fill, Metadata};

#[derive(Args, Debug, Clone, Default)]
pub struct OriArgs {
    #[command(flatten)]
    pub calibration: CalibrationArgs,

    /// Intrinsic transfotree name (`--transfotree` names the full tree)
    #[arg(long)]
    pub intrinsic_transfotree: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExportApero {
    #[serde(rename = "OrientationConique", default)]
    orientation: Option<OrientationConique>,
}

#[derive(Debug, Deserialize)]
struct OrientationConique {
    #[serde(rename = "OrIntImaM2C")]
    or_int: Affinite,
    #[serde(rename = "TypeProj")]
    type_proj: String,
    #[serde(rename = "FileInterne", default)]
    file_interne: Option<String>,
    #[serde(rename = "RelativeNameFI", default)]
    relative_name: Option<String>,
    #[serde(rename = "Interne", default)]
    interne: Option<CalibrationInternConique>,
    #[serde(rename = "Externe")]
    externe: Externe,
    #[serde(rename = "ConvOri")]
    conv_ori: ConvOri,
}

#[derive(Debug, Deserialize)]
struct ConvOri {
    #[serde(rename = "KnownConv")]
    known_conv: String,
}

#[derive(Debug, Deserialize)]
struct Externe {
    #[serde(rename = "KnownConv")]
    known_conv: String,
    #[serde(rename = "Centre")]
    centre: String,
    #[serde(rename = "ParamRotation")]
    rotation: ParamRotation,
}

#[derive(Debug, Deserialize)]
struct ParamRotation {
    #[serde(rename = "CodageMatr")]
    matrix: CodageMatr,
}

#[derive(Debug, Deserialize)]
struct CodageMatr {
    #[serde(rename = "L1")]
    l1: String,
    #[serde(rename = "L2")]
    l2: String,
    #[serde(rename = "L3")]
    l3: String,
}

impl Externe {
    fn mat4x3(&self) -> Result<Vec<f64>, XmlError> {
        xml::check("Externe/KnownConv", &self.known_conv, "eConvApero_DistM2C")?;
        let m = &self.rotation.matrix;
        let rows = [
            xml::floats("CodageMatr/L1", &m.l1)?,
            xml::floats("CodageMatr/L2", &m.l2)?,
            xml::floats("CodageMatr/L3", &m.l3)?,
        ];
        Ok(xml::mat4x3(rows, xml::floats("Externe/Centre", &self.centre)?))
    }
}

fn parse(text: &str) -> Result<OrientationConique, XmlError> {
    let root: ExportApero = xml::parse(text)?;
    root.orientation.ok_or(XmlError::MissingTag("OrientationConique"))
}

/// Path of an external calibration, relative to the orientation file
/// when `RelativeNameFI` is true
fn interne_path(orientation: &Path, file: &str, relative: Option<&str>) -> PathBuf {
    let file = file.trim();
    match (relative.map(str::trim), orientation.parent()) {
        (Some("true"), Some(dir)) => dir.join(file),
        _ => PathBuf::from(file),
    }
}

fn build(node: &OrientationConique, path: &Path, args: &OriArgs, owner: &str) -> Result<Collection> {
    xml::check("ConvOri/KnownConv", &node.conv_ori.known_conv, "eConvApero_DistM2C")?;
    xml::check("TypeProj", &node.type_proj, "eProjStenope")?;

    let overrides = args.calibration.overrides(owner)?;
    let mut intrinsic_overrides = overrides.clone();
    intrinsic_overrides.transfotree = attributes([
        ("name", args.intrinsic_transfotree.clone().map(Value::from)),
        ("owner", Some(Value::from(owner))),
    ]);

    let intrinsics = match &node.file_interne {
        Some(file) => {
            let interne = interne_path(path, file, node.relative_name.as_deref());
            let calibration = autocal::read_calibration(&interne)?;
            autocal::intrinsics(&calibration, &basename(&interne), &intrinsic_overrides)
                .with_context(|| format!("importing {}", interne.display()))?
        }
        None => {
            let calibration = xml::required(&node.interne, "Interne")?;
            autocal::intrinsics(calibration, &basename(path), &intrinsic_overrides)?
        }
    };

    let mut metadata = Metadata::new();
    metadata.insert("basename".to_string(), Some(basename(path)));
    let mut template = Attributes::new();
    fill(ResourceKind::Referential, &mut template, None, &metadata)?;
    let mut transfo = Attributes::new();
    fill(ResourceKind::Transfo, &mut transfo, Some(&overrides.transfo), &metadata)?;
    let mut tree = Attributes::new();
    fill(ResourceKind::Transfotree, &mut tree, Some(&overrides.transfotree), &metadata)?;

    let referential = |name: &str| {
        let mut attrs = template.clone();
        attrs.insert("name".to_string(), json!(name));
        RecordRef::referential(&intrinsics.sensor, Value::Object(attrs))
    };
    let world = referential("world")?;
    let image = referential("image")?;

    let pose = oriented_transfo(
        &world,
        &intrinsics.camera,
        false,
        RecordRef::transfo_type_with_signature("affine_mat4x3", &["mat4x3"])?,
        named_transfo(&transfo, "Externe", json!({"mat4x3": node.externe.mat4x3()?})),
    )?;
    let orint = oriented_transfo(
        &intrinsics.image,
        &image,
        false,
        RecordRef::transfo_type_with_signature("affine_mat3x2", &["mat3x2"])?,
        named_transfo(&transfo, "OrIntImaM2C", json!({"mat3x2": node.or_int.mat3x2()?})),
    )?;

    let mut transfos = vec![orint, pose];
    transfos.extend(intrinsics.transfos.iter().cloned());

    let mut collection = Collection::new();
    collection.add(intrinsics.transfotree);
    collection.add(RecordRef::transfotree(transfos, Value::Object(tree))?);
    Ok(collection)
}

/// Read one orientation file into a collection
pub fn read(path: &Path, args: &OriArgs, owner: &str) -> Result<Collection> {
    let text = super::read_text(path)?;
    let node = parse(&text).with_context(|| format!("parsing {}", path.display()))?;
    build(&node, path, args, owner).with_context(|| format!("importing {}", path.display()))
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &OriArgs, owner: &str) -> Result<()> {
    for path in &args.calibration.files {
        info!("Importing {}", path.display());
        let collection = read(path, args, owner)?;
        super::publish(store, &collection, &path.display().to_string())?;
    }
    Ok(())
}
