//! Stereopolis orientation files (orimatis `orientation` XML, version 1.0)
//!
//! Each file orients one image of a mobile mapping acquisition. Images of
//! the same camera share their exterior transfo (`#mat3d` or
//! `#quaternion`): its parameters accumulate one timed block per file, so
//! every file matched by the patterns feeds a single collection that is
//! published once.

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveTime};
use clap::Args;
use li3ds_core::time::Timestamp;
use li3ds_core::{Attributes, Backend, Collection, RecordRef, ResourceKind, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info};

use super::autocal::{described, RASTER_FRAME};
use super::xml::{self, XmlError};
use super::{attributes, basename, named_transfo, oriented_transfo, timestamp};
use crate::template::{fill, Metadata};

const CAMERA_FRAME: &str = "origin: camera position, \
    +X: right of the camera, \
    +Y: bottom of the camera, \
    +Z: optical axis (in front of the camera).";

#[derive(Args, Debug, Clone)]
pub struct OrimatisArgs {
    /// Camera sensor id
    #[arg(short = 'i', long)]
    pub sensor_id: Option<i64>,

    /// Camera sensor name
    #[arg(short, long)]
    pub sensor: Option<String>,

    /// Transfotree name
    #[arg(long)]
    pub transfotree: Option<String>,

    /// Transfo basename
    #[arg(short, long)]
    pub transfo: Option<String>,

    /// Platform configuration name
    #[arg(long)]
    pub platform_config: Option<String>,

    /// Calibration date/time
    #[arg(short = 'd', long)]
    pub calibration: Option<String>,

    /// Acquisition date/time, the validity of the exterior transfos
    #[arg(short = 'a', long)]
    pub acquisition: Option<String>,

    /// Validity start of the intrinsic transfos (valid since always when unset)
    #[arg(long)]
    pub validity_start: Option<String>,

    /// Validity end of the intrinsic transfos (valid forever when unset)
    #[arg(long)]
    pub validity_end: Option<String>,

    /// Base image directory in image URIs
    #[arg(short = 'b', long)]
    pub base_image_dir: Option<PathBuf>,

    /// Directory searched recursively for orimatis files
    #[arg(short = 'f', long, default_value = ".")]
    pub orimatis_dir: PathBuf,

    /// File extension of image URIs, e.g. ".tif"
    #[arg(short = 'e', long)]
    pub image_file_ext: Option<String>,

    /// Orimatis file name patterns, e.g. Paris-100-*.ori.xml
    #[arg(required = true)]
    pub patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Orientation {
    version: String,
    auxiliarydata: AuxiliaryData,
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct AuxiliaryData {
    image_name: String,
    stereopolis: Stereopolis,
    image_date: ImageDate,
}

#[derive(Debug, Deserialize)]
struct Stereopolis {
    #[serde(default)]
    chantier: Option<String>,
    date: String,
    session: i64,
    section: i64,
    #[serde(default)]
    numero: Option<i64>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    flatfield_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageDate {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: f64,
    time_system: String,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    extrinseque: Extrinseque,
    intrinseque: Intrinseque,
}

#[derive(Debug, Deserialize)]
struct Extrinseque {
    #[serde(default)]
    systeme: Option<String>,
    #[serde(default)]
    grid_alti: Option<String>,
    sommet: Sommet,
    rotation: Rotation,
}

#[derive(Debug, Deserialize)]
struct Sommet {
    easting: f64,
    northing: f64,
    altitude: f64,
}

#[derive(Debug, Deserialize)]
struct Rotation {
    #[serde(rename = "Image2Ground")]
    image2ground: bool,
    #[serde(default)]
    mat3d: Option<Mat3d>,
    #[serde(default)]
    quaternion: Option<Quaternion>,
}

#[derive(Debug, Deserialize)]
struct Mat3d {
    l1: Line,
    l2: Line,
    l3: Line,
}

#[derive(Debug, Deserialize)]
struct Line {
    pt3d: Pt3d,
}

#[derive(Debug, Deserialize)]
struct Pt3d {
    x: f64,
    y: f64,
    z: f64,
}

#[derive(Debug, Deserialize)]
struct Quaternion {
    x: f64,
    y: f64,
    z: f64,
    w: f64,
}

#[derive(Debug, Deserialize)]
struct Intrinseque {
    #[serde(default)]
    sensor: Option<SensorNode>,
    #[serde(default)]
    spherique: Option<Spherique>,
}

#[derive(Debug, Deserialize)]
struct ImageSize {
    width: f64,
    height: f64,
}

#[derive(Debug, Deserialize)]
struct Ppa {
    c: f64,
    l: f64,
    #[serde(default)]
    focale: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SensorNode {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    calibration_date: Option<String>,
    #[serde(default)]
    serial_number: Option<String>,
    image_size: ImageSize,
    #[serde(default)]
    pixel_size: Option<f64>,
    ppa: Ppa,
    distortion: DistortionNode,
}

#[derive(Debug, Deserialize)]
struct DistortionNode {
    pps: Pps,
    r3: f64,
    r5: f64,
    r7: f64,
}

#[derive(Debug, Deserialize)]
struct Pps {
    c: f64,
    l: f64,
}

#[derive(Debug, Deserialize)]
struct Spherique {
    #[serde(default)]
    name: Option<String>,
    image_size: ImageSize,
    ppa: Ppa,
    frame: Frame,
}

#[derive(Debug, Deserialize)]
struct Frame {
    lambda_min: f64,
    lambda_max: f64,
    phi_min: f64,
    phi_max: f64,
}

/// Pinhole camera with radial distortion, or spherical panoramic camera
#[derive(Clone, Copy)]
enum Camera<'a> {
    Pinhole(&'a SensorNode),
    Spherical(&'a Spherique),
}

impl Orientation {
    fn camera(&self) -> Result<Camera<'_>, XmlError> {
        let intrinseque = &self.geometry.intrinseque;
        match (&intrinseque.sensor, &intrinseque.spherique) {
            (Some(sensor), _) => Ok(Camera::Pinhole(sensor)),
            (None, Some(spherique)) => Ok(Camera::Spherical(spherique)),
            (None, None) => Err(XmlError::MissingTag("geometry/intrinseque/sensor")),
        }
    }
}

impl Camera<'_> {
    fn name(&self) -> Option<&str> {
        match self {
            Camera::Pinhole(s) => s.name.as_deref(),
            Camera::Spherical(s) => s.name.as_deref(),
        }
    }

    fn image_size(&self) -> [f64; 2] {
        let size = match self {
            Camera::Pinhole(s) => &s.image_size,
            Camera::Spherical(s) => &s.image_size,
        };
        [size.width, size.height]
    }
}

impl ImageDate {
    fn timestamp(&self) -> Result<Timestamp> {
        xml::check("image_date/time_system", &self.time_system, "UTC")?;
        let seconds = self.second.trunc();
        let micros = ((self.second - seconds) * 1e6).round() as u32;
        NaiveDate::from_ymd_opt(self.year, self.month, self.day)
            .and_then(|d| d.and_hms_micro_opt(self.hour, self.minute, seconds as u32, micros))
            .map(|dt| Timestamp::Aware(dt.and_utc().fixed_offset()))
            .context("invalid image_date")
    }
}

/// Stereopolis `yymmdd` date
fn stereopolis_date(text: &str) -> Result<Timestamp> {
    let date = NaiveDate::parse_from_str(text.trim(), "%y%m%d")
        .with_context(|| format!("invalid stereopolis date {text:?}"))?;
    Ok(Timestamp::Naive(date.and_time(NaiveTime::MIN)))
}

/// Calibration date as `dd-mm-YYYY` or `mm-YYYY`, in UTC
fn calibration_date(text: &str) -> Result<Timestamp> {
    let text = text.trim();
    let date = NaiveDate::parse_from_str(text, "%d-%m-%Y")
        .or_else(|_| NaiveDate::parse_from_str(&format!("01-{text}"), "%d-%m-%Y"))
        .with_context(|| format!("invalid calibration date {text:?}"))?;
    Ok(Timestamp::Aware(date.and_time(NaiveTime::MIN).and_utc().fixed_offset()))
}

/// Lexical normalization: `.` dropped, `..` folded into its parent
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(".."),
            },
            other => out.push(other),
        }
    }
    if out.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        out
    }
}

/// `file:` URI of the image oriented by an orimatis file found in `subdir`
fn image_uri(subdir: &Path, image: &str, args: &OrimatisArgs) -> String {
    let mut path = subdir.join(image.trim());
    if let Some(base) = &args.base_image_dir {
        path = base.join(path);
    }
    if let Some(ext) = &args.image_file_ext {
        path.set_extension(ext.trim_start_matches('.'));
    }
    format!("file:{}", normalize(&path).display())
}

/// Overrides shared by every file of one run
struct Overrides {
    sensor: Attributes,
    transfo_ext: Attributes,
    transfo_int: Attributes,
    transfotree: Attributes,
    config: Attributes,
}

impl OrimatisArgs {
    fn overrides(&self, owner: &str) -> Result<Overrides> {
        let acquisition = timestamp(&self.acquisition, "acquisition")?;
        Ok(Overrides {
            sensor: attributes([
                ("name", self.sensor.clone().map(Value::from)),
                ("id", self.sensor_id.map(Value::from)),
            ]),
            transfo_ext: attributes([
                ("name", self.sensor.clone().map(Value::from)),
                ("validity_start", acquisition.clone()),
                ("validity_end", acquisition),
            ]),
            transfo_int: attributes([
                ("name", self.transfo.clone().map(Value::from)),
                ("tdate", timestamp(&self.calibration, "calibration")?),
                ("validity_start", timestamp(&self.validity_start, "validity-start")?),
                ("validity_end", timestamp(&self.validity_end, "validity-end")?),
            ]),
            transfotree: attributes([
                ("name", self.transfotree.clone().map(Value::from)),
                ("owner", Some(Value::from(owner))),
            ]),
            config: attributes([
                ("name", self.platform_config.clone().map(Value::from)),
                ("owner", Some(Value::from(owner))),
            ]),
        })
    }
}

fn metadata(root: &Orientation, camera: &Camera, name: &str) -> Result<Metadata> {
    let stereopolis = &root.auxiliarydata.stereopolis;
    let extrinseque = &root.geometry.extrinseque;
    let acquisition = root.auxiliarydata.image_date.timestamp()?.isoformat();
    let date = stereopolis_date(&stereopolis.date)?.isoformat();
    let calibration = match camera {
        Camera::Pinhole(s) => s
            .calibration_date
            .as_deref()
            .map(calibration_date)
            .transpose()?
            .map(|t| t.isoformat()),
        Camera::Spherical(_) => None,
    };
    let serial = match camera {
        Camera::Pinhole(s) => s.serial_number.clone(),
        Camera::Spherical(_) => None,
    };

    let mut metadata = Metadata::new();
    let mut set = |key: &str, value: Option<String>| {
        metadata.insert(key.to_string(), value);
    };
    set("basename", Some(name.to_string()));
    set("calibration", calibration.clone());
    set("calibration_iso", calibration);
    set("acquisition", Some(acquisition.clone()));
    set("acquisition_iso", Some(acquisition));
    set("date", Some(date.clone()));
    set("date_iso", Some(date));
    set("numero", stereopolis.numero.map(|n| n.to_string()));
    set("section", Some(stereopolis.section.to_string()));
    set("session", Some(stereopolis.session.to_string()));
    set("flatfield", stereopolis.flatfield_name.clone());
    set("chantier", stereopolis.chantier.clone());
    set("position", stereopolis.position.clone());
    set("systeme", extrinseque.systeme.clone());
    set("grid_alti", extrinseque.grid_alti.clone());
    set("image", Some(root.auxiliarydata.image_name.trim().to_string()));
    set("sensor", camera.name().map(str::to_string));
    set("serial", serial);
    Ok(metadata)
}

/// Exterior transfo of the file, merged into an equal transfo of a
/// previous file when there is one
fn exterior(
    collection: &Collection,
    world: &RecordRef,
    eucli: &RecordRef,
    template: &Attributes,
    root: &Orientation,
    acquisition: &str,
) -> Result<RecordRef> {
    let extrinseque = &root.geometry.extrinseque;
    let s = &extrinseque.sommet;
    let rotation = &extrinseque.rotation;

    let (candidate, parameters) = if let Some(q) = &rotation.quaternion {
        let parameters = json!({
            "quat": [q.x, q.y, q.z, q.w],
            "vec3": [s.easting, s.northing, s.altitude],
            "_time": acquisition,
        });
        let ttype = RecordRef::transfo_type_with_signature("affine_quat", &["quat", "vec3", "_time"])?;
        let attrs = named_transfo(template, "quaternion", parameters.clone());
        (oriented_transfo(world, eucli, rotation.image2ground, ttype, attrs)?, parameters)
    } else if let Some(m) = &rotation.mat3d {
        let row = |l: &Line| [l.pt3d.x, l.pt3d.y, l.pt3d.z];
        let matrix = xml::mat4x3(
            [row(&m.l1), row(&m.l2), row(&m.l3)],
            [s.easting, s.northing, s.altitude],
        );
        let parameters = json!({"mat4x3": matrix, "_time": acquisition});
        let ttype = RecordRef::transfo_type_with_signature("affine_mat4x3", &["mat4x3", "_time"])?;
        let attrs = named_transfo(template, "mat3d", parameters.clone());
        (oriented_transfo(world, eucli, rotation.image2ground, ttype, attrs)?, parameters)
    } else {
        bail!("no rotation/mat3d or rotation/quaternion in geometry/extrinseque");
    };

    match collection.lookup(&candidate) {
        Some(existing) => {
            debug!("Appending parameters to an imported exterior transfo");
            existing.borrow_mut().append("parameters", parameters)?;
            Ok(existing)
        }
        None => Ok(candidate),
    }
}

/// Add the records of one orimatis file to `collection`
fn build(
    collection: &mut Collection,
    root: &Orientation,
    name: &str,
    subdir: &Path,
    args: &OrimatisArgs,
    overrides: &Overrides,
) -> Result<()> {
    xml::check("version", &root.version, "1.0")?;
    let camera = root.camera()?;
    let metadata = metadata(root, &camera, name)?;
    let acquisition = metadata
        .get("acquisition_iso")
        .cloned()
        .flatten()
        .unwrap_or_default();

    let mut sensor = attributes([
        ("type", Some(json!("camera"))),
        ("name", Some(json!("{sensor}"))),
        ("serial_number", Some(json!("{serial}"))),
    ]);
    fill(ResourceKind::Sensor, &mut sensor, Some(&overrides.sensor), &metadata)?;
    let pixel_size = match camera {
        Camera::Pinhole(s) => s.pixel_size,
        Camera::Spherical(_) => None,
    };
    sensor.insert(
        "specifications".to_string(),
        json!({
            "image_size": camera.image_size(),
            "pixel_size": pixel_size,
            "flatfield": metadata.get("flatfield").cloned().flatten(),
        }),
    );
    let mut referential = attributes([("name", Some(json!("{position}")))]);
    fill(ResourceKind::Referential, &mut referential, None, &metadata)?;
    let mut transfo_ext = attributes([("name", Some(json!("{sensor}")))]);
    fill(ResourceKind::Transfo, &mut transfo_ext, Some(&overrides.transfo_ext), &metadata)?;
    let mut transfo_int = attributes([("tdate", Some(json!("{calibration_iso}")))]);
    fill(ResourceKind::Transfo, &mut transfo_int, Some(&overrides.transfo_int), &metadata)?;
    let mut tree = Attributes::new();
    fill(ResourceKind::Transfotree, &mut tree, Some(&overrides.transfotree), &metadata)?;
    let mut project = attributes([("name", Some(json!("{chantier}")))]);
    fill(ResourceKind::Project, &mut project, None, &metadata)?;
    let mut platform = attributes([("name", Some(json!("Stereopolis II")))]);
    fill(ResourceKind::Platform, &mut platform, None, &metadata)?;
    let mut session = attributes([("name", Some(json!("{date:%y%m%d}/{session}/{section}")))]);
    fill(ResourceKind::Session, &mut session, None, &metadata)?;
    let mut datasource = attributes([
        ("capture_start", Some(json!("{acquisition_iso}"))),
        ("capture_end", Some(json!("{acquisition_iso}"))),
    ]);
    fill(ResourceKind::Datasource, &mut datasource, None, &metadata)?;
    let mut config = Attributes::new();
    fill(ResourceKind::PlatformConfig, &mut config, Some(&overrides.config), &metadata)?;

    let sensor = RecordRef::sensor(Value::Object(sensor))?;

    let extrinseque = &root.geometry.extrinseque;
    let systeme = extrinseque.systeme.as_deref().unwrap_or_default();
    let grid_alti = extrinseque.grid_alti.as_deref().unwrap_or_default();
    let mut world = referential.clone();
    world.insert("name".to_string(), json!(format!("{systeme}/{grid_alti}")));
    let srid = if systeme == "Lambert93" && grid_alti == "RAF09" { 2154 } else { 0 };
    world.insert("srid".to_string(), json!(srid));
    let world = RecordRef::referential(&sensor, Value::Object(world))?;
    let eucli = RecordRef::referential(&sensor, Value::Object(described(&referential, CAMERA_FRAME)))?;
    let mut image = described(&referential, RASTER_FRAME);
    image.insert("name".to_string(), json!("image"));
    let image = RecordRef::referential(&sensor, Value::Object(image))?;

    let exterior = exterior(collection, &world, &eucli, &transfo_ext, root, &acquisition)?;

    let mut transfos = vec![exterior];
    match camera {
        Camera::Pinhole(node) => {
            let mut undistorted = described(&referential, RASTER_FRAME);
            undistorted.insert("name".to_string(), json!("undistorted"));
            let undistorted = RecordRef::referential(&sensor, Value::Object(undistorted))?;
            let focal = node.ppa.focale.ok_or(XmlError::MissingTag("ppa/focale"))?;
            transfos.push(oriented_transfo(
                &eucli,
                &undistorted,
                false,
                RecordRef::transfo_type_with_signature("projective_pinhole", &["focal", "ppa"])?,
                named_transfo(
                    &transfo_int,
                    "projection",
                    json!({"focal": focal, "ppa": [node.ppa.c, node.ppa.l]}),
                ),
            )?);
            let d = &node.distortion;
            transfos.push(oriented_transfo(
                &undistorted,
                &image,
                false,
                RecordRef::transfo_type_with_signature("poly_radial_7", &["C", "R"])?,
                named_transfo(
                    &transfo_int,
                    "distortion",
                    json!({"C": [d.pps.c, d.pps.l], "R": [d.r3, d.r5, d.r7]}),
                ),
            )?);
        }
        Camera::Spherical(node) => {
            let f = &node.frame;
            transfos.push(oriented_transfo(
                &eucli,
                &image,
                false,
                RecordRef::transfo_type_with_signature(
                    "cartesian_to_spherical",
                    &["ppa", "lambda", "phi"],
                )?,
                named_transfo(
                    &transfo_int,
                    "projection",
                    json!({
                        "ppa": [node.ppa.c, node.ppa.l],
                        "lambda": [f.lambda_min, f.lambda_max],
                        "phi": [f.phi_min, f.phi_max],
                    }),
                ),
            )?);
        }
    }

    let tree = RecordRef::transfotree(transfos, Value::Object(tree))?;
    let project = RecordRef::project(Value::Object(project))?;
    let platform = RecordRef::platform(Value::Object(platform))?;
    let session = RecordRef::session(&project, &platform, Value::Object(session))?;

    let [width, height] = camera.image_size();
    let image_name = metadata.get("image").cloned().flatten().unwrap_or_default();
    datasource.insert("type".to_string(), json!("image"));
    datasource.insert("uri".to_string(), json!(image_uri(subdir, &image_name, args)));
    datasource.insert("bounds".to_string(), json!([0.0, width, 0.0, 0.0, height, 0.0]));
    let datasource = RecordRef::datasource(&session, &image, Value::Object(datasource))?;
    let config = RecordRef::platform_config(&platform, [tree], Value::Object(config))?;

    collection.add(datasource);
    collection.add(config);
    Ok(())
}

/// Read every orimatis file matched by the patterns into one collection
pub fn read(args: &OrimatisArgs, owner: &str) -> Result<Collection> {
    let overrides = args.overrides(owner)?;
    let mut collection = Collection::new();
    for pattern in &args.patterns {
        for path in super::find(&args.orimatis_dir, pattern, None)? {
            info!("Importing {}", path.display());
            let text = super::read_text(&path)?;
            let root: Orientation =
                xml::parse(&text).with_context(|| format!("parsing {}", path.display()))?;
            let subdir = path
                .strip_prefix(&args.orimatis_dir)
                .ok()
                .and_then(Path::parent)
                .unwrap_or(Path::new(""));
            build(&mut collection, &root, &basename(&path), subdir, args, &overrides)
                .with_context(|| format!("importing {}", path.display()))?;
        }
    }
    Ok(collection)
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &OrimatisArgs, owner: &str) -> Result<()> {
    let collection = read(args, owner)?;
    super::publish(store, &collection, &args.orimatis_dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use li3ds_core::StagingBackend;
    use std::fs;

    const INTRINSEQUE: &str = r#"<sensor>
                <name>Cam12</name>
                <calibration_date>04-2016</calibration_date>
                <serial_number>S12</serial_number>
                <image_size><width>2048</width><height>2048</height></image_size>
                <ppa><c>1024.5</c><l>1020.25</l><focale>1500</focale></ppa>
                <distortion>
                    <pps><c>1025</c><l>1021</l></pps>
                    <r3>1e-08</r3><r5>2e-15</r5><r7>3e-22</r7>
                </distortion>
                <pixel_size>7.4e-06</pixel_size>
            </sensor>"#;

    fn orimatis(image: &str, second: &str, rotation: &str, intrinseque: &str) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<orientation>
    <version>1.0</version>
    <auxiliarydata>
        <image_name>{image}</image_name>
        <stereopolis>
            <chantier>Paris</chantier>
            <date>170516</date>
            <session>1</session>
            <section>12</section>
            <numero>1</numero>
            <position>12</position>
            <flatfield_name>flat12</flatfield_name>
        </stereopolis>
        <image_date>
            <year>2017</year><month>5</month><day>16</day>
            <hour>7</hour><minute>51</minute><second>{second}</second>
            <time_system>UTC</time_system>
        </image_date>
    </auxiliarydata>
    <geometry>
        <extrinseque>
            <systeme>Lambert93</systeme>
            <grid_alti>RAF09</grid_alti>
            <sommet><easting>651000</easting><northing>6861000</northing><altitude>40</altitude></sommet>
            <rotation>
                <Image2Ground>false</Image2Ground>
                {rotation}
            </rotation>
        </extrinseque>
        <intrinseque>
            {intrinseque}
        </intrinseque>
    </geometry>
</orientation>
"#
        )
    }

    const MAT3D: &str = r#"<mat3d>
                    <l1><pt3d><x>1</x><y>0</y><z>0</z></pt3d></l1>
                    <l2><pt3d><x>0</x><y>1</y><z>0</z></pt3d></l2>
                    <l3><pt3d><x>0</x><y>0</y><z>1</z></pt3d></l3>
                </mat3d>"#;

    fn args(dir: &Path) -> OrimatisArgs {
        OrimatisArgs {
            sensor_id: None,
            sensor: None,
            transfotree: None,
            transfo: None,
            platform_config: None,
            calibration: None,
            acquisition: None,
            validity_start: None,
            validity_end: None,
            base_image_dir: Some(PathBuf::from("/images")),
            orimatis_dir: dir.to_path_buf(),
            image_file_ext: Some(".jpg".to_string()),
            patterns: vec!["*.ori.xml".to_string()],
        }
    }

    #[test]
    fn test_exterior_parameters_accumulate() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("12")).unwrap();
        fs::write(
            dir.path().join("12/a.ori.xml"),
            orimatis("img-a.tif", "57.5", MAT3D, INTRINSEQUE),
        )
        .unwrap();
        fs::write(
            dir.path().join("12/b.ori.xml"),
            orimatis("img-b.tif", "12", MAT3D, INTRINSEQUE),
        )
        .unwrap();

        let mut store = Store::new(StagingBackend::new());
        import(&mut store, &args(dir.path()), "alice").unwrap();
        let backend = store.backend();

        let transfos = backend.table(&ResourceKind::Transfo.path(None).unwrap());
        let exterior: Vec<&Attributes> = transfos
            .iter()
            .filter(|t| t["name"] == json!("Cam12#mat3d"))
            .collect();
        assert_eq!(exterior.len(), 1);
        let times: Vec<&Value> = exterior[0]["parameters"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| &p["_time"])
            .collect();
        assert_eq!(
            times,
            [
                &json!("2017-05-16T07:51:12+00:00"),
                &json!("2017-05-16T07:51:57.500000+00:00"),
            ]
        );
        assert_eq!(exterior[0]["validity_start"], json!("2017-05-16T07:51:12+00:00"));

        // one camera, one set of referentials
        assert_eq!(backend.rows(ResourceKind::Sensor), 1);
        assert_eq!(backend.rows(ResourceKind::Referential), 4);
        assert_eq!(backend.rows(ResourceKind::Session), 1);
        assert_eq!(backend.rows(ResourceKind::Datasource), 2);

        let world = backend
            .table(&ResourceKind::Referential.path(None).unwrap())
            .iter()
            .find(|r| r["name"] == json!("Lambert93/RAF09"))
            .unwrap();
        assert_eq!(world["srid"], json!(2154));

        let session = &backend.table(&ResourceKind::Session.path(None).unwrap())[0];
        assert_eq!(session["name"], json!("170516/1/12"));

        let mut uris: Vec<&Value> = backend
            .table(&ResourceKind::Datasource.path(None).unwrap())
            .iter()
            .map(|d| &d["uri"])
            .collect();
        uris.sort_by_key(|v| v.to_string());
        assert_eq!(
            uris,
            [&json!("file:/images/12/img-a.jpg"), &json!("file:/images/12/img-b.jpg")]
        );

        let sensor = &backend.table(&ResourceKind::Sensor.path(None).unwrap())[0];
        assert_eq!(sensor["serial_number"], json!("S12"));
        assert_eq!(sensor["specifications"]["flatfield"], json!("flat12"));

        let projection = transfos
            .iter()
            .find(|t| t["name"] == json!("a.ori.xml#projection"))
            .unwrap();
        assert_eq!(projection["tdate"], json!("2016-04-01T00:00:00+00:00"));
    }

    #[test]
    fn test_quaternion_and_spherical_camera() {
        let quaternion = "<quaternion><x>0</x><y>0</y><z>0</z><w>1</w></quaternion>";
        let spherique = r#"<spherique>
                <name>Pano</name>
                <image_size><width>4000</width><height>2000</height></image_size>
                <ppa><c>2000</c><l>1000</l></ppa>
                <frame>
                    <lambda_min>-3.14</lambda_min><lambda_max>3.14</lambda_max>
                    <phi_min>-1.57</phi_min><phi_max>1.57</phi_max>
                </frame>
            </spherique>"#;
        let text = orimatis("pano.jpg", "1", quaternion, spherique)
            .replace("<Image2Ground>false", "<Image2Ground>true");
        let root: Orientation = xml::parse(&text).unwrap();

        let mut args = args(Path::new("."));
        args.base_image_dir = None;
        args.image_file_ext = None;
        let overrides = args.overrides("alice").unwrap();
        let mut collection = Collection::new();
        build(&mut collection, &root, "p.ori.xml", Path::new(""), &args, &overrides).unwrap();

        let mut store = Store::new(StagingBackend::new());
        collection.publish_all(&mut store).unwrap();
        let backend = store.backend();

        let transfos = backend.table(&ResourceKind::Transfo.path(None).unwrap());
        let exterior = transfos
            .iter()
            .find(|t| t["name"] == json!("Pano#quaternion"))
            .unwrap();
        assert_eq!(exterior["parameters"][0]["quat"], json!([0.0, 0.0, 0.0, 1.0]));
        assert!(transfos
            .iter()
            .any(|t| t["name"] == json!("p.ori.xml#projection")));
        let types: Vec<&Value> = backend
            .table(&ResourceKind::TransfoType.path(None).unwrap())
            .iter()
            .map(|t| &t["name"])
            .collect();
        assert!(types.contains(&&json!("cartesian_to_spherical")));
        let datasource = &backend.table(&ResourceKind::Datasource.path(None).unwrap())[0];
        assert_eq!(datasource["uri"], json!("file:pano.jpg"));
        assert_eq!(datasource["bounds"], json!([0.0, 4000.0, 0.0, 0.0, 2000.0, 0.0]));
    }

    #[test]
    fn test_unsupported_version() {
        let text = orimatis("i.tif", "1", MAT3D, INTRINSEQUE).replace(">1.0<", ">2.0<");
        let root: Orientation = xml::parse(&text).unwrap();
        let args = args(Path::new("."));
        let overrides = args.overrides("alice").unwrap();
        let err = build(&mut Collection::new(), &root, "i.ori.xml", Path::new(""), &args, &overrides)
            .unwrap_err();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_dates() {
        assert_eq!(
            calibration_date("17-03-2016").unwrap().isoformat(),
            "2016-03-17T00:00:00+00:00"
        );
        assert_eq!(
            calibration_date("03-2016").unwrap().isoformat(),
            "2016-03-01T00:00:00+00:00"
        );
        assert!(calibration_date("2016").is_err());
        assert_eq!(stereopolis_date("170516").unwrap().isoformat(), "2017-05-16T00:00:00");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Path::new("a/./b/../c.tif")), PathBuf::from("a/c.tif"));
        assert_eq!(normalize(Path::new("../x")), PathBuf::from("../x"));
        assert_eq!(normalize(Path::new("/../x")), PathBuf::from("/x"));
        assert_eq!(normalize(Path::new("./")), PathBuf::from("."));
    }
}
