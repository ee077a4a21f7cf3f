//! MicMac intrinsic calibrations (`CalibrationInternConique`)
//!
//! An autocal file describes one camera: its image size, pinhole
//! projection, optional global affinity and a stack of distortion models.
//! The import chains referentials from the raw image to the camera frame:
//!
//! ```text
//! camera -> undistorted[n-1] -> ... -> undistorted[0] -> distorted -> raw
//! ```
//!
//! `distorted` only exists when the file has an `OrIntGlob` affinity.

use anyhow::{Context, Result};
use li3ds_core::{Attributes, Backend, Collection, RecordRef, ResourceKind, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;
use tracing::info;

use super::xml::{self, XmlError};
use super::{basename, named_transfo, oriented_transfo, CalibrationArgs, CalibrationOverrides};
use crate::template::{fill, Metadata};

pub(super) const RASTER_FRAME: &str = "origin: top left corner of top left pixel, \
    +XY: raster pixel coordinates, \
    +Z: inverse depth (measured along the optical axis).";
const CAMERA_FRAME: &str = "origin: camera position, \
    +X: right of the camera, \
    +Y: bottom of the camera, \
    +Z: optical axis (in front of the camera),";

#[derive(Debug, Deserialize)]
struct ExportApero {
    #[serde(rename = "CalibrationInternConique", default)]
    calibration: Option<CalibrationInternConique>,
}

#[derive(Debug, Deserialize)]
pub(super) struct CalibrationInternConique {
    #[serde(rename = "KnownConv")]
    known_conv: String,
    #[serde(rename = "PP")]
    pp: String,
    #[serde(rename = "F")]
    f: f64,
    #[serde(rename = "SzIm")]
    sz_im: String,
    #[serde(rename = "OrIntGlob", default)]
    or_int_glob: Option<OrIntGlob>,
    #[serde(rename = "CalibDistortion", default)]
    distortions: Vec<CalibDistortion>,
}

#[derive(Debug, Deserialize)]
struct OrIntGlob {
    #[serde(rename = "Affinite")]
    affinite: Affinite,
    #[serde(rename = "C2M", default)]
    c2m: bool,
}

/// MicMac 2D affinity: origin and the images of the unit vectors
#[derive(Debug, Deserialize)]
pub(super) struct Affinite {
    #[serde(rename = "I00")]
    i00: String,
    #[serde(rename = "V10")]
    v10: String,
    #[serde(rename = "V01")]
    v01: String,
}

impl Affinite {
    pub(super) fn mat3x2(&self) -> Result<Vec<f64>, XmlError> {
        Ok(xml::mat3x2(
            xml::floats("I00", &self.i00)?,
            xml::floats("V10", &self.v10)?,
            xml::floats("V01", &self.v01)?,
        ))
    }
}

#[derive(Debug, Deserialize)]
struct CalibDistortion {
    #[serde(rename = "ModRad", default)]
    mod_rad: Option<ModRad>,
    #[serde(rename = "ModUnif", default)]
    mod_unif: Option<ModUnif>,
}

#[derive(Debug, Deserialize)]
struct ModRad {
    #[serde(rename = "CDist")]
    c_dist: String,
    #[serde(rename = "CoeffDist", default)]
    coeffs: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ModUnif {
    #[serde(rename = "TypeModele")]
    type_modele: String,
    #[serde(rename = "Etats", default)]
    states: Vec<f64>,
    #[serde(rename = "Params", default)]
    params: Vec<f64>,
}

/// Transfo type and parameter block of one distortion model
#[derive(Debug, PartialEq)]
struct Distortion {
    type_name: String,
    signature: &'static [&'static str],
    parameters: Value,
}

/// Number of states and params of the uniform models
fn unif_counts(model: &str) -> Option<(usize, usize)> {
    match model {
        "eModele_FishEye_10_5_5" | "eModele_EquiSolid_FishEye_10_5_5" => Some((1, 24)),
        "eModelePolyDeg2" => Some((3, 6)),
        "eModelePolyDeg3" => Some((3, 14)),
        "eModelePolyDeg4" => Some((3, 24)),
        "eModelePolyDeg5" => Some((3, 36)),
        _ => None,
    }
}

fn check_count(tag: &'static str, values: &[f64], expected: usize) -> Result<(), XmlError> {
    if values.len() == expected {
        Ok(())
    } else {
        Err(XmlError::Invalid {
            tag,
            reason: format!("expected {expected} values, got {}", values.len()),
        })
    }
}

impl CalibDistortion {
    fn distortion(&self) -> Result<Distortion, XmlError> {
        if let Some(rad) = &self.mod_rad {
            if rad.coeffs.is_empty() {
                return Err(XmlError::MissingTag("ModRad/CoeffDist"));
            }
            return Ok(Distortion {
                type_name: format!("poly_radial_{}", 2 * rad.coeffs.len() + 1),
                signature: &["C", "R"],
                parameters: json!({
                    "C": xml::floats::<2>("ModRad/CDist", &rad.c_dist)?,
                    "R": rad.coeffs,
                }),
            });
        }
        let unif = xml::required(&self.mod_unif, "CalibDistortion/ModUnif")?;
        let model = unif.type_modele.trim();
        let (states, params) = unif_counts(model).ok_or_else(|| XmlError::Invalid {
            tag: "ModUnif/TypeModele",
            reason: format!("unknown distortion model {model}"),
        })?;
        check_count("ModUnif/Etats", &unif.states, states)?;
        check_count("ModUnif/Params", &unif.params, params)?;
        Ok(Distortion {
            type_name: model.to_string(),
            signature: &["states", "params"],
            parameters: json!({"states": unif.states, "params": unif.params}),
        })
    }
}

/// Parse the calibration held by an `ExportAPERO` document
pub(super) fn parse(text: &str) -> Result<CalibrationInternConique, XmlError> {
    let root: ExportApero = xml::parse(text)?;
    root.calibration
        .ok_or(XmlError::MissingTag("CalibrationInternConique"))
}

pub(super) fn read_calibration(path: &Path) -> Result<CalibrationInternConique> {
    let text = super::read_text(path)?;
    parse(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Records of one intrinsic calibration
#[derive(Debug)]
pub(super) struct Intrinsics {
    pub sensor: RecordRef,
    pub transfotree: RecordRef,
    /// Camera frame, source of the projection
    pub camera: RecordRef,
    /// Raster frame nearest to the camera frame
    pub image: RecordRef,
    pub transfos: Vec<RecordRef>,
}

/// Copy of `template` whose description starts with `frame`
pub(super) fn described(template: &Attributes, frame: &str) -> Attributes {
    let mut attrs = template.clone();
    let description = attrs.get("description").and_then(Value::as_str).unwrap_or_default();
    let description = format!("{frame} {description}").trim_end().to_string();
    attrs.insert("description".to_string(), json!(description));
    attrs
}

fn referential(sensor: &RecordRef, name: &str, frame: &str, template: &Attributes) -> Result<RecordRef> {
    let mut attrs = described(template, frame);
    attrs.insert("name".to_string(), json!(name));
    Ok(RecordRef::referential(sensor, Value::Object(attrs))?)
}

/// Build the sensor, referential chain and transfos of a calibration
pub(super) fn intrinsics(
    node: &CalibrationInternConique,
    basename: &str,
    overrides: &CalibrationOverrides,
) -> Result<Intrinsics> {
    xml::check("KnownConv", &node.known_conv, "eConvApero_DistM2C")?;

    let mut metadata = Metadata::new();
    metadata.insert("basename".to_string(), Some(basename.to_string()));

    let mut sensor = Attributes::new();
    sensor.insert("type".to_string(), json!("camera"));
    fill(ResourceKind::Sensor, &mut sensor, Some(&overrides.sensor), &metadata)?;
    sensor.insert(
        "specifications".to_string(),
        json!({"image_size": xml::floats::<2>("SzIm", &node.sz_im)?}),
    );
    let mut template = Attributes::new();
    fill(ResourceKind::Referential, &mut template, None, &metadata)?;
    let mut transfo = Attributes::new();
    fill(ResourceKind::Transfo, &mut transfo, Some(&overrides.transfo), &metadata)?;
    let mut tree = Attributes::new();
    fill(ResourceKind::Transfotree, &mut tree, Some(&overrides.transfotree), &metadata)?;

    let sensor = RecordRef::sensor(Value::Object(sensor))?;
    let mut target = referential(&sensor, "raw", RASTER_FRAME, &template)?;
    let mut transfos = Vec::new();

    if let Some(glob) = &node.or_int_glob {
        let source = referential(&sensor, "distorted", RASTER_FRAME, &template)?;
        let attrs = named_transfo(&transfo, "orintglob", json!({"mat3x2": glob.affinite.mat3x2()?}));
        let affine = RecordRef::transfo_type_with_signature("affine_mat3x2", &["mat3x2"])?;
        transfos.push(oriented_transfo(&source, &target, glob.c2m, affine, attrs)?);
        target = source;
    }

    for (i, node) in node.distortions.iter().rev().enumerate() {
        let distortion = node.distortion()?;
        let source = referential(&sensor, &format!("undistorted[{i}]"), RASTER_FRAME, &template)?;
        let attrs = named_transfo(&transfo, &format!("distortion[{i}]"), distortion.parameters);
        let ttype = RecordRef::transfo_type_with_signature(&distortion.type_name, distortion.signature)?;
        transfos.push(oriented_transfo(&source, &target, false, ttype, attrs)?);
        target = source;
    }

    let camera = referential(&sensor, "camera", CAMERA_FRAME, &template)?;
    let attrs = named_transfo(
        &transfo,
        "projection",
        json!({"focal": node.f, "ppa": xml::floats::<2>("PP", &node.pp)?}),
    );
    let pinhole = RecordRef::transfo_type_with_signature("projective_pinhole", &["focal", "ppa"])?;
    transfos.push(oriented_transfo(&camera, &target, false, pinhole, attrs)?);

    let transfotree = RecordRef::transfotree(transfos.clone(), Value::Object(tree))?;
    Ok(Intrinsics {
        sensor,
        transfotree,
        camera,
        image: target,
        transfos,
    })
}

/// Read one autocal file into a collection
pub fn read(path: &Path, args: &CalibrationArgs, owner: &str) -> Result<Collection> {
    let node = read_calibration(path)?;
    let overrides = args.overrides(owner)?;
    let intrinsics = intrinsics(&node, &basename(path), &overrides)
        .with_context(|| format!("importing {}", path.display()))?;
    let mut collection = Collection::new();
    collection.add(intrinsics.transfotree);
    Ok(collection)
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &CalibrationArgs, owner: &str) -> Result<()> {
    for path in &args.files {
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

    const AUTOCAL: &str = r#"<?xml version="1.0" ?>
<ExportAPERO>
    <CalibrationInternConique>
        <KnownConv>eConvApero_DistM2C</KnownConv>
        <PP>2000.5 1500.25</PP>
        <F>3000</F>
        <SzIm>4000 3000</SzIm>
        <OrIntGlob>
            <Affinite>
                <I00>10 20</I00>
                <V10>1 0</V10>
                <V01>0 -1</V01>
            </Affinite>
            <C2M>true</C2M>
        </OrIntGlob>
        <CalibDistortion>
            <ModRad>
                <CDist>2001 1499</CDist>
                <CoeffDist>1e-08</CoeffDist>
                <CoeffDist>2e-15</CoeffDist>
                <CoeffDist>3e-22</CoeffDist>
            </ModRad>
        </CalibDistortion>
        <CalibDistortion>
            <ModUnif>
                <TypeModele>eModelePolyDeg2</TypeModele>
                <Etats>1</Etats>
                <Etats>2</Etats>
                <Etats>3</Etats>
                <Params>0.1</Params>
                <Params>0.2</Params>
                <Params>0.3</Params>
                <Params>0.4</Params>
                <Params>0.5</Params>
                <Params>0.6</Params>
            </ModUnif>
        </CalibDistortion>
    </CalibrationInternConique>
</ExportAPERO>
"#;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn names(backend: &StagingBackend, kind: ResourceKind) -> Vec<String> {
        backend
            .table(&kind.path(None).unwrap())
            .iter()
            .map(|r| r["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_import_autocal() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "AutoCal.xml", AUTOCAL);
        let args = CalibrationArgs {
            files: vec![path],
            ..Default::default()
        };
        let mut store = Store::new(StagingBackend::new());
        import(&mut store, &args, "alice").unwrap();
        let backend = store.backend();

        let sensor = &backend.table(&ResourceKind::Sensor.path(None).unwrap())[0];
        assert_eq!(sensor["type"], json!("camera"));
        assert_eq!(sensor["specifications"], json!({"image_size": [4000.0, 3000.0]}));

        let mut referentials = names(backend, ResourceKind::Referential);
        referentials.sort();
        assert_eq!(
            referentials,
            ["camera", "distorted", "raw", "undistorted[0]", "undistorted[1]"]
        );

        let transfos = backend.table(&ResourceKind::Transfo.path(None).unwrap());
        let by_name = |name: &str| {
            transfos
                .iter()
                .find(|t| t["name"] == json!(name))
                .unwrap_or_else(|| panic!("no transfo {name}"))
        };
        let projection = by_name("AutoCal.xml#projection");
        assert_eq!(
            projection["parameters"],
            json!([{"focal": 3000.0, "ppa": [2000.5, 1500.25]}])
        );
        // the last listed distortion is applied first
        let first = by_name("AutoCal.xml#distortion[0]");
        assert_eq!(first["parameters"][0]["states"], json!([1.0, 2.0, 3.0]));
        let second = by_name("AutoCal.xml#distortion[1]");
        assert_eq!(second["parameters"][0]["R"], json!([1e-08, 2e-15, 3e-22]));
        let glob = by_name("AutoCal.xml#orintglob");
        assert_eq!(
            glob["parameters"],
            json!([{"mat3x2": [1.0, 0.0, 10.0, 0.0, -1.0, 20.0]}])
        );

        let mut types = names(backend, ResourceKind::TransfoType);
        types.sort();
        assert_eq!(
            types,
            ["affine_mat3x2", "eModelePolyDeg2", "poly_radial_7", "projective_pinhole"]
        );

        let tree = &backend.table(&ResourceKind::Transfotree.path(None).unwrap())[0];
        assert_eq!(tree["transfos"].as_array().unwrap().len(), 4);
        assert_eq!(tree["owner"], json!("alice"));
    }

    #[test]
    fn test_referential_chain() {
        let node = parse(AUTOCAL).unwrap();
        let intrinsics = intrinsics(&node, "AutoCal.xml", &CalibrationOverrides::default()).unwrap();
        assert_eq!(intrinsics.camera.borrow().get("name"), Some(&json!("camera")));
        assert_eq!(intrinsics.image.borrow().get("name"), Some(&json!("undistorted[1]")));

        // C2M reverses the affinity: raw -> distorted
        let glob = intrinsics.transfos[0].borrow();
        let source = glob.scalar_ref("source").unwrap().as_ref().unwrap();
        assert_eq!(source.borrow().get("name"), Some(&json!("raw")));

        let description = intrinsics.camera.borrow().get("description").cloned().unwrap();
        assert!(description.as_str().unwrap().starts_with("origin: camera position"));
        assert!(description.as_str().unwrap().ends_with("Imported from \"AutoCal.xml\""));
    }

    #[test]
    fn test_without_affinity_or_distortion() {
        let xml = r#"<ExportAPERO><CalibrationInternConique>
            <KnownConv>eConvApero_DistM2C</KnownConv>
            <PP>1 2</PP><F>10</F><SzIm>20 10</SzIm>
        </CalibrationInternConique></ExportAPERO>"#;
        let node = parse(xml).unwrap();
        let intrinsics = intrinsics(&node, "c.xml", &CalibrationOverrides::default()).unwrap();
        assert_eq!(intrinsics.transfos.len(), 1);
        assert_eq!(intrinsics.image.borrow().get("name"), Some(&json!("raw")));
    }

    #[test]
    fn test_distortion_errors() {
        let unknown = AUTOCAL.replace("eModelePolyDeg2", "eModeleEbner");
        let node = parse(&unknown).unwrap();
        let err = intrinsics(&node, "c.xml", &CalibrationOverrides::default()).unwrap_err();
        assert!(err.to_string().contains("unknown distortion model eModeleEbner"));

        let short = AUTOCAL.replace("<Params>0.6</Params>", "");
        let node = parse(&short).unwrap();
        let err = intrinsics(&node, "c.xml", &CalibrationOverrides::default()).unwrap_err();
        assert_eq!(err.to_string(), "invalid ModUnif/Params: expected 6 values, got 5");
    }

    #[test]
    fn test_convention_checked() {
        let xml = AUTOCAL.replace("eConvApero_DistM2C", "eConvApero_DistC2M");
        let node = parse(&xml).unwrap();
        assert!(intrinsics(&node, "c.xml", &CalibrationOverrides::default()).is_err());
        assert!(matches!(
            parse("<ExportAPERO/>"),
            Err(XmlError::MissingTag("CalibrationInternConique"))
        ));
    }
}
