//! Stereopolis images as datasources
//!
//! Image names follow `PROJECT_yymmddHHMM_SECTION_IMAGE_CAMERA`. The
//! camera number names the camera sensor and its referential. Capture
//! times come from the `{session}-{section}.json` files of `--json-dir`,
//! which list image ids with their GPS date.

use anyhow::{bail, Context, Result};
use chrono::DateTime;
use clap::Args;
use li3ds_core::time::Timestamp;
use li3ds_core::{Backend, Collection, RecordRef, ResourceKind, Store};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::autocal::RASTER_FRAME;
use super::{attributes, basename};
use crate::template::{fill, Metadata};

/// Seconds from the Unix epoch to the GPS epoch (1980-01-06)
const GPS_EPOCH: f64 = 315_964_800.0;
/// Offset subtracted from GPS seconds in the image lists
const GPS_DATE_OFFSET: f64 = 1e9;

#[derive(Args, Debug, Clone)]
pub struct ImageArgs {
    /// Image size in pixels
    #[arg(short = 'z', long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    pub image_size: Option<Vec<f64>>,

    /// Base directory searched for images
    #[arg(short = 'f', long, default_value = ".")]
    pub image_dir: PathBuf,

    /// Directory of the JSON files with the image dates
    #[arg(short = 'j', long)]
    pub json_dir: Option<PathBuf>,

    /// Regex the image names must match, from their first character
    #[arg(short = 'p', long)]
    pub filename_pattern: Option<String>,

    /// Base directory in image URIs
    #[arg(short = 'b', long)]
    pub base_uri: Option<PathBuf>,

    /// Camera sensor name prefix
    #[arg(long, default_value = "")]
    pub sensor_prefix: String,

    /// Referential name prefix
    #[arg(long, default_value = "")]
    pub referential_prefix: String,

    /// Image file names, may be patterns (e.g. *.jpg)
    #[arg(required = true)]
    pub patterns: Vec<String>,
}

/// Fields of an image file name
#[derive(Debug, PartialEq)]
struct ImageName {
    project: String,
    session: String,
    section: String,
    camera: String,
    /// Image id shared by every camera of one shot
    shot: String,
}

fn parse_name(path: &Path) -> Result<ImageName> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let parts: Vec<&str> = stem.split('_').collect();
    if parts.len() < 5 {
        bail!("unknown image file name structure {stem:?}, expected PROJECT_SESSION_SECTION_IMAGE_CAMERA");
    }
    let shot = parts[..parts.len() - 1].join("_");
    Ok(ImageName {
        project: parts[0].to_string(),
        session: parts[1].to_string(),
        section: parts[2].to_string(),
        camera: parts[4].to_string(),
        shot,
    })
}

#[derive(Debug, Deserialize)]
struct ImageDate {
    id: String,
    date: f64,
}

/// Capture times read from the JSON image lists, one list at a time
#[derive(Debug, Default)]
struct ImageDates {
    dir: Option<PathBuf>,
    cache: HashMap<String, Timestamp>,
}

impl ImageDates {
    fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            cache: HashMap::new(),
        }
    }

    fn lookup(&mut self, name: &ImageName) -> Result<Option<Timestamp>> {
        let Some(dir) = &self.dir else {
            return Ok(None);
        };
        if let Some(time) = self.cache.get(&name.shot) {
            return Ok(Some(*time));
        }

        let file = dir.join(format!("{}-{}.json", name.session, name.section));
        if !file.is_file() {
            bail!("{} is not a file", file.display());
        }
        debug!("Reading {}", file.display());
        let text = super::read_text(&file)?;
        let dates: Vec<ImageDate> =
            serde_json::from_str(&text).with_context(|| format!("parsing {}", file.display()))?;
        self.cache.clear();
        for entry in dates {
            let seconds = entry.date + GPS_DATE_OFFSET + GPS_EPOCH;
            let time = DateTime::from_timestamp_micros((seconds * 1e6).round() as i64)
                .with_context(|| format!("invalid date {} for image {}", entry.date, entry.id))?;
            self.cache.insert(entry.id, Timestamp::Aware(time.fixed_offset()));
        }
        self.cache
            .get(&name.shot)
            .copied()
            .map(Some)
            .with_context(|| format!("no date for image {} in {}", name.shot, file.display()))
    }
}

fn build(
    collection: &mut Collection,
    path: &Path,
    dates: &mut ImageDates,
    args: &ImageArgs,
) -> Result<()> {
    let name = parse_name(path)?;
    let image_time = dates.lookup(&name)?;
    let session_time = super::foreignpc::session_time(&name.session, "%y%m%d%H%M")?;

    let mut metadata = Metadata::new();
    metadata.insert("basename".to_string(), Some(basename(path)));
    metadata.insert("camera_num".to_string(), Some(name.camera.clone()));
    metadata.insert("project_name".to_string(), Some(name.project.clone()));
    metadata.insert("section_name".to_string(), Some(name.section.clone()));
    metadata.insert("session_time".to_string(), Some(session_time.isoformat()));
    metadata.insert("image_time_iso".to_string(), image_time.map(|t| t.isoformat()));

    let mut sensor = attributes([
        ("type", Some(json!("camera"))),
        ("name", Some(json!(format!("{}{{camera_num}}", args.sensor_prefix)))),
        ("description", Some(json!("Created while importing {basename}"))),
    ]);
    fill(ResourceKind::Sensor, &mut sensor, None, &metadata)?;
    let mut specifications = serde_json::Map::new();
    if let Some(size) = &args.image_size {
        specifications.insert("image_size".to_string(), json!(size));
    }
    sensor.insert("specifications".to_string(), Value::Object(specifications));
    let mut referential = attributes([
        ("name", Some(json!(format!("{}{{camera_num}}", args.referential_prefix)))),
        ("description", Some(json!(RASTER_FRAME))),
    ]);
    fill(ResourceKind::Referential, &mut referential, None, &metadata)?;
    let mut platform = attributes([("name", Some(json!("Stereopolis II")))]);
    fill(ResourceKind::Platform, &mut platform, None, &metadata)?;
    let mut project = attributes([("name", Some(json!("{project_name}")))]);
    fill(ResourceKind::Project, &mut project, None, &metadata)?;
    let mut session = attributes([("name", Some(json!("{session_time:%y%m%d}/{section_name}")))]);
    fill(ResourceKind::Session, &mut session, None, &metadata)?;
    let mut datasource = attributes([
        ("capture_start", Some(json!("{image_time_iso}"))),
        ("capture_end", Some(json!("{image_time_iso}"))),
    ]);
    fill(ResourceKind::Datasource, &mut datasource, None, &metadata)?;

    let relative = path.strip_prefix(&args.image_dir).unwrap_or(path);
    let uri_path = match &args.base_uri {
        Some(base) => base.join(relative),
        None => relative.to_path_buf(),
    };
    datasource.insert("type".to_string(), json!("image"));
    datasource.insert("uri".to_string(), json!(format!("file:{}", uri_path.display())));
    if let Some([width, height]) = args.image_size.as_deref() {
        datasource.insert("bounds".to_string(), json!([0.0, width, 0.0, 0.0, height, 0.0]));
    }

    let sensor = RecordRef::sensor(Value::Object(sensor))?;
    let project = RecordRef::project(Value::Object(project))?;
    let platform = RecordRef::platform(Value::Object(platform))?;
    let session = RecordRef::session(&project, &platform, Value::Object(session))?;
    let referential = RecordRef::referential(&sensor, Value::Object(referential))?;
    collection.add(RecordRef::datasource(&session, &referential, Value::Object(datasource))?);
    Ok(())
}

pub fn read(args: &ImageArgs) -> Result<Collection> {
    let filter = super::name_filter(args.filename_pattern.as_deref())?;
    let mut dates = ImageDates::new(args.json_dir.clone());
    let mut collection = Collection::new();
    for pattern in &args.patterns {
        for path in super::find(&args.image_dir, pattern, filter.as_ref())? {
            info!("Importing {}", path.display());
            build(&mut collection, &path, &mut dates, args)
                .with_context(|| format!("importing {}", path.display()))?;
        }
    }
    Ok(collection)
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &ImageArgs) -> Result<()> {
    let collection = read(args)?;
    super::publish(store, &collection, &args.image_dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use li3ds_core::StagingBackend;
    use std::fs;

    fn args(dir: &Path) -> ImageArgs {
        ImageArgs {
            image_size: Some(vec![2048.0, 2048.0]),
            image_dir: dir.to_path_buf(),
            json_dir: Some(dir.join("json")),
            filename_pattern: None,
            base_uri: Some(PathBuf::from("/images")),
            sensor_prefix: "cam".to_string(),
            referential_prefix: "ref".to_string(),
            patterns: vec!["*.jpg".to_string()],
        }
    }

    #[test]
    fn test_parse_name() {
        let name = parse_name(Path::new("a/Paris_1705160610_00_000123_300.jpg")).unwrap();
        assert_eq!(
            name,
            ImageName {
                project: "Paris".to_string(),
                session: "1705160610".to_string(),
                section: "00".to_string(),
                camera: "300".to_string(),
                shot: "Paris_1705160610_00_000123".to_string(),
            }
        );
        assert!(parse_name(Path::new("image.jpg")).is_err());
    }

    #[test]
    fn test_import_images() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("json")).unwrap();
        fs::create_dir_all(dir.path().join("00")).unwrap();
        for camera in ["300", "301"] {
            let name = format!("00/Paris_1705160610_00_000123_{camera}.jpg");
            fs::write(dir.path().join(name), "").unwrap();
        }
        // 1e9 + 315964800 + 178950217 = 2017-05-16T06:10:17+00:00 (UTC)
        fs::write(
            dir.path().join("json/1705160610-00.json"),
            r#"[{"id": "Paris_1705160610_00_000123", "date": 178950217.5}]"#,
        )
        .unwrap();

        let mut store = Store::new(StagingBackend::new());
        import(&mut store, &args(dir.path())).unwrap();
        let backend = store.backend();

        let mut sensors: Vec<String> = backend
            .table(&ResourceKind::Sensor.path(None).unwrap())
            .iter()
            .map(|s| s["name"].as_str().unwrap().to_string())
            .collect();
        sensors.sort();
        assert_eq!(sensors, ["cam300", "cam301"]);

        let session = &backend.table(&ResourceKind::Session.path(None).unwrap())[0];
        assert_eq!(session["name"], json!("170516/00"));
        assert_eq!(backend.rows(ResourceKind::Session), 1);

        let datasources = backend.table(&ResourceKind::Datasource.path(None).unwrap());
        assert_eq!(datasources.len(), 2);
        let datasource = datasources
            .iter()
            .find(|d| d["uri"] == json!("file:/images/00/Paris_1705160610_00_000123_300.jpg"))
            .unwrap();
        assert_eq!(datasource["capture_start"], json!("2017-05-16T06:10:17.500000+00:00"));
        assert_eq!(datasource["bounds"], json!([0.0, 2048.0, 0.0, 0.0, 2048.0, 0.0]));

        let referential = &backend.table(&ResourceKind::Referential.path(None).unwrap())[0];
        assert!(referential["name"].as_str().unwrap().starts_with("ref30"));
        assert_eq!(referential["description"], json!(RASTER_FRAME));
    }

    #[test]
    fn test_missing_date_list() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Paris_1705160610_00_000123_300.jpg"), "").unwrap();
        let err = read(&args(dir.path())).unwrap_err();
        assert!(format!("{err:#}").contains("is not a file"));
    }

    #[test]
    fn test_without_dates_or_size() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Paris_1705160610_00_000123_300.jpg"), "").unwrap();
        let args = ImageArgs {
            image_size: None,
            json_dir: None,
            base_uri: None,
            ..args(dir.path())
        };
        let mut store = Store::new(StagingBackend::new());
        import(&mut store, &args).unwrap();
        let datasource = &store.backend().table(&ResourceKind::Datasource.path(None).unwrap())[0];
        assert_eq!(datasource["uri"], json!("file:Paris_1705160610_00_000123_300.jpg"));
        assert!(datasource.get("capture_start").is_none());
        assert!(datasource.get("bounds").is_none());
    }
}
