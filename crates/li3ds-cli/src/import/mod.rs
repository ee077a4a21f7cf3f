//! Producers turning input files into record collections

pub mod autocal;
pub mod blinis;
pub mod ept;
pub mod extcalib;
pub mod foreignpc;
pub mod image;
pub mod json;
pub mod ori;
pub mod orimatis;
pub mod platform;
pub mod sbet;
pub mod trajectory;
mod xml;

use anyhow::{Context, Result};
use clap::Args;
use li3ds_core::attrs::display_value;
use li3ds_core::time::isoformat;
use li3ds_core::{Attributes, Backend, Collection, RecordRef, SchemaError, Store};
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

/// Options shared by the calibration importers
#[derive(Args, Debug, Clone, Default)]
pub struct CalibrationArgs {
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

    /// Calibration date/time
    #[arg(short = 'd', long)]
    pub calibration: Option<String>,

    /// Validity start of the transfos (valid since always when unset)
    #[arg(long)]
    pub validity_start: Option<String>,

    /// Validity end of the transfos (valid forever when unset)
    #[arg(long)]
    pub validity_end: Option<String>,

    /// Calibration files
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

/// Command-line overrides of a calibration import, per record kind
#[derive(Debug, Clone, Default)]
pub struct CalibrationOverrides {
    pub sensor: Attributes,
    pub transfo: Attributes,
    pub transfotree: Attributes,
}

impl CalibrationArgs {
    pub fn overrides(&self, owner: &str) -> Result<CalibrationOverrides> {
        Ok(CalibrationOverrides {
            sensor: attributes([
                ("name", self.sensor.clone().map(Value::from)),
                ("id", self.sensor_id.map(Value::from)),
            ]),
            transfo: attributes([
                ("name", self.transfo.clone().map(Value::from)),
                ("tdate", timestamp(&self.calibration, "calibration")?),
                ("validity_start", timestamp(&self.validity_start, "validity-start")?),
                ("validity_end", timestamp(&self.validity_end, "validity-end")?),
            ]),
            transfotree: attributes([
                ("name", self.transfotree.clone().map(Value::from)),
                ("owner", Some(Value::from(owner))),
            ]),
        })
    }
}

/// Publish one producer pass and report it
pub fn publish<B: Backend>(store: &mut Store<B>, collection: &Collection, label: &str) -> Result<()> {
    collection
        .publish_all(store)
        .with_context(|| format!("publishing {label}"))?;
    info!("Success!");
    Ok(())
}

/// File name used for `{basename}` placeholders
pub fn basename(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Attribute map from `(field, value)` pairs, skipping unset values
pub fn attributes<'a, I>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (&'a str, Option<Value>)>,
{
    pairs
        .into_iter()
        .filter_map(|(field, value)| value.map(|v| (field.to_string(), v)))
        .collect()
}

/// Normalized date/time from a command-line option
pub fn timestamp(value: &Option<String>, option: &str) -> Result<Option<Value>> {
    value
        .as_deref()
        .map(|s| isoformat(s).with_context(|| format!("invalid --{option}")))
        .transpose()
        .map(|v| v.map(Value::from))
}

/// Transfo from `source` to `target`, or the other way round when `reverse`
pub fn oriented_transfo(
    source: &RecordRef,
    target: &RecordRef,
    reverse: bool,
    transfo_type: RecordRef,
    attrs: Attributes,
) -> Result<RecordRef, SchemaError> {
    let (source, target) = if reverse { (target, source) } else { (source, target) };
    RecordRef::transfo(source, target, Some(transfo_type), Value::Object(attrs))
}

/// Transfo attributes named `{name}#{suffix}` after `template`, with one parameter block
///
/// An unnamed template yields a name made of the suffix alone.
pub fn named_transfo(template: &Attributes, suffix: &str, parameters: Value) -> Attributes {
    let mut attrs = template.clone();
    let name = attrs.get("name").map(display_value).unwrap_or_default();
    attrs.insert("name".to_string(), Value::from(format!("{name}#{suffix}")));
    attrs.insert("parameters".to_string(), Value::Array(vec![parameters]));
    attrs
}

/// Compile a `--filename-pattern` option
pub fn name_filter(pattern: Option<&str>) -> Result<Option<Regex>> {
    pattern
        .map(|p| Regex::new(p).with_context(|| format!("invalid file name pattern {p}")))
        .transpose()
}

/// Files under `dir`, at any depth, whose name matches the glob `pattern`
///
/// With a `filter`, the file name must also match the regex from its
/// first character.
pub fn find(dir: &Path, pattern: &str, filter: Option<&Regex>) -> Result<Vec<PathBuf>> {
    let full = dir.join("**").join(pattern);
    let full = full
        .to_str()
        .with_context(|| format!("{} is not valid UTF-8", full.display()))?;
    let mut paths = Vec::new();
    for entry in glob::glob(full).with_context(|| format!("invalid pattern {pattern}"))? {
        let path = entry?;
        let name = basename(&path);
        if filter.map_or(true, |re| re.find(&name).is_some_and(|m| m.start() == 0)) {
            paths.push(path);
        }
    }
    Ok(paths)
}

/// Read a text file; content that is not UTF-8 is read as Latin-1
pub fn read_text(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => err.into_bytes().iter().map(|&b| char::from(b)).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_with_name_filter() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        for name in ["LANDINS_20170516_075157_PP.out", "a/b/LANDINS_20170517_0_PP.out", "a/other.out"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let mut all = find(dir.path(), "*.out", None).unwrap();
        all.sort();
        assert_eq!(all.len(), 3);

        let filter = name_filter(Some("LANDINS_")).unwrap();
        let found = find(dir.path(), "*.out", filter.as_ref()).unwrap();
        assert_eq!(found.len(), 2);

        // anchored at the start of the name, not searched
        let filter = name_filter(Some("other")).unwrap();
        assert_eq!(find(dir.path(), "*.out", filter.as_ref()).unwrap().len(), 1);
        let filter = name_filter(Some("ther")).unwrap();
        assert!(find(dir.path(), "*.out", filter.as_ref()).unwrap().is_empty());

        assert!(name_filter(Some("(")).is_err());
    }

    #[test]
    fn test_read_text_latin1() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, b"caf\xe9").unwrap();
        assert_eq!(read_text(&path).unwrap(), "café");
    }

    #[test]
    fn test_named_transfo() {
        let template = attributes([
            ("name", Some(Value::from("cam.xml"))),
            ("tdate", Some(Value::from("2017-01-01T00:00:00"))),
        ]);
        let attrs = named_transfo(&template, "projection", serde_json::json!({"focal": 1.0}));
        assert_eq!(attrs["name"], "cam.xml#projection");
        assert_eq!(attrs["tdate"], "2017-01-01T00:00:00");
        assert_eq!(attrs["parameters"], serde_json::json!([{"focal": 1.0}]));

        assert_eq!(named_transfo(&Attributes::new(), "pose", Value::Null)["name"], "#pose");
    }

    #[test]
    fn test_timestamp_option() {
        assert_eq!(
            timestamp(&Some("2017-01-01".to_string()), "calibration").unwrap(),
            Some(Value::from("2017-01-01T00:00:00"))
        );
        assert_eq!(timestamp(&None, "calibration").unwrap(), None);
        assert!(timestamp(&Some("soon".to_string()), "calibration").is_err());
    }
}
