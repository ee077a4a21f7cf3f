//! JSON bundles keyed by resource path
//!
//! A bundle holds one array per resource path (`sensor`, `referential`,
//! `transfos/type`, ...). Elements point at each other through their local
//! `id`, which is dropped before publishing: records are matched on their
//! natural keys instead. Every transfo type and transfo also gets an
//! `_inverse` twin, and transfotrees contain the inverses of their transfos.

use anyhow::{Context, Result};
use clap::Args;
use li3ds_core::attrs::display_value;
use li3ds_core::{Attributes, Backend, Collection, Link, RecordRef, ResourceKind, Store};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

use crate::template::{metadata_from, render_field};

#[derive(Error, Debug)]
pub enum BundleError {
    #[error("\"{0}\" should be an array of objects")]
    NotAnArray(&'static str),
    #[error("elements of \"{0}\" should be objects")]
    NotAnObject(&'static str),
    #[error("{kind} element lacks its \"{field}\" reference")]
    MissingRef {
        kind: ResourceKind,
        field: &'static str,
    },
    #[error("{kind} element references unknown {field} id {id}")]
    UnresolvedRef {
        kind: ResourceKind,
        field: &'static str,
        id: String,
    },
}

#[derive(Args, Debug, Clone)]
pub struct JsonArgs {
    /// Base directory searched for JSON files
    #[arg(short = 'f', long, default_value = ".")]
    pub json_dir: PathBuf,

    /// Datasource uri pattern, formatted with the element's fields
    #[arg(long, default_value = "{uri}")]
    pub uri: String,

    /// JSON file names, may be Unix-style patterns (e.g. *.json)
    #[arg(required = true)]
    pub files: Vec<String>,
}

type Bundle = serde_json::Map<String, Value>;

/// Records registered under their local id
type LocalIds = BTreeMap<String, RecordRef>;

/// Forward record and its inverse twin, by local id
type Pairs = BTreeMap<String, (RecordRef, RecordRef)>;

/// Non-empty elements of `kind`, with their local id removed
fn elements(bundle: &Bundle, kind: ResourceKind) -> Result<Vec<(Option<String>, Attributes)>, BundleError> {
    let path = kind.schema().path;
    let items = match bundle.get(path) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(_) => return Err(BundleError::NotAnArray(path)),
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let Value::Object(elem) = item else {
            return Err(BundleError::NotAnObject(path));
        };
        if elem.is_empty() {
            continue;
        }
        let mut elem = elem.clone();
        let id = elem.remove("id").map(|id| display_value(&id));
        out.push((id, elem));
    }
    Ok(out)
}

fn local_id(elem: &mut Attributes, kind: ResourceKind, field: &'static str) -> Result<String, BundleError> {
    elem.remove(field)
        .filter(|v| !v.is_null())
        .map(|v| display_value(&v))
        .ok_or(BundleError::MissingRef { kind, field })
}

fn resolve<'a, T>(
    map: &'a BTreeMap<String, T>,
    id: &str,
    kind: ResourceKind,
    field: &'static str,
) -> Result<&'a T, BundleError> {
    map.get(id).ok_or_else(|| BundleError::UnresolvedRef {
        kind,
        field,
        id: id.to_string(),
    })
}

fn take_ref<'a, T>(
    elem: &mut Attributes,
    map: &'a BTreeMap<String, T>,
    kind: ResourceKind,
    field: &'static str,
) -> Result<&'a T, BundleError> {
    let id = local_id(elem, kind, field)?;
    resolve(map, &id, kind, field)
}

fn take_refs<'a, T>(
    elem: &mut Attributes,
    map: &'a BTreeMap<String, T>,
    kind: ResourceKind,
    field: &'static str,
) -> Result<Vec<&'a T>, BundleError> {
    match elem.remove(field) {
        Some(Value::Array(ids)) => ids
            .iter()
            .map(|id| resolve(map, &display_value(id), kind, field))
            .collect(),
        _ => Err(BundleError::MissingRef { kind, field }),
    }
}

fn inverse_name(elem: &Attributes) -> Attributes {
    let mut inverse = elem.clone();
    if let Some(Value::String(name)) = inverse.get_mut("name") {
        name.push_str("_inverse");
    }
    inverse
}

fn register(map: &mut LocalIds, id: Option<String>, record: &RecordRef) {
    if let Some(id) = id {
        map.insert(id, record.clone());
    }
}

/// Build the records of one bundle into `collection`
pub fn read_bundle(bundle: &Bundle, uri: &str, owner: &str, collection: &mut Collection) -> Result<()> {
    use ResourceKind::*;

    let mut sensors = LocalIds::new();
    for (id, elem) in elements(bundle, Sensor)? {
        let sensor = collection.add(RecordRef::sensor(Value::Object(elem))?);
        register(&mut sensors, id, &sensor);
    }

    let mut referentials = LocalIds::new();
    for (id, mut elem) in elements(bundle, Referential)? {
        let sensor = take_ref(&mut elem, &sensors, Referential, "sensor")?;
        let referential = collection.add(RecordRef::referential(sensor, Value::Object(elem))?);
        register(&mut referentials, id, &referential);
    }

    let mut ttypes = Pairs::new();
    for (id, elem) in elements(bundle, TransfoType)? {
        let inverse = collection.add(RecordRef::transfo_type(Value::Object(inverse_name(&elem)))?);
        let forward = collection.add(RecordRef::transfo_type(Value::Object(elem))?);
        if let Some(id) = id {
            ttypes.insert(id, (forward, inverse));
        }
    }

    let mut transfos = Pairs::new();
    for (id, mut elem) in elements(bundle, Transfo)? {
        let source = take_ref(&mut elem, &referentials, Transfo, "source")?;
        let target = take_ref(&mut elem, &referentials, Transfo, "target")?;
        let typed = elem.get("transfo_type").is_some_and(|v| !v.is_null());
        let (forward_type, inverse_type): (Link, Link) = if typed {
            let (forward, inverse) = take_ref(&mut elem, &ttypes, Transfo, "transfo_type")?;
            (Some(forward.clone()), Some(inverse.clone()))
        } else {
            elem.remove("transfo_type");
            (None, None)
        };
        let inverse = collection.add(RecordRef::transfo(
            target,
            source,
            inverse_type,
            Value::Object(inverse_name(&elem)),
        )?);
        let forward = collection.add(RecordRef::transfo(source, target, forward_type, Value::Object(elem))?);
        if let Some(id) = id {
            transfos.insert(id, (forward, inverse));
        }
    }

    let mut transfotrees = LocalIds::new();
    for (id, mut elem) in elements(bundle, Transfotree)? {
        let pairs = take_refs(&mut elem, &transfos, Transfotree, "transfos")?;
        let members: Vec<RecordRef> = pairs
            .iter()
            .map(|(forward, _)| forward.clone())
            .chain(pairs.iter().map(|(_, inverse)| inverse.clone()))
            .collect();
        elem.entry("owner").or_insert_with(|| Value::from(owner));
        let tree = collection.add(RecordRef::transfotree(members, Value::Object(elem))?);
        register(&mut transfotrees, id, &tree);
    }

    let mut platforms = LocalIds::new();
    for (id, elem) in elements(bundle, Platform)? {
        let platform = collection.add(RecordRef::platform(Value::Object(elem))?);
        register(&mut platforms, id, &platform);
    }

    for (_, mut elem) in elements(bundle, PlatformConfig)? {
        let trees: Vec<RecordRef> = take_refs(&mut elem, &transfotrees, PlatformConfig, "transfo_trees")?
            .into_iter()
            .cloned()
            .collect();
        let platform = take_ref(&mut elem, &platforms, PlatformConfig, "platform")?;
        elem.entry("owner").or_insert_with(|| Value::from(owner));
        collection.add(RecordRef::platform_config(platform, trees, Value::Object(elem))?);
    }

    let mut projects = LocalIds::new();
    for (id, elem) in elements(bundle, Project)? {
        let project = collection.add(RecordRef::project(Value::Object(elem))?);
        register(&mut projects, id, &project);
    }

    let mut sessions = LocalIds::new();
    for (id, mut elem) in elements(bundle, Session)? {
        let project = take_ref(&mut elem, &projects, Session, "project")?;
        let platform = take_ref(&mut elem, &platforms, Session, "platform")?;
        let session = collection.add(RecordRef::session(project, platform, Value::Object(elem))?);
        register(&mut sessions, id, &session);
    }

    for (_, mut elem) in elements(bundle, Datasource)? {
        let metadata = metadata_from(&elem);
        match render_field(Datasource, "uri", uri, &metadata)? {
            Some(rendered) => elem.insert("uri".to_string(), Value::String(rendered)),
            None => elem.remove("uri"),
        };
        let session = take_ref(&mut elem, &sessions, Datasource, "session")?;
        let referential = take_ref(&mut elem, &referentials, Datasource, "referential")?;
        collection.add(RecordRef::datasource(session, referential, Value::Object(elem))?);
    }

    Ok(())
}

/// Decode a bundle; files that are not UTF-8 are read as Latin-1
fn load(path: &Path) -> Result<Bundle> {
    let text = super::read_text(path)?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

pub fn import<B: Backend>(store: &mut Store<B>, args: &JsonArgs, owner: &str) -> Result<()> {
    let mut collection = Collection::new();
    for pattern in &args.files {
        let paths = super::find(&args.json_dir, pattern, None)?;
        if paths.is_empty() {
            warn!(pattern = %pattern, dir = %args.json_dir.display(), "No JSON file matches");
        }
        for path in paths {
            let shown = path.strip_prefix(&args.json_dir).unwrap_or(&path);
            info!("Importing {}", shown.display());
            let bundle = load(&path)?;
            read_bundle(&bundle, &args.uri, owner, &mut collection)
                .with_context(|| format!("importing {}", path.display()))?;
        }
    }
    super::publish(store, &collection, "JSON bundles")
}
