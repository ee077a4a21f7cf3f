//! Typed records and the dependency-ordered publisher
//!
//! A [`Record`] is one node of an import graph: attributes validated
//! against its kind's schema, scalar references ([`Link`]) and array
//! references to other records, and an optional parent for nested
//! resources. Records are shared through [`RecordRef`] so that a node
//! reachable from several places is published once.
//!
//! Publishing walks references depth-first: every referenced record is
//! upserted before the record that points at it, and the resolved
//! identities replace the references in the outgoing payload.

use serde_json::{json, Value};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::{info, warn};

use crate::attrs::{display_value, identity, strip_nulls_map, values_match, Attributes};
use crate::schema::{ResourceKind, SchemaError};
use crate::store::{Backend, Store, StoreError};
use crate::time::Timestamp;

/// Bound on reference nesting followed by structural equality
pub const MAX_GRAPH_DEPTH: usize = 64;

/// A scalar reference; `None` means "intentionally no record here"
pub type Link = Option<RecordRef>;

type NodePtr = *const RefCell<Record>;

/// One typed record of an import graph
#[derive(Debug)]
pub struct Record {
    kind: ResourceKind,
    attributes: Attributes,
    refs: BTreeMap<&'static str, Link>,
    arrays: BTreeMap<&'static str, Vec<RecordRef>>,
    parent: Option<RecordRef>,
    published: bool,
}

impl Record {
    /// Create a record, validating `attrs` against the kind's schema
    pub fn new(kind: ResourceKind, attrs: Value) -> Result<Self, SchemaError> {
        let mut record = Self {
            kind,
            attributes: Attributes::new(),
            refs: BTreeMap::new(),
            arrays: BTreeMap::new(),
            parent: None,
            published: false,
        };
        record.update(attrs)?;
        match kind {
            ResourceKind::Sensor => {
                record.default_attribute("serial_number", json!(""))?;
            }
            ResourceKind::Project => {
                record.default_attribute("timezone", json!("Europe/Paris"))?;
            }
            _ => {}
        }
        Ok(record)
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.attributes.get(field)
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Scalar reference by name; `Some(None)` is an explicit null reference
    pub fn scalar_ref(&self, field: &str) -> Option<&Link> {
        self.refs.get(field)
    }

    pub fn array_ref(&self, field: &str) -> Option<&[RecordRef]> {
        self.arrays.get(field).map(Vec::as_slice)
    }

    pub fn parent(&self) -> Option<&RecordRef> {
        self.parent.as_ref()
    }

    fn ensure_unpublished(&self) -> Result<(), SchemaError> {
        if self.published {
            Err(SchemaError::Published { kind: self.kind })
        } else {
            Ok(())
        }
    }

    fn check_attribute(&self, field: &str) -> Result<(), SchemaError> {
        if self.kind.schema().attributes.contains(&field) {
            Ok(())
        } else {
            Err(SchemaError::UnknownAttribute {
                kind: self.kind,
                field: field.to_string(),
            })
        }
    }

    /// Merge attributes; null values are dropped, unknown keys rejected
    pub fn update(&mut self, attrs: Value) -> Result<&mut Self, SchemaError> {
        self.ensure_unpublished()?;
        let map = match attrs {
            Value::Object(map) => strip_nulls_map(map),
            Value::Null => Attributes::new(),
            other => {
                return Err(SchemaError::NotAnObject {
                    kind: self.kind,
                    value: other.to_string(),
                })
            }
        };
        for field in map.keys() {
            self.check_attribute(field)?;
        }
        for (field, value) in map {
            let value = match (self.kind, field.as_str(), value) {
                (ResourceKind::Datasource, "uri", Value::String(uri)) => {
                    Value::String(uri.trim().to_string())
                }
                (_, _, value) => value,
            };
            self.attributes.insert(field, value);
        }
        Ok(self)
    }

    /// Set an attribute only when it is not present yet
    pub fn default_attribute(&mut self, field: &str, value: Value) -> Result<&mut Self, SchemaError> {
        self.ensure_unpublished()?;
        self.check_attribute(field)?;
        self.attributes.entry(field.to_string()).or_insert(value);
        Ok(self)
    }

    /// Append `value` to an array-valued attribute, creating it if needed
    pub fn append(&mut self, field: &str, value: Value) -> Result<&mut Self, SchemaError> {
        self.ensure_unpublished()?;
        self.check_attribute(field)?;
        let kind = self.kind;
        match self
            .attributes
            .entry(field.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => {
                items.push(value);
                Ok(self)
            }
            other => Err(SchemaError::InvalidValue {
                kind,
                field: field.to_string(),
                reason: format!("expected an array, got {other}"),
            }),
        }
    }

    pub fn set_ref(&mut self, field: &str, link: Link) -> Result<&mut Self, SchemaError> {
        self.ensure_unpublished()?;
        let name = self.reference_name(self.kind.schema().scalar_refs, field)?;
        self.refs.insert(name, link);
        Ok(self)
    }

    /// Set an array reference; null entries are dropped
    pub fn set_array<I>(&mut self, field: &str, items: I) -> Result<&mut Self, SchemaError>
    where
        I: IntoIterator,
        I::Item: Into<Link>,
    {
        self.ensure_unpublished()?;
        let name = self.reference_name(self.kind.schema().array_refs, field)?;
        let items = items.into_iter().filter_map(Into::into).collect();
        self.arrays.insert(name, items);
        Ok(self)
    }

    pub fn set_parent(&mut self, parent: RecordRef) -> Result<&mut Self, SchemaError> {
        self.ensure_unpublished()?;
        self.parent = Some(parent);
        Ok(self)
    }

    fn reference_name(
        &self,
        declared: &'static [&'static str],
        field: &str,
    ) -> Result<&'static str, SchemaError> {
        declared
            .iter()
            .copied()
            .find(|name| *name == field)
            .ok_or_else(|| SchemaError::UnknownReference {
                kind: self.kind,
                field: field.to_string(),
            })
    }

    /// Kind-specific normalization applied right before the upsert
    fn prepare(&mut self) -> Result<(), SchemaError> {
        if self.kind == ResourceKind::Transfo && !self.attributes.contains_key("parameters_column") {
            self.normalize_parameters()?;
        }
        Ok(())
    }

    /// Order transfo parameters by `_time`, normalize the times and derive
    /// the validity interval from the first and last entries
    fn normalize_parameters(&mut self) -> Result<(), SchemaError> {
        let kind = self.kind;
        let invalid = |reason: String| SchemaError::InvalidValue {
            kind,
            field: "parameters".to_string(),
            reason,
        };

        let Some(Value::Array(parameters)) = self.attributes.get_mut("parameters") else {
            return Ok(());
        };
        if parameters.is_empty() {
            return Ok(());
        }

        let mut stamped = Vec::with_capacity(parameters.len());
        for parameter in parameters.iter() {
            let time = match parameter.get("_time") {
                Some(Value::String(s)) => {
                    Some(Timestamp::parse(s).map_err(|e| invalid(e.to_string()))?)
                }
                Some(other) => return Err(invalid(format!("_time must be a string, got {other}"))),
                None => None,
            };
            stamped.push((time, parameter.clone()));
        }
        if stamped.len() > 1 && stamped.iter().any(|(time, _)| time.is_none()) {
            return Err(invalid("_time missing in transfo parameters".to_string()));
        }
        stamped.sort_by_key(|(time, _)| *time);

        *parameters = stamped
            .into_iter()
            .map(|(time, mut parameter)| {
                if let (Some(time), Some(entry)) = (time, parameter.as_object_mut()) {
                    entry.insert("_time".to_string(), json!(time.isoformat()));
                }
                parameter
            })
            .collect();

        let first = parameters.first().and_then(|p| p.get("_time")).cloned();
        let last = parameters.last().and_then(|p| p.get("_time")).cloned();
        if let Some(start) = first {
            self.attributes
                .entry("validity_start".to_string())
                .or_insert(start);
        }
        if let Some(end) = last {
            self.attributes.entry("validity_end".to_string()).or_insert(end);
        }
        Ok(())
    }
}

/// Shared handle to a [`Record`]
#[derive(Clone)]
pub struct RecordRef(Rc<RefCell<Record>>);

impl RecordRef {
    pub fn new(kind: ResourceKind, attrs: Value) -> Result<Self, SchemaError> {
        Record::new(kind, attrs).map(Self::from_record)
    }

    pub fn from_record(record: Record) -> Self {
        Self(Rc::new(RefCell::new(record)))
    }

    pub fn borrow(&self) -> Ref<'_, Record> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Record> {
        self.0.borrow_mut()
    }

    /// Whether both handles point at the same record
    pub fn ptr_eq(&self, other: &RecordRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn as_ptr(&self) -> NodePtr {
        Rc::as_ptr(&self.0)
    }

    pub fn kind(&self) -> ResourceKind {
        self.borrow().kind
    }

    pub fn is_published(&self) -> bool {
        self.borrow().published
    }

    /// Identity assigned by the store (or given explicitly)
    pub fn id(&self) -> Option<i64> {
        identity(&self.borrow().attributes)
    }

    pub fn sensor(attrs: Value) -> Result<Self, SchemaError> {
        Self::new(ResourceKind::Sensor, attrs)
    }

    pub fn referential(sensor: &RecordRef, attrs: Value) -> Result<Self, SchemaError> {
        let mut record = Record::new(ResourceKind::Referential, attrs)?;
        record.set_ref("sensor", Some(sensor.clone()))?;
        Ok(Self::from_record(record))
    }

    pub fn transfo_type(attrs: Value) -> Result<Self, SchemaError> {
        Self::new(ResourceKind::TransfoType, attrs)
    }

    /// Transfo type whose function signature always ends with `_time`
    pub fn transfo_type_with_signature(name: &str, signature: &[&str]) -> Result<Self, SchemaError> {
        let mut signature: Vec<&str> = signature.to_vec();
        if !signature.contains(&"_time") {
            signature.push("_time");
        }
        Self::transfo_type(json!({"name": name, "func_signature": signature}))
    }

    pub fn transfo(
        source: &RecordRef,
        target: &RecordRef,
        transfo_type: Link,
        attrs: Value,
    ) -> Result<Self, SchemaError> {
        let mut record = Record::new(ResourceKind::Transfo, attrs)?;
        record
            .set_ref("source", Some(source.clone()))?
            .set_ref("target", Some(target.clone()))?
            .set_ref("transfo_type", transfo_type)?;
        Ok(Self::from_record(record))
    }

    pub fn transfotree<I>(transfos: I, attrs: Value) -> Result<Self, SchemaError>
    where
        I: IntoIterator,
        I::Item: Into<Link>,
    {
        let mut record = Record::new(ResourceKind::Transfotree, attrs)?;
        record.set_array("transfos", transfos)?;
        Ok(Self::from_record(record))
    }

    pub fn project(attrs: Value) -> Result<Self, SchemaError> {
        Self::new(ResourceKind::Project, attrs)
    }

    pub fn platform(attrs: Value) -> Result<Self, SchemaError> {
        Self::new(ResourceKind::Platform, attrs)
    }

    pub fn session(project: &RecordRef, platform: &RecordRef, attrs: Value) -> Result<Self, SchemaError> {
        let mut record = Record::new(ResourceKind::Session, attrs)?;
        record
            .set_ref("project", Some(project.clone()))?
            .set_ref("platform", Some(platform.clone()))?;
        Ok(Self::from_record(record))
    }

    pub fn datasource(
        session: &RecordRef,
        referential: &RecordRef,
        attrs: Value,
    ) -> Result<Self, SchemaError> {
        let mut record = Record::new(ResourceKind::Datasource, attrs)?;
        record
            .set_ref("session", Some(session.clone()))?
            .set_ref("referential", Some(referential.clone()))?;
        Ok(Self::from_record(record))
    }

    /// Platform configuration, addressed under its platform
    pub fn platform_config<I>(platform: &RecordRef, transfotrees: I, attrs: Value) -> Result<Self, SchemaError>
    where
        I: IntoIterator,
        I::Item: Into<Link>,
    {
        let mut record = Record::new(ResourceKind::PlatformConfig, attrs)?;
        record
            .set_ref("platform", Some(platform.clone()))?
            .set_array("transfo_trees", transfotrees)?
            .set_parent(platform.clone())?;
        Ok(Self::from_record(record))
    }

    pub fn foreignpc_server(attrs: Value) -> Result<Self, SchemaError> {
        Self::new(ResourceKind::ForeignpcServer, attrs)
    }

    /// Foreign point-cloud table served by `server`
    pub fn foreignpc_table(server: &RecordRef, attrs: Value) -> Result<Self, SchemaError> {
        let mut record = Record::new(ResourceKind::ForeignpcTable, attrs)?;
        record.set_ref("server", Some(server.clone()))?;
        Ok(Self::from_record(record))
    }

    pub fn foreignpc_view(table: &RecordRef, attrs: Value) -> Result<Self, SchemaError> {
        let mut record = Record::new(ResourceKind::ForeignpcView, attrs)?;
        record.set_ref("table", Some(table.clone()))?;
        Ok(Self::from_record(record))
    }

    /// Equality over natural-key fields, recursing into references
    pub fn structurally_eq(&self, other: &RecordRef) -> bool {
        self.eq_bounded(other, 0)
    }

    fn eq_bounded(&self, other: &RecordRef, depth: usize) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if depth >= MAX_GRAPH_DEPTH {
            warn!(depth, "Reference graph too deep, records treated as different");
            return false;
        }

        let a = self.borrow();
        let b = other.borrow();
        if a.kind != b.kind {
            return false;
        }

        a.kind.natural_key().iter().all(|field| {
            if let (Some(x), Some(y)) = (a.attributes.get(*field), b.attributes.get(*field)) {
                return values_match(x, y);
            }
            if let (Some(x), Some(y)) = (a.refs.get(field), b.refs.get(field)) {
                return match (x, y) {
                    (None, None) => true,
                    (Some(x), Some(y)) => x.eq_bounded(y, depth + 1),
                    _ => false,
                };
            }
            if let (Some(xs), Some(ys)) = (a.arrays.get(field), b.arrays.get(field)) {
                return xs.len() == ys.len()
                    && xs.iter().zip(ys).all(|(x, y)| x.eq_bounded(y, depth + 1));
            }
            false
        })
    }

    /// Non-null scalar references, then array elements
    fn children(&self) -> Vec<RecordRef> {
        let record = self.borrow();
        record
            .refs
            .values()
            .flatten()
            .chain(record.arrays.values().flatten())
            .cloned()
            .collect()
    }

    /// Depth-first search of a record structurally equal to `target`
    pub fn lookup(&self, target: &RecordRef) -> Option<RecordRef> {
        let mut visited = HashSet::new();
        self.lookup_in(target, &mut visited)
    }

    fn lookup_in(&self, target: &RecordRef, visited: &mut HashSet<NodePtr>) -> Option<RecordRef> {
        if !visited.insert(self.as_ptr()) {
            return None;
        }
        for child in self.children() {
            if child.structurally_eq(target) {
                return Some(child);
            }
            if let Some(found) = child.lookup_in(target, visited) {
                return Some(found);
            }
        }
        None
    }

    /// Publish references, then this record; a no-op once published
    pub fn publish<B: Backend>(&self, store: &mut Store<B>) -> Result<RecordRef, StoreError> {
        let mut trail = Vec::new();
        self.publish_in(store, &mut trail)?;
        Ok(self.clone())
    }

    fn publish_in<B: Backend>(
        &self,
        store: &mut Store<B>,
        trail: &mut Vec<NodePtr>,
    ) -> Result<i64, StoreError> {
        let (kind, published) = {
            let record = self.borrow();
            (record.kind, record.published)
        };
        if published {
            return self.id().ok_or(StoreError::MissingId { kind });
        }
        if trail.contains(&self.as_ptr()) {
            return Err(StoreError::Cycle { kind });
        }
        trail.push(self.as_ptr());

        let (refs, arrays, parent) = {
            let record = self.borrow();
            (record.refs.clone(), record.arrays.clone(), record.parent.clone())
        };

        let mut resolved = Attributes::new();
        for (field, link) in refs {
            if let Some(target) = link {
                let id = target.publish_in(store, trail)?;
                resolved.insert(field.to_string(), json!(id));
            }
        }
        for (field, items) in arrays {
            let mut ids = items
                .iter()
                .map(|item| item.publish_in(store, trail))
                .collect::<Result<Vec<_>, _>>()?;
            ids.sort_unstable();
            resolved.insert(field.to_string(), json!(ids));
        }
        let parent_id = parent
            .map(|parent| parent.publish_in(store, trail))
            .transpose()?;
        trail.pop();

        let mut record = self.borrow_mut();
        record.prepare()?;
        let mut payload = record.attributes.clone();
        payload.extend(resolved);

        let (canonical, outcome) = store.upsert(kind, &payload, parent_id)?;
        let id = identity(&canonical).ok_or(StoreError::MissingId { kind })?;

        let path = kind.path(parent_id)?;
        let key = kind
            .natural_key()
            .iter()
            .filter_map(|field| payload.get(*field))
            .map(display_value)
            .collect::<Vec<_>>()
            .join(", ");
        let uri = canonical.get("uri").map(display_value).unwrap_or_default();
        info!(
            outcome = %outcome,
            id,
            path = %path,
            key = %key,
            uri = %uri,
            "Published {}",
            kind
        );

        record.attributes = canonical;
        record.published = true;
        Ok(id)
    }
}

impl PartialEq for RecordRef {
    fn eq(&self, other: &Self) -> bool {
        self.structurally_eq(other)
    }
}

impl fmt::Debug for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(record) => f
                .debug_struct("RecordRef")
                .field("kind", &record.kind)
                .field("attributes", &record.attributes)
                .field("published", &record.published)
                .finish(),
            Err(_) => f.write_str("RecordRef(<borrowed>)"),
        }
    }
}
