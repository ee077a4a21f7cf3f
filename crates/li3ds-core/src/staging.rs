//! In-memory staging backend for dry runs
//!
//! Each resource path owns a growable table; a record's identity is its
//! index in that table. Creations are journaled so callers can inspect the
//! order in which records reached the store.

use serde_json::json;
use std::collections::BTreeMap;

use crate::attrs::Attributes;
use crate::schema::{ResourceKind, ResourcePath};
use crate::store::{matches_key, Backend, StoreError};

#[derive(Debug, Default)]
pub struct StagingBackend {
    tables: BTreeMap<ResourcePath, Vec<Attributes>>,
    journal: Vec<(ResourcePath, i64)>,
}

impl StagingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records stored under an exact path
    pub fn table(&self, path: &ResourcePath) -> &[Attributes] {
        self.tables.get(path).map(Vec::as_slice).unwrap_or_default()
    }

    /// Number of records of `kind`, across all parents for nested kinds
    pub fn rows(&self, kind: ResourceKind) -> usize {
        self.tables
            .iter()
            .filter(|(path, _)| path_belongs_to(path, kind))
            .map(|(_, rows)| rows.len())
            .sum()
    }

    /// Creations in the order they happened
    pub fn journal(&self) -> &[(ResourcePath, i64)] {
        &self.journal
    }
}

fn path_belongs_to(path: &ResourcePath, kind: ResourceKind) -> bool {
    let template = kind.schema().path;
    match template.split_once("{id}") {
        Some((prefix, suffix)) => {
            let path = path.as_str();
            path.len() > prefix.len() + suffix.len()
                && path.starts_with(prefix)
                && path.ends_with(suffix)
        }
        None => path.as_str() == template,
    }
}

impl Backend for StagingBackend {
    fn create(
        &mut self,
        path: &ResourcePath,
        attrs: &Attributes,
    ) -> Result<Option<Attributes>, StoreError> {
        let table = self.tables.entry(path.clone()).or_default();
        let id = table.len() as i64;
        let mut record = attrs.clone();
        record.insert("id".to_string(), json!(id));
        table.push(record.clone());
        self.journal.push((path.clone(), id));
        Ok(Some(record))
    }

    fn fetch_by_id(
        &mut self,
        path: &ResourcePath,
        id: i64,
    ) -> Result<Option<Attributes>, StoreError> {
        let found = usize::try_from(id)
            .ok()
            .and_then(|index| self.table(path).get(index))
            .cloned();
        Ok(found)
    }

    fn fetch_by_key(
        &mut self,
        path: &ResourcePath,
        key: &Attributes,
    ) -> Result<Option<Attributes>, StoreError> {
        Ok(self
            .table(path)
            .iter()
            .find(|record| matches_key(record, key))
            .cloned())
    }

    fn list(&mut self, path: &ResourcePath) -> Result<Vec<Attributes>, StoreError> {
        Ok(self.table(path).to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_identity_is_insertion_index() {
        let mut staging = StagingBackend::new();
        let path = ResourceKind::Sensor.path(None).unwrap();

        let a = staging.create(&path, &attrs(json!({"name": "a"}))).unwrap().unwrap();
        let b = staging.create(&path, &attrs(json!({"name": "b"}))).unwrap().unwrap();
        assert_eq!(a["id"], json!(0));
        assert_eq!(b["id"], json!(1));

        let fetched = staging.fetch_by_id(&path, 1).unwrap().unwrap();
        assert_eq!(fetched["name"], json!("b"));
        assert!(staging.fetch_by_id(&path, 2).unwrap().is_none());
        assert!(staging.fetch_by_id(&path, -1).unwrap().is_none());
        assert_eq!(staging.list(&path).unwrap().len(), 2);
    }

    #[test]
    fn test_fetch_by_key_requires_every_field() {
        let mut staging = StagingBackend::new();
        let path = ResourceKind::Referential.path(None).unwrap();
        staging
            .create(&path, &attrs(json!({"name": "raw", "sensor": 0})))
            .unwrap();

        let hit = staging
            .fetch_by_key(&path, &attrs(json!({"name": "raw", "sensor": 0})))
            .unwrap();
        assert!(hit.is_some());

        let miss = staging
            .fetch_by_key(&path, &attrs(json!({"name": "raw", "sensor": 1})))
            .unwrap();
        assert!(miss.is_none());
    }

    #[test]
    fn test_nested_tables_are_per_parent() {
        let mut staging = StagingBackend::new();
        let first = ResourceKind::PlatformConfig.path(Some(0)).unwrap();
        let second = ResourceKind::PlatformConfig.path(Some(1)).unwrap();
        staging.create(&first, &attrs(json!({"name": "cfg"}))).unwrap();
        staging.create(&second, &attrs(json!({"name": "cfg"}))).unwrap();

        assert_eq!(staging.table(&first).len(), 1);
        assert_eq!(staging.rows(ResourceKind::PlatformConfig), 2);
        assert_eq!(staging.rows(ResourceKind::Platform), 0);
        assert_eq!(staging.journal().len(), 2);
    }
}
