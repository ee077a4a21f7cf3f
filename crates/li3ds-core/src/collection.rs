//! Root set of records produced by one import

use tracing::info;

use crate::record::RecordRef;
use crate::store::{Backend, Store, StoreError};

/// Ordered set of root records, published together
#[derive(Debug, Default)]
pub struct Collection {
    roots: Vec<RecordRef>,
}

impl Collection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a root and hand it back for further wiring
    pub fn add(&mut self, record: RecordRef) -> RecordRef {
        self.roots.push(record.clone());
        record
    }

    pub fn add_all<I>(&mut self, records: I)
    where
        I: IntoIterator<Item = RecordRef>,
    {
        self.roots.extend(records);
    }

    pub fn roots(&self) -> &[RecordRef] {
        &self.roots
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Publish every root in insertion order, stopping at the first error
    pub fn publish_all<B: Backend>(&self, store: &mut Store<B>) -> Result<(), StoreError> {
        for root in &self.roots {
            root.publish(store)?;
        }
        info!(roots = self.roots.len(), "Collection published");
        Ok(())
    }

    /// Depth-first search: each root, then its references, in insertion order
    pub fn lookup(&self, target: &RecordRef) -> Option<RecordRef> {
        self.roots.iter().find_map(|root| {
            if root.structurally_eq(target) {
                Some(root.clone())
            } else {
                root.lookup(target)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ResourceKind;
    use crate::staging::StagingBackend;
    use serde_json::json;

    #[test]
    fn test_shared_dependency_published_once() {
        let mut store = Store::new(StagingBackend::new());
        let mut collection = Collection::new();

        let sensor = RecordRef::sensor(json!({"name": "camX", "type": "camera"})).unwrap();
        let r1 = RecordRef::referential(&sensor, json!({"name": "raw"})).unwrap();
        let r2 = RecordRef::referential(&sensor, json!({"name": "undistorted"})).unwrap();
        collection.add_all([r1.clone(), r2.clone()]);
        collection.publish_all(&mut store).unwrap();

        let backend = store.backend();
        assert_eq!(backend.rows(ResourceKind::Sensor), 1);
        assert_eq!(backend.rows(ResourceKind::Referential), 2);
        assert_eq!(r1.borrow().get("sensor"), Some(&json!(0)));
        assert_eq!(r2.borrow().get("sensor"), Some(&json!(0)));

        collection.publish_all(&mut store).unwrap();
        assert_eq!(store.backend().journal().len(), 3);
    }

    #[test]
    fn test_equal_referentials_share_one_row() {
        let mut store = Store::new(StagingBackend::new());
        let mut collection = Collection::new();

        let sensor = RecordRef::sensor(json!({"name": "S"})).unwrap();
        let first = RecordRef::referential(&sensor, json!({"name": "raw"})).unwrap();
        let second = RecordRef::referential(&sensor, json!({"name": "raw"})).unwrap();
        collection.add_all([first.clone(), second.clone()]);
        collection.publish_all(&mut store).unwrap();

        assert_eq!(store.backend().rows(ResourceKind::Sensor), 1);
        assert_eq!(store.backend().rows(ResourceKind::Referential), 1);
        assert_eq!(first.id(), Some(0));
        assert_eq!(second.id(), Some(0));
    }

    #[test]
    fn test_publish_stops_at_first_error() {
        let mut store = Store::new(StagingBackend::new());
        let mut collection = Collection::new();
        collection.add(RecordRef::sensor(json!({"name": "a", "model": "x"})).unwrap());
        collection.add(RecordRef::sensor(json!({"name": "a", "model": "y"})).unwrap());
        let last = collection.add(RecordRef::sensor(json!({"name": "b"})).unwrap());

        let err = collection.publish_all(&mut store).unwrap_err();
        assert!(matches!(err, StoreError::Conflict { .. }));
        assert!(!last.is_published());
        assert_eq!(store.backend().rows(ResourceKind::Sensor), 1);
    }

    #[test]
    fn test_lookup_depth_first() {
        let mut collection = Collection::new();
        let sensor = RecordRef::sensor(json!({"name": "sen"})).unwrap();
        let referential = RecordRef::referential(&sensor, json!({"name": "r"})).unwrap();
        collection.add(referential.clone());
        assert_eq!(collection.len(), 1);

        let found = collection
            .lookup(&RecordRef::referential(&sensor, json!({"name": "r"})).unwrap())
            .unwrap();
        assert!(found.ptr_eq(&referential));

        let found = collection
            .lookup(&RecordRef::sensor(json!({"name": "sen"})).unwrap())
            .unwrap();
        assert!(found.ptr_eq(&sensor));

        assert!(collection
            .lookup(&RecordRef::platform(json!({"name": "sen"})).unwrap())
            .is_none());
        assert!(Collection::new().is_empty());
    }
}
