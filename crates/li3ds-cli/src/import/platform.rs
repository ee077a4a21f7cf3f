//! Sample platform configuration for the Stereopolis vehicle

use anyhow::Result;
use li3ds_core::{Backend, Collection, RecordRef, SchemaError, Store};
use serde_json::json;
use tracing::info;

const IDENTITY: [i64; 12] = [1, 0, 0, 0, 0, 1, 0, 0, 0, 0, 1, 0];

/// Records of the sample: lidar and INS chained to a camera group
pub fn sample(owner: &str) -> Result<Collection, SchemaError> {
    let lidar = RecordRef::sensor(json!({
        "name": "lidar",
        "type": "lidar",
        "description": "Imported from cli-li3ds",
    }))?;
    let ins = RecordRef::sensor(json!({
        "name": "ins",
        "type": "ins",
        "description": "Imported from cli-li3ds",
    }))?;
    let camera_group = RecordRef::sensor(json!({
        "name": "cameraMetaData.json",
        "type": "group",
    }))?;

    let ref_camera_group = RecordRef::referential(&camera_group, json!({"name": "base"}))?;
    let ref_lidar = RecordRef::referential(&lidar, json!({"name": "lidar cartesian"}))?;
    let ref_ins = RecordRef::referential(&ins, json!({"name": "ins"}))?;

    let identity = RecordRef::transfo_type(json!({
        "name": "identity",
        "func_signature": ["mat4x3"],
    }))?;
    let parameters = json!({
        "name": "identity",
        "parameters": [{"mat4x3": IDENTITY}],
    });
    let ins_to_camera = RecordRef::transfo(
        &ref_ins,
        &ref_camera_group,
        Some(identity.clone()),
        parameters.clone(),
    )?;
    let lidar_to_ins = RecordRef::transfo(&ref_lidar, &ref_ins, Some(identity), parameters)?;

    let tree_attrs = |name: &str| json!({"name": name, "owner": owner});
    let ins2cam = RecordRef::transfotree([ins_to_camera], tree_attrs("ins2cam"))?;
    let lidar2ins = RecordRef::transfotree([lidar_to_ins], tree_attrs("lidar2ins"))?;

    let platform = RecordRef::platform(json!({"name": "Stereopolis II"}))?;
    let config = RecordRef::platform_config(
        &platform,
        [ins2cam, lidar2ins],
        json!({"name": "test_platform", "owner": owner}),
    )?;

    let mut collection = Collection::new();
    collection.add(config);
    Ok(collection)
}

pub fn import<B: Backend>(store: &mut Store<B>, owner: &str) -> Result<()> {
    info!("Importing platform configuration sample");
    let collection = sample(owner)?;
    super::publish(store, &collection, "platform sample")
}

#[cfg(test)]
mod tests {
    use super::*;
    use li3ds_core::{ResourceKind, StagingBackend};

    #[test]
    fn test_sample_publishes_whole_graph() {
        let mut store = Store::new(StagingBackend::new());
        import(&mut store, "alice").unwrap();

        let backend = store.backend();
        assert_eq!(backend.rows(ResourceKind::Sensor), 3);
        assert_eq!(backend.rows(ResourceKind::Referential), 3);
        assert_eq!(backend.rows(ResourceKind::TransfoType), 1);
        assert_eq!(backend.rows(ResourceKind::Transfo), 2);
        assert_eq!(backend.rows(ResourceKind::Transfotree), 2);
        assert_eq!(backend.rows(ResourceKind::Platform), 1);

        let config = &backend.table(&ResourceKind::PlatformConfig.path(Some(0)).unwrap())[0];
        assert_eq!(config["name"], json!("test_platform"));
        assert_eq!(config["owner"], json!("alice"));
        assert_eq!(config["transfo_trees"], json!([0, 1]));
    }

    #[test]
    fn test_sample_is_idempotent() {
        let mut store = Store::new(StagingBackend::new());
        import(&mut store, "alice").unwrap();
        let created = store.backend().journal().len();

        import(&mut store, "alice").unwrap();
        assert_eq!(store.backend().journal().len(), created);
    }
}
