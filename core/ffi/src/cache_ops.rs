//! Cache operations for FFI
//!
//! Wraps the application API into functions taking and returning JSON
//! strings.

use serde_json::Value;

use offcache_app::{Bucket, CacheConfig, CachedObject, ObjectId, OfflineCache, Query};

use crate::error::{FFIError, FFIResult};
use crate::runtime::block_on;
use crate::types::{CacheHandleData, FFICacheHandle};

/// Open (or create) the cache described by `config_json`.
pub fn open_cache(config_json: &str, password: Option<&str>) -> FFIResult<FFICacheHandle> {
    let config = CacheConfig::from_json(config_json)?;
    let cache = OfflineCache::new(config)?;
    cache.enable_offline(password)?;
    Ok(CacheHandleData { cache })
}

/// Close the store behind `handle`.
pub fn close_cache(handle: &FFICacheHandle) -> FFIResult<()> {
    handle.cache.disable_offline()?;
    Ok(())
}

/// Create a document, under `id` when given. Returns the stored object.
pub fn create(
    handle: &FFICacheHandle,
    bucket: &str,
    id: Option<&str>,
    payload_json: &str,
) -> FFIResult<String> {
    let bucket = open_bucket(handle, bucket)?;
    let payload = parse_json(payload_json)?;
    let object = match id {
        Some(id) => block_on(bucket.create_with_id(ObjectId::new(id)?, payload))??,
        None => block_on(bucket.create(payload))??,
    };
    object_json(&object)
}

pub fn read(handle: &FFICacheHandle, bucket: &str, id: &str) -> FFIResult<String> {
    let bucket = open_bucket(handle, bucket)?;
    let id = ObjectId::new(id)?;
    let object = block_on(bucket.read(&id))??;
    object_json(&object)
}

/// Run a query. `query_json` is a query document
/// (`{"filter": {...}, "include_deleted": false, "sort": [...], "limit": n}`);
/// a bare filter object is accepted as well.
pub fn query(handle: &FFICacheHandle, bucket: &str, query_json: &str) -> FFIResult<String> {
    let bucket = open_bucket(handle, bucket)?;
    let query = parse_query(query_json)?;
    let objects = block_on(bucket.query(&query))??;
    serde_json::to_string(&objects).map_err(|_| FFIError::StringConversionError)
}

pub fn update(handle: &FFICacheHandle, bucket: &str, id: &str, payload_json: &str) -> FFIResult<String> {
    let bucket = open_bucket(handle, bucket)?;
    let id = ObjectId::new(id)?;
    let payload = parse_json(payload_json)?;
    let object = block_on(bucket.update(&id, payload))??;
    object_json(&object)
}

pub fn delete(handle: &FFICacheHandle, bucket: &str, id: &str, soft: bool) -> FFIResult<()> {
    let bucket = open_bucket(handle, bucket)?;
    let id = ObjectId::new(id)?;
    block_on(bucket.delete(&id, soft))??;
    Ok(())
}

pub fn change_password(handle: &FFICacheHandle, new_password: Option<&str>) -> FFIResult<()> {
    block_on(handle.cache.change_password(new_password))??;
    Ok(())
}

pub fn delete_all(handle: &FFICacheHandle) -> FFIResult<()> {
    block_on(handle.cache.delete_cache_all())??;
    Ok(())
}

fn open_bucket(handle: &FFICacheHandle, name: &str) -> FFIResult<Bucket> {
    Ok(handle.cache.bucket(name)?)
}

fn parse_json(json: &str) -> FFIResult<Value> {
    serde_json::from_str(json).map_err(|e| FFIError::InvalidJson(e.to_string()))
}

fn parse_query(json: &str) -> FFIResult<Query> {
    let value = parse_json(json)?;
    let is_query_document = value.as_object().is_some_and(|map| {
        !map.is_empty()
            && map
                .keys()
                .all(|k| matches!(k.as_str(), "filter" | "include_deleted" | "sort" | "limit"))
    });

    if is_query_document {
        serde_json::from_value(value).map_err(|e| FFIError::InvalidJson(e.to_string()))
    } else {
        Ok(Query::from_filter_json(&value))
    }
}

fn object_json(object: &CachedObject) -> FFIResult<String> {
    serde_json::to_string(object).map_err(|_| FFIError::StringConversionError)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open(dir: &TempDir, password: Option<&str>) -> FFICacheHandle {
        let config = serde_json::json!({
            "data_dir": dir.path(),
            "tenant_id": "acme",
            "app_id": "mobile",
            "kdf_params": {"memory_cost": 1024, "time_cost": 1, "parallelism": 1}
        });
        open_cache(&config.to_string(), password).unwrap()
    }

    #[test]
    fn test_crud_roundtrip() {
        let dir = TempDir::new().unwrap();
        let handle = open(&dir, Some("secret"));

        let created = create(&handle, "notes", Some("a"), r#"{"title": "one"}"#).unwrap();
        let created: Value = serde_json::from_str(&created).unwrap();
        assert_eq!(created["id"], "a");

        update(&handle, "notes", "a", r#"{"title": "two"}"#).unwrap();
        let read_back: Value = serde_json::from_str(&read(&handle, "notes", "a").unwrap()).unwrap();
        assert_eq!(read_back["payload"]["title"], "two");

        delete(&handle, "notes", "a", false).unwrap();
        assert!(read(&handle, "notes", "a").is_err());
        close_cache(&handle).unwrap();
    }

    #[test]
    fn test_query_accepts_filter_or_query_document() {
        let dir = TempDir::new().unwrap();
        let handle = open(&dir, None);
        for n in 0..4 {
            create(&handle, "notes", None, &format!(r#"{{"n": {}}}"#, n)).unwrap();
        }

        let bare: Vec<Value> =
            serde_json::from_str(&query(&handle, "notes", r#"{"n": {"$gte": 2}}"#).unwrap()).unwrap();
        assert_eq!(bare.len(), 2);

        let shaped: Vec<Value> = serde_json::from_str(
            &query(
                &handle,
                "notes",
                r#"{"filter": {"n": {"$gte": 1}}, "sort": [{"field": "n", "descending": true}], "limit": 1}"#,
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(shaped.len(), 1);
        assert_eq!(shaped[0]["payload"]["n"], 3);

        let everything: Vec<Value> = serde_json::from_str(&query(&handle, "notes", "{}").unwrap()).unwrap();
        assert_eq!(everything.len(), 4);
    }

    #[test]
    fn test_errors_carry_categories() {
        let dir = TempDir::new().unwrap();
        let handle = open(&dir, Some("secret"));
        close_cache(&handle).unwrap();

        let config = serde_json::json!({
            "data_dir": dir.path(),
            "tenant_id": "acme",
            "app_id": "mobile",
            "kdf_params": {"memory_cost": 1024, "time_cost": 1, "parallelism": 1}
        });
        let err = open_cache(&config.to_string(), Some("wrong")).err().unwrap();
        assert!(matches!(err, FFIError::LocalStore(_)));

        let err = create(&handle, "notes", None, "{}").unwrap_err();
        assert!(matches!(err, FFIError::InvalidState(_)));
    }
}
