//! Readers for the JSON files the catalog is built from: the product
//! metadata array, the embedding store and its manifest sidecar.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::types::{PipelineRecord, ProductId};
use crate::{Error, Result};

/// Sidecar written next to the embedding store by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingManifest {
    pub embedder_id: String,
    pub dim: usize,
    pub generated_at: DateTime<Utc>,
    pub records: usize,
    /// BLAKE3 of the source image bytes, keyed by [`content_hash_key`].
    #[serde(default)]
    pub content_hashes: BTreeMap<String, String>,
}

/// Manifest key for a product id: the id as JSON, so `1` and `"1"` stay apart.
pub fn content_hash_key(id: &ProductId) -> String {
    match id {
        ProductId::Int(n) => n.to_string(),
        ProductId::Text(s) => serde_json::Value::String(s.clone()).to_string(),
    }
}

/// `dir/product_embeddings.json` -> `dir/product_embeddings.manifest.json`.
pub fn manifest_path(store_path: &Path) -> PathBuf {
    let stem = store_path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "embeddings".to_string());
    store_path.with_file_name(format!("{stem}.manifest.json"))
}

fn read_source(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path).map_err(|e| Error::DataLoad(format!("cannot read {what} at {}: {e}", path.display())))
}

/// Read a JSON array of objects (product metadata).
pub fn read_json_array(path: &Path, what: &str) -> Result<Vec<serde_json::Value>> {
    let raw = read_source(path, what)?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| Error::DataLoad(format!("{what} at {} is not valid JSON: {e}", path.display())))?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        other => Err(Error::DataLoad(format!(
            "{what} at {} must be a JSON array, found {}",
            path.display(),
            json_kind(&other)
        ))),
    }
}

fn json_kind(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Read the embedding store written by the pipeline.
pub fn read_records(path: &Path) -> Result<Vec<PipelineRecord>> {
    let raw = read_source(path, "embedding store")?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::DataLoad(format!("embedding store at {} is malformed: {e}", path.display())))
}

/// Read the manifest next to `store_path`, if one exists.
pub fn read_manifest(store_path: &Path) -> Result<Option<EmbeddingManifest>> {
    let path = manifest_path(store_path);
    if !path.exists() {
        return Ok(None);
    }
    let raw = read_source(&path, "embedding manifest")?;
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| Error::DataLoad(format!("embedding manifest at {} is malformed: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_sits_next_to_store() {
        let p = manifest_path(Path::new("/data/public/product_embeddings.json"));
        assert_eq!(p, PathBuf::from("/data/public/product_embeddings.manifest.json"));
    }

    #[test]
    fn missing_store_is_a_data_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let err = read_records(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, Error::DataLoad(_)));
    }

    #[test]
    fn non_array_metadata_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("products.json");
        fs::write(&p, r#"{"id": 1}"#).unwrap();
        let err = read_json_array(&p, "product metadata").unwrap_err();
        assert!(err.to_string().contains("must be a JSON array"));
    }

    #[test]
    fn hash_keys_tell_integer_and_string_ids_apart() {
        assert_eq!(content_hash_key(&ProductId::Int(1)), "1");
        assert_eq!(content_hash_key(&ProductId::from("1")), "\"1\"");
        assert_ne!(content_hash_key(&ProductId::Int(1)), content_hash_key(&ProductId::from("1")));
    }

    #[test]
    fn absent_manifest_is_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(read_manifest(&tmp.path().join("e.json")).unwrap().is_none());
    }
}
