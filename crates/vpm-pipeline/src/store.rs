//! Atomic writers for the embedding store and its manifest.
//!
//! Each file is serialized into a temp file in the destination directory and
//! renamed over the target, so a crash leaves either the old or the new file.

use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

use vpm_core::store::{manifest_path, EmbeddingManifest};
use vpm_core::types::PipelineRecord;
use vpm_core::{Error, Result};

pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Replace the store with `records`, then its manifest.
pub fn write_store(path: &Path, records: &[PipelineRecord], manifest: &EmbeddingManifest) -> Result<()> {
    write_json_atomic(path, records)?;
    write_json_atomic(&manifest_path(path), manifest)?;
    info!(path = %path.display(), records = records.len(), embedder = %manifest.embedder_id, "embedding store written");
    Ok(())
}
