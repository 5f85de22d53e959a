//! Catalog localizer: downloads each product image once, stores it as a
//! JPEG under the image directory and rewrites the product's image
//! reference to the public path of the local copy.

use image::codecs::jpeg::JpegEncoder;
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use vpm_core::config::{AppConfig, FieldMapping};
use vpm_core::slug::slugify;
use vpm_core::store::read_json_array;
use vpm_core::types::ProductId;
use vpm_core::{Error, Result};
use vpm_media::{decode, ImageResolver};

use crate::store::write_json_atomic;

#[derive(Debug, Clone)]
pub struct LocalizeOptions {
    pub image_dir: PathBuf,
    /// Written in front of the file name, e.g. `/product-images`.
    pub public_prefix: String,
    pub jpeg_quality: u8,
}

impl LocalizeOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            image_dir: config.resolve_path(&config.localize.image_dir),
            public_prefix: config.localize.public_prefix.clone(),
            jpeg_quality: config.localize.jpeg_quality.clamp(1, 100),
        }
    }
}

#[derive(Debug, Default)]
pub struct LocalizeReport {
    /// Localized products, in source order.
    pub products: Vec<Value>,
    /// Ids of entries without a name or image reference.
    pub skipped: Vec<ProductId>,
    pub failures: Vec<(ProductId, String)>,
}

/// `"Red Mug"` with id 7 -> `red_mug_7.jpg`.
///
/// Ids made only of `[a-z0-9_-]` are used as is. Any other id is slugged and
/// suffixed with a short BLAKE3 of the raw id, so distinct ids never share a
/// file, even on case-insensitive filesystems.
pub fn local_file_name(name: &str, id: &ProductId) -> String {
    format!("{}_{}.jpg", slugify(name), file_id(id))
}

fn file_id(id: &ProductId) -> String {
    let raw = id.to_string();
    let plain = raw.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
    if plain && !raw.is_empty() {
        return raw;
    }
    let digest = blake3::hash(raw.as_bytes()).to_hex();
    format!("{}-{}", slugify(&raw), &digest.as_str()[..8])
}

fn non_empty_str<'a>(obj: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

pub fn localize(items: &[Value], fields: &FieldMapping, resolver: &ImageResolver, options: &LocalizeOptions) -> Result<LocalizeReport> {
    fs::create_dir_all(&options.image_dir)?;
    let prefix = options.public_prefix.trim_end_matches('/');
    let mut report = LocalizeReport::default();
    let mut written: HashSet<String> = HashSet::new();

    for (idx, item) in items.iter().enumerate() {
        let fallback_id = ProductId::Int(idx as i64 + 1);
        let Some(obj) = item.as_object() else {
            warn!(index = idx, "skipping catalog entry that is not an object");
            report.skipped.push(fallback_id);
            continue;
        };
        let id = obj.get(&fields.id).and_then(ProductId::from_json).unwrap_or(fallback_id);
        let (Some(name), Some(reference)) = (non_empty_str(obj, &fields.name), non_empty_str(obj, &fields.image_reference)) else {
            warn!(id = %id, "skipping product without a name or image reference");
            report.skipped.push(id);
            continue;
        };

        let file_name = local_file_name(name, &id);
        if !written.insert(file_name.to_ascii_lowercase()) {
            warn!(id = %id, file = %file_name, "image file already written for another product");
            report.failures.push((id, format!("{file_name} already belongs to another product")));
            continue;
        }
        match store_local_copy(resolver, reference, &options.image_dir.join(&file_name), options.jpeg_quality) {
            Ok(()) => {
                let mut localized = obj.clone();
                localized.insert(fields.image_reference.clone(), Value::String(format!("{prefix}/{file_name}")));
                if !obj.contains_key(&fields.id) {
                    localized.insert(fields.id.clone(), serde_json::to_value(&id)?);
                }
                report.products.push(Value::Object(localized));
            }
            Err(e) => {
                warn!(id = %id, reference, error = %e, "could not localize product image");
                report.failures.push((id, e.to_string()));
            }
        }
    }

    info!(
        localized = report.products.len(),
        skipped = report.skipped.len(),
        failed = report.failures.len(),
        dir = %options.image_dir.display(),
        "catalog localized"
    );
    Ok(report)
}

fn store_local_copy(resolver: &ImageResolver, reference: &str, dest: &Path, quality: u8) -> Result<()> {
    let bytes = resolver.read_bytes(reference)?;
    let rgb = decode(&bytes)?.to_rgb8();
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(&rgb)
        .map_err(|e| Error::Encoding(format!("jpeg: {e}")))?;
    fs::write(dest, out)?;
    Ok(())
}

/// Read `source`, localize it and write the rewritten metadata to `output`.
pub fn localize_file(
    source: &Path,
    output: &Path,
    fields: &FieldMapping,
    resolver: &ImageResolver,
    options: &LocalizeOptions,
) -> Result<LocalizeReport> {
    let items = read_json_array(source, "source catalog")?;
    let report = localize(&items, fields, resolver, options)?;
    write_json_atomic(output, &report.products)?;
    Ok(report)
}
