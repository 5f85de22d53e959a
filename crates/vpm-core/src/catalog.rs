//! In-memory catalog: product metadata joined with precomputed embeddings.
//!
//! Built once at startup and read-only afterwards; share it by reference (or
//! behind an `Arc`) across queries without locking.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, FieldMapping};
use crate::store::{read_json_array, read_manifest, read_records};
use crate::types::{CatalogEntry, PipelineRecord, Product, ProductId};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    dim: usize,
    embedder_id: Option<String>,
    dropped: Vec<ProductId>,
}

impl Catalog {
    /// Load both sources from the locations named in `config`.
    pub fn load_from_config(config: &AppConfig) -> Result<Self> {
        Self::load(&config.products_path(), &config.embeddings_path(), &config.fields)
    }

    /// Read product metadata and the embedding store, then join them by id.
    /// The manifest next to the store, when present, tags the catalog with
    /// the embedder that produced its vectors.
    pub fn load(products_path: &Path, embeddings_path: &Path, fields: &FieldMapping) -> Result<Self> {
        let products = load_products(products_path, fields)?;
        let records = read_records(embeddings_path)?;
        let manifest = read_manifest(embeddings_path)?;
        let mut catalog = Self::from_parts(products, records)?;
        if let Some(m) = manifest {
            if m.dim != catalog.dim {
                return Err(Error::DataLoad(format!(
                    "manifest declares {}-d vectors from '{}' but the store holds {}-d vectors",
                    m.dim, m.embedder_id, catalog.dim
                )));
            }
            catalog.embedder_id = Some(m.embedder_id);
        }
        info!(
            entries = catalog.len(),
            dropped = catalog.dropped.len(),
            dim = catalog.dim,
            embedder = catalog.embedder_id.as_deref().unwrap_or("untagged"),
            "catalog loaded"
        );
        Ok(catalog)
    }

    /// Join products with vectors. Products without a usable vector are
    /// dropped and logged; an empty result is a [`Error::DataLoad`].
    pub fn from_parts(products: Vec<Product>, records: Vec<PipelineRecord>) -> Result<Self> {
        let mut vectors: HashMap<ProductId, Vec<f32>> = HashMap::with_capacity(records.len());
        for record in records {
            if vectors.insert(record.id.clone(), record.embedding).is_some() {
                warn!(id = %record.id, "duplicate embedding record, keeping the last one");
            }
        }

        let mut entries = Vec::with_capacity(products.len());
        let mut dropped = Vec::new();
        let mut dim: Option<usize> = None;
        for product in products {
            let Some(embedding) = vectors.remove(&product.id) else {
                warn!(id = %product.id, name = %product.name, "no embedding for product, excluded from catalog");
                dropped.push(product.id);
                continue;
            };
            let id = product.id.clone();
            let Some(entry) = CatalogEntry::new(product, embedding) else {
                warn!(id = %id, "empty or non-finite embedding, excluded from catalog");
                dropped.push(id);
                continue;
            };
            match dim {
                None => dim = Some(entry.dim()),
                Some(d) if d != entry.dim() => {
                    return Err(Error::DataLoad(format!(
                        "product {id} has a {}-d embedding but earlier products are {d}-d; the store mixes models",
                        entry.dim()
                    )));
                }
                Some(_) => {}
            }
            entries.push(entry);
        }
        for orphan in vectors.keys() {
            debug!(id = %orphan, "embedding without product metadata ignored");
        }

        let Some(dim) = dim else {
            return Err(Error::DataLoad("catalog has no products with usable embeddings".to_string()));
        };
        Ok(Self { entries, dim, embedder_id: None, dropped })
    }

    pub fn with_embedder_id(mut self, embedder_id: impl Into<String>) -> Self {
        self.embedder_id = Some(embedder_id.into());
        self
    }

    pub fn entries(&self) -> &[CatalogEntry] { &self.entries }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn dim(&self) -> usize { self.dim }
    pub fn embedder_id(&self) -> Option<&str> { self.embedder_id.as_deref() }

    /// Ids of products excluded at load time for lack of a usable vector.
    pub fn dropped(&self) -> &[ProductId] { &self.dropped }

    pub fn get(&self, id: &ProductId) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }
}

/// Read and validate product metadata through the configured field names.
pub fn load_products(path: &Path, fields: &FieldMapping) -> Result<Vec<Product>> {
    let items = read_json_array(path, "product metadata")?;
    products_from_json(&items, fields)
}

pub fn products_from_json(items: &[serde_json::Value], fields: &FieldMapping) -> Result<Vec<Product>> {
    fields.validate()?;
    let mut seen = HashSet::with_capacity(items.len());
    let mut products = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let product = product_from_json(item, i, fields)?;
        if !seen.insert(product.id.clone()) {
            return Err(Error::DataLoad(format!("product id {} appears more than once", product.id)));
        }
        products.push(product);
    }
    Ok(products)
}

fn product_from_json(item: &serde_json::Value, index: usize, fields: &FieldMapping) -> Result<Product> {
    let obj = item
        .as_object()
        .ok_or_else(|| Error::DataLoad(format!("product #{index} is not a JSON object")))?;
    let field = |key: &str, role: &str| {
        obj.get(key).ok_or_else(|| {
            Error::DataLoad(format!("product #{index} has no '{key}' key (configured as fields.{role})"))
        })
    };
    let id = ProductId::from_json(field(&fields.id, "id")?)
        .ok_or_else(|| Error::DataLoad(format!("product #{index}: '{}' must be an integer or non-empty string", fields.id)))?;
    let as_string = |key: &str, role: &str| -> Result<String> {
        field(key, role)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::DataLoad(format!("product {id}: '{key}' must be a string")))
    };
    Ok(Product {
        name: as_string(&fields.name, "name")?,
        image_reference: as_string(&fields.image_reference, "image_reference")?,
        id,
    })
}
