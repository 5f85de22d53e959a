//! Domain types shared by the catalog, the ranker and the offline pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable product key. Catalog sources use either JSON integers or strings,
/// and the join between metadata and vectors compares them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProductId {
    Int(i64),
    Text(String),
}

impl ProductId {
    /// Parse an id from an arbitrary JSON value. Only integers and non-empty
    /// strings are valid keys.
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_i64().map(ProductId::Int),
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(ProductId::Text(s.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductId::Int(n) => write!(f, "{n}"),
            ProductId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for ProductId {
    fn from(n: i64) -> Self { ProductId::Int(n) }
}

impl From<&str> for ProductId {
    fn from(s: &str) -> Self { ProductId::Text(s.to_string()) }
}

/// A catalog product as seen by the matcher.
///
/// - `id`: unique key, joins metadata with its embedding
/// - `name`: display name, also the source of filesystem slugs
/// - `image_reference`: `/`-rooted path under the image root, or an http(s) URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub image_reference: String,
}

/// One record of the embedding store: `{"id": .., "embedding": [..]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub id: ProductId,
    pub embedding: Vec<f32>,
}

/// A product joined with its embedding. Construction rejects empty vectors,
/// so every entry reaching the ranker carries a usable vector.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    product: Product,
    embedding: Vec<f32>,
    norm: f32,
}

impl CatalogEntry {
    pub fn new(product: Product, embedding: Vec<f32>) -> Option<Self> {
        if embedding.is_empty() || embedding.iter().any(|x| !x.is_finite()) {
            return None;
        }
        let norm = crate::similarity::l2_norm(&embedding);
        Some(Self { product, embedding, norm })
    }

    pub fn product(&self) -> &Product { &self.product }
    pub fn id(&self) -> &ProductId { &self.product.id }
    pub fn embedding(&self) -> &[f32] { &self.embedding }
    pub fn dim(&self) -> usize { self.embedding.len() }

    /// L2 norm cached at construction time.
    pub fn norm(&self) -> f32 { self.norm }
}

/// A catalog entry scored against one query. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy)]
pub struct ScoredResult<'a> {
    pub entry: &'a CatalogEntry,
    pub similarity: f32,
}

impl<'a> ScoredResult<'a> {
    pub fn product(&self) -> &'a Product { self.entry.product() }

    /// Similarity as a percentage, for display only.
    pub fn percent(&self) -> f32 { self.similarity * 100.0 }
}
