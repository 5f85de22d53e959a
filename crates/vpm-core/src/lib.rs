pub mod catalog;
pub mod config;
pub mod error;
pub mod rank;
pub mod similarity;
pub mod slug;
pub mod store;
pub mod traits;
pub mod types;

pub use catalog::Catalog;
pub use error::{Error, Result};
pub use rank::{rank, Threshold};
pub use similarity::{score, QueryScorer};
pub use traits::ImageEmbedder;
pub use types::{CatalogEntry, PipelineRecord, Product, ProductId, ScoredResult};
