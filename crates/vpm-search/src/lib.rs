use anyhow::{Context, Result};
use image::DynamicImage;
use tracing::{debug, info};

use vpm_core::config::AppConfig;
use vpm_core::{rank, Catalog, Error, ImageEmbedder, ScoredResult, Threshold};
use vpm_embed::get_default_embedder;
use vpm_media::{decode, ImageResolver};

/// Query side of the matcher: a loaded catalog, the embedder that produced
/// it and a resolver for query image references. Built once at startup and
/// shared by reference.
pub struct MatcherService {
    catalog: Catalog,
    embedder: Box<dyn ImageEmbedder>,
    resolver: ImageResolver,
}

impl MatcherService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let catalog = Catalog::load_from_config(config).context("loading catalog")?;
        let embedder = get_default_embedder(&config.embedding).context("creating embedder")?;
        let service = Self::new(catalog, embedder, ImageResolver::from_config(config))?;
        info!(
            products = service.catalog.len(),
            dim = service.catalog.dim(),
            embedder = service.embedder.embedder_id(),
            "matcher ready"
        );
        Ok(service)
    }

    /// Fails with [`Error::ModelMismatch`] when the catalog is tagged with a
    /// different embedder, or [`Error::DimensionMismatch`] when the vector
    /// sizes disagree.
    pub fn new(catalog: Catalog, embedder: Box<dyn ImageEmbedder>, resolver: ImageResolver) -> vpm_core::Result<Self> {
        if let Some(tag) = catalog.embedder_id() {
            if tag != embedder.embedder_id() {
                return Err(Error::ModelMismatch { catalog: tag.to_string(), query: embedder.embedder_id().to_string() });
            }
        }
        if catalog.dim() != embedder.dim() {
            return Err(Error::DimensionMismatch { expected: catalog.dim(), actual: embedder.dim() });
        }
        Ok(Self { catalog, embedder, resolver })
    }

    pub fn catalog(&self) -> &Catalog { &self.catalog }
    pub fn embedder_id(&self) -> &str { self.embedder.embedder_id() }
    pub fn resolver(&self) -> &ImageResolver { &self.resolver }

    pub fn search_image(&self, image: &DynamicImage, threshold: Threshold) -> vpm_core::Result<Vec<ScoredResult<'_>>> {
        let query = self.embedder.embed_image(image)?;
        let results = rank(&query, self.catalog.entries(), threshold)?;
        debug!(matches = results.len(), threshold = threshold.fraction(), "query ranked");
        Ok(results)
    }

    pub fn search_bytes(&self, bytes: &[u8], threshold: Threshold) -> vpm_core::Result<Vec<ScoredResult<'_>>> {
        self.search_image(&decode(bytes)?, threshold)
    }

    /// Local path (resolved like catalog references) or http(s) URL.
    pub fn search_reference(&self, reference: &str, threshold: Threshold) -> vpm_core::Result<Vec<ScoredResult<'_>>> {
        self.search_bytes(&self.resolver.read_bytes(reference)?, threshold)
    }
}
