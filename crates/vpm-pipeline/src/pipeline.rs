//! Offline embedding pipeline.
//!
//! Each product walks `Pending -> Located -> Encoded -> Persisted`, or stops
//! at `Failed(reason)`. Item failures are logged with the product id and
//! never abort the run; only catalog-level problems (unreadable store,
//! failed write) surface as errors. With `incremental` on, products whose
//! image bytes hash to the value recorded in the manifest, under the same
//! embedder id, reuse their stored vector instead of being re-encoded.

use chrono::Utc;
use futures::StreamExt;
use image::DynamicImage;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use vpm_core::config::PipelineConfig;
use vpm_core::store::{content_hash_key, read_manifest, read_records, EmbeddingManifest};
use vpm_core::types::{PipelineRecord, Product, ProductId};
use vpm_core::{Error, ImageEmbedder, Result};
use vpm_media::{decode, ImageResolver};

use crate::store::write_store;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    ImageNotFound,
    ImageDecode,
    Encoding,
    Timeout,
}

impl FailureReason {
    pub fn from_error(err: &Error) -> Self {
        match err {
            Error::ImageNotFound(_) | Error::RemoteFetch(_) => FailureReason::ImageNotFound,
            Error::ImageDecode(_) => FailureReason::ImageDecode,
            Error::Timeout(_) => FailureReason::Timeout,
            _ => FailureReason::Encoding,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Located,
    Encoded,
    Persisted,
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemFailure {
    pub id: ProductId,
    pub reason: FailureReason,
    pub detail: String,
}

/// Outcome of one run. `records` follow catalog order regardless of the
/// order in which workers finished.
#[derive(Debug, Default)]
pub struct PipelineReport {
    pub records: Vec<PipelineRecord>,
    pub failures: Vec<ItemFailure>,
    /// Records whose vector came from the previous store.
    pub reused: usize,
    pub persisted: bool,
}

impl PipelineReport {
    pub fn state_of(&self, id: &ProductId) -> ItemState {
        if let Some(f) = self.failures.iter().find(|f| &f.id == id) {
            return ItemState::Failed(f.reason);
        }
        if self.records.iter().any(|r| &r.id == id) {
            return if self.persisted { ItemState::Persisted } else { ItemState::Encoded };
        }
        ItemState::Pending
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub workers: usize,
    pub incremental: bool,
    pub embed_timeout: Duration,
    pub show_progress: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self { Self::from_config(&PipelineConfig::default()) }
}

impl PipelineOptions {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            workers: cfg.workers.max(1),
            incremental: cfg.incremental,
            embed_timeout: Duration::from_secs(cfg.embed_timeout_secs.max(1)),
            show_progress: true,
        }
    }
}

/// Vectors and hashes from the previous run, usable only when that run was
/// produced by the same embedder.
#[derive(Debug, Default)]
struct PreviousRun {
    vectors: HashMap<ProductId, (String, Vec<f32>)>,
}

impl PreviousRun {
    fn reusable(&self, id: &ProductId, hash: &str) -> Option<Vec<f32>> {
        self.vectors.get(id).filter(|(h, _)| h == hash).map(|(_, v)| v.clone())
    }
}

enum Located {
    Reused { embedding: Vec<f32>, hash: String },
    Decoded { image: DynamicImage, hash: String },
}

enum Outcome {
    Embedded { record: PipelineRecord, hash: String, reused: bool },
    Failed(ItemFailure),
}

fn hash_content(bytes: &[u8]) -> String { blake3::hash(bytes).to_hex().to_string() }

fn item_failure(id: &ProductId, err: &Error) -> ItemFailure {
    ItemFailure { id: id.clone(), reason: FailureReason::from_error(err), detail: err.to_string() }
}

fn transition(id: &ProductId, from: ItemState, to: ItemState) {
    debug!(id = %id, from = ?from, to = ?to, "pipeline item");
}

#[derive(Clone)]
pub struct EmbeddingPipeline {
    resolver: Arc<ImageResolver>,
    embedder: Arc<dyn ImageEmbedder>,
    store_path: PathBuf,
    options: PipelineOptions,
    // Serializes encoder calls when the embedder is not safe to share.
    gate: Arc<Mutex<()>>,
}

impl EmbeddingPipeline {
    pub fn new(
        resolver: Arc<ImageResolver>,
        embedder: Arc<dyn ImageEmbedder>,
        store_path: impl Into<PathBuf>,
        options: PipelineOptions,
    ) -> Self {
        Self { resolver, embedder, store_path: store_path.into(), options, gate: Arc::new(Mutex::new(())) }
    }

    pub fn store_path(&self) -> &Path { &self.store_path }
    pub fn options(&self) -> &PipelineOptions { &self.options }

    /// Embed every product in order on the calling thread, then replace the store.
    pub fn run(&self, products: &[Product]) -> Result<PipelineReport> {
        let previous = self.previous_run()?;
        let pb = self.progress(products.len());
        let mut outcomes = Vec::with_capacity(products.len());
        for product in products {
            let outcome = match self.locate(product, &previous) {
                Ok(Located::Reused { embedding, hash }) => self.embedded(product, embedding, hash, true),
                Ok(Located::Decoded { image, hash }) => match self.encode(&image) {
                    Ok(embedding) => self.embedded(product, embedding, hash, false),
                    Err(e) => Outcome::Failed(item_failure(&product.id, &e)),
                },
                Err(e) => Outcome::Failed(item_failure(&product.id, &e)),
            };
            outcomes.push(outcome);
            pb.inc(1);
        }
        pb.finish_and_clear();
        self.finish(outcomes)
    }

    /// Same as [`run`](Self::run) with up to `workers` products in flight.
    /// Encoder calls that exceed `embed_timeout` fail the item with
    /// [`FailureReason::Timeout`].
    pub async fn run_concurrent(&self, products: &[Product]) -> Result<PipelineReport> {
        let previous = Arc::new(self.previous_run()?);
        let workers = self.options.workers.max(1);
        let pb = self.progress(products.len());
        info!(products = products.len(), workers, "pipeline started");

        let mut indexed: Vec<(usize, Outcome)> = futures::stream::iter(products.iter().cloned().enumerate())
            .map(|(idx, product)| {
                let this = self.clone();
                let previous = Arc::clone(&previous);
                async move { (idx, this.process_async(product, previous).await) }
            })
            .buffer_unordered(workers)
            .inspect(|_| pb.inc(1))
            .collect()
            .await;
        pb.finish_and_clear();

        indexed.sort_by_key(|(idx, _)| *idx);
        self.finish(indexed.into_iter().map(|(_, o)| o).collect())
    }

    async fn process_async(self, product: Product, previous: Arc<PreviousRun>) -> Outcome {
        let located = {
            let this = self.clone();
            let product = product.clone();
            tokio::task::spawn_blocking(move || this.locate(&product, &previous)).await
        };
        let (image, hash) = match located {
            Ok(Ok(Located::Reused { embedding, hash })) => return self.embedded(&product, embedding, hash, true),
            Ok(Ok(Located::Decoded { image, hash })) => (image, hash),
            Ok(Err(e)) => return Outcome::Failed(item_failure(&product.id, &e)),
            Err(join) => return Outcome::Failed(item_failure(&product.id, &Error::Encoding(join.to_string()))),
        };

        let this = self.clone();
        let task = tokio::task::spawn_blocking(move || this.encode(&image));
        match tokio::time::timeout(self.options.embed_timeout, task).await {
            Ok(Ok(Ok(embedding))) => self.embedded(&product, embedding, hash, false),
            Ok(Ok(Err(e))) => Outcome::Failed(item_failure(&product.id, &e)),
            Ok(Err(join)) => Outcome::Failed(item_failure(&product.id, &Error::Encoding(join.to_string()))),
            Err(_) => {
                let err = Error::Timeout(format!("encoder exceeded {:?}", self.options.embed_timeout));
                Outcome::Failed(item_failure(&product.id, &err))
            }
        }
    }

    fn locate(&self, product: &Product, previous: &PreviousRun) -> Result<Located> {
        let bytes = self.resolver.read_bytes(&product.image_reference)?;
        let hash = hash_content(&bytes);
        transition(&product.id, ItemState::Pending, ItemState::Located);
        if let Some(embedding) = previous.reusable(&product.id, &hash) {
            return Ok(Located::Reused { embedding, hash });
        }
        let image = decode(&bytes)?;
        Ok(Located::Decoded { image, hash })
    }

    fn encode(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let embedding = if self.embedder.is_reentrant() {
            self.embedder.embed_image(image)?
        } else {
            let _guard = self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            self.embedder.embed_image(image)?
        };
        if embedding.len() != self.embedder.dim() {
            return Err(Error::Encoding(format!(
                "encoder produced {} components, expected {}",
                embedding.len(),
                self.embedder.dim()
            )));
        }
        if embedding.iter().any(|x| !x.is_finite()) {
            return Err(Error::Encoding("encoder produced non-finite components".into()));
        }
        Ok(embedding)
    }

    fn embedded(&self, product: &Product, embedding: Vec<f32>, hash: String, reused: bool) -> Outcome {
        transition(&product.id, ItemState::Located, ItemState::Encoded);
        Outcome::Embedded { record: PipelineRecord { id: product.id.clone(), embedding }, hash, reused }
    }

    fn previous_run(&self) -> Result<PreviousRun> {
        if !self.options.incremental || !self.store_path.exists() {
            return Ok(PreviousRun::default());
        }
        let Some(manifest) = read_manifest(&self.store_path)? else {
            info!(path = %self.store_path.display(), "no manifest next to store; embedding everything");
            return Ok(PreviousRun::default());
        };
        if manifest.embedder_id != self.embedder.embedder_id() {
            info!(
                previous = %manifest.embedder_id,
                current = %self.embedder.embedder_id(),
                "embedder changed; embedding everything"
            );
            return Ok(PreviousRun::default());
        }
        let mut vectors = HashMap::new();
        for record in read_records(&self.store_path)? {
            if let Some(hash) = manifest.content_hashes.get(&content_hash_key(&record.id)) {
                vectors.insert(record.id, (hash.clone(), record.embedding));
            }
        }
        debug!(reusable = vectors.len(), "loaded previous run");
        Ok(PreviousRun { vectors })
    }

    fn finish(&self, outcomes: Vec<Outcome>) -> Result<PipelineReport> {
        let mut report = PipelineReport::default();
        let mut hashes = BTreeMap::new();
        for outcome in outcomes {
            match outcome {
                Outcome::Embedded { record, hash, reused } => {
                    if reused {
                        report.reused += 1;
                    }
                    hashes.insert(content_hash_key(&record.id), hash);
                    report.records.push(record);
                }
                Outcome::Failed(failure) => {
                    warn!(id = %failure.id, reason = ?failure.reason, detail = %failure.detail, "pipeline item failed");
                    report.failures.push(failure);
                }
            }
        }

        if report.records.is_empty() && !report.failures.is_empty() {
            // Keep whatever store is on disk rather than replacing it with nothing.
            return Err(Error::DataLoad(format!(
                "no product could be embedded ({} failures); {} left untouched",
                report.failures.len(),
                self.store_path.display()
            )));
        }

        let manifest = EmbeddingManifest {
            embedder_id: self.embedder.embedder_id().to_string(),
            dim: self.embedder.dim(),
            generated_at: Utc::now(),
            records: report.records.len(),
            content_hashes: hashes,
        };
        write_store(&self.store_path, &report.records, &manifest)?;
        report.persisted = true;
        info!(
            embedded = report.records.len(),
            reused = report.reused,
            failed = report.failures.len(),
            "pipeline finished"
        );
        Ok(report)
    }

    fn progress(&self, len: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images ({percent}%) {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }
}
