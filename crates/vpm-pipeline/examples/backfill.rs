use std::path::Path;
use std::sync::Arc;

use vpm_core::catalog::load_products;
use vpm_core::config::AppConfig;
use vpm_core::ImageEmbedder;
use vpm_embed::get_default_embedder;
use vpm_media::ImageResolver;
use vpm_pipeline::{EmbeddingPipeline, PipelineOptions};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config files live at the workspace root.
    let ws_root = Path::new(env!("CARGO_MANIFEST_DIR")).ancestors().nth(2).unwrap_or(Path::new("."));
    let config = AppConfig::load_from(ws_root, "dev")?;

    let products = load_products(&config.products_path(), &config.fields)?;
    let embedder: Arc<dyn ImageEmbedder> = Arc::from(get_default_embedder(&config.embedding)?);
    let resolver = Arc::new(ImageResolver::from_config(&config));
    let options = PipelineOptions { incremental: true, ..PipelineOptions::from_config(&config.pipeline) };

    let pipeline = EmbeddingPipeline::new(resolver, embedder, config.embeddings_path(), options);
    let report = pipeline.run_concurrent(&products).await?;
    println!(
        "Backfilled {} of {} products into '{}' ({} reused, {} failed)",
        report.records.len(),
        products.len(),
        pipeline.store_path().display(),
        report.reused,
        report.failures.len()
    );
    Ok(())
}
