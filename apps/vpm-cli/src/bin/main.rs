use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vpm_core::catalog::load_products;
use vpm_core::config::AppConfig;
use vpm_core::slug::slugify;
use vpm_core::store::{read_manifest, read_records};
use vpm_core::{Error, ImageEmbedder, ScoredResult, Threshold};
use vpm_embed::get_default_embedder;
use vpm_media::{normalize_image, ImageResolver, ThumbnailSpec};
use vpm_pipeline::{localize_file, EmbeddingPipeline, LocalizeOptions, PipelineOptions};
use vpm_search::MatcherService;

#[derive(Debug, Parser)]
#[command(name = "vpm", about = "Visual product matcher", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download catalog images and rewrite references to local copies
    Localize,
    /// Compute the embedding store for every product image
    Embed(EmbedArgs),
    /// Rank catalog products by visual similarity to an image
    Query(QueryArgs),
    /// Show catalog, store and manifest counts
    Status,
}

#[derive(Debug, Args)]
struct EmbedArgs {
    /// Reuse vectors for images whose content did not change
    #[arg(long)]
    incremental: bool,
    /// Images processed concurrently
    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Debug, Args)]
struct QueryArgs {
    /// Query image on disk
    #[arg(required_unless_present = "url", conflicts_with = "url")]
    path: Option<PathBuf>,
    /// Query image URL
    #[arg(long)]
    url: Option<String>,
    /// Minimum similarity in percent (0-100)
    #[arg(long)]
    threshold: Option<f32>,
    /// Write display thumbnails of the matches into this directory
    #[arg(long)]
    thumbnails: Option<PathBuf>,
    /// Results per printed row
    #[arg(long)]
    per_row: Option<usize>,
}

fn main() {
    init_tracing();

    if let Err(err) = run() {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).with_writer(std::io::stderr).init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load().context("loading configuration")?;
    match cli.command {
        Commands::Localize => localize(&config),
        Commands::Embed(args) => embed(&config, args),
        Commands::Query(args) => query(&config, args),
        Commands::Status => status(&config),
    }
}

fn localize(config: &AppConfig) -> Result<()> {
    let source = config.resolve_path(&config.localize.source_path);
    let output = config.products_path();
    let resolver = ImageResolver::from_config(config);
    let options = LocalizeOptions::from_config(config);
    let report = localize_file(&source, &output, &config.fields, &resolver, &options)
        .with_context(|| format!("localizing {}", source.display()))?;
    println!(
        "Localized {} products into {} ({} skipped, {} failed)",
        report.products.len(),
        output.display(),
        report.skipped.len(),
        report.failures.len()
    );
    Ok(())
}

fn embed(config: &AppConfig, args: EmbedArgs) -> Result<()> {
    let products = load_products(&config.products_path(), &config.fields)?;
    let embedder: Arc<dyn ImageEmbedder> = Arc::from(get_default_embedder(&config.embedding)?);
    let resolver = Arc::new(ImageResolver::from_config(config));

    let mut options = PipelineOptions::from_config(&config.pipeline);
    options.incremental |= args.incremental;
    if let Some(workers) = args.workers {
        options.workers = workers.max(1);
    }
    info!(products = products.len(), embedder = embedder.embedder_id(), workers = options.workers, "embedding catalog");

    let pipeline = EmbeddingPipeline::new(resolver, embedder, config.embeddings_path(), options);
    let report = if pipeline.options().workers > 1 {
        tokio::runtime::Runtime::new()?.block_on(pipeline.run_concurrent(&products))?
    } else {
        pipeline.run(&products)?
    };

    println!(
        "Embedded {} of {} products into {} ({} reused)",
        report.records.len(),
        products.len(),
        pipeline.store_path().display(),
        report.reused
    );
    for failure in &report.failures {
        println!("  failed {}: {:?} ({})", failure.id, failure.reason, failure.detail);
    }
    Ok(())
}

fn query(config: &AppConfig, args: QueryArgs) -> Result<()> {
    let percent = args.threshold.unwrap_or(config.query.default_threshold_percent);
    let threshold = Threshold::from_percent(percent)?;
    let per_row = args.per_row.unwrap_or(config.display.per_row).max(1);
    let service = MatcherService::from_config(config)?;

    let searched = match (&args.path, &args.url) {
        (Some(path), _) => read_query_file(path).and_then(|bytes| service.search_bytes(&bytes, threshold)),
        (None, Some(url)) => service.search_reference(url, threshold),
        (None, None) => return Err(anyhow::anyhow!("a query image path or --url is required")),
    };
    let results = match searched {
        Ok(results) => results,
        Err(err) if err.is_item_level() => {
            warn!(error = %err, "query image unavailable");
            println!("No query image ({}). No results.", query_failure_kind(&err));
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if results.is_empty() {
        println!("No products at or above {percent:.2}% similarity.");
        return Ok(());
    }
    print!("{}", format_rows(&results, per_row));

    if let Some(dir) = &args.thumbnails {
        write_thumbnails(&service, &results, dir, &ThumbnailSpec::from_config(&config.display))?;
    }
    Ok(())
}

fn read_query_file(path: &Path) -> vpm_core::Result<Vec<u8>> {
    fs::read(path).map_err(|e| Error::ImageNotFound(format!("{}: {e}", path.display())))
}

fn query_failure_kind(err: &Error) -> &'static str {
    match err {
        Error::ImageNotFound(_) => "image not found",
        Error::ImageDecode(_) => "image could not be decoded",
        Error::RemoteFetch(_) => "image could not be fetched",
        Error::Timeout(_) => "fetching the image timed out",
        _ => "image could not be encoded",
    }
}

/// Results grouped `per_row` to a line, similarity with two decimals.
fn format_rows(results: &[ScoredResult<'_>], per_row: usize) -> String {
    let mut out = String::new();
    for (row, chunk) in results.chunks(per_row).enumerate() {
        let cells: Vec<String> = chunk
            .iter()
            .map(|r| format!("[{}] {} {:.2}%", r.product().id, r.product().name, r.percent()))
            .collect();
        out.push_str(&format!("{:>3}: {}\n", row + 1, cells.join(" | ")));
    }
    out
}

fn write_thumbnails(service: &MatcherService, results: &[ScoredResult<'_>], dir: &Path, spec: &ThumbnailSpec) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let mut written = 0usize;
    for (rank, result) in results.iter().enumerate() {
        let product = result.product();
        let thumbnail = service
            .resolver()
            .load_image(&product.image_reference)
            .and_then(|img| normalize_image(&img, spec));
        match thumbnail {
            Ok(bytes) => {
                let name = format!("{:02}_{}_{}.{}", rank + 1, slugify(&product.name), slugify(&product.id.to_string()), spec.extension());
                fs::write(dir.join(name), bytes)?;
                written += 1;
            }
            Err(e) => warn!(id = %product.id, error = %e, "no thumbnail for product"),
        }
    }
    println!("Wrote {written} thumbnails to {}", dir.display());
    Ok(())
}

fn status(config: &AppConfig) -> Result<()> {
    let products_path = config.products_path();
    let store_path = config.embeddings_path();
    let products = load_products(&products_path, &config.fields)?;
    println!("Products:   {} ({})", products.len(), products_path.display());

    let records = match read_records(&store_path) {
        Ok(records) => records,
        Err(e) => {
            println!("Embeddings: unavailable ({e})");
            return Ok(());
        }
    };
    println!("Embeddings: {} ({})", records.len(), store_path.display());
    match read_manifest(&store_path)? {
        Some(m) => println!("Manifest:   {} d{} generated {}", m.embedder_id, m.dim, m.generated_at.to_rfc3339()),
        None => println!("Manifest:   none (store is untagged)"),
    }

    let embedded: HashSet<_> = records.iter().map(|r| &r.id).collect();
    let missing: Vec<String> = products.iter().filter(|p| !embedded.contains(&p.id)).map(|p| p.id.to_string()).collect();
    if missing.is_empty() {
        println!("Every product has an embedding.");
    } else {
        println!("Without embedding: {}", missing.join(", "));
    }
    Ok(())
}
