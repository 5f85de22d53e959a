//! Image embedding providers.
//!
//! [`ClipEmbedder`] runs the CLIP ViT-B/32 image tower with candle and
//! produces 512-d L2-normalized vectors. [`FakeEmbedder`] is a deterministic
//! colour-histogram stand-in used when `APP_USE_FAKE_EMBEDDINGS=1` (or
//! `embedding.use_fake`) so tests and development never load model weights.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::clip::{ClipConfig, ClipModel};
use image::imageops::FilterType;
use image::DynamicImage;
use tracing::{debug, info, warn};

use vpm_core::config::EmbeddingConfig;
use vpm_core::{Error, ImageEmbedder};

pub mod device;
pub mod pool;
pub mod preprocess;

pub use pool::l2_normalize;
pub use preprocess::{image_to_tensor, images_to_batch};

pub const CLIP_MODEL_NAME: &str = "clip-vit-base-patch32";
pub const CLIP_EMBEDDING_DIM: usize = 512;

pub struct ClipEmbedder { model: ClipModel, image_size: usize, device: Device, id: String }

impl ClipEmbedder {
    /// Load weights from `model_dir/model.safetensors`.
    pub fn new(model_dir: &Path) -> Result<Self> {
        let device = device::select_device();
        let weights_path = model_dir.join("model.safetensors");
        info!(path = %weights_path.display(), "loading CLIP weights");
        let weights = candle_core::safetensors::load(&weights_path, &device)
            .map_err(|e| anyhow!("Failed to load CLIP weights from {}: {}", weights_path.display(), e))?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let config = ClipConfig::vit_base_patch32();
        let model = ClipModel::new(vb, &config)?;
        let id = format!("candle:{}:d{}", CLIP_MODEL_NAME, CLIP_EMBEDDING_DIM);
        info!(embedder = %id, "CLIP model loaded");
        Ok(Self { model, image_size: config.image_size, device, id })
    }

    fn features(&self, pixel_values: &Tensor) -> Result<Vec<Vec<f32>>> {
        let start = Instant::now();
        let features = self.model.get_image_features(pixel_values)?;
        let normalized = l2_normalize(&features)?;
        let rows: Vec<Vec<f32>> = normalized.to_device(&Device::Cpu)?.to_vec2()?;
        for row in &rows {
            if row.len() != CLIP_EMBEDDING_DIM {
                return Err(anyhow!("CLIP produced {} components, expected {}", row.len(), CLIP_EMBEDDING_DIM));
            }
        }
        if start.elapsed().as_millis() > 500 { warn!(batch = rows.len(), elapsed_ms = start.elapsed().as_millis() as u64, "slow embedding"); }
        Ok(rows)
    }

    pub fn embed(&self, image: &DynamicImage) -> Result<Vec<f32>> {
        let pixels = image_to_tensor(image, self.image_size, &self.device)?.unsqueeze(0)?;
        self.features(&pixels)?.pop().ok_or_else(|| anyhow!("CLIP returned an empty batch"))
    }
}

fn encoding_error(e: anyhow::Error) -> Error { Error::Encoding(format!("{e:#}")) }

impl ImageEmbedder for ClipEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { CLIP_EMBEDDING_DIM }
    fn embed_image(&self, image: &DynamicImage) -> vpm_core::Result<Vec<f32>> { self.embed(image).map_err(encoding_error) }
    fn embed_batch(&self, images: &[DynamicImage]) -> vpm_core::Result<Vec<Vec<f32>>> {
        if images.is_empty() { return Ok(Vec::new()); }
        images_to_batch(images, self.image_size, &self.device)
            .and_then(|batch| self.features(&batch))
            .map_err(encoding_error)
    }
    fn is_reentrant(&self) -> bool { matches!(self.device, Device::Cpu) }
}

/// Side length the fake embedder samples images at.
const FAKE_GRID: u32 = 16;

/// Deterministic stand-in: buckets quantized pixel colours per image quadrant
/// into `dim` slots with xxHash, then L2-normalizes. Identical images give
/// identical vectors; images with similar colour layout land close together.
pub struct FakeEmbedder { dim: usize, id: String }

impl FakeEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim, id: format!("fake:xxhash-rgb:d{dim}") } }
}

impl ImageEmbedder for FakeEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }
    fn embed_image(&self, image: &DynamicImage) -> vpm_core::Result<Vec<f32>> {
        use std::hash::{Hash, Hasher}; use twox_hash::XxHash64;
        let mut v = vec![0f32; self.dim];
        let grid = image.resize_exact(FAKE_GRID, FAKE_GRID, FilterType::Triangle).to_rgb8();
        for (x, y, px) in grid.enumerate_pixels() {
            let quadrant = (y * 2 / FAKE_GRID) * 2 + x * 2 / FAKE_GRID;
            let bucket = (quadrant, px[0] >> 6, px[1] >> 6, px[2] >> 6);
            let mut hasher = XxHash64::with_seed(0); bucket.hash(&mut hasher); let h = hasher.finish();
            v[(h % self.dim as u64) as usize] += 1.0;
        }
        let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt().max(1e-6); for x in &mut v { *x /= norm; }
        Ok(v)
    }
    fn is_reentrant(&self) -> bool { true }
}

fn fake_requested(config: &EmbeddingConfig) -> bool {
    config.use_fake
        || std::env::var("APP_USE_FAKE_EMBEDDINGS").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

pub fn get_default_embedder(config: &EmbeddingConfig) -> Result<Box<dyn ImageEmbedder>> {
    if fake_requested(config) { info!(dim = config.fake_dim, "using FakeEmbedder"); return Ok(Box::new(FakeEmbedder::new(config.fake_dim))); }
    let model_dir = resolve_model_dir(config.model_dir.as_deref())?;
    Ok(Box::new(ClipEmbedder::new(&model_dir)?))
}

fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) { let p = PathBuf::from(&dir); if p.exists() { debug!(var, path = %p.display(), "model dir from env"); return Ok(p); } }
    }
    if let Some(dir) = configured { let p = vpm_core::config::expand_path(dir); if p.exists() { return Ok(p); } warn!(path = %p.display(), "configured model dir does not exist"); }
    let local = PathBuf::from("models").join(CLIP_MODEL_NAME); if local.exists() { return Ok(local); }
    let parent = Path::new("..").join("models").join(CLIP_MODEL_NAME); if parent.exists() { return Ok(parent); }
    Err(anyhow!("Could not locate the {} model directory (set APP_MODEL_DIR or embedding.model_dir)", CLIP_MODEL_NAME))
}
