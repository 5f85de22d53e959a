use image::{DynamicImage, Rgb, RgbImage};
use vpm_core::config::EmbeddingConfig;
use vpm_embed::get_default_embedder;

fn main() -> anyhow::Result<()> {
    let embedder = get_default_embedder(&EmbeddingConfig::default())?;
    let images = vec![
        DynamicImage::ImageRgb8(RgbImage::from_pixel(224, 224, Rgb([240, 20, 20]))),
        DynamicImage::ImageRgb8(RgbImage::from_pixel(224, 224, Rgb([20, 20, 240]))),
    ];
    let embs = embedder.embed_batch(&images)?;
    println!("B={} dim={} id={}", embs.len(), embedder.dim(), embedder.embedder_id());
    Ok(())
}
