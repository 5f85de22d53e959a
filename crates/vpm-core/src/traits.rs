use image::DynamicImage;

use crate::Result;

/// Embedding provider abstraction used by the pipeline and the query path.
///
/// Implementations must return vectors of exactly `dim()` components for a
/// given `embedder_id`, and must be deterministic for the same image.
pub trait ImageEmbedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g., `candle:clip-vit-base-patch32:d512`).
    fn embedder_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Compute the embedding of one decoded image.
    fn embed_image(&self, image: &DynamicImage) -> Result<Vec<f32>>;
    /// Compute embeddings for a batch of images. The default runs them one by one.
    fn embed_batch(&self, images: &[DynamicImage]) -> Result<Vec<Vec<f32>>> {
        images.iter().map(|img| self.embed_image(img)).collect()
    }
    /// Whether concurrent calls are safe. Callers serialize access when false.
    fn is_reentrant(&self) -> bool { false }
}
