pub mod source;
pub mod thumbnail;

pub use source::{decode, ImageRef, ImageResolver};
pub use thumbnail::{fit_within, normalize, normalize_image, ThumbnailFormat, ThumbnailSpec};
