//! Fixed-size display thumbnails: scale down to fit, pad to the exact target
//! with a solid background, content centred. Encoder settings are fixed per
//! [`ThumbnailSpec`], so equal inputs produce equal bytes.

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, ExtendedColorType, ImageEncoder, Rgba, RgbaImage, RgbImage};

use vpm_core::config::DisplayConfig;
use vpm_core::{Error, Result};

use crate::source::decode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailFormat {
    Jpeg { quality: u8 },
    Png,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSpec {
    pub width: u32,
    pub height: u32,
    pub background: [u8; 3],
    pub format: ThumbnailFormat,
}

impl ThumbnailSpec {
    pub fn square(side: u32) -> Self {
        Self { width: side, height: side, background: [255, 255, 255], format: ThumbnailFormat::Jpeg { quality: 85 } }
    }

    pub fn from_config(display: &DisplayConfig) -> Self {
        Self {
            width: display.thumbnail_width,
            height: display.thumbnail_height,
            background: display.background,
            format: ThumbnailFormat::Jpeg { quality: display.jpeg_quality },
        }
    }

    pub fn with_format(mut self, format: ThumbnailFormat) -> Self {
        self.format = format;
        self
    }

    pub fn extension(&self) -> &'static str {
        match self.format {
            ThumbnailFormat::Jpeg { .. } => "jpg",
            ThumbnailFormat::Png => "png",
        }
    }
}

/// Largest size with the source aspect ratio that fits in `max_w`×`max_h`.
/// Never larger than the source.
pub fn fit_within(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if src_w <= max_w && src_h <= max_h {
        return (src_w, src_h);
    }
    let scale = f64::min(f64::from(max_w) / f64::from(src_w), f64::from(max_h) / f64::from(src_h));
    let w = (f64::from(src_w) * scale).round().clamp(1.0, f64::from(max_w)) as u32;
    let h = (f64::from(src_h) * scale).round().clamp(1.0, f64::from(max_h)) as u32;
    (w, h)
}

/// Scale and pad without encoding. Transparent pixels are composited over
/// the background.
pub fn render(image: &DynamicImage, spec: &ThumbnailSpec) -> Result<RgbImage> {
    if spec.width == 0 || spec.height == 0 {
        return Err(Error::InvalidConfig(format!("thumbnail size {}x{} is empty", spec.width, spec.height)));
    }
    let source = image.to_rgba8();
    let (w, h) = fit_within(source.width(), source.height(), spec.width, spec.height);
    let scaled = if (w, h) == source.dimensions() { source } else { imageops::resize(&source, w, h, FilterType::Lanczos3) };

    let [r, g, b] = spec.background;
    let mut canvas = RgbaImage::from_pixel(spec.width, spec.height, Rgba([r, g, b, 255]));
    let x = (spec.width - w) / 2;
    let y = (spec.height - h) / 2;
    imageops::overlay(&mut canvas, &scaled, i64::from(x), i64::from(y));
    Ok(DynamicImage::ImageRgba8(canvas).to_rgb8())
}

fn encode(rgb: &RgbImage, format: ThumbnailFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let encoded = match format {
        ThumbnailFormat::Jpeg { quality } => JpegEncoder::new_with_quality(&mut buf, quality).encode_image(rgb),
        ThumbnailFormat::Png => {
            PngEncoder::new(&mut buf).write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
        }
    };
    encoded.map_err(|e| Error::Encoding(format!("thumbnail encode failed: {e}")))?;
    Ok(buf)
}

pub fn normalize_image(image: &DynamicImage, spec: &ThumbnailSpec) -> Result<Vec<u8>> {
    encode(&render(image, spec)?, spec.format)
}

/// Decode `bytes` and encode a thumbnail of exactly `spec.width`×`spec.height`.
/// Undecodable input is [`Error::ImageDecode`].
pub fn normalize(bytes: &[u8], spec: &ThumbnailSpec) -> Result<Vec<u8>> {
    normalize_image(&decode(bytes)?, spec)
}
