use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;

/// Per-channel statistics the CLIP vision tower was trained with.
pub const CLIP_MEAN: [f32; 3] = [0.481_454_66, 0.457_827_5, 0.408_210_73];
pub const CLIP_STD: [f32; 3] = [0.268_629_54, 0.261_302_6, 0.275_777_1];

/// Resize-to-fill and normalize one image into a `[3, size, size]` tensor on `device`.
pub fn image_to_tensor(image: &DynamicImage, size: usize, device: &Device) -> Result<Tensor> {
    let side = u32::try_from(size)?;
    let rgb = image.resize_to_fill(side, side, FilterType::Triangle).to_rgb8().into_raw();
    let pixels = Tensor::from_vec(rgb, (size, size, 3), &Device::Cpu)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?;
    let mean = Tensor::new(&CLIP_MEAN, &Device::Cpu)?.reshape((3, 1, 1))?;
    let std = Tensor::new(&CLIP_STD, &Device::Cpu)?.reshape((3, 1, 1))?;
    let normalized = pixels.broadcast_sub(&mean)?.broadcast_div(&std)?;
    Ok(normalized.to_device(device)?)
}

/// Stack preprocessed images into a `[B, 3, size, size]` batch.
pub fn images_to_batch(images: &[DynamicImage], size: usize, device: &Device) -> Result<Tensor> {
    let tensors = images.iter().map(|img| image_to_tensor(img, size, device)).collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stack(&tensors, 0)?)
}
