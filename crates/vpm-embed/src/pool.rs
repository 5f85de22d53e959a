use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};

/// Row-wise L2 normalization of `[B, D]` projected features.
pub fn l2_normalize(features: &Tensor) -> Result<Tensor> {
    let dims = features.dims();
    ensure!(dims.len() == 2, "features must be [B,D], got {:?}", dims);
    let eps_val = match features.dtype() { DType::F16 | DType::BF16 => 1e-6f32, _ => 1e-12f32 };
    let eps = Tensor::new(&[eps_val], features.device())?.to_dtype(features.dtype())?.unsqueeze(0)?;
    let norm = features.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norm = norm.broadcast_add(&eps)?;
    Ok(features.broadcast_div(&norm)?)
}
