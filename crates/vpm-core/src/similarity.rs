//! Cosine similarity between embedding vectors.
//!
//! Sums are accumulated in `f64` and the result is clamped to `[-1, 1]`, so
//! callers never observe NaN or values outside the cosine range. A zero
//! magnitude on either side scores `0`.

use crate::{Error, Result};

pub(crate) fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|&x| f64::from(x) * f64::from(x)).sum::<f64>().sqrt() as f32
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.iter().zip(b).map(|(&x, &y)| f64::from(x) * f64::from(y)).sum()
}

fn cosine_from_parts(dot: f64, norm_a: f32, norm_b: f32) -> f32 {
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cos = dot / (f64::from(norm_a) * f64::from(norm_b));
    if cos.is_nan() { 0.0 } else { cos.clamp(-1.0, 1.0) as f32 }
}

fn check_dims(expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// Cosine similarity `dot(a,b) / (‖a‖·‖b‖)`.
///
/// Vectors of different length come from incompatible models and yield
/// [`Error::DimensionMismatch`].
pub fn score(a: &[f32], b: &[f32]) -> Result<f32> {
    check_dims(a.len(), b.len())?;
    Ok(cosine_from_parts(dot(a, b), l2_norm(a), l2_norm(b)))
}

/// Scores many candidates against one query, computing the query norm once.
/// Candidates supply their own precomputed norm (see `CatalogEntry::norm`).
#[derive(Debug, Clone)]
pub struct QueryScorer<'q> {
    query: &'q [f32],
    norm: f32,
}

impl<'q> QueryScorer<'q> {
    pub fn new(query: &'q [f32]) -> Self {
        Self { query, norm: l2_norm(query) }
    }

    pub fn dim(&self) -> usize { self.query.len() }

    pub fn score_with_norm(&self, candidate: &[f32], candidate_norm: f32) -> Result<f32> {
        check_dims(self.query.len(), candidate.len())?;
        Ok(cosine_from_parts(dot(self.query, candidate), self.norm, candidate_norm))
    }

    /// Scores a batch of `(vector, norm)` pairs, preserving input order.
    pub fn score_batch<'c, I>(&self, candidates: I) -> Result<Vec<f32>>
    where
        I: IntoIterator<Item = (&'c [f32], f32)>,
    {
        candidates
            .into_iter()
            .map(|(v, n)| self.score_with_norm(v, n))
            .collect()
    }
}
