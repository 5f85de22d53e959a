use crate::similarity::QueryScorer;
use crate::types::{CatalogEntry, ScoredResult};
use crate::{Error, Result};

/// Slack applied at a 100% threshold so that `f32` rounding on an exact
/// match (0.99999994) still passes. Lower thresholds compare exactly.
pub const SCORE_TOLERANCE: f32 = 1e-6;

/// Minimum similarity, as a fraction in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Threshold(f32);

impl Threshold {
    pub const NONE: Threshold = Threshold(0.0);

    pub fn new(fraction: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(Error::InvalidConfig(format!("threshold {fraction} is outside [0, 1]")));
        }
        Ok(Self(fraction))
    }

    /// From the user-facing percentage in `[0, 100]`.
    pub fn from_percent(percent: f32) -> Result<Self> {
        if !(0.0..=100.0).contains(&percent) {
            return Err(Error::InvalidConfig(format!("threshold {percent}% is outside [0, 100]")));
        }
        Self::new(percent / 100.0)
    }

    pub fn fraction(self) -> f32 { self.0 }

    pub fn admits(self, similarity: f32) -> bool {
        similarity >= self.0 || (self.0 >= 1.0 && similarity + SCORE_TOLERANCE >= 1.0)
    }
}

/// Scores every entry against `query`, orders by descending similarity and
/// keeps those at or above `threshold`.
///
/// The sort is stable, so equal scores keep catalog order and repeated calls
/// return identical sequences. The catalog is only borrowed.
pub fn rank<'a>(query: &[f32], entries: &'a [CatalogEntry], threshold: Threshold) -> Result<Vec<ScoredResult<'a>>> {
    let scorer = QueryScorer::new(query);
    let scores = scorer.score_batch(entries.iter().map(|e| (e.embedding(), e.norm())))?;
    let mut results: Vec<ScoredResult<'a>> = entries
        .iter()
        .zip(scores)
        .filter(|(_, s)| threshold.admits(*s))
        .map(|(entry, similarity)| ScoredResult { entry, similarity })
        .collect();
    results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Product, ProductId};

    fn entry(id: i64, v: &[f32]) -> CatalogEntry {
        let product = Product { id: ProductId::Int(id), name: format!("p{id}"), image_reference: format!("/img/{id}.jpg") };
        CatalogEntry::new(product, v.to_vec()).unwrap()
    }

    fn ids(results: &[ScoredResult<'_>]) -> Vec<ProductId> {
        results.iter().map(|r| r.entry.id().clone()).collect()
    }

    #[test]
    fn three_product_scenario() {
        let catalog = vec![entry(1, &[1.0, 0.0]), entry(2, &[0.0, 1.0]), entry(3, &[0.7, 0.7])];
        let all = rank(&[1.0, 0.0], &catalog, Threshold::NONE).unwrap();
        assert_eq!(ids(&all), vec![ProductId::Int(1), ProductId::Int(3), ProductId::Int(2)]);
        assert!((all[0].similarity - 1.0).abs() < 1e-6);
        assert!((all[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-3);
        assert!(all[2].similarity.abs() < 1e-6);

        let half = rank(&[1.0, 0.0], &catalog, Threshold::from_percent(50.0).unwrap()).unwrap();
        assert_eq!(ids(&half), vec![ProductId::Int(1), ProductId::Int(3)]);
    }

    #[test]
    fn output_is_sorted_descending() {
        let catalog: Vec<CatalogEntry> = (0..20)
            .map(|i| {
                let a = i as f32 * 0.3;
                entry(i, &[a.cos(), a.sin(), 0.1])
            })
            .collect();
        let results = rank(&[0.2, 0.8, 0.1], &catalog, Threshold::NONE).unwrap();
        for pair in results.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[test]
    fn ties_keep_catalog_order() {
        let catalog = vec![entry(7, &[1.0, 1.0]), entry(3, &[0.0, 1.0]), entry(5, &[1.0, 1.0])];
        let first = rank(&[1.0, 1.0], &catalog, Threshold::NONE).unwrap();
        assert_eq!(ids(&first), vec![ProductId::Int(7), ProductId::Int(5), ProductId::Int(3)]);
        let second = rank(&[1.0, 1.0], &catalog, Threshold::NONE).unwrap();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn zero_threshold_drops_only_negative_scores() {
        let catalog = vec![entry(1, &[1.0, 0.0]), entry(2, &[-1.0, 0.0]), entry(3, &[0.0, 1.0])];
        let results = rank(&[1.0, 0.0], &catalog, Threshold::NONE).unwrap();
        assert_eq!(ids(&results), vec![ProductId::Int(1), ProductId::Int(3)]);
    }

    #[test]
    fn full_threshold_keeps_exact_matches_only() {
        let v = [0.137f32, -0.52, 0.81, 0.003];
        let catalog = vec![entry(1, &v), entry(2, &[0.137, -0.52, 0.80, 0.003]), entry(3, &v.map(|x| x * 3.0))];
        let results = rank(&v, &catalog, Threshold::from_percent(100.0).unwrap()).unwrap();
        assert_eq!(ids(&results), vec![ProductId::Int(1), ProductId::Int(3)]);
    }

    #[test]
    fn dimension_mismatch_propagates() {
        let catalog = vec![entry(1, &[1.0, 0.0, 0.0])];
        assert!(matches!(
            rank(&[1.0, 0.0], &catalog, Threshold::NONE),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn tolerance_only_applies_at_full_threshold() {
        assert!(Threshold::NONE.admits(0.0));
        assert!(!Threshold::NONE.admits(-5e-7));
        let half = Threshold::new(0.5).unwrap();
        assert!(half.admits(0.5));
        assert!(!half.admits(0.4999995));
        let full = Threshold::new(1.0).unwrap();
        assert!(full.admits(0.999_999_4));
        assert!(!full.admits(0.99999));
    }

    #[test]
    fn threshold_rejects_out_of_range() {
        assert!(Threshold::from_percent(101.0).is_err());
        assert!(Threshold::from_percent(-1.0).is_err());
        assert!(Threshold::new(f32::NAN).is_err());
        assert_eq!(Threshold::from_percent(25.0).unwrap().fraction(), 0.25);
    }
}
