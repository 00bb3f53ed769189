use serde::Serialize;

/// Summary of document token lengths across a corpus.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LengthStats {
    pub documents: usize,
    pub mean: f64,
    pub median: f64,
    pub min: u32,
    pub max: u32,
    pub p95: f64,
}

impl LengthStats {
    pub fn from_lengths(lengths: &[u32]) -> Self {
        if lengths.is_empty() {
            return Self::default();
        }
        let mut sorted = lengths.to_vec();
        sorted.sort_unstable();
        let total: u64 = sorted.iter().map(|&l| l as u64).sum();
        Self {
            documents: sorted.len(),
            mean: total as f64 / sorted.len() as f64,
            median: percentile(&sorted, 50.0),
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            p95: percentile(&sorted, 95.0),
        }
    }
}

// Linear interpolation between closest ranks.
fn percentile(sorted: &[u32], pct: f64) -> f64 {
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] as f64 + (sorted[hi] as f64 - sorted[lo] as f64) * frac
}
