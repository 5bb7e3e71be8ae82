//! Latency statistics shared by the classifier and the fingerprint extractor.

use crate::sampler::Sample;

use serde::{Deserialize, Serialize};
use tdigests::TDigest;

/// Variance (ms²) at which confidence bottoms out at zero. A calibration
/// constant, not derived from the data.
pub const MAX_VARIANCE: f64 = 100_000.0;

/// Summary of the `Sent` latencies in a sample sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub mean: f64,
    pub std_dev: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub count: usize,
    /// 0-100, higher for lower jitter
    pub confidence: f64,
}

impl Statistics {
    /// Compute statistics over raw latencies. `None` when empty.
    pub fn from_latencies(latencies: &[f64], max_variance: f64) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }

        let n = latencies.len() as f64;
        let mean = latencies.iter().sum::<f64>() / n;
        // Population variance
        let variance = latencies.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let min = latencies.iter().copied().fold(f64::INFINITY, f64::min);
        let max = latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Some(Self {
            mean,
            std_dev: variance.sqrt(),
            variance,
            min,
            max,
            median: median(latencies),
            count: latencies.len(),
            confidence: confidence(variance, max_variance),
        })
    }

    /// Compute statistics over the `Sent` samples of a sequence.
    pub fn from_samples(samples: &[Sample], max_variance: f64) -> Option<Self> {
        Self::from_latencies(&sent_latencies(samples), max_variance)
    }
}

/// Latencies of `Sent` samples, in sequence order.
pub fn sent_latencies(samples: &[Sample]) -> Vec<f64> {
    samples.iter().filter_map(Sample::latency).collect()
}

/// Median via full sort. Even-length inputs average the two middle values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// `(1 - min(variance / max_variance, 1)) × 100`.
pub fn confidence(variance: f64, max_variance: f64) -> f64 {
    if max_variance <= 0.0 {
        return 0.0;
    }
    (1.0 - (variance / max_variance).min(1.0)) * 100.0
}

/// Percentile estimates of a latency distribution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Percentiles {
    pub p1: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p99: f64,
}

/// Estimate percentiles with a t-digest. `None` when empty.
pub fn percentiles(latencies: &[f64]) -> Option<Percentiles> {
    if latencies.is_empty() {
        return None;
    }
    let td = TDigest::from_values(latencies.to_vec());
    Some(Percentiles {
        p1: sanitize_float(td.estimate_quantile(0.01)),
        p25: sanitize_float(td.estimate_quantile(0.25)),
        p50: sanitize_float(td.estimate_quantile(0.50)),
        p75: sanitize_float(td.estimate_quantile(0.75)),
        p99: sanitize_float(td.estimate_quantile(0.99)),
    })
}

fn sanitize_float(f: f64) -> f64 {
    if f.is_finite() {
        f
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_basic_statistics() {
        let stats = Statistics::from_latencies(&[100.0, 200.0, 300.0, 400.0], MAX_VARIANCE).unwrap();
        assert_eq!(stats.mean, 250.0);
        assert_eq!(stats.variance, 12_500.0);
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 400.0);
        assert_eq!(stats.median, 250.0);
        assert_eq!(stats.count, 4);
        assert!((stats.confidence - 87.5).abs() < 1e-9);
    }

    #[test]
    fn test_median_odd_and_unsorted() {
        assert_eq!(median(&[9.0, 1.0, 5.0]), 5.0);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn test_confidence_saturates() {
        assert_eq!(confidence(0.0, MAX_VARIANCE), 100.0);
        assert_eq!(confidence(MAX_VARIANCE * 3.0, MAX_VARIANCE), 0.0);
    }

    #[test]
    fn test_lost_samples_excluded() {
        let now = Utc::now();
        let samples = vec![
            Sample::sent(0, now, 100.0),
            Sample::lost(1, now),
            Sample::sent(2, now, 300.0),
        ];
        assert_eq!(sent_latencies(&samples), vec![100.0, 300.0]);
        let stats = Statistics::from_samples(&samples, MAX_VARIANCE).unwrap();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.mean, 200.0);
    }

    #[test]
    fn test_empty_is_none() {
        assert!(Statistics::from_latencies(&[], MAX_VARIANCE).is_none());
        assert!(percentiles(&[]).is_none());
    }

    #[test]
    fn test_percentiles_track_distribution() {
        let values: Vec<f64> = (1..=1000).map(|v| v as f64).collect();
        let p = percentiles(&values).unwrap();
        assert!((p.p50 - 500.0).abs() < 15.0);
        assert!(p.p1 < p.p25 && p.p25 < p.p50 && p.p50 < p.p75 && p.p75 < p.p99);
    }
}
