//! Behavioral fingerprints.
//!
//! Two different kinds of signal end up in a profile and they are kept apart:
//! the per-activity latency summaries are statistical estimates, while the
//! receipt pattern is a protocol fact looked up from the declared OS. The
//! receipt pattern is never inferred from timing.

use super::classifier::DeviceState;
use super::risk::PrivacyRisk;
use super::stats::{Statistics, MAX_VARIANCE};
use super::AnalysisError;
use crate::sampler::Sample;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Consistency above this is a critical privacy risk.
pub const CONSISTENCY_CRITICAL: f64 = 80.0;
/// Consistency above this (and not critical) is a high privacy risk.
pub const CONSISTENCY_HIGH: f64 = 60.0;

/// Operating system the caller declares for the target device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclaredOs {
    Ios,
    Android,
    Web,
    Desktop,
    Unknown,
}

impl DeclaredOs {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" | "iphone" | "ipados" => DeclaredOs::Ios,
            "android" => DeclaredOs::Android,
            "web" | "browser" => DeclaredOs::Web,
            "desktop" | "macos" | "windows" | "linux" => DeclaredOs::Desktop,
            _ => DeclaredOs::Unknown,
        }
    }
}

/// How the protocol groups delivery receipts across a user's devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptPattern {
    Stacked,
    StackedReversed,
    Separate,
    None,
}

impl ReceiptPattern {
    /// Fixed lookup; a property of each client implementation, not a measurement.
    pub fn for_os(os: DeclaredOs) -> Self {
        match os {
            DeclaredOs::Ios => ReceiptPattern::StackedReversed,
            DeclaredOs::Android => ReceiptPattern::Separate,
            DeclaredOs::Web | DeclaredOs::Desktop => ReceiptPattern::Stacked,
            DeclaredOs::Unknown => ReceiptPattern::None,
        }
    }
}

impl PrivacyRisk {
    /// Grade fingerprint consistency. Never below `Medium`: any stable
    /// per-activity profile is identifying to some degree.
    pub fn from_consistency(consistency: f64) -> Self {
        if consistency > CONSISTENCY_CRITICAL {
            PrivacyRisk::Critical
        } else if consistency > CONSISTENCY_HIGH {
            PrivacyRisk::High
        } else {
            PrivacyRisk::Medium
        }
    }
}

/// Latency summary of one labeled activity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActivityProfile {
    pub mean: f64,
    pub std_dev: f64,
    pub sample_count: usize,
    pub state: DeviceState,
}

#[derive(Debug, Clone, Serialize)]
pub struct FingerprintProfile {
    pub activities: BTreeMap<String, ActivityProfile>,
    pub declared_os: DeclaredOs,
    pub receipt_pattern: ReceiptPattern,
    /// 0-100; how tightly the per-activity means cluster
    pub consistency: f64,
    pub privacy_risk: PrivacyRisk,
}

/// Build a fingerprint from per-activity sample sequences.
pub fn extract(
    activity_samples: &BTreeMap<String, Vec<Sample>>,
    declared_os: DeclaredOs,
) -> Result<FingerprintProfile, AnalysisError> {
    if activity_samples.is_empty() {
        return Err(AnalysisError::InsufficientData(
            "no activities supplied".to_string(),
        ));
    }

    let mut activities = BTreeMap::new();
    for (label, samples) in activity_samples {
        let stats = Statistics::from_samples(samples, MAX_VARIANCE).ok_or_else(|| {
            AnalysisError::InsufficientData(format!("activity {:?} has no sent samples", label))
        })?;
        activities.insert(
            label.clone(),
            ActivityProfile {
                mean: stats.mean,
                std_dev: stats.std_dev,
                sample_count: stats.count,
                state: DeviceState::from_mean(stats.mean),
            },
        );
    }

    let means: Vec<f64> = activities.values().map(|a| a.mean).collect();
    let consistency = consistency(&means);

    Ok(FingerprintProfile {
        activities,
        declared_os,
        receipt_pattern: ReceiptPattern::for_os(declared_os),
        consistency,
        privacy_risk: PrivacyRisk::from_consistency(consistency),
    })
}

/// `100 - CV × 100`, clamped to [0, 100], where CV is the coefficient of
/// variation (population std dev over mean) of `means`.
pub fn consistency(means: &[f64]) -> f64 {
    let stats = match Statistics::from_latencies(means, MAX_VARIANCE) {
        Some(s) => s,
        None => return 0.0,
    };
    if stats.mean <= 0.0 {
        return 0.0;
    }
    let cv = stats.std_dev / stats.mean;
    (100.0 - cv * 100.0).clamp(0.0, 100.0)
}
