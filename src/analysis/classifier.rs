//! Device-state classifier.
//!
//! Maps the mean RTT of a sample sequence onto an ordered band table and
//! looks for behavioral transitions: a trend between the first and last few
//! samples, and a sustained run of deep-sleep latencies at the tail.
//!
//! The trend and sleep thresholds are empirical values from a published case
//! study. They are heuristics, kept as named defaults in
//! [`ClassifierThresholds`] so callers can override them.

use super::risk::{ConnectionClass, PrivacyRisk};
use super::stats::{percentiles, sent_latencies, Percentiles, Statistics, MAX_VARIANCE};
use super::AnalysisError;
use crate::sampler::Sample;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inferred power/activity state of the remote device, ordered fastest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    WebActive,
    AppActive,
    ScreenOnIdle,
    AppSuspended,
    ScreenOff,
    DeepSleep,
}

/// Exclusive upper bound (ms) of every band except the last.
const BAND_UPPER_BOUNDS: [(DeviceState, f64); 5] = [
    (DeviceState::WebActive, 50.0),
    (DeviceState::AppActive, 150.0),
    (DeviceState::ScreenOnIdle, 350.0),
    (DeviceState::AppSuspended, 600.0),
    (DeviceState::ScreenOff, 2000.0),
];

/// Lower bound of the `DeepSleep` band.
pub const DEEP_SLEEP_THRESHOLD_MS: f64 = 2000.0;

impl DeviceState {
    pub const ALL: [DeviceState; 6] = [
        DeviceState::WebActive,
        DeviceState::AppActive,
        DeviceState::ScreenOnIdle,
        DeviceState::AppSuspended,
        DeviceState::ScreenOff,
        DeviceState::DeepSleep,
    ];

    /// Band lookup. Bands are closed-open, so a mean sitting exactly on a
    /// boundary belongs to the slower band above it.
    pub fn from_mean(mean_ms: f64) -> Self {
        BAND_UPPER_BOUNDS
            .iter()
            .find(|(_, upper)| mean_ms < *upper)
            .map(|(state, _)| *state)
            .unwrap_or(DeviceState::DeepSleep)
    }

    /// Inclusive lower bound of the band in ms.
    pub fn lower_bound(&self) -> f64 {
        let idx = *self as usize;
        if idx == 0 {
            0.0
        } else {
            BAND_UPPER_BOUNDS[idx - 1].1
        }
    }

    /// Exclusive upper bound of the band in ms; `None` for `DeepSleep`.
    pub fn upper_bound(&self) -> Option<f64> {
        BAND_UPPER_BOUNDS.get(*self as usize).map(|(_, upper)| *upper)
    }

    pub fn description(&self) -> &'static str {
        match self {
            DeviceState::WebActive => "web client in the foreground",
            DeviceState::AppActive => "app in the foreground",
            DeviceState::ScreenOnIdle => "screen on, app idle",
            DeviceState::AppSuspended => "app recently suspended",
            DeviceState::ScreenOff => "screen off, device awake",
            DeviceState::DeepSleep => "deep sleep or offline",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "webactive" => Some(DeviceState::WebActive),
            "appactive" => Some(DeviceState::AppActive),
            "screenonidle" | "screenon" => Some(DeviceState::ScreenOnIdle),
            "appsuspended" => Some(DeviceState::AppSuspended),
            "screenoff" => Some(DeviceState::ScreenOff),
            "deepsleep" => Some(DeviceState::DeepSleep),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DeviceState::WebActive => "Web Active",
            DeviceState::AppActive => "App Active",
            DeviceState::ScreenOnIdle => "Screen On (idle)",
            DeviceState::AppSuspended => "App Suspended",
            DeviceState::ScreenOff => "Screen Off",
            DeviceState::DeepSleep => "Deep Sleep",
        };
        write!(f, "{}", label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    WakingUp,
    GoingOffline,
}

/// Tunables for trend and sleep detection.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierThresholds {
    pub max_variance: f64,
    /// Size of the initial and trailing windows compared for a trend.
    pub trend_window: usize,
    /// Trailing mean below `waking_ratio × initial mean` reports `WakingUp`.
    pub waking_ratio: f64,
    /// Trailing mean above `offline_ratio × initial mean` reports `GoingOffline`.
    pub offline_ratio: f64,
    /// Number of trailing samples inspected for sleep.
    pub sleep_window: usize,
    /// Percentage of the sleep window that must exceed `sleep_rtt_ms`.
    pub sleep_percent: usize,
    pub sleep_rtt_ms: f64,
}

impl Default for ClassifierThresholds {
    fn default() -> Self {
        Self {
            max_variance: MAX_VARIANCE,
            trend_window: 5,
            waking_ratio: 0.7,
            offline_ratio: 1.5,
            sleep_window: 10,
            sleep_percent: 70,
            sleep_rtt_ms: DEEP_SLEEP_THRESHOLD_MS,
        }
    }
}

/// Result of classifying one sample sequence.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub statistics: Statistics,
    pub state: DeviceState,
    pub state_description: &'static str,
    /// What the inferred state exposes about the user
    pub state_risk: PrivacyRisk,
    /// Connection quality from the latency standard deviation
    pub jitter_class: ConnectionClass,
    pub confidence: f64,
    pub trend: Option<Trend>,
    pub sleep_detected: bool,
    pub sent: usize,
    pub lost: usize,
    /// Percentage of samples that were lost
    pub loss_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentiles: Option<Percentiles>,
}

/// Classify with the default thresholds.
pub fn classify(samples: &[Sample]) -> Result<Classification, AnalysisError> {
    classify_with(samples, &ClassifierThresholds::default())
}

/// Classify a sample sequence. Fails only when no sample was `Sent`.
pub fn classify_with(
    samples: &[Sample],
    thresholds: &ClassifierThresholds,
) -> Result<Classification, AnalysisError> {
    let latencies = sent_latencies(samples);
    let statistics = Statistics::from_latencies(&latencies, thresholds.max_variance).ok_or_else(|| {
        AnalysisError::InsufficientData(format!(
            "no sent samples among {} recorded",
            samples.len()
        ))
    })?;

    let sent = latencies.len();
    let lost = samples.len() - sent;
    let loss_rate = lost as f64 / samples.len() as f64 * 100.0;

    let state = DeviceState::from_mean(statistics.mean);

    Ok(Classification {
        state,
        state_description: state.description(),
        state_risk: PrivacyRisk::for_state(state),
        jitter_class: ConnectionClass::from_jitter(statistics.std_dev),
        confidence: statistics.confidence,
        trend: detect_trend(&latencies, thresholds),
        sleep_detected: detect_sleep(&latencies, thresholds),
        sent,
        lost,
        loss_rate,
        percentiles: percentiles(&latencies),
        statistics,
    })
}

/// Compare the mean of the first `k` latencies with the mean of the last `k`.
/// Needs more than `k` latencies to say anything.
pub fn detect_trend(latencies: &[f64], thresholds: &ClassifierThresholds) -> Option<Trend> {
    let k = thresholds.trend_window;
    if k == 0 || latencies.len() <= k {
        return None;
    }

    let initial = latencies[..k].iter().sum::<f64>() / k as f64;
    let trailing = latencies[latencies.len() - k..].iter().sum::<f64>() / k as f64;

    if trailing < thresholds.waking_ratio * initial {
        Some(Trend::WakingUp)
    } else if trailing > thresholds.offline_ratio * initial {
        Some(Trend::GoingOffline)
    } else {
        None
    }
}

/// True when at least `sleep_percent`% of the trailing window exceeds the
/// deep-sleep RTT.
pub fn detect_sleep(latencies: &[f64], thresholds: &ClassifierThresholds) -> bool {
    let n = thresholds.sleep_window;
    if n == 0 || latencies.is_empty() {
        return false;
    }

    let window = &latencies[latencies.len().saturating_sub(n)..];
    let slow = window.iter().filter(|rtt| **rtt > thresholds.sleep_rtt_ms).count();
    // Always measured against the full window size, short sequences included
    slow * 100 >= thresholds.sleep_percent * n
}
