//! Resource-exhaustion cost model.
//!
//! Projects the traffic and battery cost that sustained probing imposes on a
//! target, per application profile. Pure arithmetic over its inputs.

use super::risk::BatteryImpact;
use super::AnalysisError;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const MIB: f64 = 1024.0 * 1024.0;

/// Traffic per hour above which the risk is critical (1000 MiB).
pub const CRITICAL_BYTES_PER_HOUR: f64 = 1000.0 * MIB;
/// Traffic per hour above which the risk is high (100 MiB).
pub const HIGH_BYTES_PER_HOUR: f64 = 100.0 * MIB;

/// Cost characteristics of one messaging application.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AppProfile {
    /// Bytes of traffic generated per payload-KB per message.
    pub amplification_factor: f64,
    /// Battery drained per hour of sustained probing, in percent.
    pub battery_drain_per_hour: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Moderate,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_bytes_per_hour(bytes_per_hour: f64) -> Self {
        if bytes_per_hour > CRITICAL_BYTES_PER_HOUR {
            RiskLevel::Critical
        } else if bytes_per_hour > HIGH_BYTES_PER_HOUR {
            RiskLevel::High
        } else {
            RiskLevel::Moderate
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExhaustionProjection {
    pub traffic_bytes_per_second: f64,
    pub traffic_bytes_per_hour: f64,
    pub total_bytes: f64,
    pub battery_percent_per_hour: f64,
    pub projected_hours_to_drain: f64,
    /// Battery consumed over the requested duration, capped at 100
    pub battery_percent_over_duration: f64,
    pub battery_impact: BatteryImpact,
    pub risk_level: RiskLevel,
}

/// Table of application profiles.
#[derive(Debug, Clone)]
pub struct ExhaustionModel {
    profiles: BTreeMap<String, AppProfile>,
}

impl Default for ExhaustionModel {
    fn default() -> Self {
        let mut profiles = BTreeMap::new();
        // 3.7x traffic amplification per payload, 14-18%/h measured drain
        profiles.insert(
            "whatsapp".to_string(),
            AppProfile {
                amplification_factor: 3.7 * 1024.0,
                battery_drain_per_hour: 15.0,
            },
        );
        // Rate limited; no amplification
        profiles.insert(
            "signal".to_string(),
            AppProfile {
                amplification_factor: 1024.0,
                battery_drain_per_hour: 1.0,
            },
        );
        Self { profiles }
    }
}

impl ExhaustionModel {
    /// Register or replace a profile. Names are case-insensitive.
    pub fn with_profile(mut self, name: &str, profile: AppProfile) -> Result<Self, AnalysisError> {
        if !(profile.amplification_factor.is_finite() && profile.amplification_factor > 0.0) {
            return Err(AnalysisError::InvalidParameters(
                "amplification_factor must be positive".to_string(),
            ));
        }
        if !(profile.battery_drain_per_hour.is_finite() && profile.battery_drain_per_hour > 0.0) {
            return Err(AnalysisError::InvalidParameters(
                "battery_drain_per_hour must be positive".to_string(),
            ));
        }
        self.profiles.insert(name.to_ascii_lowercase(), profile);
        Ok(self)
    }

    pub fn profile(&self, name: &str) -> Option<&AppProfile> {
        self.profiles.get(&name.to_ascii_lowercase())
    }

    pub fn profile_names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    /// Project the cost of probing at `frequency_per_second` with
    /// `payload_kb`-sized payloads for `duration_s` seconds.
    pub fn project(
        &self,
        payload_kb: f64,
        frequency_per_second: f64,
        duration_s: f64,
        app: &str,
    ) -> Result<ExhaustionProjection, AnalysisError> {
        if !(payload_kb.is_finite() && payload_kb > 0.0) {
            return Err(AnalysisError::InvalidParameters(
                "payload size must be positive".to_string(),
            ));
        }
        if !(frequency_per_second.is_finite() && frequency_per_second > 0.0) {
            return Err(AnalysisError::InvalidParameters(
                "frequency must be positive".to_string(),
            ));
        }
        if !(duration_s.is_finite() && duration_s >= 0.0) {
            return Err(AnalysisError::InvalidParameters(
                "duration must be a non-negative number of seconds".to_string(),
            ));
        }
        let profile = self.profile(app).ok_or_else(|| {
            let known: Vec<&str> = self.profile_names().collect();
            AnalysisError::InvalidParameters(format!(
                "unknown application profile: {} (known: {})",
                app,
                known.join(", ")
            ))
        })?;

        let traffic_bytes_per_second = profile.amplification_factor * payload_kb * frequency_per_second;
        let traffic_bytes_per_hour = traffic_bytes_per_second * 3600.0;
        let battery_percent_per_hour = profile.battery_drain_per_hour;

        Ok(ExhaustionProjection {
            traffic_bytes_per_second,
            traffic_bytes_per_hour,
            total_bytes: traffic_bytes_per_second * duration_s,
            battery_percent_per_hour,
            projected_hours_to_drain: 100.0 / battery_percent_per_hour,
            battery_percent_over_duration: (battery_percent_per_hour * duration_s / 3600.0).min(100.0),
            battery_impact: BatteryImpact::from_drain_per_hour(battery_percent_per_hour),
            risk_level: RiskLevel::from_bytes_per_hour(traffic_bytes_per_hour),
        })
    }
}

/// Project with the built-in profiles.
pub fn project(
    payload_kb: f64,
    frequency_per_second: f64,
    duration_s: f64,
    app: &str,
) -> Result<ExhaustionProjection, AnalysisError> {
    ExhaustionModel::default().project(payload_kb, frequency_per_second, duration_s, app)
}
