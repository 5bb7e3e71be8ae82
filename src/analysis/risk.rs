//! Privacy-risk grading.
//!
//! Turns the measurements produced elsewhere in this module (device state,
//! jitter, online share, battery drain) into coarse risk grades, and folds
//! several grades into one overall level.

use super::classifier::DeviceState;

use serde::{Deserialize, Serialize};

/// Jitter below this looks like a fixed connection.
pub const JITTER_STABLE_MS: f64 = 20.0;
/// Jitter below this is ordinary mobile fluctuation.
pub const JITTER_MODERATE_MS: f64 = 100.0;
/// Jitter below this suggests movement or congestion; above it, unreliable.
pub const JITTER_POOR_MS: f64 = 300.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrivacyRisk {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl PrivacyRisk {
    /// How much a device in `state` gives away about its user right now.
    pub fn for_state(state: DeviceState) -> Self {
        match state {
            DeviceState::WebActive => PrivacyRisk::Critical,
            DeviceState::AppActive => PrivacyRisk::High,
            DeviceState::ScreenOnIdle | DeviceState::AppSuspended | DeviceState::ScreenOff => {
                PrivacyRisk::Medium
            }
            DeviceState::DeepSleep => PrivacyRisk::Low,
        }
    }

    /// Grade an online share (0-100). The more often a device is reachable,
    /// the sharper its offline periods stand out.
    pub fn from_online_percentage(percentage: f64) -> Self {
        if percentage > 80.0 {
            PrivacyRisk::Critical
        } else if percentage > 50.0 {
            PrivacyRisk::High
        } else if percentage > 20.0 {
            PrivacyRisk::Medium
        } else {
            PrivacyRisk::Low
        }
    }

    fn score(self) -> f64 {
        match self {
            PrivacyRisk::Low => 1.0,
            PrivacyRisk::Medium => 2.0,
            PrivacyRisk::High => 3.0,
            PrivacyRisk::Critical => 4.0,
        }
    }
}

/// Combine grades by averaging their scores (LOW=1 .. CRITICAL=4) and
/// rounding half up. An empty slice is `Low`.
pub fn overall_risk(levels: &[PrivacyRisk]) -> PrivacyRisk {
    if levels.is_empty() {
        return PrivacyRisk::Low;
    }
    let avg = levels.iter().map(|l| l.score()).sum::<f64>() / levels.len() as f64;
    if avg >= 3.5 {
        PrivacyRisk::Critical
    } else if avg >= 2.5 {
        PrivacyRisk::High
    } else if avg >= 1.5 {
        PrivacyRisk::Medium
    } else {
        PrivacyRisk::Low
    }
}

/// Network path quality inferred from RTT jitter (standard deviation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionClass {
    /// Likely Wi-Fi at a fixed location
    Stable,
    /// Normal cellular or Wi-Fi fluctuation
    Moderate,
    /// Moving or congested
    Poor,
    /// Severely degraded, tunneled or intermittent
    Unreliable,
}

impl ConnectionClass {
    pub fn from_jitter(jitter_ms: f64) -> Self {
        if jitter_ms < JITTER_STABLE_MS {
            ConnectionClass::Stable
        } else if jitter_ms < JITTER_MODERATE_MS {
            ConnectionClass::Moderate
        } else if jitter_ms < JITTER_POOR_MS {
            ConnectionClass::Poor
        } else {
            ConnectionClass::Unreliable
        }
    }
}

/// How noticeable a battery drain rate is to the device owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryImpact {
    None,
    Minimal,
    Moderate,
    High,
    Severe,
}

impl BatteryImpact {
    /// Grade a drain rate in percent per hour. 14-18 %/h is the single
    /// continuous monitoring baseline; above that, several methods combined.
    pub fn from_drain_per_hour(percent_per_hour: f64) -> Self {
        if percent_per_hour > 18.0 {
            BatteryImpact::Severe
        } else if percent_per_hour > 14.0 {
            BatteryImpact::High
        } else if percent_per_hour > 5.0 {
            BatteryImpact::Moderate
        } else if percent_per_hour > 0.0 {
            BatteryImpact::Minimal
        } else {
            BatteryImpact::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_risk() {
        assert_eq!(PrivacyRisk::for_state(DeviceState::WebActive), PrivacyRisk::Critical);
        assert_eq!(PrivacyRisk::for_state(DeviceState::AppActive), PrivacyRisk::High);
        assert_eq!(PrivacyRisk::for_state(DeviceState::ScreenOnIdle), PrivacyRisk::Medium);
        assert_eq!(PrivacyRisk::for_state(DeviceState::ScreenOff), PrivacyRisk::Medium);
        assert_eq!(PrivacyRisk::for_state(DeviceState::DeepSleep), PrivacyRisk::Low);
    }

    #[test]
    fn test_online_percentage_grades() {
        assert_eq!(PrivacyRisk::from_online_percentage(95.0), PrivacyRisk::Critical);
        assert_eq!(PrivacyRisk::from_online_percentage(80.0), PrivacyRisk::High);
        assert_eq!(PrivacyRisk::from_online_percentage(50.0), PrivacyRisk::Medium);
        assert_eq!(PrivacyRisk::from_online_percentage(20.0), PrivacyRisk::Low);
        assert_eq!(PrivacyRisk::from_online_percentage(0.0), PrivacyRisk::Low);
    }

    #[test]
    fn test_jitter_classes() {
        assert_eq!(ConnectionClass::from_jitter(5.0), ConnectionClass::Stable);
        assert_eq!(ConnectionClass::from_jitter(20.0), ConnectionClass::Moderate);
        assert_eq!(ConnectionClass::from_jitter(150.0), ConnectionClass::Poor);
        assert_eq!(ConnectionClass::from_jitter(300.0), ConnectionClass::Unreliable);
    }

    #[test]
    fn test_battery_impact() {
        assert_eq!(BatteryImpact::from_drain_per_hour(0.0), BatteryImpact::None);
        assert_eq!(BatteryImpact::from_drain_per_hour(1.0), BatteryImpact::Minimal);
        assert_eq!(BatteryImpact::from_drain_per_hour(10.0), BatteryImpact::Moderate);
        assert_eq!(BatteryImpact::from_drain_per_hour(15.0), BatteryImpact::High);
        assert_eq!(BatteryImpact::from_drain_per_hour(25.0), BatteryImpact::Severe);
    }

    #[test]
    fn test_overall_risk_averages() {
        use PrivacyRisk::*;
        assert_eq!(overall_risk(&[]), Low);
        assert_eq!(overall_risk(&[Critical, Critical]), Critical);
        // (4 + 3) / 2 = 3.5
        assert_eq!(overall_risk(&[Critical, High]), Critical);
        // (4 + 1) / 2 = 2.5
        assert_eq!(overall_risk(&[Critical, Low]), High);
        // (2 + 1) / 2 = 1.5
        assert_eq!(overall_risk(&[Medium, Low]), Medium);
        assert_eq!(overall_risk(&[Low, Low, Medium]), Low);
    }
}
