//! Per-session analysis report.

use super::classifier::{classify, Classification};
use super::risk::{overall_risk, PrivacyRisk};
use super::timeline::{readings_from_samples, track_device, TimelineSummary, TrackerConfig};
use super::AnalysisError;
use crate::sampler::{ProbeSession, SessionState};

use serde::Serialize;

/// What a session's timing reveals, graded per concern.
#[derive(Debug, Clone, Serialize)]
pub struct ThreatAssessment {
    /// Current activity readable from RTT; absent without Sent samples
    pub device_state_inference: Option<PrivacyRisk>,
    /// Online/offline pattern readable from presence; absent without samples
    pub presence_tracking: Option<PrivacyRisk>,
    /// A sleep signature or a sustained offline period was observed
    pub sleep_schedule_exposed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: u64,
    pub target: String,
    pub session_state: SessionState,
    pub probe_count: usize,
    pub lost_count: usize,
    pub headline: String,
    pub classification: Option<Classification>,
    pub presence: TimelineSummary,
    pub threats: ThreatAssessment,
    pub overall_risk: PrivacyRisk,
}

/// Build a report over whatever the session has recorded so far. Never
/// fails: a session with no Sent samples reports presence only.
pub fn session_report(session: &ProbeSession, tracker: &TrackerConfig) -> SessionReport {
    let classification = match classify(&session.samples) {
        Ok(c) => Some(c),
        Err(AnalysisError::InsufficientData(_)) | Err(AnalysisError::InvalidParameters(_)) => None,
    };

    let readings = readings_from_samples(&session.target, &session.samples);
    let presence = track_device(&session.target, readings, tracker).summary;

    let device_state_inference = classification.as_ref().map(|c| c.state_risk);
    let presence_tracking = (!presence.no_data).then_some(presence.availability_risk);
    let sleep_schedule_exposed = classification.as_ref().is_some_and(|c| c.sleep_detected)
        || presence.sustained_offline_period;

    let graded: Vec<PrivacyRisk> = [device_state_inference, presence_tracking]
        .into_iter()
        .flatten()
        .collect();

    let headline = match &classification {
        Some(c) => format!(
            "{} ({:.0} ms mean, {:.0}% confidence), online for {:.0}% of samples",
            c.state, c.statistics.mean, c.confidence, presence.online_percentage
        ),
        None if presence.no_data => "no samples recorded yet".to_string(),
        None => "target unreachable: every call was lost".to_string(),
    };

    SessionReport {
        session_id: session.id,
        target: session.target.clone(),
        session_state: session.state,
        probe_count: session.samples.len(),
        lost_count: session.lost_count(),
        headline,
        classification,
        presence,
        threats: ThreatAssessment {
            device_state_inference,
            presence_tracking,
            sleep_schedule_exposed,
        },
        overall_risk: overall_risk(&graded),
    }
}
