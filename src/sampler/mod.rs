//! Sampling engine.
//!
//! Drives a [`Channel`] at a fixed cadence for a bounded window and records
//! one [`Sample`] per tick. Channel failures become `Lost` samples; the series
//! is never aborted because one tick went wrong.

mod registry;

pub use registry::*;

use crate::channel::Channel;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};

/// Default hard ceiling on one channel call.
pub const DEFAULT_CALL_CEILING: Duration = Duration::from_secs(5);

/// Default upper bound on ticks per session (a day at 1 s cadence).
pub const DEFAULT_MAX_TICKS: u64 = 86_400;

/// Sampler error types.
#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("session {0} not found")]
    SessionNotFound(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleOutcome {
    Sent,
    Lost,
}

/// A single recorded tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    /// Round-trip latency in milliseconds; absent when the tick was lost
    pub rtt_ms: Option<f64>,
    pub outcome: SampleOutcome,
}

impl Sample {
    pub fn sent(sequence: u64, timestamp: DateTime<Utc>, rtt_ms: f64) -> Self {
        Self {
            sequence,
            timestamp,
            rtt_ms: Some(rtt_ms),
            outcome: SampleOutcome::Sent,
        }
    }

    pub fn lost(sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            sequence,
            timestamp,
            rtt_ms: None,
            outcome: SampleOutcome::Lost,
        }
    }

    /// The latency of a `Sent` sample.
    pub fn latency(&self) -> Option<f64> {
        match self.outcome {
            SampleOutcome::Sent => self.rtt_ms,
            SampleOutcome::Lost => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Running,
    Completed,
    Cancelled,
}

/// A bounded sampling run against one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeSession {
    pub id: u64,
    pub target: String,
    pub cadence_ms: u64,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub samples: Vec<Sample>,
    pub state: SessionState,
}

impl ProbeSession {
    fn new(id: u64, target: &str, params: &SamplingParams) -> Self {
        Self {
            id,
            target: target.to_string(),
            cadence_ms: params.cadence_ms,
            duration_ms: params.duration_ms,
            started_at: Utc::now(),
            finished_at: None,
            samples: Vec::new(),
            state: SessionState::Running,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state != SessionState::Running
    }

    pub fn lost_count(&self) -> usize {
        self.samples
            .iter()
            .filter(|s| s.outcome == SampleOutcome::Lost)
            .count()
    }

    // Samples can finish out of order when calls overlap
    fn record(&mut self, sample: Sample) {
        let pos = self
            .samples
            .partition_point(|s| s.sequence < sample.sequence);
        self.samples.insert(pos, sample);
    }
}

/// Session shared between the registry and its sampling task.
pub type SharedSession = Arc<RwLock<ProbeSession>>;

/// Validated cadence, window and per-call ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingParams {
    cadence_ms: u64,
    duration_ms: u64,
    call_ceiling: Duration,
}

impl SamplingParams {
    pub fn new(cadence_ms: u64, duration_ms: u64) -> Result<Self, SamplerError> {
        Self::bounded(cadence_ms, duration_ms, DEFAULT_MAX_TICKS)
    }

    /// Like [`SamplingParams::new`], rejecting windows of more than `max_ticks` ticks.
    pub fn bounded(cadence_ms: u64, duration_ms: u64, max_ticks: u64) -> Result<Self, SamplerError> {
        if cadence_ms == 0 {
            return Err(SamplerError::InvalidParameters(
                "cadence_ms must be greater than zero".to_string(),
            ));
        }
        if duration_ms == 0 {
            return Err(SamplerError::InvalidParameters(
                "duration_ms must be greater than zero".to_string(),
            ));
        }
        let ticks = duration_ms.div_ceil(cadence_ms);
        if ticks > max_ticks {
            return Err(SamplerError::InvalidParameters(format!(
                "window of {} ticks exceeds the limit of {}",
                ticks, max_ticks
            )));
        }
        Ok(Self {
            cadence_ms,
            duration_ms,
            call_ceiling: DEFAULT_CALL_CEILING,
        })
    }

    pub fn with_call_ceiling(mut self, ceiling: Duration) -> Self {
        if !ceiling.is_zero() {
            self.call_ceiling = ceiling;
        }
        self
    }

    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    /// Number of ticks in the window: one per cadence until elapsed ≥ duration.
    pub fn tick_count(&self) -> u64 {
        self.duration_ms.div_ceil(self.cadence_ms)
    }

    /// Point after which no channel call may still be pending: one cadence
    /// past the last scheduled tick.
    fn hard_stop(&self, start: Instant) -> Instant {
        let span = self.cadence_ms.saturating_mul(self.tick_count().saturating_add(1));
        start + Duration::from_millis(span)
    }
}

fn validate_target(target: &str) -> Result<(), SamplerError> {
    if target.trim().is_empty() {
        return Err(SamplerError::InvalidParameters(
            "target must not be empty".to_string(),
        ));
    }
    Ok(())
}

/// Run a complete sampling session against `target` and return it.
///
/// Fails with `InvalidParameters` before anything is sampled.
pub async fn run<C: Channel>(
    target: &str,
    params: SamplingParams,
    channel: Arc<C>,
) -> Result<ProbeSession, SamplerError> {
    validate_target(target)?;

    let session = Arc::new(RwLock::new(ProbeSession::new(0, target, &params)));
    // Keep the sender alive so the loop never sees a closed stop channel
    let (_stop_tx, stop_rx) = broadcast::channel(1);

    drive(session.clone(), params, channel, stop_rx).await;

    let finished = session.read().await.clone();
    Ok(finished)
}

/// The per-session timer loop.
///
/// Each tick's channel call runs in its own task so a slow call never delays
/// the next tick. Calls are cut off at the per-call ceiling or at the session's
/// hard stop, whichever comes first, and recorded as `Lost`.
pub(crate) async fn drive<C: Channel>(
    session: SharedSession,
    params: SamplingParams,
    channel: Arc<C>,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let (id, target) = {
        let s = session.read().await;
        (s.id, s.target.clone())
    };
    let total_ticks = params.tick_count();

    let start = Instant::now();
    let hard_stop = params.hard_stop(start);

    let mut interval = tokio::time::interval_at(start, params.cadence());
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let mut in_flight: JoinSet<Sample> = JoinSet::new();
    // Issued ticks not yet recorded, with their issue timestamps
    let mut pending: BTreeMap<u64, DateTime<Utc>> = BTreeMap::new();
    let mut issued: u64 = 0;
    let mut stop_open = true;

    let cancelled = loop {
        if issued == total_ticks && in_flight.is_empty() {
            break false;
        }

        tokio::select! {
            stop = stop_rx.recv(), if stop_open => match stop {
                Ok(()) | Err(RecvError::Lagged(_)) => break true,
                Err(RecvError::Closed) => stop_open = false,
            },
            _ = interval.tick(), if issued < total_ticks => {
                let sequence = issued;
                issued += 1;

                let timestamp = Utc::now();
                pending.insert(sequence, timestamp);

                let ceiling_deadline = Instant::now() + params.call_ceiling;
                let cut_by_window = ceiling_deadline > hard_stop;
                let deadline = ceiling_deadline.min(hard_stop);
                let channel = channel.clone();
                let target = target.clone();

                in_flight.spawn(async move {
                    match tokio::time::timeout_at(deadline, channel.measure_round_trip(&target)).await {
                        Ok(Ok(rtt)) if rtt.is_finite() && rtt >= 0.0 => Sample::sent(sequence, timestamp, rtt),
                        Ok(Ok(rtt)) => {
                            tracing::warn!("Session {}: discarding invalid rtt {} at tick {}", id, rtt, sequence);
                            Sample::lost(sequence, timestamp)
                        }
                        Ok(Err(e)) => {
                            tracing::warn!("Session {}: tick {} lost: {}", id, sequence, e);
                            Sample::lost(sequence, timestamp)
                        }
                        Err(_) if cut_by_window => {
                            tracing::warn!("Session {}: tick {} still pending at end of window", id, sequence);
                            Sample::lost(sequence, timestamp)
                        }
                        Err(_) => {
                            tracing::warn!("Session {}: tick {} exceeded call ceiling", id, sequence);
                            Sample::lost(sequence, timestamp)
                        }
                    }
                });
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => match joined {
                Ok(sample) => {
                    pending.remove(&sample.sequence);
                    session.write().await.record(sample);
                }
                Err(e) => tracing::error!("Session {}: tick task failed: {}", id, e),
            },
        }
    };

    // Abandon calls still in flight
    in_flight.abort_all();

    let mut s = session.write().await;
    // Every issued tick ends up recorded, abandoned or failed ones as Lost
    for (sequence, timestamp) in pending {
        s.record(Sample::lost(sequence, timestamp));
    }

    s.state = if cancelled {
        SessionState::Cancelled
    } else {
        SessionState::Completed
    };
    s.finished_at = Some(Utc::now());

    tracing::info!(
        "Session {} for {} {:?} with {} samples ({} lost)",
        id,
        s.target,
        s.state,
        s.samples.len(),
        s.lost_count()
    );
}
