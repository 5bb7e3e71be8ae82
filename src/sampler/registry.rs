//! Session registry.
//!
//! Owns every probe session keyed by id. Each session runs in its own task;
//! the map itself is the only shared mutable state. A background reaper drops
//! finished sessions once they outlive the retention window.

use super::{
    drive, validate_target, ProbeSession, SamplerError, SamplingParams, SessionState, SharedSession,
    DEFAULT_MAX_TICKS,
};
use crate::channel::Channel;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex, RwLock};

/// How often the reaper looks for expired sessions.
const REAP_INTERVAL: Duration = Duration::from_secs(30);

struct SessionEntry {
    session: SharedSession,
    stop_tx: broadcast::Sender<()>,
    done_rx: watch::Receiver<bool>,
}

/// Lightweight view of a session for listings.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: u64,
    pub target: String,
    pub state: SessionState,
    pub sample_count: usize,
    pub lost_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&ProbeSession> for SessionSummary {
    fn from(s: &ProbeSession) -> Self {
        Self {
            id: s.id,
            target: s.target.clone(),
            state: s.state,
            sample_count: s.samples.len(),
            lost_count: s.lost_count(),
            started_at: s.started_at,
            finished_at: s.finished_at,
        }
    }
}

/// Registry of probe sessions.
pub struct ProbeRegistry {
    sessions: Arc<RwLock<HashMap<u64, SessionEntry>>>,
    next_id: AtomicU64,
    call_ceiling: Duration,
    retention: Duration,
    max_ticks: u64,
    reaper_stop: Mutex<Option<broadcast::Sender<()>>>,
}

impl ProbeRegistry {
    pub fn new(call_ceiling: Duration, retention: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            call_ceiling,
            retention,
            max_ticks: DEFAULT_MAX_TICKS,
            reaper_stop: Mutex::new(None),
        }
    }

    /// Cap the number of ticks a single session may schedule.
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    /// Validate, register and start a session. Returns the initial snapshot.
    pub async fn start_probe<C: Channel>(
        &self,
        target: &str,
        cadence_ms: u64,
        duration_ms: u64,
        channel: Arc<C>,
    ) -> Result<ProbeSession, SamplerError> {
        validate_target(target)?;
        let params = SamplingParams::bounded(cadence_ms, duration_ms, self.max_ticks)?
            .with_call_ceiling(self.call_ceiling);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = ProbeSession::new(id, target, &params);
        let snapshot = session.clone();
        let shared = Arc::new(RwLock::new(session));

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let (done_tx, done_rx) = watch::channel(false);

        self.sessions.write().await.insert(
            id,
            SessionEntry {
                session: shared.clone(),
                stop_tx,
                done_rx,
            },
        );

        tracing::info!(
            "Registry: starting session {} for {} ({} ticks every {}ms)",
            id,
            target,
            params.tick_count(),
            cadence_ms
        );

        tokio::spawn(async move {
            drive(shared, params, channel, stop_rx).await;
            let _ = done_tx.send(true);
        });

        Ok(snapshot)
    }

    async fn entry_parts(
        &self,
        id: u64,
    ) -> Result<(SharedSession, broadcast::Sender<()>, watch::Receiver<bool>), SamplerError> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(&id).ok_or(SamplerError::SessionNotFound(id))?;
        Ok((
            entry.session.clone(),
            entry.stop_tx.clone(),
            entry.done_rx.clone(),
        ))
    }

    /// Current snapshot of a session.
    pub async fn get(&self, id: u64) -> Result<ProbeSession, SamplerError> {
        let (session, _, _) = self.entry_parts(id).await?;
        let snapshot = session.read().await.clone();
        Ok(snapshot)
    }

    /// Wait until the session completes or is cancelled, then return it.
    pub async fn await_completion(&self, id: u64) -> Result<ProbeSession, SamplerError> {
        let (session, _, mut done_rx) = self.entry_parts(id).await?;
        // The sender only drops after signalling, so an error still means done
        let _ = done_rx.wait_for(|done| *done).await;
        let snapshot = session.read().await.clone();
        Ok(snapshot)
    }

    /// Request cooperative cancellation. Observed at the next tick boundary.
    pub async fn cancel(&self, id: u64) -> Result<(), SamplerError> {
        let (session, stop_tx, _) = self.entry_parts(id).await?;
        if !session.read().await.is_finished() {
            let _ = stop_tx.send(());
            tracing::info!("Registry: cancellation requested for session {}", id);
        }
        Ok(())
    }

    /// Remove a session, cancelling it first if still running.
    pub async fn remove(&self, id: u64) -> Result<ProbeSession, SamplerError> {
        let entry = self
            .sessions
            .write()
            .await
            .remove(&id)
            .ok_or(SamplerError::SessionNotFound(id))?;

        let _ = entry.stop_tx.send(());
        let snapshot = entry.session.read().await.clone();
        tracing::info!("Registry: removed session {}", id);
        Ok(snapshot)
    }

    /// Summaries of all sessions, ordered by id.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let shared: Vec<SharedSession> = {
            let sessions = self.sessions.read().await;
            sessions.values().map(|e| e.session.clone()).collect()
        };

        let mut summaries = Vec::with_capacity(shared.len());
        for session in shared {
            summaries.push(SessionSummary::from(&*session.read().await));
        }
        summaries.sort_by_key(|s| s.id);
        summaries
    }

    /// Drop finished sessions whose retention expired before `now`.
    /// Returns how many were removed.
    pub async fn reap(&self, now: DateTime<Utc>) -> usize {
        let retention = ChronoDuration::from_std(self.retention)
            .unwrap_or_else(|_| ChronoDuration::days(36_500));
        let candidates: Vec<(u64, SharedSession)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, e)| (*id, e.session.clone()))
                .collect()
        };

        let mut expired = Vec::new();
        for (id, session) in candidates {
            let s = session.read().await;
            if let Some(finished_at) = s.finished_at {
                if finished_at + retention <= now {
                    expired.push(id);
                }
            }
        }

        if expired.is_empty() {
            return 0;
        }

        let mut sessions = self.sessions.write().await;
        for id in &expired {
            sessions.remove(id);
        }
        tracing::info!("Registry: reaped {} expired sessions", expired.len());
        expired.len()
    }

    /// Start the background reaper.
    pub async fn start_reaper(self: &Arc<Self>) {
        let (tx, mut rx) = broadcast::channel(1);
        *self.reaper_stop.lock().await = Some(tx);

        let registry = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                tokio::select! {
                    _ = rx.recv() => break,
                    _ = interval.tick() => {
                        registry.reap(Utc::now()).await;
                    }
                }
            }
        });
    }

    /// Stop the reaper and cancel every running session.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.reaper_stop.lock().await.take() {
            let _ = tx.send(());
        }

        let sessions = self.sessions.read().await;
        for entry in sessions.values() {
            let _ = entry.stop_tx.send(());
        }
        tracing::info!("Registry: shutdown signalled to {} sessions", sessions.len());
    }
}
