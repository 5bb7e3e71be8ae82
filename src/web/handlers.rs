//! HTTP request handlers.

use super::AppState;
use crate::analysis::{
    classify, extract, readings_from_samples, session_report, track, track_device, AnalysisError,
    AppProfile, Classification, DeclaredOs, DeviceState, ExhaustionModel, PresenceReading,
    TrackerConfig,
};
use crate::channel::ProbeChannel;
use crate::sampler::{Sample, SamplerError, SessionState};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

fn sampler_error(e: SamplerError) -> Response {
    let status = match e {
        SamplerError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
        SamplerError::SessionNotFound(_) => StatusCode::NOT_FOUND,
    };
    (status, e.to_string()).into_response()
}

fn analysis_error(e: AnalysisError) -> Response {
    let status = match e {
        AnalysisError::InvalidParameters(_) => StatusCode::BAD_REQUEST,
        AnalysisError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
    };
    (status, e.to_string()).into_response()
}

pub async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================================
// API: Probe sessions
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartProbeRequest {
    pub target: String,
    pub cadence_ms: u64,
    pub duration_ms: u64,
    #[serde(default)]
    pub channel: Option<String>,
    /// Pin the synthetic channel to one device state
    #[serde(default)]
    pub synthetic_state: Option<String>,
}

pub async fn handle_start_probe(
    State(state): State<AppState>,
    Json(req): Json<StartProbeRequest>,
) -> impl IntoResponse {
    let pinned = match req.synthetic_state.as_deref() {
        Some(name) => match DeviceState::parse(name) {
            Some(s) => Some(s),
            None => {
                return (StatusCode::BAD_REQUEST, format!("unknown device state: {}", name))
                    .into_response()
            }
        },
        None => None,
    };

    let kind = req
        .channel
        .as_deref()
        .unwrap_or(state.config.default_channel.as_str());

    let channel = match ProbeChannel::build(
        kind,
        state.config.call_ceiling,
        state.config.synthetic_loss,
        pinned,
    ) {
        Ok(c) => Arc::new(c),
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };

    match state
        .registry
        .start_probe(&req.target, req.cadence_ms, req.duration_ms, channel)
        .await
    {
        Ok(session) => (StatusCode::CREATED, Json(session)).into_response(),
        Err(e) => sampler_error(e),
    }
}

pub async fn handle_list_probes(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

pub async fn handle_get_probe(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match state.registry.get(id).await {
        Ok(session) => Json(session).into_response(),
        Err(e) => sampler_error(e),
    }
}

pub async fn handle_cancel_probe(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match state.registry.cancel(id).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => sampler_error(e),
    }
}

pub async fn handle_delete_probe(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    match state.registry.remove(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => sampler_error(e),
    }
}

#[derive(Debug, Serialize)]
pub struct ProbeClassification {
    pub session_id: u64,
    pub session_state: SessionState,
    #[serde(flatten)]
    pub classification: Classification,
}

pub async fn handle_probe_classification(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let session = match state.registry.get(id).await {
        Ok(s) => s,
        Err(e) => return sampler_error(e),
    };

    // Running sessions classify whatever has been recorded so far
    match classify(&session.samples) {
        Ok(classification) => Json(ProbeClassification {
            session_id: session.id,
            session_state: session.state,
            classification,
        })
        .into_response(),
        Err(e) => analysis_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PresenceQuery {
    #[serde(default)]
    pub device_id: Option<String>,
}

pub async fn handle_probe_presence(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<PresenceQuery>,
) -> impl IntoResponse {
    let session = match state.registry.get(id).await {
        Ok(s) => s,
        Err(e) => return sampler_error(e),
    };

    let device_id = query.device_id.unwrap_or_else(|| session.target.clone());
    let readings = readings_from_samples(&device_id, &session.samples);
    let config = TrackerConfig {
        offline_gap_threshold: state.config.offline_gap_threshold,
    };
    Json(track_device(&device_id, readings, &config)).into_response()
}

pub async fn handle_probe_report(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> impl IntoResponse {
    let session = match state.registry.get(id).await {
        Ok(s) => s,
        Err(e) => return sampler_error(e),
    };
    let config = TrackerConfig {
        offline_gap_threshold: state.config.offline_gap_threshold,
    };
    Json(session_report(&session, &config)).into_response()
}

// ============================================================================
// API: Stateless analysis
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub samples: Vec<Sample>,
}

pub async fn handle_classify(Json(req): Json<ClassifyRequest>) -> impl IntoResponse {
    match classify(&req.samples) {
        Ok(c) => Json(c).into_response(),
        Err(e) => analysis_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct PresenceRequest {
    pub readings: Vec<PresenceReading>,
    #[serde(default)]
    pub offline_gap_threshold: Option<usize>,
}

pub async fn handle_presence(
    State(state): State<AppState>,
    Json(req): Json<PresenceRequest>,
) -> impl IntoResponse {
    let config = TrackerConfig {
        offline_gap_threshold: req
            .offline_gap_threshold
            .unwrap_or(state.config.offline_gap_threshold),
    };
    Json(track(&req.readings, &config))
}

#[derive(Debug, Deserialize)]
pub struct FingerprintRequest {
    pub activities: BTreeMap<String, Vec<Sample>>,
    #[serde(default)]
    pub declared_os: Option<String>,
}

pub async fn handle_fingerprint(Json(req): Json<FingerprintRequest>) -> impl IntoResponse {
    let os = req
        .declared_os
        .as_deref()
        .map(DeclaredOs::parse)
        .unwrap_or(DeclaredOs::Unknown);

    match extract(&req.activities, os) {
        Ok(profile) => Json(profile).into_response(),
        Err(e) => analysis_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ExhaustionRequest {
    pub payload_kb: f64,
    pub frequency_per_second: f64,
    pub duration_s: f64,
    pub app: String,
    /// Ad-hoc profile registered under `app` for this request
    #[serde(default)]
    pub profile: Option<AppProfile>,
}

pub async fn handle_exhaustion(Json(req): Json<ExhaustionRequest>) -> impl IntoResponse {
    let mut model = ExhaustionModel::default();
    if let Some(profile) = req.profile {
        model = match model.with_profile(&req.app, profile) {
            Ok(m) => m,
            Err(e) => return analysis_error(e),
        };
    }

    match model.project(
        req.payload_kb,
        req.frequency_per_second,
        req.duration_s,
        &req.app,
    ) {
        Ok(projection) => Json(projection).into_response(),
        Err(e) => analysis_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::sampler::ProbeRegistry;
    use chrono::Utc;

    fn state() -> AppState {
        let config = ServerConfig::default();
        let registry = Arc::new(
            ProbeRegistry::new(config.call_ceiling, config.session_retention)
                .with_max_ticks(config.max_ticks),
        );
        AppState { config, registry }
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn start_request(target: &str, cadence_ms: u64, duration_ms: u64) -> StartProbeRequest {
        StartProbeRequest {
            target: target.to_string(),
            cadence_ms,
            duration_ms,
            channel: None,
            synthetic_state: Some("app_active".to_string()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_lifecycle() {
        let state = state();

        let resp = handle_start_probe(State(state.clone()), Json(start_request("phone", 100, 500)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let id = body_json(resp).await["id"].as_u64().unwrap();

        let session = state.registry.await_completion(id).await.unwrap();
        assert_eq!(session.samples.len(), 5);

        let resp = handle_probe_classification(State(state.clone()), Path(id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["session_state"], "completed");
        assert_eq!(body["sent"], 5);

        let resp = handle_probe_presence(
            State(state.clone()),
            Path(id),
            Query(PresenceQuery { device_id: None }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["device_id"], "phone");

        let resp = handle_delete_probe(State(state.clone()), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        let resp = handle_get_probe(State(state), Path(id)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_probe_rejections() {
        let state = state();

        let resp = handle_start_probe(State(state.clone()), Json(start_request("phone", 0, 500)))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let mut req = start_request("phone", 100, 500);
        req.channel = Some("carrier-pigeon".to_string());
        let resp = handle_start_probe(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let mut req = start_request("phone", 100, 500);
        req.synthetic_state = Some("hibernating".to_string());
        let resp = handle_start_probe(State(state.clone()), Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert!(state.registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let state = state();
        let resp = handle_cancel_probe(State(state.clone()), Path(42)).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = handle_probe_classification(State(state), Path(42))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_classify_only_lost_is_unprocessable() {
        let now = Utc::now();
        let req = ClassifyRequest {
            samples: vec![Sample::lost(0, now), Sample::lost(1, now)],
        };
        let resp = handle_classify(Json(req)).await.into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_presence_uses_configured_threshold() {
        let mut state = state();
        state.config.offline_gap_threshold = 2;

        let now = Utc::now();
        let readings = [true, false, false, false]
            .iter()
            .enumerate()
            .map(|(i, online)| PresenceReading {
                timestamp: now + chrono::Duration::seconds(i as i64),
                device_id: "laptop".to_string(),
                online: *online,
            })
            .collect();

        let resp = handle_presence(
            State(state),
            Json(PresenceRequest {
                readings,
                offline_gap_threshold: None,
            }),
        )
        .await
        .into_response();
        let body = body_json(resp).await;
        assert_eq!(body["laptop"]["summary"]["sustained_offline_period"], true);
    }

    #[tokio::test]
    async fn test_exhaustion_endpoint() {
        let resp = handle_exhaustion(Json(ExhaustionRequest {
            payload_kb: 1.0,
            frequency_per_second: 1.0,
            duration_s: 3600.0,
            app: "signal".to_string(),
            profile: None,
        }))
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["risk_level"], "MODERATE");
        assert_eq!(body["traffic_bytes_per_second"], 1024.0);

        let resp = handle_exhaustion(Json(ExhaustionRequest {
            payload_kb: 1.0,
            frequency_per_second: 1.0,
            duration_s: 3600.0,
            app: "fax".to_string(),
            profile: None,
        }))
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_exhaustion_with_custom_profile() {
        let resp = handle_exhaustion(Json(ExhaustionRequest {
            payload_kb: 2.0,
            frequency_per_second: 1.0,
            duration_s: 3600.0,
            app: "Threema".to_string(),
            profile: Some(AppProfile {
                amplification_factor: 512.0,
                battery_drain_per_hour: 20.0,
            }),
        }))
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["traffic_bytes_per_second"], 1024.0);
        assert_eq!(body["battery_impact"], "severe");
        assert_eq!(body["projected_hours_to_drain"], 5.0);

        // Overriding a built-in profile
        let resp = handle_exhaustion(Json(ExhaustionRequest {
            payload_kb: 1.0,
            frequency_per_second: 1.0,
            duration_s: 60.0,
            app: "signal".to_string(),
            profile: Some(AppProfile {
                amplification_factor: 2048.0,
                battery_drain_per_hour: 1.0,
            }),
        }))
        .await
        .into_response();
        assert_eq!(body_json(resp).await["traffic_bytes_per_second"], 2048.0);

        let resp = handle_exhaustion(Json(ExhaustionRequest {
            payload_kb: 1.0,
            frequency_per_second: 1.0,
            duration_s: 60.0,
            app: "broken".to_string(),
            profile: Some(AppProfile {
                amplification_factor: -1.0,
                battery_drain_per_hour: 1.0,
            }),
        }))
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_report_endpoint() {
        let state = state();

        let resp = handle_start_probe(State(state.clone()), Json(start_request("phone", 100, 500)))
            .await
            .into_response();
        let id = body_json(resp).await["id"].as_u64().unwrap();
        state.registry.await_completion(id).await.unwrap();

        let resp = handle_probe_report(State(state.clone()), Path(id))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["session_id"], id);
        assert_eq!(body["target"], "phone");
        assert_eq!(body["probe_count"], 5);
        assert_eq!(body["classification"]["state"], "app_active");
        assert_eq!(body["classification"]["state_risk"], "HIGH");
        assert_eq!(body["threats"]["device_state_inference"], "HIGH");
        assert!(body["headline"].as_str().unwrap().starts_with("App Active"));

        let resp = handle_probe_report(State(state), Path(id + 1))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_start_rejects_window_past_tick_limit() {
        let state = state();

        let resp = handle_start_probe(
            State(state.clone()),
            Json(start_request("phone", 1, u64::MAX)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let limit = state.config.max_ticks;
        let resp = handle_start_probe(
            State(state.clone()),
            Json(start_request("phone", 1000, (limit + 1) * 1000)),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        assert!(state.registry.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_fingerprint_endpoint() {
        let now = Utc::now();
        let mut activities = BTreeMap::new();
        activities.insert(
            "idle".to_string(),
            vec![Sample::sent(0, now, 240.0), Sample::sent(1, now, 260.0)],
        );
        let resp = handle_fingerprint(Json(FingerprintRequest {
            activities,
            declared_os: Some("android".to_string()),
        }))
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["receipt_pattern"], "separate");
        assert_eq!(body["activities"]["idle"]["state"], "screen_on_idle");

        let resp = handle_fingerprint(Json(FingerprintRequest {
            activities: BTreeMap::new(),
            declared_os: None,
        }))
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
