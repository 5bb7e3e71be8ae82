//! Configuration module for receiptscope.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the API server (default: 8080)
    pub http_port: u16,
    /// Hard ceiling on a single channel call (default: 5s)
    pub call_ceiling: Duration,
    /// How long finished sessions stay in the registry (default: 10 minutes)
    pub session_retention: Duration,
    /// Channel used when a probe request does not name one (default: "synthetic")
    pub default_channel: String,
    /// Probability that the synthetic channel drops a probe (default: 0.0)
    pub synthetic_loss: f64,
    /// Offline run length, in readings, that counts as a sustained offline period
    pub offline_gap_threshold: usize,
    /// Largest number of ticks one probe session may schedule (default: 86400)
    pub max_ticks: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            call_ceiling: Duration::from_millis(5000),
            session_retention: Duration::from_secs(600),
            default_channel: "synthetic".to_string(),
            synthetic_loss: 0.0,
            offline_gap_threshold: 20,
            max_ticks: 86_400,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `RECEIPTSCOPE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `RECEIPTSCOPE_CALL_CEILING_MS`: per-call ceiling in ms (default: 5000)
    /// - `RECEIPTSCOPE_SESSION_RETENTION_SECS`: finished session lifetime (default: 600)
    /// - `RECEIPTSCOPE_DEFAULT_CHANNEL`: "synthetic", "ping" or "http" (default: "synthetic")
    /// - `RECEIPTSCOPE_SYNTHETIC_LOSS`: loss probability in [0, 1] (default: 0.0)
    /// - `RECEIPTSCOPE_OFFLINE_GAP_THRESHOLD`: readings (default: 20)
    /// - `RECEIPTSCOPE_MAX_TICKS`: ticks per session (default: 86400)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Some(port) = parse_var("RECEIPTSCOPE_HTTP_PORT") {
            cfg.http_port = port;
        }

        if let Some(ms) = parse_var::<u64>("RECEIPTSCOPE_CALL_CEILING_MS") {
            if ms > 0 {
                cfg.call_ceiling = Duration::from_millis(ms);
            }
        }

        if let Some(secs) = parse_var("RECEIPTSCOPE_SESSION_RETENTION_SECS") {
            cfg.session_retention = Duration::from_secs(secs);
        }

        if let Ok(channel) = env::var("RECEIPTSCOPE_DEFAULT_CHANNEL") {
            cfg.default_channel = channel;
        }

        if let Some(loss) = parse_var::<f64>("RECEIPTSCOPE_SYNTHETIC_LOSS") {
            if (0.0..=1.0).contains(&loss) {
                cfg.synthetic_loss = loss;
            }
        }

        if let Some(threshold) = parse_var("RECEIPTSCOPE_OFFLINE_GAP_THRESHOLD") {
            cfg.offline_gap_threshold = threshold;
        }

        if let Some(max_ticks) = parse_var::<u64>("RECEIPTSCOPE_MAX_TICKS") {
            if max_ticks > 0 {
                cfg.max_ticks = max_ticks;
            }
        }

        cfg
    }
}

fn parse_var<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
