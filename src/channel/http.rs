//! HTTP channel: times a full GET round trip.

use std::time::{Duration, Instant};

use super::{Channel, ChannelError};

/// Measures latency as the time to fetch and drain a URL.
pub struct HttpChannel {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpChannel {
    pub fn new(timeout: Duration) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChannelError::Config(e.to_string()))?;
        Ok(Self { client, timeout })
    }
}

fn target_url(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

impl Channel for HttpChannel {
    async fn measure_round_trip(&self, target: &str) -> Result<f64, ChannelError> {
        let url = target_url(target);
        let timeout = self.timeout;

        let start = Instant::now();
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                ChannelError::Timeout(timeout)
            } else {
                ChannelError::Network(e.to_string())
            }
        })?;

        // Drain the body so the measurement covers the whole transfer
        response
            .bytes()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }
}
