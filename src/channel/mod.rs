//! Round-trip channels.
//!
//! A channel supplies a single primitive: measure the round-trip latency to a
//! target. The sampling engine drives whichever implementation it is handed
//! and never learns whether the numbers came from the wire or a generator.

mod http;
mod ping;
mod synthetic;

pub use http::*;
pub use ping::*;
pub use synthetic::*;

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::analysis::DeviceState;

/// Channel error types.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("round trip timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Source of round-trip latency measurements.
pub trait Channel: Send + Sync + 'static {
    /// Measure one round trip to `target`, returning latency in milliseconds.
    fn measure_round_trip(
        &self,
        target: &str,
    ) -> impl Future<Output = Result<f64, ChannelError>> + Send;
}

/// The channels selectable by name from configuration or API requests.
pub enum ProbeChannel {
    Synthetic(SyntheticChannel),
    Ping(PingChannel),
    Http(HttpChannel),
}

impl ProbeChannel {
    /// Build a channel by name.
    ///
    /// `pinned_state` only applies to the synthetic channel; when set, every
    /// measurement is drawn from that state's distribution instead of the
    /// mixture.
    pub fn build(
        kind: &str,
        call_ceiling: Duration,
        synthetic_loss: f64,
        pinned_state: Option<DeviceState>,
    ) -> Result<Self, ChannelError> {
        match kind {
            "synthetic" => {
                let channel = match pinned_state {
                    Some(state) => SyntheticChannel::fixed(state)?,
                    None => SyntheticChannel::mixture()?,
                };
                Ok(Self::Synthetic(channel.with_loss(synthetic_loss)))
            }
            "ping" => Ok(Self::Ping(PingChannel::new(call_ceiling))),
            "http" => Ok(Self::Http(HttpChannel::new(call_ceiling)?)),
            other => Err(ChannelError::Config(format!("unknown channel: {}", other))),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Synthetic(_) => "synthetic",
            Self::Ping(_) => "ping",
            Self::Http(_) => "http",
        }
    }
}

impl Channel for ProbeChannel {
    async fn measure_round_trip(&self, target: &str) -> Result<f64, ChannelError> {
        match self {
            Self::Synthetic(c) => c.measure_round_trip(target).await,
            Self::Ping(c) => c.measure_round_trip(target).await,
            Self::Http(c) => c.measure_round_trip(target).await,
        }
    }
}
