//! Synthetic channel.
//!
//! Generates RTTs from a mixture of Gaussians, one component per device
//! state. Each measurement first picks a state (weighted), then draws from
//! that state's normal distribution. Pinning a state leaves a single component.

use std::sync::Mutex;

use rand::distributions::WeightedIndex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use super::{Channel, ChannelError};
use crate::analysis::DeviceState;

/// Smallest RTT the generator will emit, in milliseconds.
const MIN_RTT_MS: f64 = 1.0;

/// Distribution of RTTs for one device state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatePattern {
    pub mean_ms: f64,
    pub std_dev_ms: f64,
    /// Relative likelihood of this state in the mixture.
    pub weight: f64,
}

impl StatePattern {
    pub fn for_state(state: DeviceState) -> Self {
        let (mean_ms, std_dev_ms, weight) = match state {
            DeviceState::WebActive => (30.0, 8.0, 0.05),
            DeviceState::AppActive => (100.0, 20.0, 0.15),
            DeviceState::ScreenOnIdle => (250.0, 40.0, 0.20),
            DeviceState::AppSuspended => (475.0, 50.0, 0.15),
            DeviceState::ScreenOff => (1200.0, 250.0, 0.25),
            DeviceState::DeepSleep => (2600.0, 400.0, 0.20),
        };
        Self {
            mean_ms,
            std_dev_ms,
            weight,
        }
    }
}

/// Stand-in for a live channel, for demos and tests.
pub struct SyntheticChannel {
    /// Candidate states and their RTT distributions
    components: Vec<(DeviceState, Normal<f64>)>,
    /// Mixture weights over `components`
    selector: WeightedIndex<f64>,
    loss_probability: f64,
    rng: Mutex<StdRng>,
}

impl SyntheticChannel {
    /// Draw each measurement from a randomly chosen state.
    pub fn mixture() -> Result<Self, ChannelError> {
        Self::over(&DeviceState::ALL)
    }

    /// Draw every measurement from one state's distribution.
    pub fn fixed(state: DeviceState) -> Result<Self, ChannelError> {
        Self::over(&[state])
    }

    fn over(states: &[DeviceState]) -> Result<Self, ChannelError> {
        let mut components = Vec::with_capacity(states.len());
        for state in states {
            let pattern = StatePattern::for_state(*state);
            let normal = Normal::new(pattern.mean_ms, pattern.std_dev_ms)
                .map_err(|e| ChannelError::Config(format!("bad pattern for {:?}: {}", state, e)))?;
            components.push((*state, normal));
        }
        let selector = WeightedIndex::new(states.iter().map(|s| StatePattern::for_state(*s).weight))
            .map_err(|e| ChannelError::Config(format!("bad mixture weights: {}", e)))?;

        Ok(Self {
            components,
            selector,
            loss_probability: 0.0,
            rng: Mutex::new(StdRng::from_entropy()),
        })
    }

    /// Drop each measurement with the given probability (clamped to [0, 1]).
    pub fn with_loss(mut self, probability: f64) -> Self {
        self.loss_probability = if probability.is_finite() {
            probability.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Use a deterministic generator.
    pub fn with_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    fn draw(&self) -> Option<f64> {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if self.loss_probability > 0.0 && rng.gen::<f64>() < self.loss_probability {
            return None;
        }

        let (_, normal) = &self.components[self.selector.sample(&mut *rng)];
        Some(normal.sample(&mut *rng).max(MIN_RTT_MS))
    }

    /// State the next measurement would be drawn from. Test hook for the mixture.
    #[cfg(test)]
    fn pick_state(&self, rng: &mut StdRng) -> DeviceState {
        self.components[self.selector.sample(rng)].0
    }
}

impl Channel for SyntheticChannel {
    async fn measure_round_trip(&self, _target: &str) -> Result<f64, ChannelError> {
        self.draw()
            .ok_or_else(|| ChannelError::Network("synthetic probe dropped".to_string()))
    }
}
