//! Inference over recorded samples.
//!
//! Everything here is a pure function of its inputs: no I/O, no shared state.

mod classifier;
mod exhaustion;
mod fingerprint;
mod report;
mod risk;
mod stats;
mod timeline;

pub use classifier::*;
pub use exhaustion::*;
pub use fingerprint::*;
pub use report::*;
pub use risk::*;
pub use stats::*;
pub use timeline::*;

use thiserror::Error;

/// Analysis error types.
#[derive(Error, Debug, PartialEq)]
pub enum AnalysisError {
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
}
