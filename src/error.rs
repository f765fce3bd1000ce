//! Error types shared by the whole crate.

use crate::posterior::PosteriorStore;
use thiserror::Error;

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, SkillError>;

/// Errors returned by the skill model, the sampler and the I/O helpers.
#[derive(Debug, Error)]
pub enum SkillError {
    /// Invalid dimensionality, dangling player index, non-positive step size or sample count.
    /// Raised before any sampling starts.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Non-finite energy, or an energy error above the divergence threshold, at `iteration`.
    /// Built by [`Transition::check`](crate::hmc::Transition::check). The HMC kernel logs it,
    /// rejects the proposal and counts a divergence, so it never escapes a running chain.
    #[error("numeric divergence at iteration {iteration}")]
    NumericDivergence { iteration: usize },

    /// The chain was stopped before reaching `Done`. The partial store holds every draw
    /// retained so far and reports itself as incomplete.
    #[error("run stopped after {completed} of {requested} iterations")]
    RunIncomplete {
        completed: usize,
        requested: usize,
        store: Box<PosteriorStore>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "csv")]
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl SkillError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        SkillError::Configuration(msg.into())
    }
}
