pub mod adapt;
pub mod data;
pub mod error;
pub mod euclidean;
pub mod hmc;
#[cfg(feature = "csv")]
pub mod io;
pub mod leapfrog;
pub mod mcmc;
pub mod model;
pub mod posterior;
pub mod stats;

pub use error::{Result, SkillError};
pub use mcmc::{run_chains, Mcmc, McmcConfig, Phase};
pub use model::{SkillModel, SkillModelConfig};
pub use posterior::PosteriorStore;
