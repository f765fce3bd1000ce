/*!
The MCMC driver: warmup with step-size adaptation, then sampling with frozen tuning, collecting
every draw into a [`PosteriorStore`].

A chain moves through `Uninitialized → Warming → Sampling → Done` and never skips a phase; with
no warmup iterations the `Warming` phase is entered and left immediately. All randomness comes
from one `SmallRng` seeded from [`McmcConfig::seed`], so a run is reproducible bit for bit.

# Examples

```rust
use calcetto_skill::data::MatchDatasetBuilder;
use calcetto_skill::mcmc::{Mcmc, McmcConfig};
use calcetto_skill::model::{SkillModel, SkillModelConfig};

let mut builder = MatchDatasetBuilder::new();
builder.add_match(&["anna"], &["bruno"], 3, 1, None);
builder.add_match(&["bruno"], &["carla"], 2, 2, None);
let dataset = builder.build().unwrap();
let model = SkillModel::new(&dataset, SkillModelConfig::default()).unwrap();

let config = McmcConfig::default().set_samples(200).set_seed(42);
let store = Mcmc::new(&model, config).unwrap().run().unwrap();
assert_eq!(store.len(), 200);
```
*/

use std::sync::atomic::{AtomicBool, Ordering};

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array1;
use rand::rngs::SmallRng;
use rand::{thread_rng, Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{info, warn};

use crate::adapt::DualAveraging;
use crate::error::{Result, SkillError};
use crate::euclidean::HamiltonianTarget;
use crate::hmc::{ChainState, HmcKernel, Transition};
use crate::posterior::{Diagnostics, PosteriorStore};

/// Sampler settings. Every field is a plain scalar knob.
#[derive(Debug, Clone, PartialEq)]
pub struct McmcConfig {
    /// Initial leapfrog step size; kept as is when adaptation is off.
    pub step_size: f64,
    /// Leapfrog steps per HMC transition.
    pub n_leapfrog: usize,
    /// Number of retained draws.
    pub n_samples: usize,
    /// Warmup length as a fraction of `n_samples`, rounded down.
    pub warmup_fraction: f64,
    pub adapt_step_size: bool,
    /// Acceptance-rate band the warmup aims for; adaptation targets its midpoint.
    pub accept_band: (f64, f64),
    pub seed: u64,
}

impl Default for McmcConfig {
    fn default() -> Self {
        Self {
            step_size: 0.0855,
            n_leapfrog: 4,
            n_samples: 6000,
            warmup_fraction: 0.1,
            adapt_step_size: true,
            accept_band: (0.6, 0.9),
            seed: thread_rng().gen::<u64>(),
        }
    }
}

impl McmcConfig {
    /// Sets the random seed, making the run reproducible.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn set_step_size(mut self, step_size: f64) -> Self {
        self.step_size = step_size;
        self
    }

    pub fn set_leapfrog_steps(mut self, n_leapfrog: usize) -> Self {
        self.n_leapfrog = n_leapfrog;
        self
    }

    pub fn set_samples(mut self, n_samples: usize) -> Self {
        self.n_samples = n_samples;
        self
    }

    pub fn set_warmup_fraction(mut self, warmup_fraction: f64) -> Self {
        self.warmup_fraction = warmup_fraction;
        self
    }

    pub fn set_adapt_step_size(mut self, adapt: bool) -> Self {
        self.adapt_step_size = adapt;
        self
    }

    pub fn set_accept_band(mut self, low: f64, high: f64) -> Self {
        self.accept_band = (low, high);
        self
    }

    /// Number of warmup iterations, `floor(n_samples * warmup_fraction)`.
    pub fn n_warmup(&self) -> usize {
        // Products like 100 * 0.29 land just below the integer in floating point.
        (self.n_samples as f64 * self.warmup_fraction + 1e-9).floor() as usize
    }

    /// Acceptance probability the step-size adaptation aims for.
    pub fn target_accept(&self) -> f64 {
        0.5 * (self.accept_band.0 + self.accept_band.1)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.step_size.is_finite() && self.step_size > 0.0) {
            return Err(SkillError::config(format!(
                "step size must be positive and finite, got {}",
                self.step_size
            )));
        }
        if self.n_leapfrog == 0 {
            return Err(SkillError::config("leapfrog step count must be positive"));
        }
        if self.n_samples == 0 {
            return Err(SkillError::config("sample count must be positive"));
        }
        if !(0.0..1.0).contains(&self.warmup_fraction) {
            return Err(SkillError::config(format!(
                "warmup fraction must lie in [0, 1), got {}",
                self.warmup_fraction
            )));
        }
        let (low, high) = self.accept_band;
        if !(0.0 < low && low < high && high < 1.0) {
            return Err(SkillError::config(format!(
                "acceptance band must satisfy 0 < low < high < 1, got ({low}, {high})"
            )));
        }
        Ok(())
    }
}

/// Lifecycle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Warming,
    Sampling,
    Done,
}

/// A single HMC chain over a shared, read-only target.
pub struct Mcmc<'t, T: ?Sized> {
    target: &'t T,
    config: McmcConfig,
    phase: Phase,
    history: Vec<Phase>,
    state: ChainState<Array1<f64>>,
    kernel: HmcKernel<Array1<f64>>,
    adaptation: Option<DualAveraging>,
    rng: SmallRng,
    n_warmup: usize,
    warmup_done: usize,
    warmup_accepted: u64,
    warmup_divergent: u64,
    store: PosteriorStore,
}

impl<'t, T> Mcmc<'t, T>
where
    T: HamiltonianTarget<Array1<f64>> + ?Sized,
{
    /// Validates the configuration and evaluates the target at the initial position (all zeros).
    ///
    /// Fails with [`SkillError::Configuration`] on invalid settings or when the target is not
    /// finite at the starting point.
    pub fn new(target: &'t T, config: McmcConfig) -> Result<Self> {
        Self::with_initial_position(target, config, Array1::zeros(target.dim()))
    }

    pub fn with_initial_position(
        target: &'t T,
        config: McmcConfig,
        position: Array1<f64>,
    ) -> Result<Self> {
        config.validate()?;
        let names = target.parameter_names();
        if position.len() != target.dim() || names.len() != target.dim() {
            return Err(SkillError::config(format!(
                "initial position has {} coordinates and {} names, target has {}",
                position.len(),
                names.len(),
                target.dim()
            )));
        }

        let state = ChainState::new(target, position, config.step_size, config.n_leapfrog);
        if !state.logp.is_finite() || state.grad.iter().any(|g| !g.is_finite()) {
            return Err(SkillError::config(
                "log-density or gradient is not finite at the initial position",
            ));
        }

        let n_warmup = config.n_warmup();
        let adaptation = config
            .adapt_step_size
            .then(|| DualAveraging::new(config.step_size, config.target_accept()));
        let diagnostics = Diagnostics {
            n_warmup,
            n_samples: config.n_samples,
            n_chains: 1,
            warmup_acceptance_rate: 0.0,
            acceptance_rate: 0.0,
            warmup_divergences: 0,
            divergences: 0,
            step_size: config.step_size,
            n_leapfrog: config.n_leapfrog,
        };

        Ok(Self {
            target,
            kernel: HmcKernel::new(&state.position),
            state,
            adaptation,
            rng: SmallRng::seed_from_u64(config.seed),
            n_warmup,
            warmup_done: 0,
            warmup_accepted: 0,
            warmup_divergent: 0,
            store: PosteriorStore::with_capacity(names, config.n_samples, diagnostics),
            phase: Phase::Uninitialized,
            history: vec![Phase::Uninitialized],
            config,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Every phase the chain has been in, in order.
    pub fn phase_history(&self) -> &[Phase] {
        &self.history
    }

    pub fn config(&self) -> &McmcConfig {
        &self.config
    }

    pub fn state(&self) -> &ChainState<Array1<f64>> {
        &self.state
    }

    /// Draws retained so far.
    pub fn store(&self) -> &PosteriorStore {
        &self.store
    }

    /// Total iterations (warmup plus sampling) of a complete run.
    pub fn total_iterations(&self) -> usize {
        self.n_warmup + self.config.n_samples
    }

    /// Iterations performed so far.
    pub fn completed_iterations(&self) -> usize {
        self.warmup_done + self.store.len()
    }

    fn enter(&mut self, phase: Phase) {
        self.phase = phase;
        self.history.push(phase);
    }

    fn end_warmup_if_due(&mut self) {
        if self.phase != Phase::Warming || self.warmup_done < self.n_warmup {
            return;
        }
        if let Some(adaptation) = &self.adaptation {
            let step_size = adaptation.final_step_size();
            if step_size.is_finite() && step_size > 0.0 {
                self.state.step_size = step_size;
            }
        }
        self.warmup_accepted = self.state.n_accepted;
        self.warmup_divergent = self.state.n_divergent;
        if self.n_warmup > 0 {
            let rate = self.warmup_accepted as f64 / self.n_warmup as f64;
            info!(
                step_size = self.state.step_size,
                acceptance = rate,
                divergences = self.warmup_divergent,
                "warmup finished"
            );
        }
        self.enter(Phase::Sampling);
    }

    /// Runs one iteration and returns the phase the chain is in afterwards.
    ///
    /// Calling `step` on a finished chain does nothing.
    pub fn step(&mut self) -> Phase {
        if self.phase == Phase::Uninitialized {
            self.enter(Phase::Warming);
            self.end_warmup_if_due();
        }

        match self.phase {
            Phase::Warming => {
                let t = self.transition();
                if let Some(adaptation) = self.adaptation.as_mut() {
                    self.state.step_size = adaptation.update(t.accept_prob);
                }
                self.warmup_done += 1;
                self.end_warmup_if_due();
            }
            Phase::Sampling => {
                self.transition();
                self.store.push(self.state.position.view());
                if self.store.len() == self.config.n_samples {
                    self.seal(true);
                    self.enter(Phase::Done);
                }
            }
            Phase::Uninitialized | Phase::Done => {}
        }
        self.phase
    }

    fn transition(&mut self) -> Transition {
        self.kernel
            .transition(self.target, &mut self.state, &mut self.rng)
    }

    fn diagnostics(&self) -> Diagnostics {
        let sampled = self.store.len() as u64;
        let sampled_accepted = self.state.n_accepted - self.warmup_accepted;
        let warmup_rate = if self.warmup_done > 0 {
            self.warmup_accepted as f64 / self.warmup_done as f64
        } else {
            0.0
        };
        Diagnostics {
            n_warmup: self.n_warmup,
            n_samples: self.config.n_samples,
            n_chains: 1,
            warmup_acceptance_rate: warmup_rate,
            acceptance_rate: if sampled > 0 {
                sampled_accepted as f64 / sampled as f64
            } else {
                0.0
            },
            warmup_divergences: self.warmup_divergent,
            divergences: self.state.n_divergent - self.warmup_divergent,
            step_size: self.state.step_size,
            n_leapfrog: self.state.n_leapfrog,
        }
    }

    fn seal(&mut self, complete: bool) {
        // A chain stopped during warmup has not split its counters yet.
        if self.phase != Phase::Sampling && self.phase != Phase::Done {
            self.warmup_accepted = self.state.n_accepted;
            self.warmup_divergent = self.state.n_divergent;
        }
        let diagnostics = self.diagnostics();
        if complete && diagnostics.acceptance_rate < self.config.accept_band.0 {
            warn!(
                acceptance = diagnostics.acceptance_rate,
                target = self.config.accept_band.0,
                "low acceptance rate during sampling"
            );
        }
        self.store.finish(diagnostics, complete);
    }

    /// Hands out the store, or [`SkillError::RunIncomplete`] carrying the partial store when
    /// the chain has not reached `Done`.
    pub fn into_store(mut self) -> Result<PosteriorStore> {
        if self.phase == Phase::Done {
            return Ok(self.store);
        }
        self.seal(false);
        Err(SkillError::RunIncomplete {
            completed: self.completed_iterations(),
            requested: self.total_iterations(),
            store: Box::new(self.store),
        })
    }

    /// Runs warmup and sampling to completion.
    pub fn run(mut self) -> Result<PosteriorStore> {
        while self.step() != Phase::Done {}
        info!(
            samples = self.store.len(),
            acceptance = self.store.diagnostics().acceptance_rate,
            divergences = self.store.diagnostics().total_divergences(),
            "sampling finished"
        );
        self.into_store()
    }

    /// Runs to completion unless `stop` is raised; the flag is checked between iterations.
    pub fn run_until(mut self, stop: &AtomicBool) -> Result<PosteriorStore> {
        while self.phase != Phase::Done {
            if stop.load(Ordering::Relaxed) {
                warn!(
                    completed = self.completed_iterations(),
                    requested = self.total_iterations(),
                    "chain stopped before completion"
                );
                break;
            }
            self.step();
        }
        self.into_store()
    }

    /// Like [`Mcmc::run`], showing a progress bar with the running acceptance rate and
    /// divergence count.
    pub fn run_progress(mut self) -> Result<PosteriorStore> {
        let pb = ProgressBar::new(self.total_iterations() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.white} ETA {eta:3} | {msg}")
                .map_err(|e| SkillError::config(format!("progress bar template: {e}")))?
                .progress_chars("=>-"),
        );
        pb.set_prefix("HMC");

        while self.phase != Phase::Done {
            let phase = self.step();
            pb.inc(1);
            let label = match phase {
                Phase::Warming | Phase::Uninitialized => "warmup",
                Phase::Sampling | Phase::Done => "sample",
            };
            pb.set_message(format!(
                "{label} p(accept)≈{:.2} divergences={}",
                self.state.acceptance_rate(),
                self.state.n_divergent
            ));
        }
        pb.finish_with_message("Done!");
        self.into_store()
    }
}

/// Runs `n_chains` independent chains in parallel, chain `i` seeded with `config.seed + i`.
///
/// The chains only share the read-only target. Stores are returned in chain order once every
/// chain has finished; merge them with [`PosteriorStore::concat`].
pub fn run_chains<T>(target: &T, config: &McmcConfig, n_chains: usize) -> Result<Vec<PosteriorStore>>
where
    T: HamiltonianTarget<Array1<f64>> + Sync + ?Sized,
{
    if n_chains == 0 {
        return Err(SkillError::config("at least one chain is required"));
    }
    config.validate()?;
    (0..n_chains)
        .into_par_iter()
        .map(|i| {
            let chain_config = config.clone().set_seed(config.seed.wrapping_add(i as u64));
            Mcmc::new(target, chain_config)?.run()
        })
        .collect()
}
