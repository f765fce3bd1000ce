//! A single-chain Hamiltonian (Hybrid) Monte Carlo transition kernel.
//!
//! Each transition resamples momentum from N(0, I), integrates Hamiltonian dynamics with the
//! leapfrog integrator, and applies the Metropolis accept/reject step on the change in total
//! energy. Proposals whose energy is not finite are rejected and counted as divergences rather
//! than propagated as errors.

use num_traits::{Float, ToPrimitive};
use rand::Rng;
use rand_distr::{Distribution, Standard, StandardNormal};
use tracing::debug;

use crate::error::{Result, SkillError};
use crate::euclidean::{EuclideanVector, HamiltonianTarget};
use crate::leapfrog::{hamiltonian, leapfrog};

/// Energy increase beyond which a finite proposal is still flagged as divergent.
pub const MAX_ENERGY_ERROR: f64 = 1000.0;

/// Probability of accepting a move from energy `h_start` to energy `h_end`.
///
/// Always in `[0, 1]`: it is 1 whenever the energy does not increase and 0 whenever the end
/// energy is not finite.
pub fn acceptance_probability<S: Float>(h_start: S, h_end: S) -> S {
    if !h_end.is_finite() || !h_start.is_finite() {
        return S::zero();
    }
    let delta = h_start - h_end;
    if delta >= S::zero() {
        S::one()
    } else {
        delta.exp()
    }
}

/// Everything a chain carries between iterations.
#[derive(Debug, Clone)]
pub struct ChainState<V: EuclideanVector> {
    pub position: V,
    /// Log-density at `position`.
    pub logp: V::Scalar,
    /// Gradient of the log-density at `position`.
    pub grad: V,
    pub step_size: V::Scalar,
    pub n_leapfrog: usize,
    pub n_accepted: u64,
    pub n_rejected: u64,
    pub n_divergent: u64,
}

impl<V: EuclideanVector> ChainState<V> {
    /// Evaluates the target once at `position` and caches the result.
    pub fn new<T>(target: &T, position: V, step_size: V::Scalar, n_leapfrog: usize) -> Self
    where
        T: HamiltonianTarget<V> + ?Sized,
    {
        let mut grad = position.zeros_like();
        let logp = target.logp_and_grad(&position, &mut grad);
        Self {
            position,
            logp,
            grad,
            step_size,
            n_leapfrog,
            n_accepted: 0,
            n_rejected: 0,
            n_divergent: 0,
        }
    }

    pub fn n_draws(&self) -> u64 {
        self.n_accepted + self.n_rejected
    }

    /// Fraction of proposals accepted so far, 0 before the first draw.
    pub fn acceptance_rate(&self) -> f64 {
        match self.n_draws() {
            0 => 0.0,
            n => self.n_accepted as f64 / n as f64,
        }
    }
}

/// Outcome of one HMC transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub accepted: bool,
    pub divergent: bool,
    /// `min(1, exp(H_start - H_end))`, 0 for divergent proposals.
    pub accept_prob: f64,
    /// `H_end - H_start`, possibly non-finite.
    pub energy_error: f64,
}

impl Transition {
    /// `Err(NumericDivergence)` for a divergent transition taken at `iteration`.
    pub fn check(&self, iteration: usize) -> Result<()> {
        if self.divergent {
            Err(SkillError::NumericDivergence { iteration })
        } else {
            Ok(())
        }
    }
}

/// HMC kernel with its scratch buffers, so no allocation happens per iteration.
#[derive(Debug, Clone)]
pub struct HmcKernel<V: EuclideanVector> {
    momentum: V,
    proposal_pos: V,
    proposal_mom: V,
    proposal_grad: V,
}

impl<V> HmcKernel<V>
where
    V: EuclideanVector,
    StandardNormal: Distribution<V::Scalar>,
    Standard: Distribution<V::Scalar>,
{
    /// Allocates scratch buffers shaped like `template`.
    pub fn new(template: &V) -> Self {
        Self {
            momentum: template.zeros_like(),
            proposal_pos: template.zeros_like(),
            proposal_mom: template.zeros_like(),
            proposal_grad: template.zeros_like(),
        }
    }

    /// Performs one HMC update of `state`.
    ///
    /// The update consists of:
    /// 1) Sampling momentum from a standard normal distribution.
    /// 2) Running the leapfrog integrator to propose a new position.
    /// 3) Accepting the proposal with probability `min(1, exp(H_start - H_end))`.
    ///
    /// On rejection the chain keeps its previous position, log-density and gradient.
    pub fn transition<T, R>(&mut self, target: &T, state: &mut ChainState<V>, rng: &mut R) -> Transition
    where
        T: HamiltonianTarget<V> + ?Sized,
        R: Rng,
    {
        let iteration = state.n_draws() as usize;
        self.momentum.fill_standard_normal(rng);
        let h_start = hamiltonian(state.logp, &self.momentum);

        self.proposal_pos.assign(&state.position);
        self.proposal_mom.assign(&self.momentum);
        self.proposal_grad.assign(&state.grad);
        let logp_end = leapfrog(
            target,
            &mut self.proposal_pos,
            &mut self.proposal_mom,
            &mut self.proposal_grad,
            state.step_size,
            state.n_leapfrog,
        );
        let h_end = hamiltonian(logp_end, &self.proposal_mom);

        let energy_error = (h_end - h_start).to_f64().unwrap_or(f64::NAN);
        let divergent = !energy_error.is_finite() || energy_error > MAX_ENERGY_ERROR;
        let accept_prob = if divergent {
            0.0
        } else {
            acceptance_probability(h_start, h_end)
                .to_f64()
                .unwrap_or(0.0)
        };

        // The uniform draw is taken on every iteration so the random stream does not depend on
        // whether the proposal diverged.
        let u: V::Scalar = rng.gen();
        let accepted = !divergent && u.to_f64().unwrap_or(1.0) < accept_prob;

        if accepted {
            std::mem::swap(&mut state.position, &mut self.proposal_pos);
            std::mem::swap(&mut state.grad, &mut self.proposal_grad);
            state.logp = logp_end;
            state.n_accepted += 1;
        } else {
            state.n_rejected += 1;
        }

        let transition = Transition {
            accepted,
            divergent,
            accept_prob,
            energy_error,
        };
        // Divergences are absorbed into the counter; the chain keeps running.
        if let Err(err) = transition.check(iteration) {
            state.n_divergent += 1;
            debug!(error = %err, energy_error, step_size = ?state.step_size.to_f64(), "divergent transition");
        }
        transition
    }
}
