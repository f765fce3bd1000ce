//! Leapfrog integration of Hamiltonian dynamics.
//!
//! The potential energy is `-log p(q)` and the kinetic energy is `½ pᵀp` (identity mass matrix),
//! so the momentum update uses the gradient of the log-density directly.

use num_traits::{Float, NumCast, Zero};

use crate::euclidean::{EuclideanVector, HamiltonianTarget};

/// `½ pᵀp`.
pub fn kinetic_energy<V: EuclideanVector>(momentum: &V) -> V::Scalar {
    let half = <V::Scalar as NumCast>::from(0.5).unwrap_or_else(V::Scalar::zero);
    half * momentum.dot(momentum)
}

/// Total energy `-log p(q) + ½ pᵀp`.
pub fn hamiltonian<V: EuclideanVector>(logp: V::Scalar, momentum: &V) -> V::Scalar {
    -logp + kinetic_energy(momentum)
}

/// Runs `n_steps` leapfrog steps of size `step_size`, updating `position` and `momentum` in
/// place.
///
/// `grad` must hold the gradient of the log-density at the incoming `position`; on return it
/// holds the gradient at the final position, and the log-density there is returned. The
/// sequence is: half momentum step, then `n_steps - 1` rounds of (full position, full
/// momentum), then a full position step and a closing half momentum step.
///
/// `n_steps` must be at least 1. Integration stops early once the log-density or gradient stops
/// being finite, returning negative infinity so the caller can reject the trajectory.
pub fn leapfrog<V, T>(
    target: &T,
    position: &mut V,
    momentum: &mut V,
    grad: &mut V,
    step_size: V::Scalar,
    n_steps: usize,
) -> V::Scalar
where
    V: EuclideanVector,
    T: HamiltonianTarget<V> + ?Sized,
{
    let half_step = step_size * <V::Scalar as NumCast>::from(0.5).unwrap_or_else(V::Scalar::zero);

    momentum.add_scaled_assign(grad, half_step);
    let mut logp = V::Scalar::nan();
    for step in 0..n_steps {
        position.add_scaled_assign(momentum, step_size);
        logp = target.logp_and_grad(position, grad);
        if !logp.is_finite() || !grad.all_finite() {
            return V::Scalar::neg_infinity();
        }
        let scale = if step + 1 == n_steps {
            half_step
        } else {
            step_size
        };
        momentum.add_scaled_assign(grad, scale);
    }
    logp
}
