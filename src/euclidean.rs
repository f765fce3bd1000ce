use ndarray::LinalgScalar;
use num_traits::Float;
use rand::Rng;
use rand_distr::{Distribution, StandardNormal};

/// Flat parameter vector the leapfrog integrator and HMC kernel update in place.
///
/// Positions, momenta and gradients all share this type, so a kernel allocates its scratch
/// buffers once and reuses them for every transition.
pub trait EuclideanVector: Clone {
    type Scalar: Float + LinalgScalar + Copy;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A vector of zeros with the same length.
    fn zeros_like(&self) -> Self;

    /// Overwrites `self` with `other`; both have the same length.
    fn assign(&mut self, other: &Self);

    /// `self += alpha * other`.
    fn add_scaled_assign(&mut self, other: &Self, alpha: Self::Scalar);

    /// `self *= alpha`.
    fn scale_assign(&mut self, alpha: Self::Scalar);

    fn dot(&self, other: &Self) -> Self::Scalar;

    /// True when no coordinate is NaN or infinite.
    fn all_finite(&self) -> bool;

    /// Overwrites every coordinate with an independent N(0, 1) draw from `rng`.
    fn fill_standard_normal<R: Rng>(&mut self, rng: &mut R)
    where
        StandardNormal: Distribution<Self::Scalar>;
}

impl<T> EuclideanVector for ndarray::Array1<T>
where
    T: Float + LinalgScalar + Copy,
{
    type Scalar = T;

    fn len(&self) -> usize {
        self.len()
    }

    fn zeros_like(&self) -> Self {
        Self::zeros(self.raw_dim())
    }

    fn assign(&mut self, other: &Self) {
        self.clone_from(other);
    }

    fn add_scaled_assign(&mut self, other: &Self, alpha: Self::Scalar) {
        self.scaled_add(alpha, other);
    }

    fn scale_assign(&mut self, alpha: Self::Scalar) {
        self.iter_mut().for_each(|x| *x = *x * alpha);
    }

    fn dot(&self, other: &Self) -> Self::Scalar {
        self.dot(other)
    }

    fn all_finite(&self) -> bool {
        self.iter().all(|x| x.is_finite())
    }

    fn fill_standard_normal<R: Rng>(&mut self, rng: &mut R)
    where
        StandardNormal: Distribution<Self::Scalar>,
    {
        self.iter_mut().for_each(|x| *x = rng.sample(StandardNormal));
    }
}

/// A differentiable log-density over vectors of type `V`.
///
/// Implementations must be pure: the same position always yields the same log-density and
/// gradient, and nothing observable changes between calls. This is what lets independent chains
/// share one target by reference.
pub trait HamiltonianTarget<V: EuclideanVector> {
    /// Returns the unnormalized log-density at `position` and writes its gradient into `grad`.
    fn logp_and_grad(&self, position: &V, grad: &mut V) -> V::Scalar;

    /// Number of coordinates of the latent vector.
    fn dim(&self) -> usize;

    /// Names of the coordinates, used to label posterior draws.
    fn parameter_names(&self) -> Vec<String> {
        (0..self.dim()).map(|i| format!("theta_{i}")).collect()
    }
}
