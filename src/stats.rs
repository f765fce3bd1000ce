//! Provides functions for computing MCMC convergence statistics.

use ndarray::prelude::*;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

/// Autocorrelation of `x` at every lag `0..x.len()`, computed through a zero-padded FFT.
///
/// Returns `None` when the series has fewer than two points or zero variance.
pub fn autocorrelation(x: ArrayView1<f64>) -> Option<Array1<f64>> {
    let n = x.len();
    if n < 2 {
        return None;
    }
    let mean = x.mean()?;
    let padded = (2 * n).next_power_of_two();
    let mut buffer: Vec<Complex<f64>> = x
        .iter()
        .map(|&v| Complex::new(v - mean, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(padded)
        .collect();

    let mut planner = FftPlanner::<f64>::new();
    planner.plan_fft_forward(padded).process(&mut buffer);
    buffer.iter_mut().for_each(|c| *c = Complex::new(c.norm_sqr(), 0.0));
    planner.plan_fft_inverse(padded).process(&mut buffer);

    let acov0 = buffer[0].re;
    if !(acov0 > 0.0) {
        return None;
    }
    Some(Array1::from_iter(buffer[..n].iter().map(|c| c.re / acov0)))
}

/// Effective sample size of a single chain, using Geyer's initial monotone sequence to truncate
/// the autocorrelation sum.
///
/// Returns `NaN` for chains shorter than 4 draws or with zero variance (e.g. a chain that never
/// accepted a proposal).
pub fn effective_sample_size(draws: ArrayView1<f64>) -> f64 {
    let n = draws.len();
    if n < 4 {
        return f64::NAN;
    }
    let rho = match autocorrelation(draws) {
        Some(rho) => rho,
        None => return f64::NAN,
    };

    let mut sum = 0.0;
    let mut prev_pair = f64::INFINITY;
    let mut t = 0;
    while 2 * t + 1 < n {
        let mut pair = rho[2 * t] + rho[2 * t + 1];
        if pair <= 0.0 {
            break;
        }
        // Initial monotone sequence: pairs may not increase.
        pair = pair.min(prev_pair);
        sum += pair;
        prev_pair = pair;
        t += 1;
    }
    let tau = (2.0 * sum - 1.0).max(1.0 / (n as f64).log10());
    n as f64 / tau
}

/// Split potential scale reduction factor across chains of equal length.
///
/// Every chain is cut in half and the halves are treated as separate chains, so a single
/// non-stationary chain is already detected. Values close to 1 indicate convergence.
pub fn split_rhat(chains: &[ArrayView1<f64>]) -> f64 {
    let halves: Vec<ArrayView1<f64>> = chains
        .iter()
        .flat_map(|c| {
            let half = c.len() / 2;
            [c.slice(s![..half]), c.slice(s![c.len() - half..])]
        })
        .collect();
    let n_chains = halves.len();
    let n = halves.iter().map(|h| h.len()).min().unwrap_or(0);
    if n_chains < 2 || n < 2 {
        return f64::NAN;
    }

    let means: Array1<f64> = halves
        .iter()
        .map(|h| h.slice(s![..n]).mean().unwrap_or(f64::NAN))
        .collect();
    let variances: Array1<f64> = halves.iter().map(|h| h.slice(s![..n]).var(1.0)).collect();

    let n_f = n as f64;
    let between = n_f * means.var(1.0);
    let within = variances.mean().unwrap_or(f64::NAN);
    let var_plus = within * (n_f - 1.0) / n_f + between / n_f;
    (var_plus / within).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn ar1(phi: f64, n: usize, seed: u64) -> Array1<f64> {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut x = 0.0;
        (0..n)
            .map(|_| {
                let e: f64 = rng.sample(StandardNormal);
                x = phi * x + e;
                x
            })
            .collect()
    }

    #[test]
    fn autocorrelation_starts_at_one() {
        let x = ar1(0.5, 500, 1);
        let rho = autocorrelation(x.view()).unwrap();
        assert!((rho[0] - 1.0).abs() < 1e-12);
        assert!((rho[1] - 0.5).abs() < 0.1, "lag-1 autocorrelation {}", rho[1]);
        assert!(autocorrelation(array![2.0, 2.0, 2.0].view()).is_none());
    }

    #[test]
    fn ess_of_independent_draws_is_close_to_n() {
        let x = ar1(0.0, 4000, 2);
        let ess = effective_sample_size(x.view());
        assert!(ess > 3000.0 && ess < 5000.0, "ess = {ess}");
    }

    #[test]
    fn ess_of_correlated_draws_is_small() {
        // Integrated autocorrelation time of AR(1) is (1 + phi) / (1 - phi) = 19.
        let x = ar1(0.9, 20_000, 3);
        let ess = effective_sample_size(x.view());
        let expected = 20_000.0 / 19.0;
        assert!(ess > 0.5 * expected && ess < 2.0 * expected, "ess = {ess}");
    }

    #[test]
    fn rhat_near_one_for_same_distribution() {
        let a = ar1(0.0, 2000, 4);
        let b = ar1(0.0, 2000, 5);
        let rhat = split_rhat(&[a.view(), b.view()]);
        assert!((rhat - 1.0).abs() < 0.01, "rhat = {rhat}");
    }

    #[test]
    fn rhat_detects_shifted_chain() {
        let a = ar1(0.0, 1000, 6);
        let b = ar1(0.0, 1000, 7) + 3.0;
        let rhat = split_rhat(&[a.view(), b.view()]);
        assert!(rhat > 1.5, "rhat = {rhat}");
    }
}
