//! Step-size adaptation by Nesterov dual averaging (Hoffman & Gelman, 2014, section 3.2).
//!
//! During warmup the step size is steered so that the mean acceptance probability approaches
//! `target_accept`. Once warmup ends, [`DualAveraging::final_step_size`] gives the averaged
//! iterate, which is what the sampling phase keeps fixed.

/// Dual-averaging state.
#[derive(Debug, Clone, PartialEq)]
pub struct DualAveraging {
    target_accept: f64,
    mu: f64,
    gamma: f64,
    t0: f64,
    kappa: f64,
    m: u64,
    h_bar: f64,
    log_eps: f64,
    log_eps_bar: f64,
}

impl DualAveraging {
    /// Starts adaptation from `initial_step_size`, shrinking toward `10 * initial_step_size`.
    pub fn new(initial_step_size: f64, target_accept: f64) -> Self {
        Self {
            target_accept,
            mu: (10.0 * initial_step_size).ln(),
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
            m: 0,
            h_bar: 0.0,
            log_eps: initial_step_size.ln(),
            log_eps_bar: initial_step_size.ln(),
        }
    }

    pub fn target_accept(&self) -> f64 {
        self.target_accept
    }

    /// Feeds the acceptance probability of the last transition and returns the step size to use
    /// for the next one.
    pub fn update(&mut self, accept_prob: f64) -> f64 {
        // Divergences report 0, which is the right signal; anything else non-finite is noise.
        let accept_prob = if accept_prob.is_finite() {
            accept_prob.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.m += 1;
        let m = self.m as f64;
        let w = 1.0 / (m + self.t0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target_accept - accept_prob);
        self.log_eps = self.mu - m.sqrt() / self.gamma * self.h_bar;
        let m_pow = m.powf(-self.kappa);
        self.log_eps_bar = m_pow * self.log_eps + (1.0 - m_pow) * self.log_eps_bar;
        self.log_eps.exp()
    }

    pub fn current_step_size(&self) -> f64 {
        self.log_eps.exp()
    }

    /// Averaged step size to freeze once warmup is over.
    pub fn final_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Toy acceptance curve: larger steps are accepted less often.
    fn accept_at(step_size: f64) -> f64 {
        (-step_size * step_size).exp()
    }

    #[test]
    fn converges_to_target_acceptance() {
        let target = 0.75;
        let mut da = DualAveraging::new(2.0, target);
        let mut eps = da.current_step_size();
        for _ in 0..2000 {
            eps = da.update(accept_at(eps));
        }
        let final_eps = da.final_step_size();
        let achieved = accept_at(final_eps);
        assert!((achieved - target).abs() < 0.02, "acceptance {achieved} at {final_eps}");
    }

    #[test]
    fn rejections_shrink_the_step() {
        let mut da = DualAveraging::new(1.0, 0.8);
        let mut eps = 1.0;
        for _ in 0..50 {
            eps = da.update(0.0);
        }
        assert!(eps < 0.1, "{eps}");
        assert!(da.final_step_size() < 1.0);
    }

    #[test]
    fn non_finite_probability_counts_as_rejection() {
        let mut a = DualAveraging::new(0.5, 0.8);
        let mut b = a.clone();
        assert_eq!(a.update(f64::NAN), b.update(0.0));
    }
}
