/*!
The Bayesian skill model: prior over player skills, an optional scale parameter, and the match
likelihood, with its exact gradient.

# Model

For every player `i`, `skill_i ~ Normal(0, prior_std)`. For every match, the two rosters are
aggregated (sum or mean of member skills) and `delta = agg(A) - agg(B)`.

* Without the scale parameter the winner is observed:
  `P(A wins) = link(delta)` with a logistic or probit link. A draw counts as half a win and
  half a loss.
* With the scale parameter the goal margin is observed: `log_k ~ Normal(0, scale_prior_std)`
  and `goals_a - goals_b ~ Normal(exp(log_k) * delta, margin_std)`.

The latent vector holds the skills in player order, followed by `log_k` when enabled.

# Examples

```rust
use calcetto_skill::data::MatchDatasetBuilder;
use calcetto_skill::model::{SkillModel, SkillModelConfig};
use ndarray::Array1;

let mut builder = MatchDatasetBuilder::new();
builder.add_match(&["anna"], &["bruno"], 3, 1, None);
let dataset = builder.build().unwrap();

let model = SkillModel::new(&dataset, SkillModelConfig::default()).unwrap();
let position = Array1::from(vec![0.5, -0.5]);
let logp = model.log_density(&position);
let grad = model.gradient(&position);
assert!(logp.is_finite());
assert_eq!(grad.len(), 2);
```
*/

use std::f64::consts::{FRAC_1_SQRT_2, PI};

use ndarray::{Array1, ArrayView1};
use statrs::function::erf::erfc;

use crate::data::MatchDataset;
use crate::error::{Result, SkillError};
use crate::euclidean::HamiltonianTarget;

/// Name of the scale coordinate in posterior output.
pub const SCALE_PARAMETER: &str = "log_k";

/// Prefix of the per-player skill coordinates in posterior output.
pub const SKILL_PREFIX: &str = "skill_";

/// Maps a skill difference to a win probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Link {
    #[default]
    Logistic,
    Probit,
}

/// How a roster's strength is derived from its members' skills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    Sum,
    #[default]
    Mean,
}

/// Shape of the latent vector. Fixed once the model is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatentLayout {
    Skills { n_players: usize },
    SkillsWithScale { n_players: usize },
}

impl LatentLayout {
    pub fn n_players(&self) -> usize {
        match *self {
            LatentLayout::Skills { n_players } | LatentLayout::SkillsWithScale { n_players } => {
                n_players
            }
        }
    }

    pub fn dim(&self) -> usize {
        match *self {
            LatentLayout::Skills { n_players } => n_players,
            LatentLayout::SkillsWithScale { n_players } => n_players + 1,
        }
    }

    pub fn has_scale(&self) -> bool {
        matches!(self, LatentLayout::SkillsWithScale { .. })
    }

    /// Splits a flat position into skills and the optional `log_k` coordinate.
    pub fn split<'a>(&self, position: ArrayView1<'a, f64>) -> (ArrayView1<'a, f64>, Option<f64>) {
        let n = self.n_players();
        let (skills, rest) = position.split_at(ndarray::Axis(0), n);
        let scale = match self {
            LatentLayout::Skills { .. } => None,
            LatentLayout::SkillsWithScale { .. } => Some(rest[0]),
        };
        (skills, scale)
    }

    /// Copies a flat position into an owned [`LatentState`].
    pub fn unpack(&self, position: ArrayView1<f64>) -> LatentState {
        let (skills, scale) = self.split(position);
        match scale {
            None => LatentState::Skills(skills.to_owned()),
            Some(log_scale) => LatentState::SkillsWithScale {
                skills: skills.to_owned(),
                log_scale,
            },
        }
    }
}

/// One assignment of the latent variables.
#[derive(Debug, Clone, PartialEq)]
pub enum LatentState {
    Skills(Array1<f64>),
    SkillsWithScale { skills: Array1<f64>, log_scale: f64 },
}

impl LatentState {
    pub fn skills(&self) -> &Array1<f64> {
        match self {
            LatentState::Skills(skills) | LatentState::SkillsWithScale { skills, .. } => skills,
        }
    }

    pub fn log_scale(&self) -> Option<f64> {
        match self {
            LatentState::Skills(_) => None,
            LatentState::SkillsWithScale { log_scale, .. } => Some(*log_scale),
        }
    }

    /// Flattens back into the layout used by the sampler.
    pub fn to_position(&self) -> Array1<f64> {
        match self {
            LatentState::Skills(skills) => skills.clone(),
            LatentState::SkillsWithScale { skills, log_scale } => {
                let mut v = skills.to_vec();
                v.push(*log_scale);
                Array1::from(v)
            }
        }
    }
}

/// Knobs of the skill model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkillModelConfig {
    /// Standard deviation of the skill prior.
    pub prior_std: f64,
    pub link: Link,
    pub aggregation: Aggregation,
    /// Include `log_k` and observe goal margins instead of winners.
    pub include_scale: bool,
    /// Standard deviation of the `log_k` prior.
    pub scale_prior_std: f64,
    /// Observation noise on the goal margin, in goals.
    pub margin_std: f64,
}

impl Default for SkillModelConfig {
    fn default() -> Self {
        Self {
            prior_std: 1.0,
            link: Link::Logistic,
            aggregation: Aggregation::Mean,
            include_scale: false,
            scale_prior_std: 1.0,
            margin_std: 2.0,
        }
    }
}

impl SkillModelConfig {
    pub fn with_scale(mut self, include_scale: bool) -> Self {
        self.include_scale = include_scale;
        self
    }

    pub fn with_link(mut self, link: Link) -> Self {
        self.link = link;
        self
    }

    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    fn validate(&self) -> Result<()> {
        let positive = [
            ("prior_std", self.prior_std),
            ("scale_prior_std", self.scale_prior_std),
            ("margin_std", self.margin_std),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(SkillError::config(format!(
                    "{name} must be positive and finite, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// A match reduced to what the likelihood needs: signed per-player weights and the outcome.
#[derive(Debug, Clone)]
struct Term {
    /// `(player, weight)`; `delta = sum(weight * skill)`.
    weights: Vec<(usize, f64)>,
    win: f64,
    margin: f64,
}

/// Joint log-density of skills (and `log_k`) given the match history.
#[derive(Debug, Clone)]
pub struct SkillModel {
    names: Vec<String>,
    terms: Vec<Term>,
    layout: LatentLayout,
    config: SkillModelConfig,
}

impl SkillModel {
    /// Builds the model. The dataset's player order becomes the coordinate order.
    pub fn new(dataset: &MatchDataset, config: SkillModelConfig) -> Result<Self> {
        config.validate()?;
        let n_players = dataset.n_players();
        let layout = if config.include_scale {
            LatentLayout::SkillsWithScale { n_players }
        } else {
            LatentLayout::Skills { n_players }
        };

        let mut terms = Vec::with_capacity(dataset.matches().len());
        for (i, m) in dataset.matches().iter().enumerate() {
            if let Some(&p) = m
                .team_a
                .iter()
                .chain(m.team_b.iter())
                .find(|&&p| p >= n_players)
            {
                return Err(SkillError::config(format!(
                    "match {i} references player index {p} outside 0..{n_players}"
                )));
            }
            let (wa, wb) = match config.aggregation {
                Aggregation::Sum => (1.0, 1.0),
                Aggregation::Mean => (1.0 / m.team_a.len() as f64, 1.0 / m.team_b.len() as f64),
            };
            let weights = m
                .team_a
                .iter()
                .map(|&p| (p, wa))
                .chain(m.team_b.iter().map(|&p| (p, -wb)))
                .collect();
            terms.push(Term {
                weights,
                win: m.win_indicator(),
                margin: m.margin(),
            });
        }

        Ok(Self {
            names: dataset.players().to_vec(),
            terms,
            layout,
            config,
        })
    }

    pub fn layout(&self) -> LatentLayout {
        self.layout
    }

    pub fn config(&self) -> &SkillModelConfig {
        &self.config
    }

    pub fn player_names(&self) -> &[String] {
        &self.names
    }

    /// `skill_<player>` for every player, then `log_k` when the scale is enabled.
    pub fn parameter_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .names
            .iter()
            .map(|n| format!("{SKILL_PREFIX}{n}"))
            .collect();
        if self.layout.has_scale() {
            names.push(SCALE_PARAMETER.to_string());
        }
        names
    }

    /// Every coordinate at its prior mean.
    pub fn initial_position(&self) -> Array1<f64> {
        Array1::zeros(self.layout.dim())
    }

    /// Joint log-density, up to an additive constant.
    pub fn log_density(&self, position: &Array1<f64>) -> f64 {
        self.evaluate(position.view(), None)
    }

    /// Gradient of [`SkillModel::log_density`] with respect to every latent coordinate.
    pub fn gradient(&self, position: &Array1<f64>) -> Array1<f64> {
        let mut grad = Array1::zeros(self.layout.dim());
        self.evaluate(position.view(), Some(&mut grad));
        grad
    }

    fn evaluate(&self, position: ArrayView1<f64>, mut grad: Option<&mut Array1<f64>>) -> f64 {
        debug_assert_eq!(position.len(), self.layout.dim());
        let (skills, log_k) = self.layout.split(position);
        let n = self.layout.n_players();

        let prior_var = self.config.prior_std * self.config.prior_std;
        let mut logp = -0.5 * skills.dot(&skills) / prior_var;
        if let Some(g) = grad.as_deref_mut() {
            g.fill(0.0);
            for i in 0..n {
                g[i] = -skills[i] / prior_var;
            }
        }

        match log_k {
            None => {
                for term in &self.terms {
                    let delta = term_delta(term, &skills);
                    let (ll, dll) = match self.config.link {
                        Link::Logistic => bernoulli_logistic(term.win, delta),
                        Link::Probit => bernoulli_probit(term.win, delta),
                    };
                    logp += ll;
                    if let Some(g) = grad.as_deref_mut() {
                        for &(p, w) in &term.weights {
                            g[p] += w * dll;
                        }
                    }
                }
            }
            Some(log_k) => {
                let scale_var = self.config.scale_prior_std * self.config.scale_prior_std;
                let margin_var = self.config.margin_std * self.config.margin_std;
                let k = log_k.exp();
                logp += -0.5 * log_k * log_k / scale_var;
                let mut dlog_k = -log_k / scale_var;
                for term in &self.terms {
                    let delta = term_delta(term, &skills);
                    let resid = term.margin - k * delta;
                    logp += -0.5 * resid * resid / margin_var;
                    let dmean = resid / margin_var;
                    dlog_k += dmean * k * delta;
                    if let Some(g) = grad.as_deref_mut() {
                        for &(p, w) in &term.weights {
                            g[p] += w * k * dmean;
                        }
                    }
                }
                if let Some(g) = grad.as_deref_mut() {
                    g[n] = dlog_k;
                }
            }
        }
        logp
    }
}

impl HamiltonianTarget<Array1<f64>> for SkillModel {
    fn logp_and_grad(&self, position: &Array1<f64>, grad: &mut Array1<f64>) -> f64 {
        self.evaluate(position.view(), Some(grad))
    }

    fn dim(&self) -> usize {
        self.layout.dim()
    }

    fn parameter_names(&self) -> Vec<String> {
        SkillModel::parameter_names(self)
    }
}

fn term_delta(term: &Term, skills: &ArrayView1<f64>) -> f64 {
    term.weights.iter().map(|&(p, w)| w * skills[p]).sum()
}

/// `ln(1 + e^x)` without overflow.
fn softplus(x: f64) -> f64 {
    if x > 0.0 {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Log-likelihood of `y` (0, 0.5 or 1) under a logistic link and its derivative in `delta`.
fn bernoulli_logistic(y: f64, delta: f64) -> (f64, f64) {
    // ln σ(d) = -softplus(-d), ln σ(-d) = -softplus(d)
    let ll = -y * softplus(-delta) - (1.0 - y) * softplus(delta);
    (ll, y - sigmoid(delta))
}

/// `ln Φ(x)` and `φ(x) / Φ(x)`, stable far into both tails.
fn log_ndtr_and_mills(x: f64) -> (f64, f64) {
    let z = -x * FRAC_1_SQRT_2;
    if x > -8.0 {
        let cdf = 0.5 * erfc(z);
        let pdf = (-0.5 * x * x).exp() / (2.0 * PI).sqrt();
        (cdf.ln(), pdf / cdf)
    } else {
        // Asymptotic series for the lower tail: Φ(x) ≈ φ(x)/(-x) * (1 - 1/x² + 3/x⁴ - 15/x⁶)
        let x2 = x * x;
        let series = 1.0 - 1.0 / x2 + 3.0 / (x2 * x2) - 15.0 / (x2 * x2 * x2);
        let log_pdf = -0.5 * x2 - 0.5 * (2.0 * PI).ln();
        let log_cdf = log_pdf - (-x).ln() + series.ln();
        (log_cdf, -x / series)
    }
}

/// Log-likelihood of `y` under a probit link and its derivative in `delta`.
fn bernoulli_probit(y: f64, delta: f64) -> (f64, f64) {
    let (lp, mills_p) = log_ndtr_and_mills(delta);
    let (lq, mills_q) = log_ndtr_and_mills(-delta);
    (y * lp + (1.0 - y) * lq, y * mills_p - (1.0 - y) * mills_q)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MatchDatasetBuilder;
    use approx::assert_abs_diff_eq;

    fn league() -> MatchDataset {
        let mut b = MatchDatasetBuilder::new();
        b.add_match(&["a", "b"], &["c", "d"], 5, 2, None)
            .add_match(&["a", "c"], &["b", "d", "e"], 3, 3, None)
            .add_match(&["e"], &["a"], 1, 4, None)
            .add_match(&["d", "b"], &["e", "c"], 6, 7, None);
        b.build().unwrap()
    }

    fn finite_difference(model: &SkillModel, x: &Array1<f64>) -> Array1<f64> {
        let h = 1e-6;
        Array1::from_shape_fn(x.len(), |i| {
            let mut up = x.clone();
            let mut down = x.clone();
            up[i] += h;
            down[i] -= h;
            (model.log_density(&up) - model.log_density(&down)) / (2.0 * h)
        })
    }

    fn check_gradient(config: SkillModelConfig) {
        let model = SkillModel::new(&league(), config).unwrap();
        let dim = model.layout().dim();
        let x = Array1::from_shape_fn(dim, |i| 0.3 * (i as f64) - 0.4);
        let analytic = model.gradient(&x);
        let numeric = finite_difference(&model, &x);
        for (a, n) in analytic.iter().zip(numeric.iter()) {
            assert_abs_diff_eq!(a, n, epsilon = 1e-5);
        }
    }

    #[test]
    fn gradient_matches_finite_differences_logistic() {
        check_gradient(SkillModelConfig::default());
        check_gradient(SkillModelConfig::default().with_aggregation(Aggregation::Sum));
    }

    #[test]
    fn gradient_matches_finite_differences_probit() {
        check_gradient(SkillModelConfig::default().with_link(Link::Probit));
    }

    #[test]
    fn gradient_matches_finite_differences_with_scale() {
        check_gradient(SkillModelConfig::default().with_scale(true));
    }

    #[test]
    fn fused_evaluation_agrees_with_separate_calls() {
        let model = SkillModel::new(&league(), SkillModelConfig::default().with_scale(true)).unwrap();
        let x = Array1::from(vec![0.1, -0.2, 0.3, 0.0, 0.5, -0.7]);
        let mut grad = Array1::zeros(6);
        let logp = model.logp_and_grad(&x, &mut grad);
        assert_eq!(logp, model.log_density(&x));
        assert_eq!(grad, model.gradient(&x));
    }

    #[test]
    fn finite_far_from_origin() {
        for link in [Link::Logistic, Link::Probit] {
            let model = SkillModel::new(&league(), SkillModelConfig::default().with_link(link))
                .unwrap();
            let x = Array1::from(vec![60.0, -60.0, 40.0, -45.0, 10.0]);
            assert!(model.log_density(&x).is_finite());
            assert!(model.gradient(&x).iter().all(|g| g.is_finite()));
        }
    }

    #[test]
    fn layout_and_names() {
        let ds = league();
        let model = SkillModel::new(&ds, SkillModelConfig::default().with_scale(true)).unwrap();
        assert_eq!(model.layout(), LatentLayout::SkillsWithScale { n_players: 5 });
        assert_eq!(model.layout().dim(), 6);
        let names = model.parameter_names();
        assert_eq!(names[0], "skill_a");
        assert_eq!(names[5], "log_k");

        let x = Array1::from(vec![1.0, 2.0, 3.0, 4.0, 5.0, -1.5]);
        let state = model.layout().unpack(x.view());
        assert_eq!(state.log_scale(), Some(-1.5));
        assert_eq!(state.skills().len(), 5);
        assert_eq!(state.to_position(), x);
    }

    #[test]
    fn rejects_bad_spreads() {
        let mut config = SkillModelConfig::default();
        config.prior_std = 0.0;
        assert!(matches!(
            SkillModel::new(&league(), config),
            Err(SkillError::Configuration(_))
        ));
        config.prior_std = 1.0;
        config.margin_std = f64::NAN;
        assert!(SkillModel::new(&league(), config).is_err());
    }

    #[test]
    fn logistic_is_symmetric() {
        let (a, da) = bernoulli_logistic(1.0, 0.7);
        let (b, db) = bernoulli_logistic(0.0, -0.7);
        assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        assert_abs_diff_eq!(da, -db, epsilon = 1e-12);
        assert_abs_diff_eq!(a, (1.0 / (1.0 + (-0.7f64).exp())).ln(), epsilon = 1e-12);
    }

    #[test]
    fn probit_tail_is_continuous() {
        let (l1, m1) = log_ndtr_and_mills(-7.999_999);
        let (l2, m2) = log_ndtr_and_mills(-8.000_001);
        assert_abs_diff_eq!(l1, l2, epsilon = 1e-4);
        assert_abs_diff_eq!(m1, m2, epsilon = 1e-4);
    }
}
