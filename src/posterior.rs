/*!
The posterior store: retained draws in draw order, indexed by parameter name, plus the run's
diagnostics.

The store is filled by the MCMC driver during the sampling phase and handed out read-only once
the chain is `Done` (or stopped early, in which case [`PosteriorStore::is_complete`] is false).
*/

use ndarray::prelude::*;
use ndarray_stats::interpolate::Linear;
use ndarray_stats::{CorrelationExt, QuantileExt};
use noisy_float::types::n64;

use crate::error::{Result, SkillError};
use crate::model::SKILL_PREFIX;
use crate::stats::{effective_sample_size, split_rhat};

/// Counters and tuning values collected over one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostics {
    pub n_warmup: usize,
    pub n_samples: usize,
    /// Number of merged chains (1 for a single run).
    pub n_chains: usize,
    pub warmup_acceptance_rate: f64,
    pub acceptance_rate: f64,
    pub warmup_divergences: u64,
    pub divergences: u64,
    /// Step size frozen for the sampling phase.
    pub step_size: f64,
    pub n_leapfrog: usize,
}

impl Diagnostics {
    /// Acceptance over warmup and sampling together.
    pub fn overall_acceptance_rate(&self) -> f64 {
        let total = (self.n_warmup + self.n_samples) as f64;
        if total == 0.0 {
            return 0.0;
        }
        (self.warmup_acceptance_rate * self.n_warmup as f64
            + self.acceptance_rate * self.n_samples as f64)
            / total
    }

    pub fn total_divergences(&self) -> u64 {
        self.warmup_divergences + self.divergences
    }
}

/// One retained draw: parameter name to value.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSample {
    pub values: Vec<(String, f64)>,
}

impl PosteriorSample {
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| *v)
    }
}

/// Marginal summary of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub std: f64,
    pub q05: f64,
    pub median: f64,
    pub q95: f64,
    pub ess: f64,
}

/// Append-only sequence of posterior draws.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorStore {
    names: Vec<String>,
    /// `[capacity, dim]`; only the first `len` rows are filled.
    draws: Array2<f64>,
    len: usize,
    diagnostics: Diagnostics,
    complete: bool,
}

impl PosteriorStore {
    pub(crate) fn with_capacity(names: Vec<String>, capacity: usize, diagnostics: Diagnostics) -> Self {
        let dim = names.len();
        Self {
            names,
            draws: Array2::zeros((capacity, dim)),
            len: 0,
            diagnostics,
            complete: false,
        }
    }

    pub(crate) fn push(&mut self, draw: ArrayView1<f64>) {
        assert!(self.len < self.draws.nrows(), "posterior store is full");
        self.draws.row_mut(self.len).assign(&draw);
        self.len += 1;
    }

    pub(crate) fn finish(&mut self, diagnostics: Diagnostics, complete: bool) {
        self.diagnostics = diagnostics;
        self.complete = complete;
        if !complete {
            self.draws = self.draws.slice(s![..self.len, ..]).to_owned();
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// False when the chain was stopped before drawing every configured sample.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn parameter_names(&self) -> &[String] {
        &self.names
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// All retained draws, `[len, dim]`, in draw order.
    pub fn draws(&self) -> ArrayView2<'_, f64> {
        self.draws.slice(s![..self.len, ..])
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Every retained value of `name`, in draw order.
    pub fn column(&self, name: &str) -> Option<ArrayView1<'_, f64>> {
        let j = self.index_of(name)?;
        Some(self.draws.slice(s![..self.len, j]))
    }

    pub fn sample(&self, i: usize) -> Option<PosteriorSample> {
        if i >= self.len {
            return None;
        }
        let row = self.draws.row(i);
        Some(PosteriorSample {
            values: self.names.iter().cloned().zip(row.iter().copied()).collect(),
        })
    }

    pub fn samples(&self) -> impl Iterator<Item = PosteriorSample> + '_ {
        (0..self.len).filter_map(move |i| self.sample(i))
    }

    /// Linear-interpolated `q`-quantile of `name`, `None` for unknown names or an empty store.
    pub fn quantile(&self, name: &str, q: f64) -> Option<f64> {
        let mut column = self.column(name)?.to_owned();
        column
            .quantile_axis_skipnan_mut(Axis(0), n64(q), &Linear)
            .ok()
            .map(|a| a.into_scalar())
    }

    pub fn median(&self, name: &str) -> Option<f64> {
        self.quantile(name, 0.5)
    }

    /// Mean, standard deviation, 5/50/95% quantiles and effective sample size per parameter.
    pub fn summary(&self) -> Vec<ParameterSummary> {
        self.names
            .iter()
            .filter_map(|name| {
                let column = self.column(name)?;
                let ddof = if column.len() > 1 { 1.0 } else { 0.0 };
                Some(ParameterSummary {
                    name: name.clone(),
                    mean: column.mean()?,
                    std: column.std(ddof),
                    q05: self.quantile(name, 0.05)?,
                    median: self.quantile(name, 0.5)?,
                    q95: self.quantile(name, 0.95)?,
                    ess: effective_sample_size(column),
                })
            })
            .collect()
    }

    /// Skill parameters sorted by descending posterior median, with the `skill_` prefix removed.
    pub fn ranking(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .names
            .iter()
            .filter_map(|name| {
                let player = name.strip_prefix(SKILL_PREFIX)?;
                Some((player.to_string(), self.median(name)?))
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    /// Pearson correlation matrix between the skill parameters, in parameter order.
    pub fn skill_correlation(&self) -> Result<Array2<f64>> {
        let columns: Vec<usize> = self
            .names
            .iter()
            .enumerate()
            .filter(|(_, n)| n.starts_with(SKILL_PREFIX))
            .map(|(j, _)| j)
            .collect();
        let skills = self.draws().select(Axis(1), &columns);
        // `pearson_correlation` expects variables as rows and observations as columns.
        skills
            .t()
            .pearson_correlation()
            .map_err(|e| SkillError::config(format!("cannot correlate skills: {e}")))
    }

    /// Split R-hat of `name` across the given chains.
    pub fn rhat(stores: &[PosteriorStore], name: &str) -> Option<f64> {
        let columns: Option<Vec<ArrayView1<f64>>> = stores.iter().map(|s| s.column(name)).collect();
        Some(split_rhat(&columns?))
    }

    /// Merges independent chains into one store, in chain order.
    ///
    /// All stores must share parameter names and sampler settings. Acceptance rates are
    /// averaged, divergences summed, and the result is complete only if every chain was.
    pub fn concat(stores: &[PosteriorStore]) -> Result<PosteriorStore> {
        let first = stores
            .first()
            .ok_or_else(|| SkillError::config("no chains to merge"))?;
        if stores.iter().any(|s| s.names != first.names) {
            return Err(SkillError::config("chains have different parameters"));
        }

        let views: Vec<ArrayView2<f64>> = stores.iter().map(|s| s.draws()).collect();
        let draws = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| SkillError::config(format!("cannot merge chains: {e}")))?;
        let n = stores.len() as f64;
        let mean_of = |f: fn(&Diagnostics) -> f64| stores.iter().map(|s| f(&s.diagnostics)).sum::<f64>() / n;

        let diagnostics = Diagnostics {
            n_warmup: first.diagnostics.n_warmup,
            n_samples: first.diagnostics.n_samples,
            n_chains: stores.iter().map(|s| s.diagnostics.n_chains).sum(),
            warmup_acceptance_rate: mean_of(|d| d.warmup_acceptance_rate),
            acceptance_rate: mean_of(|d| d.acceptance_rate),
            warmup_divergences: stores.iter().map(|s| s.diagnostics.warmup_divergences).sum(),
            divergences: stores.iter().map(|s| s.diagnostics.divergences).sum(),
            step_size: mean_of(|d| d.step_size),
            n_leapfrog: first.diagnostics.n_leapfrog,
        };

        Ok(PosteriorStore {
            names: first.names.clone(),
            len: draws.nrows(),
            draws,
            diagnostics,
            complete: stores.iter().all(|s| s.complete),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn diagnostics(n_samples: usize) -> Diagnostics {
        Diagnostics {
            n_warmup: 0,
            n_samples,
            n_chains: 1,
            warmup_acceptance_rate: 0.0,
            acceptance_rate: 0.5,
            warmup_divergences: 0,
            divergences: 1,
            step_size: 0.1,
            n_leapfrog: 4,
        }
    }

    fn store() -> PosteriorStore {
        let names = vec!["skill_a".to_string(), "skill_b".to_string(), "log_k".to_string()];
        let mut s = PosteriorStore::with_capacity(names, 5, diagnostics(5));
        for i in 0..5 {
            let x = i as f64;
            s.push(array![x, -2.0 * x, 0.5].view());
        }
        s.finish(diagnostics(5), true);
        s
    }

    #[test]
    fn column_and_sample_lookup() {
        let s = store();
        assert_eq!(s.len(), 5);
        assert_eq!(s.column("skill_b").unwrap(), array![0.0, -2.0, -4.0, -6.0, -8.0]);
        assert!(s.column("skill_z").is_none());
        let draw = s.sample(3).unwrap();
        assert_eq!(draw.get("skill_a"), Some(3.0));
        assert_eq!(draw.get("log_k"), Some(0.5));
        assert!(s.sample(5).is_none());
        assert_eq!(s.samples().count(), 5);
    }

    #[test]
    fn quantiles_and_ranking() {
        let s = store();
        assert_abs_diff_eq!(s.median("skill_a").unwrap(), 2.0);
        assert_abs_diff_eq!(s.quantile("skill_a", 0.25).unwrap(), 1.0);
        let ranking = s.ranking();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].0, "a");
        assert_eq!(ranking[1].0, "b");
    }

    #[test]
    fn summary_statistics() {
        let s = store();
        let summary = s.summary();
        assert_eq!(summary.len(), 3);
        assert_abs_diff_eq!(summary[0].mean, 2.0);
        assert_abs_diff_eq!(summary[0].std, 2.5f64.sqrt(), epsilon = 1e-12);
        assert!(summary[2].ess.is_nan());
    }

    #[test]
    fn skills_are_perfectly_anticorrelated() {
        let corr = store().skill_correlation().unwrap();
        assert_eq!(corr.dim(), (2, 2));
        assert_abs_diff_eq!(corr[[0, 1]], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn partial_store_is_truncated() {
        let names = vec!["skill_a".to_string()];
        let mut s = PosteriorStore::with_capacity(names, 10, diagnostics(10));
        s.push(array![1.0].view());
        s.push(array![2.0].view());
        s.finish(diagnostics(10), false);
        assert!(!s.is_complete());
        assert_eq!(s.draws().dim(), (2, 1));
    }

    #[test]
    fn concat_merges_chains() {
        let merged = PosteriorStore::concat(&[store(), store()]).unwrap();
        assert_eq!(merged.len(), 10);
        assert_eq!(merged.diagnostics().divergences, 2);
        assert_eq!(merged.diagnostics().n_chains, 2);
        assert!(merged.is_complete());
        assert!(PosteriorStore::concat(&[]).is_err());
    }
}
