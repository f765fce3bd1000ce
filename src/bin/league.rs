//! Rates the players of a calcetto league from a CSV match log and prints the ranking.
//!
//! ```text
//! RUST_LOG=info league matches.csv --samples 6000 --chains 4 --out posterior.csv
//! ```

use std::error::Error;
use std::path::PathBuf;

use calcetto_skill::io::csv::{read_matches, save_posterior};
use calcetto_skill::mcmc::{run_chains, Mcmc, McmcConfig};
use calcetto_skill::model::{Link, SkillModel, SkillModelConfig, SCALE_PARAMETER, SKILL_PREFIX};
use calcetto_skill::posterior::PosteriorStore;
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::filter::EnvFilter;

#[derive(Debug, clap::Parser, Clone)]
#[command(about = "Bayesian skill ratings for a calcetto league")]
struct Args {
    /// match log with columns date,team_a,team_b,goals_a,goals_b
    matches: PathBuf,

    /// initial leapfrog step size
    #[arg(long, default_value_t = 0.0855)]
    step_size: f64,

    /// leapfrog steps per transition
    #[arg(long, default_value_t = 4)]
    n_leapfrog: usize,

    /// retained draws per chain
    #[arg(long, default_value_t = 6000)]
    samples: usize,

    /// warmup length as a fraction of the sample count
    #[arg(long, default_value_t = 0.1)]
    warmup_fraction: f64,

    /// model goal margins through a latent scale `log_k`
    #[arg(short = 'k', long)]
    include_k: bool,

    /// use the probit link instead of the logistic one
    #[arg(long)]
    probit: bool,

    /// do not adapt the step size during warmup
    #[arg(long)]
    fixed_step: bool,

    /// random seed; drawn at random when omitted
    #[arg(short, long)]
    seed: Option<u64>,

    /// independent chains run in parallel
    #[arg(short, long, default_value_t = 1)]
    chains: usize,

    /// write the posterior draws to this CSV file
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn print_report(store: &PosteriorStore) {
    println!("{:<20} {:>8} {:>8} {:>8} {:>8}", "player", "median", "q05", "q95", "ess");
    let summary = store.summary();
    for (player, _) in store.ranking() {
        let parameter = format!("{SKILL_PREFIX}{player}");
        let Some(s) = summary.iter().find(|s| s.name == parameter) else {
            continue;
        };
        println!(
            "{player:<20} {:>8.3} {:>8.3} {:>8.3} {:>8.0}",
            s.median, s.q05, s.q95, s.ess
        );
    }
    if let Some(k) = summary.iter().find(|s| s.name == SCALE_PARAMETER) {
        println!(
            "\nk = exp({SCALE_PARAMETER}): median {:.3}, 90% interval [{:.3}, {:.3}]",
            k.median.exp(),
            k.q05.exp(),
            k.q95.exp()
        );
    }

    let d = store.diagnostics();
    println!(
        "\n{} chain(s), {} warmup + {} draws each, {} leapfrog steps of size {:.4}",
        d.n_chains, d.n_warmup, d.n_samples, d.n_leapfrog, d.step_size
    );
    println!(
        "acceptance: warmup {:.3}, sampling {:.3}, overall {:.3}",
        d.warmup_acceptance_rate,
        d.acceptance_rate,
        d.overall_acceptance_rate()
    );
    println!(
        "divergences: {} warmup, {} sampling",
        d.warmup_divergences, d.divergences
    );
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    debug!("args: {args:?}");

    let dataset = read_matches(&args.matches)?;
    let mut model_config = SkillModelConfig::default().with_scale(args.include_k);
    if args.probit {
        model_config = model_config.with_link(Link::Probit);
    }
    let model = SkillModel::new(&dataset, model_config)?;

    let mut config = McmcConfig::default()
        .set_step_size(args.step_size)
        .set_leapfrog_steps(args.n_leapfrog)
        .set_samples(args.samples)
        .set_warmup_fraction(args.warmup_fraction)
        .set_adapt_step_size(!args.fixed_step);
    if let Some(seed) = args.seed {
        config = config.set_seed(seed);
    }
    info!(seed = config.seed, chains = args.chains, "sampling");

    let store = if args.chains == 1 {
        Mcmc::new(&model, config)?.run_progress()?
    } else {
        let stores = run_chains(&model, &config, args.chains)?;
        for name in model.parameter_names() {
            if let Some(rhat) = PosteriorStore::rhat(&stores, &name) {
                info!(parameter = %name, rhat, "split R-hat");
            }
        }
        PosteriorStore::concat(&stores)?
    };

    print_report(&store);

    if let Some(out) = &args.out {
        save_posterior(&store, out)?;
        println!("\nposterior draws written to {}", out.display());
    }
    Ok(())
}
