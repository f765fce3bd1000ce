#![cfg(feature = "csv")]

use std::fs;
use std::io::Write;

use calcetto_skill::io::csv::{read_matches, save_posterior};
use calcetto_skill::mcmc::{Mcmc, McmcConfig};
use calcetto_skill::model::{SkillModel, SkillModelConfig};
use calcetto_skill::SkillError;
use tempfile::NamedTempFile;

const HISTORY: &str = "\
date,team_a,team_b,goals_a,goals_b
2023-03-01,anna;bruno;carla,dario;elio;franco,6,4
2023-03-08,anna;dario;elio,bruno;carla;franco,3,3
2023-03-15,franco;carla;elio,anna;bruno;dario,2,7
";

#[test]
fn match_log_to_posterior_file() {
    let mut input = NamedTempFile::new().unwrap();
    input.write_all(HISTORY.as_bytes()).unwrap();

    let dataset = read_matches(input.path()).unwrap();
    assert_eq!(dataset.n_players(), 6);
    assert_eq!(dataset.matches().len(), 3);
    let anna = dataset.player_records()[dataset.player_index("anna").unwrap()];
    assert_eq!((anna.played, anna.wins, anna.draws, anna.losses), (3, 2, 1, 0));

    let model = SkillModel::new(&dataset, SkillModelConfig::default().with_scale(true)).unwrap();
    let config = McmcConfig::default().set_samples(100).set_seed(8);
    let store = Mcmc::new(&model, config).unwrap().run().unwrap();

    let output = NamedTempFile::new().unwrap();
    save_posterior(&store, output.path()).unwrap();
    let text = fs::read_to_string(output.path()).unwrap();
    let mut lines = text.lines();
    assert_eq!(
        lines.next(),
        Some("draw,skill_anna,skill_bruno,skill_carla,skill_dario,skill_elio,skill_franco,log_k")
    );
    let rows: Vec<&str> = lines.collect();
    assert_eq!(rows.len(), 100);

    let first: Vec<f64> = rows[0].split(',').map(|v| v.parse().unwrap()).collect();
    assert_eq!(first[0], 0.0);
    let draw = store.sample(0).unwrap();
    assert_eq!(first[1], draw.get("skill_anna").unwrap());
    assert_eq!(first[7], draw.get("log_k").unwrap());
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = read_matches(dir.path().join("nope.csv")).unwrap_err();
    assert!(matches!(err, SkillError::Io(_)), "{err:?}");
}

#[test]
fn player_on_both_sides_is_rejected() {
    let mut input = NamedTempFile::new().unwrap();
    writeln!(input, "date,team_a,team_b,goals_a,goals_b").unwrap();
    writeln!(input, ",anna;bruno,bruno;carla,1,0").unwrap();
    let err = read_matches(input.path()).unwrap_err();
    assert!(matches!(err, SkillError::Configuration(_)), "{err:?}");
}
