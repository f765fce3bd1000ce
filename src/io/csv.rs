/*!
# CSV input and output

Match histories are read from a CSV file with the header

```text
date,team_a,team_b,goals_a,goals_b
```

where each roster lists player names separated by `;` and `date` may be empty. Columns are found
by name, so their order does not matter and extra columns are ignored.

Posterior draws are written with the header `draw,<parameter names>`, one row per draw.
*/

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use tracing::info;

use crate::data::{MatchDataset, MatchDatasetBuilder};
use crate::error::{Result, SkillError};
use crate::posterior::PosteriorStore;

/// Separator between player names inside a roster cell.
pub const ROSTER_SEPARATOR: char = ';';

struct Columns {
    date: Option<usize>,
    team_a: usize,
    team_b: usize,
    goals_a: usize,
    goals_b: usize,
}

impl Columns {
    fn from_header(header: &StringRecord) -> Result<Self> {
        let find = |name: &str| header.iter().position(|h| h == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| SkillError::config(format!("match file has no `{name}` column")))
        };
        Ok(Self {
            date: find("date"),
            team_a: require("team_a")?,
            team_b: require("team_b")?,
            goals_a: require("goals_a")?,
            goals_b: require("goals_b")?,
        })
    }
}

fn line_of(record: &StringRecord) -> u64 {
    record.position().map(|p| p.line()).unwrap_or(0)
}

fn roster<'r>(record: &'r StringRecord, column: usize, name: &str) -> Result<Vec<&'r str>> {
    let cell = record.get(column).unwrap_or("");
    let players: Vec<&str> = cell
        .split(ROSTER_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if players.is_empty() {
        return Err(SkillError::config(format!(
            "line {}: `{name}` has no players",
            line_of(record)
        )));
    }
    Ok(players)
}

fn goals(record: &StringRecord, column: usize, name: &str) -> Result<u32> {
    let cell = record.get(column).unwrap_or("");
    cell.parse().map_err(|_| {
        SkillError::config(format!(
            "line {}: `{name}` must be a non-negative integer, got {cell:?}",
            line_of(record)
        ))
    })
}

/// Parses a match history from any reader. Players are indexed in order of first appearance.
pub fn read_matches_from<R: Read>(reader: R) -> Result<MatchDataset> {
    let mut rdr = ReaderBuilder::new().trim(Trim::All).from_reader(reader);
    let columns = Columns::from_header(rdr.headers()?)?;

    let mut builder = MatchDatasetBuilder::new();
    for record in rdr.records() {
        let record = record?;
        let team_a = roster(&record, columns.team_a, "team_a")?;
        let team_b = roster(&record, columns.team_b, "team_b")?;
        let goals_a = goals(&record, columns.goals_a, "goals_a")?;
        let goals_b = goals(&record, columns.goals_b, "goals_b")?;
        let date = columns
            .date
            .and_then(|c| record.get(c))
            .filter(|d| !d.is_empty())
            .map(str::to_string);
        builder.add_match(&team_a, &team_b, goals_a, goals_b, date);
    }
    builder.build()
}

/// Reads a match history from the CSV file at `path`.
///
/// Fails with a configuration error naming the offending line on malformed rows, and with the
/// usual dataset validation errors (empty history, player on both sides, ...).
pub fn read_matches<P: AsRef<Path>>(path: P) -> Result<MatchDataset> {
    let dataset = read_matches_from(File::open(path.as_ref())?)?;
    info!(
        path = %path.as_ref().display(),
        players = dataset.n_players(),
        matches = dataset.matches().len(),
        "loaded match history"
    );
    Ok(dataset)
}

/// Writes every draw of `store` to `writer`.
pub fn write_posterior<W: Write>(store: &PosteriorStore, writer: W) -> Result<()> {
    let mut wtr = Writer::from_writer(writer);

    let mut header = vec!["draw".to_string()];
    header.extend(store.parameter_names().iter().cloned());
    wtr.write_record(&header)?;

    for (i, draw) in store.draws().rows().into_iter().enumerate() {
        let mut row = vec![i.to_string()];
        row.extend(draw.iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}

/**
Saves the draws of a posterior store as a CSV file.

# Examples

```rust
use calcetto_skill::data::MatchDatasetBuilder;
use calcetto_skill::io::csv::save_posterior;
use calcetto_skill::{Mcmc, McmcConfig, SkillModel, SkillModelConfig};

let mut builder = MatchDatasetBuilder::new();
builder.add_match(&["anna"], &["bruno"], 3, 1, None);
let dataset = builder.build()?;
let model = SkillModel::new(&dataset, SkillModelConfig::default())?;
let store = Mcmc::new(&model, McmcConfig::default().set_samples(50).set_seed(1))?.run()?;

let path = std::env::temp_dir().join("calcetto_posterior.csv");
save_posterior(&store, &path)?;
# Ok::<(), calcetto_skill::SkillError>(())
```
*/
pub fn save_posterior<P: AsRef<Path>>(store: &PosteriorStore, path: P) -> Result<()> {
    write_posterior(store, File::create(path.as_ref())?)?;
    info!(path = %path.as_ref().display(), draws = store.len(), "saved posterior draws");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HISTORY: &str = "\
date,team_a,team_b,goals_a,goals_b
2023-01-10,anna;bruno,carla;dario,5,3
,carla ; anna,bruno;dario,2,2
2023-01-24,dario,anna,0,4
";

    #[test]
    fn parses_rosters_and_dates() {
        let dataset = read_matches_from(HISTORY.as_bytes()).unwrap();
        assert_eq!(dataset.players(), &["anna", "bruno", "carla", "dario"]);
        let matches = dataset.matches();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0].team_a, vec![0, 1]);
        assert_eq!(matches[0].timestamp.as_deref(), Some("2023-01-10"));
        assert_eq!(matches[1].team_a, vec![2, 0]);
        assert_eq!(matches[1].timestamp, None);
        assert_eq!((matches[2].goals_a, matches[2].goals_b), (0, 4));
    }

    #[test]
    fn column_order_does_not_matter() {
        let shuffled = "goals_b,goals_a,team_b,team_a\n1,2,b,a\n";
        let dataset = read_matches_from(shuffled.as_bytes()).unwrap();
        let m = &dataset.matches()[0];
        assert_eq!((m.goals_a, m.goals_b), (2, 1));
        assert_eq!(dataset.players()[m.team_a[0]], "a");
    }

    #[test]
    fn missing_column_is_reported() {
        let err = read_matches_from("team_a,team_b,goals_a\na,b,1\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("goals_b"), "{err}");
    }

    #[test]
    fn bad_goal_count_names_the_line() {
        let text = "team_a,team_b,goals_a,goals_b\na,b,1,0\na,b,-1,0\n";
        let err = read_matches_from(text.as_bytes()).unwrap_err();
        assert!(matches!(err, SkillError::Configuration(_)));
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn empty_roster_is_rejected() {
        let text = "team_a,team_b,goals_a,goals_b\na,;,1,0\n";
        assert!(read_matches_from(text.as_bytes()).is_err());
    }
}
