/*!
The match history consumed by the skill model.

A [`MatchDataset`] is validated once on construction and is immutable afterwards, so it can be
shared by reference between independent chains. Players are addressed by their index into
[`MatchDataset::players`]; that mapping never changes for the lifetime of the dataset.

# Examples

```rust
use calcetto_skill::data::MatchDatasetBuilder;

let mut builder = MatchDatasetBuilder::new();
builder.add_match(&["anna", "bruno"], &["carla", "dario"], 5, 3, None);
builder.add_match(&["anna", "carla"], &["bruno", "dario"], 4, 4, None);
let dataset = builder.build().unwrap();

assert_eq!(dataset.n_players(), 4);
assert_eq!(dataset.player_index("carla"), Some(2));
```
*/

use std::collections::{HashMap, HashSet};

use crate::error::{Result, SkillError};

/// One played match: two rosters and the goals each side scored.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub team_a: Vec<usize>,
    pub team_b: Vec<usize>,
    pub goals_a: u32,
    pub goals_b: u32,
    /// Only used to keep the log ordered. The model ignores it.
    pub timestamp: Option<String>,
}

impl MatchRecord {
    pub fn new(team_a: Vec<usize>, team_b: Vec<usize>, goals_a: u32, goals_b: u32) -> Self {
        Self {
            team_a,
            team_b,
            goals_a,
            goals_b,
            timestamp: None,
        }
    }

    /// Signed goal difference seen from team A.
    pub fn margin(&self) -> f64 {
        self.goals_a as f64 - self.goals_b as f64
    }

    /// 1 if team A won, 0 if it lost, 0.5 on a draw.
    pub fn win_indicator(&self) -> f64 {
        match self.goals_a.cmp(&self.goals_b) {
            std::cmp::Ordering::Greater => 1.0,
            std::cmp::Ordering::Less => 0.0,
            std::cmp::Ordering::Equal => 0.5,
        }
    }
}

/// Win/draw/loss tally of a single player.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerRecord {
    pub played: usize,
    pub wins: usize,
    pub draws: usize,
    pub losses: usize,
}

/// Validated, immutable match history.
#[derive(Debug, Clone)]
pub struct MatchDataset {
    players: Vec<String>,
    matches: Vec<MatchRecord>,
}

impl MatchDataset {
    /// Validates and wraps a player list and match records.
    ///
    /// Fails with [`SkillError::Configuration`] when the player list is empty or has duplicate
    /// names, or when a match has an empty roster, repeats a player, fields the same player on
    /// both sides, or references an index outside `0..players.len()`.
    pub fn new(players: Vec<String>, matches: Vec<MatchRecord>) -> Result<Self> {
        if players.is_empty() {
            return Err(SkillError::config("dataset has no players"));
        }
        let mut seen = HashSet::with_capacity(players.len());
        for name in &players {
            if !seen.insert(name.as_str()) {
                return Err(SkillError::config(format!("duplicate player name {name:?}")));
            }
        }

        let n_players = players.len();
        for (i, record) in matches.iter().enumerate() {
            if record.team_a.is_empty() || record.team_b.is_empty() {
                return Err(SkillError::config(format!("match {i} has an empty roster")));
            }
            let mut on_pitch = HashSet::new();
            for &p in record.team_a.iter().chain(record.team_b.iter()) {
                if p >= n_players {
                    return Err(SkillError::config(format!(
                        "match {i} references player index {p}, but only {n_players} players exist"
                    )));
                }
                if !on_pitch.insert(p) {
                    return Err(SkillError::config(format!(
                        "match {i} lists player {:?} more than once",
                        players[p]
                    )));
                }
            }
        }

        Ok(Self { players, matches })
    }

    pub fn n_players(&self) -> usize {
        self.players.len()
    }

    pub fn players(&self) -> &[String] {
        &self.players
    }

    pub fn matches(&self) -> &[MatchRecord] {
        &self.matches
    }

    pub fn player_index(&self, name: &str) -> Option<usize> {
        self.players.iter().position(|p| p == name)
    }

    /// Per-player tallies, indexed like [`MatchDataset::players`].
    pub fn player_records(&self) -> Vec<PlayerRecord> {
        let mut records = vec![PlayerRecord::default(); self.players.len()];
        for m in &self.matches {
            let y = m.win_indicator();
            let sides = [(&m.team_a, y), (&m.team_b, 1.0 - y)];
            for (team, score) in sides {
                for &p in team.iter() {
                    let r = &mut records[p];
                    r.played += 1;
                    if score == 1.0 {
                        r.wins += 1;
                    } else if score == 0.0 {
                        r.losses += 1;
                    } else {
                        r.draws += 1;
                    }
                }
            }
        }
        records
    }
}

/// Incrementally builds a [`MatchDataset`] from player names, registering each name on first
/// sight.
#[derive(Debug, Clone, Default)]
pub struct MatchDatasetBuilder {
    players: Vec<String>,
    index: HashMap<String, usize>,
    matches: Vec<MatchRecord>,
}

impl MatchDatasetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` if needed and returns its index.
    pub fn player(&mut self, name: &str) -> usize {
        if let Some(&i) = self.index.get(name) {
            return i;
        }
        let i = self.players.len();
        self.players.push(name.to_string());
        self.index.insert(name.to_string(), i);
        i
    }

    pub fn add_match(
        &mut self,
        team_a: &[&str],
        team_b: &[&str],
        goals_a: u32,
        goals_b: u32,
        timestamp: Option<String>,
    ) -> &mut Self {
        let team_a = team_a.iter().map(|n| self.player(n)).collect();
        let team_b = team_b.iter().map(|n| self.player(n)).collect();
        self.matches.push(MatchRecord {
            team_a,
            team_b,
            goals_a,
            goals_b,
            timestamp,
        });
        self
    }

    pub fn build(self) -> Result<MatchDataset> {
        MatchDataset::new(self.players, self.matches)
    }
}
