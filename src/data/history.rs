//! Horse History Index and Win-Rate Tables
//!
//! Historical aggregates used by the feature engineer: per-horse past results
//! for `past_top3_rate`, and jockey/trainer win rates persisted with the model.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::models::{RaceGroup, RunnerRecord};

/// Single past start for a horse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HorseStart {
    pub date: chrono::NaiveDate,
    pub finish_position: u32,
    pub top3: bool,
}

/// Past results indexed by horse id
#[derive(Debug, Clone, Default)]
pub struct HorseHistoryIndex {
    /// horse_id -> starts with a known finish, sorted by date descending
    history: HashMap<String, Vec<HorseStart>>,
}

impl HorseHistoryIndex {
    /// Index every runner with a known finishing position
    pub fn from_races(races: &[RaceGroup]) -> Self {
        let mut history: HashMap<String, Vec<HorseStart>> = HashMap::new();

        for runner in races.iter().flat_map(|race| race.runners.iter()) {
            if let (Some(finish_position), Some(top3)) =
                (runner.finish_position, runner.is_top3())
            {
                history
                    .entry(runner.horse_id.clone())
                    .or_default()
                    .push(HorseStart {
                        date: runner.race_date,
                        finish_position,
                        top3,
                    });
            }
        }

        // Most recent first
        for starts in history.values_mut() {
            starts.sort_by(|a, b| b.date.cmp(&a.date));
        }

        Self { history }
    }

    /// Starts strictly before `before_date`, most recent first
    pub fn prior_starts(&self, horse_id: &str, before_date: chrono::NaiveDate) -> Vec<&HorseStart> {
        self.history
            .get(horse_id)
            .map(|starts| starts.iter().filter(|s| s.date < before_date).collect())
            .unwrap_or_default()
    }

    /// Share of prior starts finishing in the top 3 (0 without prior starts)
    pub fn past_top3_rate(&self, horse_id: &str, before_date: chrono::NaiveDate) -> f64 {
        let prior = self.prior_starts(horse_id, before_date);
        if prior.is_empty() {
            return 0.0;
        }
        let top3 = prior.iter().filter(|s| s.top3).count();
        top3 as f64 / prior.len() as f64
    }

    /// Number of unique horses in the index
    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// Starts and wins for one jockey or trainer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinRate {
    pub starts: u32,
    pub wins: u32,
}

impl WinRate {
    pub fn rate(&self) -> f64 {
        if self.starts == 0 {
            0.0
        } else {
            self.wins as f64 / self.starts as f64
        }
    }
}

/// Win rates keyed by jockey or trainer id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WinRateTable {
    rates: BTreeMap<String, WinRate>,
    /// Corpus-wide wins / starts, used for unseen ids
    default_rate: f64,
}

impl WinRateTable {
    /// Aggregate wins and starts per key over runners with a known finish
    pub fn build<F>(races: &[RaceGroup], key: F) -> Self
    where
        F: Fn(&RunnerRecord) -> &str,
    {
        let rates = tally(races.iter().flat_map(|race| race.runners.iter()), &key);
        let total = rates.values().fold(WinRate::default(), |acc, r| WinRate {
            starts: acc.starts + r.starts,
            wins: acc.wins + r.wins,
        });

        Self {
            rates,
            default_rate: total.rate(),
        }
    }

    /// View of the table with `race`'s own results taken out
    ///
    /// `key` must be the one the table was built with.
    pub fn without_race<F>(&self, race: &RaceGroup, key: F) -> HeldOutRates<'_>
    where
        F: Fn(&RunnerRecord) -> &str,
    {
        HeldOutRates {
            table: self,
            held_out: tally(race.runners.iter(), &key),
        }
    }

    pub fn jockeys(races: &[RaceGroup]) -> Self {
        Self::build(races, |r| r.jockey_id.as_str())
    }

    pub fn trainers(races: &[RaceGroup]) -> Self {
        Self::build(races, |r| r.trainer_id.as_str())
    }

    /// Win rate for `id`, or the default rate when unseen
    pub fn rate(&self, id: &str) -> f64 {
        self.rates
            .get(id)
            .map(WinRate::rate)
            .unwrap_or(self.default_rate)
    }

    pub fn get(&self, id: &str) -> Option<&WinRate> {
        self.rates.get(id)
    }

    pub fn default_rate(&self) -> f64 {
        self.default_rate
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rates.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

/// Win rates excluding one race, falling back to the default when
/// nothing else remains for an id
#[derive(Debug)]
pub struct HeldOutRates<'a> {
    table: &'a WinRateTable,
    held_out: BTreeMap<String, WinRate>,
}

impl HeldOutRates<'_> {
    pub fn rate(&self, id: &str) -> f64 {
        let Some(total) = self.table.get(id) else {
            return self.table.default_rate;
        };
        let own = self.held_out.get(id).copied().unwrap_or_default();
        let rest = WinRate {
            starts: total.starts.saturating_sub(own.starts),
            wins: total.wins.saturating_sub(own.wins),
        };
        if rest.starts == 0 {
            self.table.default_rate
        } else {
            rest.rate()
        }
    }
}

/// Starts and wins per key over runners with a known finish
fn tally<'r, I, F>(runners: I, key: &F) -> BTreeMap<String, WinRate>
where
    I: Iterator<Item = &'r RunnerRecord>,
    F: Fn(&RunnerRecord) -> &str,
{
    let mut rates: BTreeMap<String, WinRate> = BTreeMap::new();
    for runner in runners {
        let Some(won) = runner.is_win() else {
            continue;
        };
        let entry = rates.entry(key(runner).to_string()).or_default();
        entry.starts += 1;
        if won {
            entry.wins += 1;
        }
    }
    rates
}
