//! Deterministic offline sample feed
//!
//! Generates schema-identical race results for development and for runs
//! where the results export is unavailable. A fixed pool of horses races
//! repeatedly, so previous-race weights and dates and past top-3 rates are
//! real history rather than noise.

use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;

use super::source::{DateRange, RaceSource};
use crate::error::Result;
use crate::models::{RawRunnerRecord, Sex, TrackCondition, TrackType};

const DEFAULT_RACES: usize = 100;
const DEFAULT_SEED: u64 = 42;
const MIN_RUNNERS: usize = 8;
const MAX_RUNNERS: usize = 16;

const HORSE_POOL: usize = 320;
const JOCKEYS: usize = 40;
const TRAINERS: usize = 80;

/// Race distances in metres
const DISTANCES: [f64; 7] = [1000.0, 1200.0, 1400.0, 1600.0, 1800.0, 2000.0, 2400.0];

/// Bookmaker margin applied to the implied probabilities
const TAKEOUT: f64 = 0.2;

struct Horse {
    id: String,
    name: String,
    ability: f64,
    base_weight: f64,
    age: i64,
    sex: Sex,
    trainer: usize,
    last_weight: Option<f64>,
    last_date: Option<NaiveDate>,
}

/// Seeded sample generator
#[derive(Debug, Clone)]
pub struct SampleFeed {
    n_races: usize,
    seed: u64,
}

impl Default for SampleFeed {
    fn default() -> Self {
        Self {
            n_races: DEFAULT_RACES,
            seed: DEFAULT_SEED,
        }
    }
}

impl SampleFeed {
    pub fn new(n_races: usize, seed: u64) -> Self {
        Self { n_races, seed }
    }

    pub fn n_races(&self) -> usize {
        self.n_races
    }

    /// Generate the sample for `range`
    pub fn generate(&self, range: &DateRange) -> Vec<RawRunnerRecord> {
        let mut rng = StdRng::seed_from_u64(self.seed);

        let mut horses: Vec<Horse> = (0..HORSE_POOL)
            .map(|i| Horse {
                id: format!("H{:04}", 1001 + i),
                name: format!("テスト馬{:03}", i + 1),
                ability: rng.gen::<f64>(),
                base_weight: rng.gen_range(420.0..540.0_f64).round(),
                age: rng.gen_range(2..=7),
                sex: *[Sex::Male, Sex::Male, Sex::Female, Sex::Gelding]
                    .choose(&mut rng)
                    .unwrap_or(&Sex::Male),
                trainer: rng.gen_range(0..TRAINERS),
                last_weight: None,
                last_date: None,
            })
            .collect();
        let jockey_skill: Vec<f64> = (0..JOCKEYS).map(|_| rng.gen::<f64>()).collect();

        let days = range.num_days();
        let mut race_numbers: HashMap<i32, usize> = HashMap::new();
        let mut records = Vec::new();

        for i in 0..self.n_races {
            let offset = (i as i64 * (days + 1)) / self.n_races as i64;
            let date = range.from + Duration::days(offset);

            // A horse runs at most once per day
            let candidates: Vec<usize> = (0..horses.len())
                .filter(|&h| horses[h].last_date.map_or(true, |d| d < date))
                .collect();
            let wanted = rng.gen_range(MIN_RUNNERS..=MAX_RUNNERS).min(candidates.len());
            if wanted == 0 {
                continue;
            }
            let mut field: Vec<usize> = candidates
                .choose_multiple(&mut rng, wanted)
                .copied()
                .collect();
            field.shuffle(&mut rng);

            let number = race_numbers.entry(date.year()).or_insert(0);
            *number += 1;
            let race_id = format!("{}{:04}", date.year(), number);

            let distance = *DISTANCES.choose(&mut rng).unwrap_or(&1600.0);
            let track_type = if rng.gen_bool(0.55) {
                TrackType::Turf
            } else {
                TrackType::Dirt
            };
            let track_condition = *[
                TrackCondition::Firm,
                TrackCondition::Firm,
                TrackCondition::Good,
                TrackCondition::Yielding,
                TrackCondition::Soft,
            ]
            .choose(&mut rng)
            .unwrap_or(&TrackCondition::Firm);

            let jockeys: Vec<usize> = (0..JOCKEYS)
                .collect::<Vec<_>>()
                .choose_multiple(&mut rng, field.len())
                .copied()
                .collect();

            // Market view and actual performance share ability and jockey skill
            let rating: Vec<f64> = field
                .iter()
                .zip(&jockeys)
                .map(|(&h, &j)| 2.0 * horses[h].ability + jockey_skill[j])
                .collect();
            let market: Vec<f64> = rating
                .iter()
                .map(|r| (2.0 * r + rng.gen_range(-0.3..0.3)).exp())
                .collect();
            let market_total: f64 = market.iter().sum();
            let odds: Vec<f64> = market
                .iter()
                .map(|m| {
                    let fair = market_total / m * (1.0 - TAKEOUT);
                    ((fair * 10.0).round() / 10.0).clamp(1.1, 999.9)
                })
                .collect();
            let performance: Vec<f64> = rating
                .iter()
                .map(|r| r + rng.gen_range(-0.9..0.9))
                .collect();

            let finish = ordinal_ranks(&performance, true);
            let popularity = ordinal_ranks(&odds, false);

            for (slot, &h) in field.iter().enumerate() {
                let weight = horses[h].base_weight + rng.gen_range(-8..=8) as f64;
                let horse = &horses[h];
                records.push(RawRunnerRecord {
                    race_id: race_id.clone(),
                    race_date: date.format("%Y%m%d").to_string(),
                    horse_id: horse.id.clone(),
                    horse_name: Some(horse.name.clone()),
                    horse_num: Some(slot as i64 + 1),
                    jockey_id: format!("J{:02}", jockeys[slot] + 1),
                    trainer_id: format!("T{:03}", horse.trainer + 1),
                    finish_position: Some(finish[slot] as i64),
                    horse_weight: weight,
                    prev_horse_weight: horse.last_weight,
                    prev_race_date: horse.last_date.map(|d| d.format("%Y%m%d").to_string()),
                    popularity: popularity[slot] as i64,
                    win_odds: odds[slot],
                    distance,
                    track_type: track_type.label().to_string(),
                    track_condition: track_condition.label().to_string(),
                    age: horse.age,
                    sex: horse.sex.label().to_string(),
                    post_position: slot as i64 + 1,
                    num_runners: field.len() as i64,
                });
                let horse = &mut horses[h];
                horse.last_weight = Some(weight);
                horse.last_date = Some(date);
            }
        }

        records
    }
}

impl RaceSource for SampleFeed {
    fn name(&self) -> &str {
        "sample"
    }

    fn fetch(&self, range: &DateRange) -> Result<Vec<RawRunnerRecord>> {
        Ok(self.generate(range))
    }
}

/// Distinct 1-based ranks, ties broken by position
fn ordinal_ranks(values: &[f64], descending: bool) -> Vec<u32> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| {
        let cmp = values[a].total_cmp(&values[b]);
        if descending {
            cmp.reverse()
        } else {
            cmp
        }
    });
    let mut ranks = vec![0; values.len()];
    for (rank, idx) in order.into_iter().enumerate() {
        ranks[idx] = rank as u32 + 1;
    }
    ranks
}
