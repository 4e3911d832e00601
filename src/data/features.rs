//! Feature Engineering
//!
//! Generate the 19 model features per runner from the runner's own record,
//! historical aggregates and statistics relative to the rest of its race.

use serde::{Deserialize, Serialize};

use super::history::{HorseHistoryIndex, WinRateTable};
use crate::models::{RaceGroup, RunnerRecord};

pub const NUM_FEATURES: usize = 19;

/// Feature keys in model input order
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "horse_weight",
    "horse_weight_diff",
    "age",
    "sex_enc",
    "post_position",
    "distance_km",
    "track_type_enc",
    "track_condition_enc",
    "days_since_last_race",
    "past_top3_rate",
    "jockey_win_rate",
    "trainer_win_rate",
    "popularity",
    "win_odds",
    "odds_rank_in_race",
    "odds_norm",
    "weight_rank_in_race",
    "jockey_rank_in_race",
    "horses_in_race",
];

/// Historical lookups shared by every race in a run
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext<'a> {
    pub jockey_rates: &'a WinRateTable,
    pub trainer_rates: &'a WinRateTable,
    pub history: &'a HorseHistoryIndex,
}

/// Features computed from the runner alone (plus historical lookups)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaseFeatures {
    pub horse_weight: f64,
    pub horse_weight_diff: f64,
    pub age: f64,
    pub sex_enc: f64,
    pub post_position: f64,
    pub distance_km: f64,
    pub track_type_enc: f64,
    pub track_condition_enc: f64,
    pub days_since_last_race: f64,
    pub past_top3_rate: f64,
    pub jockey_win_rate: f64,
    pub trainer_win_rate: f64,
    pub popularity: f64,
    pub win_odds: f64,
}

/// Relative features within a race
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelativeFeatures {
    pub odds_rank_in_race: f64,
    pub odds_norm: f64,
    pub weight_rank_in_race: f64,
    pub jockey_rank_in_race: f64,
    pub horses_in_race: f64,
}

/// Model input row for one runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub race_id: String,
    pub horse_id: String,
    pub values: [f64; NUM_FEATURES],
}

impl FeatureVector {
    pub fn new(runner: &RunnerRecord, base: &BaseFeatures, relative: &RelativeFeatures) -> Self {
        Self {
            race_id: runner.race_id.clone(),
            horse_id: runner.horse_id.clone(),
            values: [
                base.horse_weight,
                base.horse_weight_diff,
                base.age,
                base.sex_enc,
                base.post_position,
                base.distance_km,
                base.track_type_enc,
                base.track_condition_enc,
                base.days_since_last_race,
                base.past_top3_rate,
                base.jockey_win_rate,
                base.trainer_win_rate,
                base.popularity,
                base.win_odds,
                relative.odds_rank_in_race,
                relative.odds_norm,
                relative.weight_rank_in_race,
                relative.jockey_rank_in_race,
                relative.horses_in_race,
            ],
        }
    }

    /// Value of a named feature
    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|&n| n == name)
            .map(|i| self.values[i])
    }
}

impl AsRef<[f64]> for FeatureVector {
    fn as_ref(&self) -> &[f64] {
        &self.values
    }
}

/// Labelled feature matrix for training
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub features: Vec<FeatureVector>,
    /// `finish_position == 1`
    pub labels: Vec<bool>,
    /// Races contributing at least one labelled runner
    pub races: usize,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn positives(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }
}

/// Feature engineering for race groups
pub struct FeatureEngineering;

impl FeatureEngineering {
    /// Base features for one runner given its looked-up win rates
    fn base_features(
        runner: &RunnerRecord,
        history: &HorseHistoryIndex,
        jockey_win_rate: f64,
        trainer_win_rate: f64,
    ) -> BaseFeatures {
        BaseFeatures {
            horse_weight: runner.horse_weight,
            horse_weight_diff: runner.weight_diff(),
            age: runner.age as f64,
            sex_enc: runner.sex.encode(),
            post_position: runner.post_position as f64,
            distance_km: runner.distance_m / 1000.0,
            track_type_enc: runner.track_type.encode(),
            track_condition_enc: runner.track_condition.encode(),
            days_since_last_race: runner.days_since_last_race(),
            past_top3_rate: history.past_top3_rate(&runner.horse_id, runner.race_date),
            jockey_win_rate,
            trainer_win_rate,
            popularity: runner.popularity as f64,
            win_odds: runner.win_odds,
        }
    }

    /// Create relative features for all runners of a race, in input order
    pub fn create_relative_features(
        runners: &[&RunnerRecord],
        jockey_rates: &[f64],
    ) -> Vec<RelativeFeatures> {
        if runners.is_empty() {
            return Vec::new();
        }

        let odds: Vec<f64> = runners.iter().map(|r| r.win_odds).collect();
        let weights: Vec<f64> = runners.iter().map(|r| r.horse_weight).collect();
        let max_odds = odds.iter().copied().fold(f64::MIN, f64::max);

        let odds_ranks = competition_ranks(&odds, false);
        let weight_ranks = competition_ranks(&weights, true);
        let jockey_ranks = competition_ranks(jockey_rates, true);

        (0..runners.len())
            .map(|i| RelativeFeatures {
                odds_rank_in_race: odds_ranks[i],
                odds_norm: odds[i] / max_odds,
                weight_rank_in_race: weight_ranks[i],
                jockey_rank_in_race: jockey_ranks[i],
                horses_in_race: runners.len() as f64,
            })
            .collect()
    }

    /// Create feature vectors for a race, ordered by (post position, horse id)
    pub fn create_race_features(race: &RaceGroup, ctx: &FeatureContext<'_>) -> Vec<FeatureVector> {
        Self::race_features(
            race,
            ctx.history,
            |r| ctx.jockey_rates.rate(&r.jockey_id),
            |r| ctx.trainer_rates.rate(&r.trainer_id),
        )
    }

    /// Training-time features for a race already counted in the win-rate tables
    ///
    /// Jockey and trainer rates leave the race's own results out, so a
    /// runner's label never feeds its own rate features.
    pub fn create_training_race_features(
        race: &RaceGroup,
        ctx: &FeatureContext<'_>,
    ) -> Vec<FeatureVector> {
        let jockeys = ctx.jockey_rates.without_race(race, |r| r.jockey_id.as_str());
        let trainers = ctx.trainer_rates.without_race(race, |r| r.trainer_id.as_str());
        Self::race_features(
            race,
            ctx.history,
            |r| jockeys.rate(&r.jockey_id),
            |r| trainers.rate(&r.trainer_id),
        )
    }

    fn race_features<J, T>(
        race: &RaceGroup,
        history: &HorseHistoryIndex,
        jockey_rate: J,
        trainer_rate: T,
    ) -> Vec<FeatureVector>
    where
        J: Fn(&RunnerRecord) -> f64,
        T: Fn(&RunnerRecord) -> f64,
    {
        let mut runners: Vec<&RunnerRecord> = race.runners.iter().collect();
        runners.sort_by(|a, b| {
            a.post_position
                .cmp(&b.post_position)
                .then_with(|| a.horse_id.cmp(&b.horse_id))
        });

        let base: Vec<BaseFeatures> = runners
            .iter()
            .map(|&r| Self::base_features(r, history, jockey_rate(r), trainer_rate(r)))
            .collect();
        let jockey_rates: Vec<f64> = base.iter().map(|b| b.jockey_win_rate).collect();
        let relative = Self::create_relative_features(&runners, &jockey_rates);

        runners
            .iter()
            .zip(base.iter().zip(relative.iter()))
            .map(|(runner, (b, rel))| FeatureVector::new(runner, b, rel))
            .collect()
    }

    /// Engineer every race and label runners with a known finishing position
    pub fn build_training_set(races: &[RaceGroup], ctx: &FeatureContext<'_>) -> TrainingSet {
        let mut set = TrainingSet::default();

        for race in races {
            let features = Self::create_training_race_features(race, ctx);
            let mut labelled = false;
            for fv in features {
                // Horse ids are unique within a group
                let label = race
                    .runners
                    .iter()
                    .find(|r| r.horse_id == fv.horse_id)
                    .and_then(RunnerRecord::is_win);
                if let Some(won) = label {
                    set.features.push(fv);
                    set.labels.push(won);
                    labelled = true;
                }
            }
            if labelled {
                set.races += 1;
            }
        }

        set
    }
}

/// Standard competition ranks ("min" method), 1 = best
///
/// Equal values share a rank and the next distinct value skips, so
/// `[2.0, 2.0, 5.0]` ascending ranks as `[1, 1, 3]`.
pub fn competition_ranks(values: &[f64], descending: bool) -> Vec<f64> {
    values
        .iter()
        .map(|&v| {
            let better = values
                .iter()
                .filter(|&&other| if descending { other > v } else { other < v })
                .count();
            (better + 1) as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Sex, TrackCondition, TrackType};
    use chrono::NaiveDate;

    fn create_test_runner(
        race_id: &str,
        day: u32,
        horse: &str,
        post: u32,
        odds: f64,
        weight: f64,
        jockey: &str,
        finish: Option<u32>,
    ) -> RunnerRecord {
        RunnerRecord {
            race_id: race_id.to_string(),
            race_date: NaiveDate::from_ymd_opt(2024, 5, day).unwrap(),
            horse_id: horse.to_string(),
            horse_name: None,
            horse_num: post,
            jockey_id: jockey.to_string(),
            trainer_id: "T001".to_string(),
            finish_position: finish,
            horse_weight: weight,
            prev_horse_weight: Some(weight - 4.0),
            prev_race_date: Some(NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()),
            popularity: post,
            win_odds: odds,
            distance_m: 2000.0,
            track_type: TrackType::Turf,
            track_condition: TrackCondition::Good,
            age: 4,
            sex: Sex::Gelding,
            post_position: post,
            num_runners: 3,
        }
    }

    fn create_test_races() -> Vec<RaceGroup> {
        let r1 = vec![
            create_test_runner("R1", 5, "H1", 1, 2.0, 480.0, "J1", Some(1)),
            create_test_runner("R1", 5, "H2", 2, 4.5, 470.0, "J2", Some(2)),
            create_test_runner("R1", 5, "H3", 3, 9.0, 490.0, "J3", Some(3)),
        ];
        let r2 = vec![
            create_test_runner("R2", 12, "H3", 1, 2.0, 492.0, "J1", Some(2)),
            create_test_runner("R2", 12, "H1", 2, 2.0, 478.0, "J2", Some(4)),
            create_test_runner("R2", 12, "H4", 3, 6.0, 500.0, "J3", Some(1)),
            create_test_runner("R2", 12, "H5", 4, 30.0, 460.0, "J9", None),
        ];
        vec![
            RaceGroup {
                race_id: "R1".to_string(),
                race_date: NaiveDate::from_ymd_opt(2024, 5, 5).unwrap(),
                runners: r1,
            },
            RaceGroup {
                race_id: "R2".to_string(),
                race_date: NaiveDate::from_ymd_opt(2024, 5, 12).unwrap(),
                runners: r2,
            },
        ]
    }

    struct Tables {
        jockeys: WinRateTable,
        trainers: WinRateTable,
        history: HorseHistoryIndex,
    }

    impl Tables {
        fn new(races: &[RaceGroup]) -> Self {
            Self {
                jockeys: WinRateTable::jockeys(races),
                trainers: WinRateTable::trainers(races),
                history: HorseHistoryIndex::from_races(races),
            }
        }

        fn ctx(&self) -> FeatureContext<'_> {
            FeatureContext {
                jockey_rates: &self.jockeys,
                trainer_rates: &self.trainers,
                history: &self.history,
            }
        }
    }

    #[test]
    fn test_feature_names() {
        assert_eq!(FEATURE_NAMES.len(), NUM_FEATURES);
        assert_eq!(FEATURE_NAMES[0], "horse_weight");
        assert_eq!(FEATURE_NAMES[9], "past_top3_rate");
        assert_eq!(FEATURE_NAMES[18], "horses_in_race");
    }

    #[test]
    fn test_competition_ranks() {
        assert_eq!(competition_ranks(&[2.0, 2.0, 5.0], false), vec![1.0, 1.0, 3.0]);
        assert_eq!(competition_ranks(&[480.0, 470.0, 480.0], true), vec![1.0, 3.0, 1.0]);
        assert_eq!(competition_ranks(&[7.0], false), vec![1.0]);
        assert!(competition_ranks(&[], true).is_empty());
    }

    #[test]
    fn test_create_base_features() {
        let races = create_test_races();
        let tables = Tables::new(&races);
        let runner = &races[0].runners[0];
        let base = FeatureEngineering::base_features(
            runner,
            &tables.history,
            tables.jockeys.rate(&runner.jockey_id),
            tables.trainers.rate(&runner.trainer_id),
        );

        assert_eq!(base.horse_weight, 480.0);
        assert_eq!(base.horse_weight_diff, 4.0);
        assert_eq!(base.sex_enc, 2.0);
        assert_eq!(base.distance_km, 2.0);
        assert_eq!(base.track_condition_enc, 1.0);
        assert_eq!(base.days_since_last_race, 34.0);
    }

    #[test]
    fn test_tied_odds_share_rank() {
        let races = create_test_races();
        let tables = Tables::new(&races);
        let features = FeatureEngineering::create_race_features(&races[1], &tables.ctx());

        let ranks: Vec<f64> = features
            .iter()
            .map(|f| f.get("odds_rank_in_race").unwrap())
            .collect();
        assert_eq!(ranks, vec![1.0, 1.0, 3.0, 4.0]);

        let norm = features[0].get("odds_norm").unwrap();
        assert!((norm - 2.0 / 30.0).abs() < 1e-12);
        assert_eq!(features[3].get("odds_norm"), Some(1.0));
    }

    #[test]
    fn test_rank_features_are_valid_competition_ranks() {
        let races = create_test_races();
        let tables = Tables::new(&races);

        for race in &races {
            let features = FeatureEngineering::create_race_features(race, &tables.ctx());
            let n = features.len() as f64;
            for key in ["odds_rank_in_race", "weight_rank_in_race", "jockey_rank_in_race"] {
                let ranks: Vec<f64> = features.iter().map(|f| f.get(key).unwrap()).collect();
                assert!(ranks.iter().all(|&r| r >= 1.0 && r <= n));
                assert!(ranks.contains(&1.0));
                for &r in &ranks {
                    // Rank equals 1 + number of strictly better entries
                    let better = ranks.iter().filter(|&&o| o < r).count() as f64;
                    assert_eq!(r, better + 1.0, "{}", key);
                }
            }
            assert!(features.iter().all(|f| f.get("horses_in_race") == Some(n)));
        }
    }

    #[test]
    fn test_past_top3_rate_excludes_current_and_later_races() {
        let races = create_test_races();
        let tables = Tables::new(&races);

        let first = FeatureEngineering::create_race_features(&races[0], &tables.ctx());
        // H1 won R1 but that result is not visible inside R1
        assert_eq!(first[0].get("past_top3_rate"), Some(0.0));

        let second = FeatureEngineering::create_race_features(&races[1], &tables.ctx());
        let h1 = second.iter().find(|f| f.horse_id == "H1").unwrap();
        assert_eq!(h1.get("past_top3_rate"), Some(1.0));
        let h4 = second.iter().find(|f| f.horse_id == "H4").unwrap();
        assert_eq!(h4.get("past_top3_rate"), Some(0.0));
    }

    #[test]
    fn test_feature_construction_is_deterministic() {
        let races = create_test_races();
        let tables = Tables::new(&races);
        let a = FeatureEngineering::create_race_features(&races[1], &tables.ctx());

        let mut shuffled = races[1].clone();
        shuffled.runners.reverse();
        let b = FeatureEngineering::create_race_features(&shuffled, &tables.ctx());
        assert_eq!(a, b);
    }

    #[test]
    fn test_single_runner_race() {
        let race = RaceGroup {
            race_id: "R9".to_string(),
            race_date: NaiveDate::from_ymd_opt(2024, 5, 20).unwrap(),
            runners: vec![create_test_runner("R9", 20, "H7", 1, 1.5, 470.0, "J1", None)],
        };
        let tables = Tables::new(&create_test_races());
        let features = FeatureEngineering::create_race_features(&race, &tables.ctx());

        assert_eq!(features.len(), 1);
        let f = &features[0];
        assert_eq!(f.get("horses_in_race"), Some(1.0));
        assert_eq!(f.get("odds_rank_in_race"), Some(1.0));
        assert_eq!(f.get("weight_rank_in_race"), Some(1.0));
        assert_eq!(f.get("jockey_rank_in_race"), Some(1.0));
        assert_eq!(f.get("odds_norm"), Some(1.0));
    }

    #[test]
    fn test_unseen_jockey_uses_default_rate() {
        let races = create_test_races();
        let tables = Tables::new(&races);
        let features = FeatureEngineering::create_race_features(&races[1], &tables.ctx());

        let h5 = features.iter().find(|f| f.horse_id == "H5").unwrap();
        assert!(!tables.jockeys.contains("J9"));
        assert_eq!(
            h5.get("jockey_win_rate"),
            Some(tables.jockeys.default_rate())
        );
    }

    #[test]
    fn test_build_training_set_drops_unknown_finish() {
        let races = create_test_races();
        let tables = Tables::new(&races);
        let set = FeatureEngineering::build_training_set(&races, &tables.ctx());

        assert_eq!(set.len(), 6);
        assert_eq!(set.labels.len(), 6);
        assert_eq!(set.positives(), 2);
        assert_eq!(set.races, 2);
        assert!(set.features.iter().all(|f| f.horse_id != "H5"));
    }

    /// Reverse the finishing order of one race
    fn flip_finishes(races: &mut [RaceGroup], race: usize) {
        let n = races[race].runners.len() as u32;
        for runner in &mut races[race].runners {
            runner.finish_position = runner.finish_position.map(|p| n + 1 - p.min(n));
        }
    }

    fn column(set: &TrainingSet, race_id: &str, key: &str) -> Vec<u64> {
        set.features
            .iter()
            .filter(|f| f.race_id == race_id)
            .map(|f| f.get(key).unwrap().to_bits())
            .collect()
    }

    #[test]
    fn test_training_rates_ignore_own_race_outcome() {
        let races = create_test_races();
        let mut flipped = races.clone();
        flip_finishes(&mut flipped, 0);

        let original = Tables::new(&races);
        let changed = Tables::new(&flipped);
        let a = FeatureEngineering::build_training_set(&races, &original.ctx());
        let b = FeatureEngineering::build_training_set(&flipped, &changed.ctx());

        assert_ne!(a.labels, b.labels);
        for key in ["jockey_win_rate", "trainer_win_rate", "jockey_rank_in_race"] {
            assert_eq!(column(&a, "R1", key), column(&b, "R1", key), "{}", key);
        }
    }

    #[test]
    fn test_single_start_jockey_gets_default_rate_in_training() {
        let mut races = create_test_races();
        races[0].runners[0].jockey_id = "JX".to_string();
        let tables = Tables::new(&races);
        assert_eq!(tables.jockeys.rate("JX"), 1.0);

        let set = FeatureEngineering::build_training_set(&races, &tables.ctx());
        let row = set.features.iter().position(|f| f.race_id == "R1" && f.horse_id == "H1")
            .unwrap();
        assert!(set.labels[row]);
        assert_eq!(
            set.features[row].get("jockey_win_rate"),
            Some(tables.jockeys.default_rate())
        );
    }

    #[test]
    fn test_past_top3_rate_unchanged_by_own_outcome() {
        let races = create_test_races();
        let mut flipped = races.clone();
        flip_finishes(&mut flipped, 1);

        let original = Tables::new(&races);
        let changed = Tables::new(&flipped);
        let a = FeatureEngineering::build_training_set(&races, &original.ctx());
        let b = FeatureEngineering::build_training_set(&flipped, &changed.ctx());

        assert_eq!(
            column(&a, "R2", "past_top3_rate"),
            column(&b, "R2", "past_top3_rate")
        );
        // Earlier races cannot see a later race either
        assert_eq!(
            column(&a, "R1", "past_top3_rate"),
            column(&b, "R1", "past_top3_rate")
        );
    }

    #[test]
    fn test_empty_race() {
        let race = RaceGroup {
            race_id: "R0".to_string(),
            race_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
            runners: Vec::new(),
        };
        let tables = Tables::new(&[]);
        assert!(FeatureEngineering::create_race_features(&race, &tables.ctx()).is_empty());
    }
}
