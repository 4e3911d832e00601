use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Runner entry as delivered by a data source (CSV column names)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRunnerRecord {
    pub race_id: String,
    /// YYYYMMDD
    pub race_date: String,
    pub horse_id: String,
    #[serde(default)]
    pub horse_name: Option<String>,
    /// Saddle-cloth number (display only)
    #[serde(default)]
    pub horse_num: Option<i64>,
    pub jockey_id: String,
    pub trainer_id: String,
    /// Unknown for races that have not been run yet
    #[serde(default)]
    pub finish_position: Option<i64>,
    pub horse_weight: f64,
    #[serde(default)]
    pub prev_horse_weight: Option<f64>,
    /// YYYYMMDD, absent for a debut
    #[serde(default)]
    pub prev_race_date: Option<String>,
    pub popularity: i64,
    pub win_odds: f64,
    /// Metres
    pub distance: f64,
    pub track_type: String,
    pub track_condition: String,
    pub age: i64,
    pub sex: String,
    pub post_position: i64,
    pub num_runners: i64,
}

/// Track surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackType {
    Turf,
    Dirt,
    Jump,
}

impl TrackType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "芝" | "turf" | "Turf" => Some(TrackType::Turf),
            "ダート" | "ダ" | "dirt" | "Dirt" => Some(TrackType::Dirt),
            "障害" | "障" | "jump" | "Jump" => Some(TrackType::Jump),
            _ => None,
        }
    }

    pub fn encode(self) -> f64 {
        match self {
            TrackType::Turf => 0.0,
            TrackType::Dirt => 1.0,
            TrackType::Jump => 2.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrackType::Turf => "芝",
            TrackType::Dirt => "ダート",
            TrackType::Jump => "障害",
        }
    }
}

/// Going (馬場状態)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackCondition {
    Firm,
    Good,
    Yielding,
    Soft,
}

impl TrackCondition {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "良" | "firm" | "Firm" => Some(TrackCondition::Firm),
            "稍重" | "稍" | "good" | "Good" => Some(TrackCondition::Good),
            "重" | "yielding" | "Yielding" => Some(TrackCondition::Yielding),
            "不良" | "不" | "soft" | "Soft" => Some(TrackCondition::Soft),
            _ => None,
        }
    }

    pub fn encode(self) -> f64 {
        match self {
            TrackCondition::Firm => 0.0,
            TrackCondition::Good => 1.0,
            TrackCondition::Yielding => 2.0,
            TrackCondition::Soft => 3.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TrackCondition::Firm => "良",
            TrackCondition::Good => "稍重",
            TrackCondition::Yielding => "重",
            TrackCondition::Soft => "不良",
        }
    }
}

/// Horse sex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sex {
    Male,
    Female,
    Gelding,
}

impl Sex {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "牡" | "male" | "colt" | "M" => Some(Sex::Male),
            "牝" | "female" | "filly" | "F" => Some(Sex::Female),
            "騸" | "セ" | "gelding" | "G" => Some(Sex::Gelding),
            _ => None,
        }
    }

    pub fn encode(self) -> f64 {
        match self {
            Sex::Male => 0.0,
            Sex::Female => 1.0,
            Sex::Gelding => 2.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Sex::Male => "牡",
            Sex::Female => "牝",
            Sex::Gelding => "騸",
        }
    }
}

/// Canonical runner record produced by the preprocessor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerRecord {
    pub race_id: String,
    pub race_date: NaiveDate,
    pub horse_id: String,
    pub horse_name: Option<String>,
    pub horse_num: u32,
    pub jockey_id: String,
    pub trainer_id: String,
    pub finish_position: Option<u32>,
    pub horse_weight: f64,
    pub prev_horse_weight: Option<f64>,
    pub prev_race_date: Option<NaiveDate>,
    pub popularity: u32,
    pub win_odds: f64,
    pub distance_m: f64,
    pub track_type: TrackType,
    pub track_condition: TrackCondition,
    pub age: u32,
    pub sex: Sex,
    pub post_position: u32,
    pub num_runners: u32,
}

impl RunnerRecord {
    /// Win label; `None` when the race has not been run
    pub fn is_win(&self) -> Option<bool> {
        self.finish_position.map(|p| p == 1)
    }

    pub fn is_top3(&self) -> Option<bool> {
        self.finish_position.map(|p| p <= 3)
    }

    /// Current minus previous weight, 0 without a previous race
    pub fn weight_diff(&self) -> f64 {
        self.prev_horse_weight
            .map(|prev| self.horse_weight - prev)
            .unwrap_or(0.0)
    }

    /// Days since the previous start, 0 without a previous race
    pub fn days_since_last_race(&self) -> f64 {
        self.prev_race_date
            .map(|prev| (self.race_date - prev).num_days() as f64)
            .unwrap_or(0.0)
    }
}

/// All runners sharing a race id
#[derive(Debug, Clone, PartialEq)]
pub struct RaceGroup {
    pub race_id: String,
    pub race_date: NaiveDate,
    pub runners: Vec<RunnerRecord>,
}

impl RaceGroup {
    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }

    /// Whether every runner has a known finishing position
    pub fn is_settled(&self) -> bool {
        !self.runners.is_empty() && self.runners.iter().all(|r| r.finish_position.is_some())
    }
}

/// Win probability for one runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerPrediction {
    pub horse_num: u32,
    pub horse_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub horse_name: Option<String>,
    pub jockey_id: String,
    pub win_odds: f64,
    pub popularity: u32,
    pub win_probability: f64,
    pub prediction_rank: u32,
}

/// Ranked prediction for a race (highest win probability first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RacePrediction {
    pub race_id: String,
    pub race_date: NaiveDate,
    pub runners: Vec<RunnerPrediction>,
}

impl RacePrediction {
    /// Top picks with their handicapping marks (本命, 対抗, 単穴)
    pub fn marked_picks(&self) -> Vec<(&'static str, &RunnerPrediction)> {
        ["◎本命", "○対抗", "▲単穴"]
            .into_iter()
            .zip(self.runners.iter())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> RunnerRecord {
        RunnerRecord {
            race_id: "20240001".to_string(),
            race_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            horse_id: "H1001".to_string(),
            horse_name: None,
            horse_num: 1,
            jockey_id: "J01".to_string(),
            trainer_id: "T001".to_string(),
            finish_position: Some(2),
            horse_weight: 480.0,
            prev_horse_weight: Some(474.0),
            prev_race_date: Some(NaiveDate::from_ymd_opt(2024, 2, 25).unwrap()),
            popularity: 3,
            win_odds: 6.4,
            distance_m: 1600.0,
            track_type: TrackType::Turf,
            track_condition: TrackCondition::Firm,
            age: 4,
            sex: Sex::Male,
            post_position: 1,
            num_runners: 12,
        }
    }

    #[test]
    fn test_parse_categoricals() {
        assert_eq!(TrackType::parse("芝"), Some(TrackType::Turf));
        assert_eq!(TrackType::parse("dirt"), Some(TrackType::Dirt));
        assert_eq!(TrackType::parse("sand"), None);
        assert_eq!(TrackCondition::parse("稍重"), Some(TrackCondition::Good));
        assert_eq!(TrackCondition::parse("不良"), Some(TrackCondition::Soft));
        assert_eq!(Sex::parse("騸"), Some(Sex::Gelding));
        assert_eq!(Sex::parse("セ"), Some(Sex::Gelding));
        assert_eq!(Sex::parse("?"), None);
    }

    #[test]
    fn test_encodings() {
        assert_eq!(TrackType::Jump.encode(), 2.0);
        assert_eq!(TrackCondition::Soft.encode(), 3.0);
        assert_eq!(Sex::Female.encode(), 1.0);
    }

    #[test]
    fn test_label_round_trips_through_parse() {
        for t in [TrackType::Turf, TrackType::Dirt, TrackType::Jump] {
            assert_eq!(TrackType::parse(t.label()), Some(t));
        }
        for c in [
            TrackCondition::Firm,
            TrackCondition::Good,
            TrackCondition::Yielding,
            TrackCondition::Soft,
        ] {
            assert_eq!(TrackCondition::parse(c.label()), Some(c));
        }
    }

    #[test]
    fn test_previous_race_derivations() {
        let r = runner();
        assert!((r.weight_diff() - 6.0).abs() < 1e-9);
        assert!((r.days_since_last_race() - 14.0).abs() < 1e-9);
        assert_eq!(r.is_win(), Some(false));
        assert_eq!(r.is_top3(), Some(true));
    }

    #[test]
    fn test_debut_has_zero_diffs() {
        let mut r = runner();
        r.prev_horse_weight = None;
        r.prev_race_date = None;
        r.finish_position = None;
        assert_eq!(r.weight_diff(), 0.0);
        assert_eq!(r.days_since_last_race(), 0.0);
        assert_eq!(r.is_win(), None);
    }
}
