use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::core::{roc_auc, stratified_folds, CrossValidation, ForestParams, RandomForest};
use crate::data::{
    FeatureContext, FeatureVector, HorseHistoryIndex, WinRateTable, FEATURE_NAMES, NUM_FEATURES,
};
use crate::error::{PipelineError, Result};
use crate::models::{RaceGroup, RacePrediction, RunnerPrediction};

/// Artifact file name inside the model directory
pub const MODEL_FILENAME: &str = "horse_race_predictor.json";

/// Bumped whenever the feature set or artifact layout changes
pub const SCHEMA_VERSION: u32 = 1;

fn default_cv_folds() -> usize {
    5
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameters {
    #[serde(default)]
    pub forest: ForestParams,
    /// Stratified folds for the ROC-AUC estimate; below 2 disables it
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
}

impl Default for Hyperparameters {
    fn default() -> Self {
        Self {
            forest: ForestParams::default(),
            cv_folds: default_cv_folds(),
        }
    }
}

/// Summary of the run that produced an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub samples: usize,
    pub positives: usize,
    pub races: usize,
    pub features: usize,
    pub trees: usize,
    pub trained_from: Option<NaiveDate>,
    pub trained_to: Option<NaiveDate>,
    /// `None` when there was too little data for every fold to hold both classes
    pub cv_auc: Option<CrossValidation>,
}

/// Persisted model: forest, win-rate tables and feature layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub schema_version: u32,
    pub feature_names: Vec<String>,
    pub forest: RandomForest,
    pub jockey_rates: WinRateTable,
    pub trainer_rates: WinRateTable,
    pub training: TrainingSummary,
}

/// Fields checked before the full artifact is decoded
#[derive(Deserialize)]
struct ArtifactHeader {
    schema_version: u32,
    #[serde(default)]
    feature_names: Vec<String>,
}

fn check_layout(schema_version: u32, feature_names: &[String]) -> Result<()> {
    if schema_version != SCHEMA_VERSION {
        return Err(PipelineError::SchemaVersion {
            expected: SCHEMA_VERSION.to_string(),
            found: schema_version.to_string(),
        });
    }
    if feature_names.iter().map(String::as_str).ne(FEATURE_NAMES.iter().copied()) {
        return Err(PipelineError::SchemaVersion {
            expected: FEATURE_NAMES.join(","),
            found: feature_names.join(","),
        });
    }
    Ok(())
}

impl ModelArtifact {
    /// Fail unless the artifact matches this build's feature layout
    pub fn check_schema(&self) -> Result<()> {
        check_layout(self.schema_version, &self.feature_names)?;
        if self.forest.n_features() != NUM_FEATURES {
            return Err(PipelineError::SchemaVersion {
                expected: format!("{} features", NUM_FEATURES),
                found: format!("{} features", self.forest.n_features()),
            });
        }
        Ok(())
    }
}

/// Random forest win predictor
pub struct Predictor {
    artifact: ModelArtifact,
}

impl Predictor {
    /// Train on labelled feature vectors (`true` = winner)
    ///
    /// The win-rate tables the features were built from are stored in the
    /// artifact for prediction. The trained date range is attached with
    /// [`Predictor::with_date_range`].
    pub fn train(
        features: &[FeatureVector],
        labels: &[bool],
        jockey_rates: WinRateTable,
        trainer_rates: WinRateTable,
        hyperparameters: &Hyperparameters,
    ) -> Result<Self> {
        if features.is_empty() {
            return Err(PipelineError::InsufficientData(
                "no labelled runners to train on".to_string(),
            ));
        }
        if features.len() != labels.len() {
            return Err(PipelineError::InsufficientData(format!(
                "{} feature vectors but {} labels",
                features.len(),
                labels.len()
            )));
        }
        let positives = labels.iter().filter(|&&l| l).count();
        if positives == 0 || positives == labels.len() {
            return Err(PipelineError::InsufficientData(format!(
                "training labels are single-class ({} of {} winners)",
                positives,
                labels.len()
            )));
        }

        info!(
            "Training random forest: {} samples, {} winners, {} trees",
            features.len(),
            positives,
            hyperparameters.forest.n_trees
        );

        let cv_auc = Self::cross_validate(features, labels, hyperparameters)?;
        match &cv_auc {
            Some(cv) => info!(
                "Cross-validated ROC-AUC: {:.4} ± {:.4} ({} folds)",
                cv.auc_mean, cv.auc_std, cv.folds
            ),
            None => info!("Skipping cross-validation: too few samples per class"),
        }

        let forest = RandomForest::fit(features, labels, &hyperparameters.forest)?;

        let races: std::collections::BTreeSet<&str> =
            features.iter().map(|f| f.race_id.as_str()).collect();

        Ok(Self {
            artifact: ModelArtifact {
                schema_version: SCHEMA_VERSION,
                feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
                forest,
                jockey_rates,
                trainer_rates,
                training: TrainingSummary {
                    samples: features.len(),
                    positives,
                    races: races.len(),
                    features: NUM_FEATURES,
                    trees: hyperparameters.forest.n_trees,
                    trained_from: None,
                    trained_to: None,
                    cv_auc,
                },
            },
        })
    }

    /// Stratified K-fold ROC-AUC, `None` if a fold would miss a class
    fn cross_validate(
        features: &[FeatureVector],
        labels: &[bool],
        hyperparameters: &Hyperparameters,
    ) -> Result<Option<CrossValidation>> {
        let k = hyperparameters.cv_folds;
        let positives = labels.iter().filter(|&&l| l).count();
        let negatives = labels.len() - positives;
        if k < 2 || positives < k || negatives < k {
            return Ok(None);
        }

        let folds = stratified_folds(labels, k, hyperparameters.forest.seed);
        let mut in_fold = vec![usize::MAX; labels.len()];
        for (f, fold) in folds.iter().enumerate() {
            for &i in fold {
                in_fold[i] = f;
            }
        }

        let mut fold_aucs = Vec::with_capacity(k);
        for (f, fold) in folds.iter().enumerate() {
            let train_idx: Vec<usize> = (0..labels.len()).filter(|&i| in_fold[i] != f).collect();
            let train_rows: Vec<&FeatureVector> = train_idx.iter().map(|&i| &features[i]).collect();
            let train_labels: Vec<bool> = train_idx.iter().map(|&i| labels[i]).collect();

            let forest = RandomForest::fit(&train_rows, &train_labels, &hyperparameters.forest)?;
            let scores: Vec<f64> = fold
                .iter()
                .map(|&i| forest.predict_proba(&features[i].values))
                .collect();
            let fold_labels: Vec<bool> = fold.iter().map(|&i| labels[i]).collect();

            match roc_auc(&scores, &fold_labels) {
                Some(auc) => {
                    debug!("Fold {}: ROC-AUC {:.4}", f + 1, auc);
                    fold_aucs.push(auc);
                }
                None => return Ok(None),
            }
        }

        Ok(CrossValidation::from_fold_aucs(fold_aucs))
    }

    /// Wrap a decoded artifact after checking its feature layout
    pub fn from_artifact(artifact: ModelArtifact) -> Result<Self> {
        artifact.check_schema()?;
        Ok(Self { artifact })
    }

    /// Attach the jockey and trainer tables used to build the training features
    pub fn with_date_range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.artifact.training.trained_from = Some(from);
        self.artifact.training.trained_to = Some(to);
        self
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn summary(&self) -> &TrainingSummary {
        &self.artifact.training
    }

    /// Feature context backed by the artifact's win-rate tables
    pub fn feature_context<'a>(&'a self, history: &'a HorseHistoryIndex) -> FeatureContext<'a> {
        FeatureContext {
            jockey_rates: &self.artifact.jockey_rates,
            trainer_rates: &self.artifact.trainer_rates,
            history,
        }
    }

    /// Win probability per feature vector, each in [0, 1]
    ///
    /// Runners are scored independently, so a race's probabilities need not
    /// sum to 1.
    pub fn predict(&self, features: &[FeatureVector]) -> Vec<f64> {
        features
            .iter()
            .map(|f| self.artifact.forest.predict_proba(&f.values))
            .collect()
    }

    /// Score a race and rank its runners by win probability
    ///
    /// Ties are ordered by horse id; ranks run 1..N.
    pub fn predict_race(&self, race: &RaceGroup, features: &[FeatureVector]) -> RacePrediction {
        let probabilities = self.predict(features);

        let mut runners: Vec<RunnerPrediction> = features
            .iter()
            .zip(probabilities)
            .filter_map(|(fv, win_probability)| {
                let runner = race.runners.iter().find(|r| r.horse_id == fv.horse_id)?;
                Some(RunnerPrediction {
                    horse_num: runner.horse_num,
                    horse_id: runner.horse_id.clone(),
                    horse_name: runner.horse_name.clone(),
                    jockey_id: runner.jockey_id.clone(),
                    win_odds: runner.win_odds,
                    popularity: runner.popularity,
                    win_probability,
                    prediction_rank: 0,
                })
            })
            .collect();

        runners.sort_by(|a, b| {
            b.win_probability
                .total_cmp(&a.win_probability)
                .then_with(|| a.horse_id.cmp(&b.horse_id))
        });
        for (i, runner) in runners.iter_mut().enumerate() {
            runner.prediction_rank = i as u32 + 1;
        }

        RacePrediction {
            race_id: race.race_id.clone(),
            race_date: race.race_date,
            runners,
        }
    }

    /// Write the artifact as JSON, publishing it with an atomic rename
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;

        let tmp = NamedTempFile::new_in(dir).map_err(|e| PipelineError::io(dir, e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file());
            serde_json::to_writer(&mut writer, &self.artifact)?;
            writer.flush().map_err(|e| PipelineError::io(tmp.path(), e))?;
        }
        tmp.persist(path)
            .map_err(|e| PipelineError::io(path, e.error))?;

        info!("Saved model: {:?}", path);
        Ok(())
    }

    /// Load an artifact written by [`Predictor::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = match fs::read_to_string(path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PipelineError::ModelNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(PipelineError::io(path, e)),
        };

        let header: ArtifactHeader = serde_json::from_str(&json)?;
        check_layout(header.schema_version, &header.feature_names)?;

        let artifact: ModelArtifact = serde_json::from_str(&json)?;
        info!("Loading model: {:?}", path);
        Self::from_artifact(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RunnerRecord, Sex, TrackCondition, TrackType};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    /// `n_races` races of `runners` each, one winner per race, favourites win more
    fn synthetic_races(n_races: usize, runners: usize) -> (Vec<FeatureVector>, Vec<bool>) {
        let mut rng = StdRng::seed_from_u64(3);
        let mut features = Vec::new();
        let mut labels = Vec::new();

        for race in 0..n_races {
            let odds: Vec<f64> = (0..runners).map(|_| rng.gen_range(1.5..60.0)).collect();
            let winner = (0..runners)
                .min_by(|&a, &b| {
                    let score = |i: usize| odds[i].ln() + rng_noise(race, i);
                    score(a).total_cmp(&score(b))
                })
                .unwrap();

            for (i, &o) in odds.iter().enumerate() {
                let mut values = [0.0; NUM_FEATURES];
                values[0] = 440.0 + (i * 7 % 60) as f64;
                values[4] = (i + 1) as f64;
                values[13] = o;
                values[18] = runners as f64;
                features.push(FeatureVector {
                    race_id: format!("R{:04}", race),
                    horse_id: format!("H{:02}", i),
                    values,
                });
                labels.push(i == winner);
            }
        }
        (features, labels)
    }

    /// Deterministic pseudo-noise so the favourite does not always win
    fn rng_noise(race: usize, i: usize) -> f64 {
        let mut rng = StdRng::seed_from_u64((race * 31 + i) as u64);
        rng.gen_range(-1.5..1.5)
    }

    fn rate_tables() -> (WinRateTable, WinRateTable) {
        let jockeys = serde_json::from_str(
            r#"{"rates": {"J01": {"starts": 4, "wins": 1}}, "default_rate": 0.1}"#,
        )
        .unwrap();
        let trainers = serde_json::from_str(
            r#"{"rates": {"T001": {"starts": 10, "wins": 3}}, "default_rate": 0.1}"#,
        )
        .unwrap();
        (jockeys, trainers)
    }

    fn train(features: &[FeatureVector], labels: &[bool]) -> Result<Predictor> {
        let (jockeys, trainers) = rate_tables();
        Predictor::train(features, labels, jockeys, trainers, &quick_params())
    }

    fn quick_params() -> Hyperparameters {
        Hyperparameters {
            forest: ForestParams {
                n_trees: 20,
                max_depth: Some(8),
                ..Default::default()
            },
            cv_folds: 3,
        }
    }

    #[test]
    fn test_train_500_races() {
        let (features, labels) = synthetic_races(500, 10);
        let predictor = train(&features, &labels).unwrap();
        let summary = predictor.summary();

        assert_eq!(summary.samples, 5000);
        assert_eq!(summary.positives, 500);
        assert_eq!(summary.races, 500);
        assert_eq!(summary.features, NUM_FEATURES);
        let cv = summary.cv_auc.as_ref().unwrap();
        assert_eq!(cv.folds, 3);
        assert!(cv.auc_mean > 0.5, "auc {}", cv.auc_mean);

        let probs = predictor.predict(&features[..10]);
        assert_eq!(probs.len(), 10);
        assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_train_rejects_empty_input() {
        let err = train(&[], &[]).err().unwrap();
        assert!(matches!(err, PipelineError::InsufficientData(_)));
    }

    #[test]
    fn test_train_rejects_single_class() {
        let (features, _) = synthetic_races(5, 4);
        let labels = vec![false; features.len()];
        let err = train(&features, &labels).err().unwrap();
        assert!(matches!(err, PipelineError::InsufficientData(_)));
    }

    #[test]
    fn test_cv_skipped_with_too_few_positives() {
        let (features, labels) = synthetic_races(2, 5);
        let predictor = train(&features, &labels).unwrap();
        assert!(predictor.summary().cv_auc.is_none());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(MODEL_FILENAME);

        let (features, labels) = synthetic_races(40, 8);
        let predictor = train(&features, &labels).unwrap();
        predictor.save(&path).unwrap();

        let loaded = Predictor::load(&path).unwrap();
        assert_eq!(loaded.artifact(), predictor.artifact());
        assert_eq!(loaded.artifact().jockey_rates.rate("J01"), 0.25);
        assert_eq!(loaded.artifact().trainer_rates.rate("T001"), 0.3);
        assert_eq!(loaded.artifact().jockey_rates.rate("J99"), 0.1);
        assert_eq!(loaded.predict(&features), predictor.predict(&features));
    }

    #[test]
    fn test_load_missing_model() {
        let dir = TempDir::new().unwrap();
        let err = Predictor::load(dir.path().join(MODEL_FILENAME)).err().unwrap();
        assert!(matches!(err, PipelineError::ModelNotFound { .. }));
    }

    #[test]
    fn test_feature_order_mismatch_is_schema_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MODEL_FILENAME);

        let (features, labels) = synthetic_races(20, 6);
        let predictor = train(&features, &labels).unwrap();
        let mut artifact = predictor.artifact().clone();
        artifact.feature_names.swap(0, 1);
        fs::write(&path, serde_json::to_string(&artifact).unwrap()).unwrap();

        let err = Predictor::load(&path).err().unwrap();
        assert!(matches!(err, PipelineError::SchemaVersion { .. }));
    }

    #[test]
    fn test_unknown_schema_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(MODEL_FILENAME);
        fs::write(&path, r#"{"schema_version": 99, "feature_names": []}"#).unwrap();

        let err = Predictor::load(&path).err().unwrap();
        match err {
            PipelineError::SchemaVersion { expected, found } => {
                assert_eq!(expected, "1");
                assert_eq!(found, "99");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_predict_race_ranks_by_probability() {
        let (features, labels) = synthetic_races(40, 8);
        let predictor = train(&features, &labels).unwrap();

        let race_features = &features[..8];
        let runners: Vec<RunnerRecord> = race_features
            .iter()
            .enumerate()
            .map(|(i, fv)| RunnerRecord {
                race_id: fv.race_id.clone(),
                race_date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
                horse_id: fv.horse_id.clone(),
                horse_name: None,
                horse_num: i as u32 + 1,
                jockey_id: "J01".to_string(),
                trainer_id: "T001".to_string(),
                finish_position: None,
                horse_weight: fv.values[0],
                prev_horse_weight: None,
                prev_race_date: None,
                popularity: i as u32 + 1,
                win_odds: fv.values[13],
                distance_m: 1600.0,
                track_type: TrackType::Turf,
                track_condition: TrackCondition::Firm,
                age: 3,
                sex: Sex::Male,
                post_position: i as u32 + 1,
                num_runners: 8,
            })
            .collect();
        let race = RaceGroup {
            race_id: race_features[0].race_id.clone(),
            race_date: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            runners,
        };

        let prediction = predictor.predict_race(&race, race_features);
        assert_eq!(prediction.runners.len(), 8);
        for (i, runner) in prediction.runners.iter().enumerate() {
            assert_eq!(runner.prediction_rank, i as u32 + 1);
        }
        for pair in prediction.runners.windows(2) {
            assert!(pair[0].win_probability >= pair[1].win_probability);
            if pair[0].win_probability == pair[1].win_probability {
                assert!(pair[0].horse_id < pair[1].horse_id);
            }
        }
        assert_eq!(prediction.marked_picks().len(), 3);
    }
}
