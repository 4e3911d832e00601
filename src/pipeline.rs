//! Train / predict orchestration
//!
//! Each run ingests from the configured source, preprocesses, engineers
//! features and either trains and publishes a model artifact or scores one
//! race with a previously published artifact. Nothing is shared between runs
//! except the artifact on disk.

use std::path::PathBuf;
use tracing::info;

use crate::config::PipelineConfig;
use crate::data::{
    preprocess, CsvFeed, FallbackSource, FeatureContext, FeatureEngineering, HorseHistoryIndex,
    PreprocessOutput, PreprocessReport, RaceSource, SampleFeed, WinRateTable,
};
use crate::error::{PipelineError, Result};
use crate::models::RacePrediction;
use crate::predictor::{Predictor, TrainingSummary};

/// Requested pipeline operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Train,
    Predict,
    /// Train, then predict with the fresh artifact
    All,
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub artifact_path: PathBuf,
    pub summary: TrainingSummary,
    pub report: PreprocessReport,
}

#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    Trained(TrainOutcome),
    Predicted(RacePrediction),
    Both {
        train: TrainOutcome,
        prediction: RacePrediction,
    },
}

/// Results export with the offline sample as fallback
pub fn default_source(config: &PipelineConfig) -> Box<dyn RaceSource> {
    Box::new(FallbackSource::new(
        CsvFeed::new(&config.data_dir, config.credentials.clone()),
        SampleFeed::default(),
    ))
}

pub struct Pipeline {
    config: PipelineConfig,
    source: Box<dyn RaceSource>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, source: Box<dyn RaceSource>) -> Self {
        Self { config, source }
    }

    /// Pipeline reading `<data_dir>/race_results.csv`, falling back to the sample
    pub fn from_config(config: PipelineConfig) -> Self {
        let source = default_source(&config);
        Self::new(config, source)
    }

    pub fn run(&self, operation: Operation) -> Result<PipelineOutcome> {
        match operation {
            Operation::Train => self.train().map(PipelineOutcome::Trained),
            Operation::Predict => self.predict().map(PipelineOutcome::Predicted),
            Operation::All => {
                let train = self.train()?;
                let prediction = self.predict()?;
                Ok(PipelineOutcome::Both { train, prediction })
            }
        }
    }

    /// Fetch and preprocess the configured date range
    fn ingest(&self) -> Result<PreprocessOutput> {
        let range = self.config.date_range()?;
        info!("Fetching races {} from {}", range, self.source.name());
        let raw = self.source.fetch(&range)?;

        let output = preprocess(&raw)?;
        info!(
            "{} races, {} runners accepted, {} excluded",
            output.report.races, output.report.accepted, output.report.excluded
        );
        if output.races.is_empty() {
            return Err(PipelineError::InsufficientData(format!(
                "no valid races between {} and {}",
                self.config.from_date, self.config.to_date
            )));
        }
        Ok(output)
    }

    /// Train on the configured range and publish the artifact
    pub fn train(&self) -> Result<TrainOutcome> {
        let range = self.config.date_range()?;
        let PreprocessOutput { races, report } = self.ingest()?;

        let jockey_rates = WinRateTable::jockeys(&races);
        let trainer_rates = WinRateTable::trainers(&races);
        let history = HorseHistoryIndex::from_races(&races);
        let ctx = FeatureContext {
            jockey_rates: &jockey_rates,
            trainer_rates: &trainer_rates,
            history: &history,
        };

        let set = FeatureEngineering::build_training_set(&races, &ctx);
        info!(
            "Training set: {} runners from {} races ({} winners)",
            set.len(),
            set.races,
            set.positives()
        );

        let predictor = Predictor::train(
            &set.features,
            &set.labels,
            jockey_rates,
            trainer_rates,
            &self.config.hyperparameters,
        )?
        .with_date_range(range.from, range.to);

        let artifact_path = self.config.model_path();
        predictor.save(&artifact_path)?;

        Ok(TrainOutcome {
            artifact_path,
            summary: predictor.summary().clone(),
            report,
        })
    }

    /// Score the requested race (or the first ingested race) with the saved model
    pub fn predict(&self) -> Result<RacePrediction> {
        let predictor = Predictor::load(self.config.model_path())?;
        let PreprocessOutput { races, .. } = self.ingest()?;
        let history = HorseHistoryIndex::from_races(&races);

        let race = match &self.config.race_id {
            Some(id) => races
                .iter()
                .find(|r| &r.race_id == id)
                .ok_or_else(|| PipelineError::RaceNotFound {
                    race_id: id.clone(),
                })?,
            None => &races[0],
        };
        info!(
            "Predicting race {} ({}, {} runners)",
            race.race_id,
            race.race_date.format("%Y-%m-%d"),
            race.len()
        );

        let features =
            FeatureEngineering::create_race_features(race, &predictor.feature_context(&history));
        Ok(predictor.predict_race(race, &features))
    }
}
