//! Keiba - Horse race win probability prediction
//!
//! This library provides:
//! - Ingestion of race results from a CSV export, with a deterministic sample fallback
//! - Validation and grouping of runner records into races
//! - 19 per-runner features including race-relative ranks and leakage-free history
//! - A random forest win classifier with a persisted JSON artifact
//!
//! # Example
//!
//! ```no_run
//! use keiba::config::PipelineConfig;
//! use keiba::pipeline::{Operation, Pipeline, PipelineOutcome};
//!
//! let pipeline = Pipeline::from_config(PipelineConfig::from_env());
//! if let PipelineOutcome::Both { prediction, .. } = pipeline.run(Operation::All)? {
//!     for (mark, runner) in prediction.marked_picks() {
//!         println!("{} {} {:.3}", mark, runner.horse_id, runner.win_probability);
//!     }
//! }
//! # Ok::<(), keiba::error::PipelineError>(())
//! ```

pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod predictor;

// Re-export commonly used types
pub use config::PipelineConfig;
pub use data::{DateRange, FeatureVector, RaceSource, FEATURE_NAMES};
pub use error::{PipelineError, Result};
pub use models::{RaceGroup, RacePrediction, RawRunnerRecord, RunnerPrediction, RunnerRecord};
pub use pipeline::{Operation, Pipeline, PipelineOutcome, TrainOutcome};
pub use predictor::{Hyperparameters, ModelArtifact, Predictor, TrainingSummary};
