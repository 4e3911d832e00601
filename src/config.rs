//! Pipeline configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::data::{DateRange, FeedCredentials};
use crate::error::Result;
use crate::predictor::{Hyperparameters, MODEL_FILENAME};

pub const MODEL_DIR_ENV: &str = "KEIBA_MODEL_DIR";
pub const DATA_DIR_ENV: &str = "KEIBA_DATA_DIR";

fn default_model_dir() -> PathBuf {
    PathBuf::from("models")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_from_date() -> String {
    "20240101".to_string()
}

fn default_to_date() -> String {
    "20241231".to_string()
}

/// Settings for one train / predict run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// YYYYMMDD
    #[serde(default = "default_from_date")]
    pub from_date: String,
    /// YYYYMMDD
    #[serde(default = "default_to_date")]
    pub to_date: String,
    /// Race to score; the first ingested race when absent
    #[serde(default)]
    pub race_id: Option<String>,
    #[serde(skip)]
    pub credentials: FeedCredentials,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            data_dir: default_data_dir(),
            from_date: default_from_date(),
            to_date: default_to_date(),
            race_id: None,
            credentials: FeedCredentials::default(),
            hyperparameters: Hyperparameters::default(),
        }
    }
}

impl PipelineConfig {
    /// Defaults overridden by `KEIBA_MODEL_DIR` / `KEIBA_DATA_DIR`
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(|key| std::env::var(key).ok())
    }

    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(MODEL_DIR_ENV).filter(|v| !v.is_empty()) {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup(DATA_DIR_ENV).filter(|v| !v.is_empty()) {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn date_range(&self) -> Result<DateRange> {
        DateRange::parse(&self.from_date, &self.to_date)
    }

    /// `<model_dir>/horse_race_predictor.json`
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(MODEL_FILENAME)
    }
}
