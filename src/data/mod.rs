//! Data ingestion, preprocessing and feature engineering modules

pub mod csv_loader;
pub mod features;
pub mod history;
pub mod preprocess;
pub mod sample;
pub mod source;

// Re-export commonly used types
pub use csv_loader::CsvFeed;
pub use features::{
    competition_ranks, FeatureContext, FeatureEngineering, FeatureVector, TrainingSet,
    FEATURE_NAMES, NUM_FEATURES,
};
pub use history::{HeldOutRates, HorseHistoryIndex, WinRate, WinRateTable};
pub use preprocess::{canonicalize, group_races, preprocess, PreprocessOutput, PreprocessReport};
pub use sample::SampleFeed;
pub use source::{parse_yyyymmdd, DateRange, FallbackSource, FeedCredentials, RaceSource};
