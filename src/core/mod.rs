//! Core model logic: random forest classifier and evaluation metrics

pub mod forest;
pub mod metrics;

// Re-export commonly used types
pub use forest::{ForestParams, RandomForest};
pub use metrics::{roc_auc, stratified_folds, CrossValidation};
