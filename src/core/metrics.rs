//! Classifier evaluation metrics
//!
//! ROC-AUC and stratified K-fold splitting for cross-validation.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Cross-validation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossValidation {
    pub folds: usize,
    pub auc_mean: f64,
    pub auc_std: f64,
    pub fold_aucs: Vec<f64>,
}

impl CrossValidation {
    pub fn from_fold_aucs(fold_aucs: Vec<f64>) -> Option<Self> {
        let (auc_mean, auc_std) = mean_std(&fold_aucs)?;
        Some(Self {
            folds: fold_aucs.len(),
            auc_mean,
            auc_std,
            fold_aucs,
        })
    }
}

/// Area under the ROC curve (Mann-Whitney U with average ranks for ties)
///
/// Returns `None` when `labels` contain a single class.
pub fn roc_auc(scores: &[f64], labels: &[bool]) -> Option<f64> {
    if scores.len() != labels.len() {
        return None;
    }
    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    // Sum of 1-based average ranks of the positives
    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    Some((rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg))
}

/// Split sample indices into `k` folds preserving the class ratio
///
/// Each class is shuffled with a seeded RNG and dealt round-robin, so every
/// fold gets `floor` or `ceil` of its share of each class.
pub fn stratified_folds(labels: &[bool], k: usize, seed: u64) -> Vec<Vec<usize>> {
    if k == 0 {
        return Vec::new();
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut positives: Vec<usize> = (0..labels.len()).filter(|&i| labels[i]).collect();
    let mut negatives: Vec<usize> = (0..labels.len()).filter(|&i| !labels[i]).collect();
    positives.shuffle(&mut rng);
    negatives.shuffle(&mut rng);

    let mut folds = vec![Vec::new(); k];
    for (n, idx) in positives.into_iter().enumerate() {
        folds[n % k].push(idx);
    }
    for (n, idx) in negatives.into_iter().enumerate() {
        folds[(k - 1) - (n % k)].push(idx);
    }
    for fold in &mut folds {
        fold.sort_unstable();
    }
    folds
}

/// Mean and population standard deviation
pub fn mean_std(values: &[f64]) -> Option<(f64, f64)> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, variance.sqrt()))
}
