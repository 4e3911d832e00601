//! Random Forest Classifier
//!
//! Bagged CART trees (Gini impurity) for binary classification.
//!
//! Each tree is grown from a bootstrap sample with its own RNG seeded from
//! `ForestParams::seed` and the tree index, so the trained forest does not
//! depend on how rayon schedules the work. Probabilities are the mean over
//! trees of the positive fraction in the reached leaf.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Seed stride between trees (golden ratio constant)
const TREE_SEED_STRIDE: u64 = 0x9E37_79B9_7F4A_7C15;

/// Forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_trees: usize,
    /// `None` grows trees until leaves are pure
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    /// Candidate features per split, `None` = sqrt(n_features)
    pub max_features: Option<usize>,
    pub bootstrap: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 200,
            max_depth: Some(16),
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            bootstrap: true,
            seed: 42,
        }
    }
}

impl ForestParams {
    fn features_per_split(&self, n_features: usize) -> usize {
        let k = self
            .max_features
            .unwrap_or_else(|| (n_features as f64).sqrt() as usize);
        k.clamp(1, n_features)
    }
}

/// Tree node stored in a flat arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Single classification tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    /// Positive-class fraction of the leaf reached by `row`
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match &nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, *left).max(walk(nodes, *right)),
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Trained random forest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    n_features: usize,
    trees: Vec<Tree>,
}

/// Best split found for a node
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    impurity: f64,
}

struct Frame {
    node: usize,
    indices: Vec<usize>,
    depth: usize,
}

impl RandomForest {
    /// Fit a forest on `rows` (one feature row per sample) and binary `labels`
    pub fn fit<R>(rows: &[R], labels: &[bool], params: &ForestParams) -> Result<Self>
    where
        R: AsRef<[f64]> + Sync,
    {
        if rows.is_empty() {
            return Err(PipelineError::InsufficientData(
                "cannot fit a forest on zero samples".to_string(),
            ));
        }
        if rows.len() != labels.len() {
            return Err(PipelineError::InsufficientData(format!(
                "{} feature rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        if params.n_trees == 0 {
            return Err(PipelineError::InsufficientData(
                "n_trees must be at least 1".to_string(),
            ));
        }

        let n_features = rows[0].as_ref().len();
        if let Some(bad) = rows.iter().position(|r| r.as_ref().len() != n_features) {
            return Err(PipelineError::InsufficientData(format!(
                "row {} has {} features, expected {}",
                bad,
                rows[bad].as_ref().len(),
                n_features
            )));
        }

        let trees: Vec<Tree> = (0..params.n_trees)
            .into_par_iter()
            .map(|i| {
                let seed = params
                    .seed
                    .wrapping_add((i as u64 + 1).wrapping_mul(TREE_SEED_STRIDE));
                let mut rng = StdRng::seed_from_u64(seed);
                Self::grow_tree(rows, labels, n_features, params, &mut rng)
            })
            .collect();

        Ok(Self { n_features, trees })
    }

    /// Mean positive-class probability over all trees
    pub fn predict_proba(&self, row: &[f64]) -> f64 {
        let sum: f64 = self.trees.iter().map(|t| t.predict(row)).sum();
        (sum / self.trees.len() as f64).clamp(0.0, 1.0)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn trees(&self) -> &[Tree] {
        &self.trees
    }

    fn grow_tree<R: AsRef<[f64]>>(
        rows: &[R],
        labels: &[bool],
        n_features: usize,
        params: &ForestParams,
        rng: &mut StdRng,
    ) -> Tree {
        let n = rows.len();
        let indices: Vec<usize> = if params.bootstrap {
            (0..n).map(|_| rng.gen_range(0..n)).collect()
        } else {
            (0..n).collect()
        };

        let k = params.features_per_split(n_features);
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut stack = vec![Frame {
            node: 0,
            indices,
            depth: 0,
        }];

        while let Some(frame) = stack.pop() {
            let positives = frame.indices.iter().filter(|&&i| labels[i]).count();
            let total = frame.indices.len();
            let value = positives as f64 / total as f64;

            let depth_reached = params.max_depth.is_some_and(|d| frame.depth >= d);
            let pure = positives == 0 || positives == total;
            if depth_reached || pure || total < params.min_samples_split.max(2) {
                nodes[frame.node] = Node::Leaf { value };
                continue;
            }

            let parent_impurity = gini(positives, total);
            let candidates = index::sample(rng, n_features, k).into_vec();
            let best = Self::best_split(rows, labels, &frame.indices, &candidates, params);

            let split = match best {
                Some(s) if s.impurity < parent_impurity - 1e-12 => s,
                _ => {
                    nodes[frame.node] = Node::Leaf { value };
                    continue;
                }
            };

            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = frame
                .indices
                .into_iter()
                .partition(|&i| rows[i].as_ref()[split.feature] <= split.threshold);

            let left = nodes.len();
            nodes.push(Node::Leaf { value });
            let right = nodes.len();
            nodes.push(Node::Leaf { value });
            nodes[frame.node] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };

            stack.push(Frame {
                node: right,
                indices: right_idx,
                depth: frame.depth + 1,
            });
            stack.push(Frame {
                node: left,
                indices: left_idx,
                depth: frame.depth + 1,
            });
        }

        Tree { nodes }
    }

    /// Lowest weighted Gini split over the candidate features
    fn best_split<R: AsRef<[f64]>>(
        rows: &[R],
        labels: &[bool],
        indices: &[usize],
        candidates: &[usize],
        params: &ForestParams,
    ) -> Option<SplitCandidate> {
        let total = indices.len();
        let total_pos = indices.iter().filter(|&&i| labels[i]).count();
        let min_leaf = params.min_samples_leaf.max(1);
        let mut best: Option<SplitCandidate> = None;

        for &feature in candidates {
            let mut column: Vec<(f64, bool)> = indices
                .iter()
                .map(|&i| (rows[i].as_ref()[feature], labels[i]))
                .collect();
            column.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0usize;
            for split_at in 1..total {
                if column[split_at - 1].1 {
                    left_pos += 1;
                }
                let lo = column[split_at - 1].0;
                let hi = column[split_at].0;
                if lo == hi || split_at < min_leaf || total - split_at < min_leaf {
                    continue;
                }

                let left_n = split_at;
                let right_n = total - split_at;
                let impurity = (left_n as f64 * gini(left_pos, left_n)
                    + right_n as f64 * gini(total_pos - left_pos, right_n))
                    / total as f64;

                if best.as_ref().map_or(true, |b| impurity < b.impurity) {
                    let mid = lo + (hi - lo) / 2.0;
                    let threshold = if mid < hi { mid } else { lo };
                    best = Some(SplitCandidate {
                        feature,
                        threshold,
                        impurity,
                    });
                }
            }
        }

        best
    }
}

/// Gini impurity of a binary node
fn gini(positives: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = positives as f64 / total as f64;
    2.0 * p * (1.0 - p)
}
