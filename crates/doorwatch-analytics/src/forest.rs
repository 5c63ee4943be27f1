//! Isolation forest for unsupervised outlier detection.
//!
//! Standard construction: each tree isolates points by recursive random
//! axis-aligned splits over a subsample; anomalous points sit at short
//! average path lengths. The raw score `2^(-E[h(x)]/c(psi))` lives in
//! (0, 1) with higher meaning more anomalous. Binary classification
//! compares the raw score against an offset fixed at fit time from the
//! training-score distribution and the configured contamination.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

#[derive(Error, Debug)]
pub enum ForestError {
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("feature rows have inconsistent dimensions: expected {expected}, got {actual}")]
    RaggedMatrix { expected: usize, actual: usize },
}

/// Forest construction parameters, fixed at fit time.
#[derive(Debug, Clone)]
pub struct ForestConfig {
    pub trees: usize,
    /// Subsample size per tree (capped at the training-set size).
    pub max_samples: usize,
    /// Expected fraction of anomalies in the training data; sets the
    /// classification offset.
    pub contamination: f64,
    /// Rng seed; a fixed seed makes fitting reproducible.
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            trees: 100,
            max_samples: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

/// A fitted isolation forest. Opaque parameters serialize with serde
/// for blob persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<Node>,
    subsample: usize,
    offset: f64,
    contamination: f64,
}

impl IsolationForest {
    /// Fit a forest to a feature matrix (rows = samples).
    pub fn fit(config: &ForestConfig, data: &[Vec<f64>]) -> Result<Self, ForestError> {
        if data.is_empty() {
            return Err(ForestError::EmptyTrainingSet);
        }
        let dims = data[0].len();
        if let Some(bad) = data.iter().find(|row| row.len() != dims) {
            return Err(ForestError::RaggedMatrix {
                expected: dims,
                actual: bad.len(),
            });
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let subsample = config.max_samples.min(data.len()).max(1);
        let height_limit = (subsample as f64).log2().ceil().max(1.0) as usize;

        let mut trees = Vec::with_capacity(config.trees);
        for _ in 0..config.trees {
            let indices = sample_without_replacement(data.len(), subsample, &mut rng);
            trees.push(build_node(data, &indices, 0, height_limit, &mut rng));
        }

        let mut forest = Self {
            trees,
            subsample,
            offset: 0.5,
            contamination: config.contamination,
        };

        // Offset = (1 - contamination) quantile of training scores, so
        // roughly a contamination-sized fraction classifies anomalous.
        let mut scores: Vec<f64> = data.iter().map(|row| forest.score(row)).collect();
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let rank = ((1.0 - config.contamination) * (scores.len() - 1) as f64).round() as usize;
        forest.offset = scores[rank.min(scores.len() - 1)];

        tracing::info!(
            trees = forest.trees.len(),
            samples = data.len(),
            subsample,
            offset = forest.offset,
            "isolation forest fitted"
        );
        Ok(forest)
    }

    /// Raw outlier score in (0, 1); higher means more anomalous.
    pub fn score(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, row, 0.0))
            .sum();
        let mean_path = total / self.trees.len() as f64;
        let norm = average_path_length(self.subsample);
        if norm <= 0.0 {
            return 0.0;
        }
        2f64.powf(-mean_path / norm)
    }

    /// The model's own binary classification of a sample.
    pub fn is_anomaly(&self, row: &[f64]) -> bool {
        self.score(row) > self.offset
    }

    /// Classification offset fixed at fit time.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn contamination(&self) -> f64 {
        self.contamination
    }
}

/// Expected path length of an unsuccessful BST search over n points;
/// the standard normalization term c(n).
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let nf = n as f64;
            2.0 * ((nf - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (nf - 1.0) / nf
        }
    }
}

fn sample_without_replacement(n: usize, k: usize, rng: &mut StdRng) -> Vec<usize> {
    // Partial Fisher-Yates over the index range.
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k.min(n) {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k.min(n));
    indices
}

fn build_node(
    data: &[Vec<f64>],
    indices: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= height_limit || indices.len() <= 1 {
        return Node::Leaf {
            size: indices.len(),
        };
    }

    // Choose among features that still vary within this partition.
    let dims = data[indices[0]].len();
    let splittable: Vec<usize> = (0..dims)
        .filter(|&f| {
            let (min, max) = feature_range(data, indices, f);
            max > min
        })
        .collect();
    if splittable.is_empty() {
        // All remaining points identical.
        return Node::Leaf {
            size: indices.len(),
        };
    }

    let feature = splittable[rng.gen_range(0..splittable.len())];
    let (min, max) = feature_range(data, indices, feature);
    let threshold = rng.gen_range(min..max);

    let (left, right): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| data[i][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(build_node(data, &left, depth + 1, height_limit, rng)),
        right: Box::new(build_node(data, &right, depth + 1, height_limit, rng)),
    }
}

fn feature_range(data: &[Vec<f64>], indices: &[usize], feature: usize) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &i in indices {
        let v = data[i][feature];
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    (min, max)
}

fn path_length(node: &Node, row: &[f64], depth: f64) -> f64 {
    match node {
        Node::Leaf { size } => depth + average_path_length(*size),
        Node::Split {
            feature,
            threshold,
            left,
            right,
        } => {
            let branch = if row.get(*feature).copied().unwrap_or(0.0) < *threshold {
                left
            } else {
                right
            };
            path_length(branch, row, depth + 1.0)
        }
    }
}
