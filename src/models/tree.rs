//! Regression trees grown on binned features.
//!
//! Features are quantized once per fit into at most `MAX_BINS` buckets per
//! column; split search then works on per-node histograms instead of sorting.
//! The loss is squared error, so every row has unit hessian and the optimal
//! leaf value is `Σr / (n + λ)`.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

pub const MAX_BINS: usize = 256;

/// Column-major bin indices plus the cut points that produced them.
#[derive(Debug, Clone)]
pub struct BinnedMatrix {
    n_rows: usize,
    bins: Vec<Vec<u8>>,
    /// `cuts[f][b]` is the inclusive upper edge of bin `b` of feature `f`.
    cuts: Vec<Vec<f64>>,
}

impl BinnedMatrix {
    pub fn from_matrix(x: &DMatrix<f64>) -> Self {
        let (n_rows, n_features) = x.shape();
        let (cuts, bins): (Vec<_>, Vec<_>) = (0..n_features)
            .into_par_iter()
            .map(|f| {
                let column: Vec<f64> = x.column(f).iter().copied().collect();
                let cuts = quantile_cuts(&column, MAX_BINS);
                let bins = column.iter().map(|&v| bin_of(&cuts, v)).collect();
                (cuts, bins)
            })
            .unzip();
        Self { n_rows, bins, cuts }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_features(&self) -> usize {
        self.bins.len()
    }

    fn n_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }
}

/// Up to `max_bins - 1` increasing cut points taken at row quantiles.
fn quantile_cuts(values: &[f64], max_bins: usize) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    sorted.sort_by(f64::total_cmp);
    sorted.dedup();
    if sorted.len() <= 1 {
        return Vec::new();
    }
    if sorted.len() <= max_bins {
        // One bin per distinct value; cut halfway between neighbours.
        return sorted.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
    }
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|k| sorted[k * sorted.len() / max_bins])
        .collect();
    cuts.dedup();
    cuts
}

fn bin_of(cuts: &[f64], v: f64) -> u8 {
    // First cut >= v; values above every cut land in the last bin.
    cuts.partition_point(|c| *c < v) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Node {
    Leaf {
        value: f64,
    },
    /// Rows with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    /// L2 penalty on leaf values.
    pub lambda: f64,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree fitting `residuals` on the given rows and feature subset.
    pub fn grow(
        binned: &BinnedMatrix,
        residuals: &[f64],
        rows: Vec<u32>,
        features: &[usize],
        params: &TreeParams,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow_node(binned, residuals, rows, features, params, 0);
        tree
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], idx: usize) -> usize {
            match nodes[idx] {
                Node::Leaf { .. } => 0,
                Node::Split { left, right, .. } => 1 + walk(nodes, left).max(walk(nodes, right)),
            }
        }
        if self.nodes.is_empty() { 0 } else { walk(&self.nodes, 0) }
    }

    /// Evaluate the tree on one feature row.
    pub fn predict_row(&self, feature: impl Fn(usize) -> f64) -> f64 {
        let mut idx = 0;
        loop {
            match self.nodes.get(idx) {
                None => return 0.0,
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature: f,
                    threshold,
                    left,
                    right,
                }) => {
                    idx = if feature(*f) <= *threshold { *left } else { *right };
                }
            }
        }
    }

    fn grow_node(
        &mut self,
        binned: &BinnedMatrix,
        residuals: &[f64],
        rows: Vec<u32>,
        features: &[usize],
        params: &TreeParams,
        depth: usize,
    ) -> usize {
        let n = rows.len() as f64;
        let g: f64 = rows.iter().map(|&i| residuals[i as usize]).sum();
        let leaf = Node::Leaf {
            value: g / (n + params.lambda),
        };

        let idx = self.nodes.len();
        self.nodes.push(leaf);

        if depth >= params.max_depth || rows.len() < 2 * params.min_samples_leaf.max(1) {
            return idx;
        }
        let Some(best) = best_split(binned, residuals, &rows, features, params, g) else {
            return idx;
        };

        let column = &binned.bins[best.feature];
        let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = rows
            .into_iter()
            .partition(|&i| usize::from(column[i as usize]) <= best.bin);

        let threshold = binned.cuts[best.feature][best.bin];
        let left = self.grow_node(binned, residuals, left_rows, features, params, depth + 1);
        let right = self.grow_node(binned, residuals, right_rows, features, params, depth + 1);
        self.nodes[idx] = Node::Split {
            feature: best.feature,
            threshold,
            left,
            right,
        };
        idx
    }
}

fn best_split(
    binned: &BinnedMatrix,
    residuals: &[f64],
    rows: &[u32],
    features: &[usize],
    params: &TreeParams,
    g_total: f64,
) -> Option<SplitCandidate> {
    let n_total = rows.len() as f64;
    let min_leaf = params.min_samples_leaf.max(1) as f64;
    let parent_score = g_total * g_total / (n_total + params.lambda);

    features
        .par_iter()
        .filter_map(|&f| {
            let n_bins = binned.n_bins(f);
            if n_bins < 2 {
                return None;
            }
            let column = &binned.bins[f];
            let mut grad = vec![0.0; n_bins];
            let mut count = vec![0.0; n_bins];
            for &i in rows {
                let b = usize::from(column[i as usize]);
                grad[b] += residuals[i as usize];
                count[b] += 1.0;
            }

            let mut best: Option<SplitCandidate> = None;
            let (mut g_left, mut n_left) = (0.0, 0.0);
            // The last bin has no upper cut, so it can only ever be on the right.
            for b in 0..n_bins - 1 {
                g_left += grad[b];
                n_left += count[b];
                let n_right = n_total - n_left;
                if n_left < min_leaf || n_right < min_leaf || count[b] == 0.0 {
                    continue;
                }
                let g_right = g_total - g_left;
                let gain = g_left * g_left / (n_left + params.lambda)
                    + g_right * g_right / (n_right + params.lambda)
                    - parent_score;
                if gain > 1e-12 && best.is_none_or(|s| gain > s.gain) {
                    best = Some(SplitCandidate { feature: f, bin: b, gain });
                }
            }
            best
        })
        .reduce_with(|a, b| {
            if b.gain > a.gain || (b.gain == a.gain && b.feature < a.feature) {
                b
            } else {
                a
            }
        })
}
