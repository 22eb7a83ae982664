//! Decision-tree core shared by the ensemble classifiers.
//!
//! Trees are stored as a flat node arena. The grower minimizes weighted
//! target variance, which for 0/1 targets ranks splits identically to Gini
//! impurity, so the same machinery fits classification trees and the
//! regression trees used for gradient boosting. Leaf values are supplied by
//! the caller so boosting can take Newton steps instead of plain means.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// A single tree node. `Split` indices point into the owning tree's arena.
#[derive(Debug, Clone)]
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

#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }

    pub fn predict(&self, x: &Array2<f64>) -> Vec<f64> {
        (0..x.nrows()).map(|i| self.predict_row(x.row(i))).collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Features considered per split; `None` means all.
    pub feature_subsample: Option<usize>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

fn sum_and_sq(targets: &[f64], indices: &[usize]) -> (f64, f64) {
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for &i in indices {
        sum += targets[i];
        sum_sq += targets[i] * targets[i];
    }
    (sum, sum_sq)
}

fn node_sse(sum: f64, sum_sq: f64, n: f64) -> f64 {
    sum_sq - sum * sum / n
}

fn find_best_split(
    x: &Array2<f64>,
    targets: &[f64],
    indices: &[usize],
    params: &TreeParams,
    rng: Option<&mut StdRng>,
) -> Option<BestSplit> {
    let n = indices.len();
    let n_features = x.ncols();
    let (total_sum, total_sq) = sum_and_sq(targets, indices);
    let parent_sse = node_sse(total_sum, total_sq, n as f64);

    let candidate_features: Vec<usize> = match (params.feature_subsample, rng) {
        (Some(m), Some(rng)) if m < n_features => {
            let mut chosen = sample(rng, n_features, m).into_vec();
            chosen.sort_unstable();
            chosen
        }
        _ => (0..n_features).collect(),
    };

    let mut best: Option<BestSplit> = None;
    let mut ordered: Vec<(f64, f64)> = Vec::with_capacity(n);
    for &feature in &candidate_features {
        ordered.clear();
        ordered.extend(indices.iter().map(|&i| (x[[i, feature]], targets[i])));
        ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for split in 1..n {
            let (value, target) = ordered[split - 1];
            left_sum += target;
            left_sq += target * target;
            if value == ordered[split].0 {
                continue;
            }
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let decrease = parent_sse
                - node_sse(left_sum, left_sq, split as f64)
                - node_sse(right_sum, right_sq, (n - split) as f64);
            if decrease > best.as_ref().map_or(1e-12, |b| b.decrease) {
                best = Some(BestSplit {
                    feature,
                    threshold: (value + ordered[split].0) / 2.0,
                    decrease,
                });
            }
        }
    }
    best
}

/// Grow a tree over the rows in `indices`.
///
/// `leaf_value` computes the value stored at each leaf from the member row
/// indices. `importances`, when provided, accumulates each split's impurity
/// decrease by feature.
pub fn grow_tree(
    x: &Array2<f64>,
    targets: &[f64],
    indices: &[usize],
    params: &TreeParams,
    mut rng: Option<&mut StdRng>,
    leaf_value: &dyn Fn(&[usize]) -> f64,
    importances: Option<&mut Vec<f64>>,
) -> Tree {
    let mut nodes = Vec::new();
    let mut importance_acc = vec![0.0; x.ncols()];
    grow_node(
        x,
        targets,
        indices,
        params,
        &mut rng,
        leaf_value,
        0,
        &mut nodes,
        &mut importance_acc,
    );
    if let Some(out) = importances {
        for (slot, value) in out.iter_mut().zip(importance_acc) {
            *slot += value;
        }
    }
    Tree { nodes }
}

#[allow(clippy::too_many_arguments)]
fn grow_node(
    x: &Array2<f64>,
    targets: &[f64],
    indices: &[usize],
    params: &TreeParams,
    rng: &mut Option<&mut StdRng>,
    leaf_value: &dyn Fn(&[usize]) -> f64,
    depth: usize,
    nodes: &mut Vec<Node>,
    importances: &mut Vec<f64>,
) -> usize {
    let make_leaf = |nodes: &mut Vec<Node>| {
        nodes.push(Node::Leaf {
            value: leaf_value(indices),
        });
        nodes.len() - 1
    };

    if depth >= params.max_depth || indices.len() < params.min_samples_split {
        return make_leaf(nodes);
    }

    let split = match find_best_split(x, targets, indices, params, rng.as_deref_mut()) {
        Some(split) => split,
        None => return make_leaf(nodes),
    };

    importances[split.feature] += split.decrease;

    let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
        .iter()
        .copied()
        .partition(|&i| x[[i, split.feature]] <= split.threshold);

    // Reserve the split slot before growing children so child indices are
    // known when the node is finalized.
    nodes.push(Node::Leaf { value: 0.0 });
    let this = nodes.len() - 1;
    let left = grow_node(
        x, targets, &left_idx, params, rng, leaf_value, depth + 1, nodes, importances,
    );
    let right = grow_node(
        x, targets, &right_idx, params, rng, leaf_value, depth + 1, nodes, importances,
    );
    nodes[this] = Node::Split {
        feature: split.feature,
        threshold: split.threshold,
        left,
        right,
    };
    this
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn mean_leaf(targets: &[f64]) -> impl Fn(&[usize]) -> f64 + '_ {
        move |indices: &[usize]| {
            indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len().max(1) as f64
        }
    }

    #[test]
    fn splits_a_separable_feature() {
        let x = array![[1.0], [2.0], [3.0], [10.0], [11.0], [12.0]];
        let y = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let indices: Vec<usize> = (0..6).collect();
        let params = TreeParams {
            max_depth: 3,
            min_samples_split: 2,
            feature_subsample: None,
        };
        let leaf = mean_leaf(&y);
        let tree = grow_tree(&x, &y, &indices, &params, None, &leaf, None);

        assert_eq!(tree.predict_row(array![2.0].view()), 0.0);
        assert_eq!(tree.predict_row(array![11.0].view()), 1.0);
    }

    #[test]
    fn pure_node_becomes_a_leaf() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = vec![1.0, 1.0, 1.0];
        let indices: Vec<usize> = (0..3).collect();
        let params = TreeParams {
            max_depth: 5,
            min_samples_split: 2,
            feature_subsample: None,
        };
        let leaf = mean_leaf(&y);
        let tree = grow_tree(&x, &y, &indices, &params, None, &leaf, None);
        assert_eq!(tree.nodes.len(), 1);
    }

    #[test]
    fn importances_accumulate_on_split_features() {
        let x = array![
            [1.0, 5.0],
            [2.0, 5.0],
            [3.0, 5.0],
            [10.0, 5.0],
            [11.0, 5.0],
            [12.0, 5.0]
        ];
        let y = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let indices: Vec<usize> = (0..6).collect();
        let params = TreeParams {
            max_depth: 3,
            min_samples_split: 2,
            feature_subsample: None,
        };
        let leaf = mean_leaf(&y);
        let mut importances = vec![0.0; 2];
        grow_tree(&x, &y, &indices, &params, None, &leaf, Some(&mut importances));
        assert!(importances[0] > 0.0);
        assert_eq!(importances[1], 0.0);
    }

    #[test]
    fn depth_limit_is_respected() {
        let x = array![[1.0], [2.0], [3.0], [4.0]];
        let y = vec![0.0, 1.0, 0.0, 1.0];
        let indices: Vec<usize> = (0..4).collect();
        let params = TreeParams {
            max_depth: 0,
            min_samples_split: 2,
            feature_subsample: None,
        };
        let leaf = mean_leaf(&y);
        let tree = grow_tree(&x, &y, &indices, &params, None, &leaf, None);
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.predict_row(array![1.0].view()), 0.5);
    }
}
