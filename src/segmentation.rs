//! Value segmentation: k-means clustering over behavioral features with
//! rule-based cluster labelling.
//!
//! Cluster ids are arbitrary partition indices and are not stable across
//! seeds; labels are derived from cluster-mean statistics instead, so the
//! same behavioral shape always gets the same name.

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::features::CustomerFeatureRow;
use crate::scaling::{FeatureMatrix, StandardScaler};

const MAX_ITERATIONS: u64 = 300;
const TOLERANCE: f64 = 1e-4;

/// The fixed feature vector used for clustering.
pub const CLUSTERING_FEATURES: [&str; 7] = [
    "total_orders",
    "total_spent",
    "avg_order_value",
    "total_items",
    "unique_products",
    "days_since_first_purchase",
    "avg_items_per_order",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub customer_id: i64,
    pub cluster_id: usize,
    pub segment: String,
}

#[derive(Debug, Clone)]
pub struct SegmentationOutcome {
    pub assignments: Vec<ClusterAssignment>,
    /// Label per cluster id.
    pub cluster_labels: Vec<String>,
    /// Per-cluster means of the raw (unstandardized) clustering features.
    pub cluster_means: Vec<Vec<f64>>,
    pub cluster_sizes: Vec<usize>,
}

fn clustering_matrix(rows: &[CustomerFeatureRow]) -> FeatureMatrix {
    let mut matrix = FeatureMatrix::new(rows.len());
    matrix.push_dense_column(
        "total_orders",
        rows.iter().map(|r| r.total_orders as f64).collect(),
    );
    matrix.push_dense_column("total_spent", rows.iter().map(|r| r.total_spent).collect());
    matrix.push_dense_column(
        "avg_order_value",
        rows.iter().map(|r| r.avg_order_value).collect(),
    );
    matrix.push_dense_column(
        "total_items",
        rows.iter().map(|r| r.total_items as f64).collect(),
    );
    matrix.push_dense_column(
        "unique_products",
        rows.iter().map(|r| r.unique_products as f64).collect(),
    );
    matrix.push_dense_column(
        "days_since_first_purchase",
        rows.iter().map(|r| r.days_since_first_purchase as f64).collect(),
    );
    matrix.push_dense_column(
        "avg_items_per_order",
        rows.iter().map(|r| r.avg_items_per_order).collect(),
    );
    matrix
}

/// Label a cluster by comparing its mean spend and order count against the
/// population means.
fn label_cluster(cluster_mean: &[f64], population_mean: &[f64]) -> &'static str {
    let spend = cluster_mean[1] > population_mean[1];
    let orders = cluster_mean[0] > population_mean[0];
    match (spend, orders) {
        (true, true) => "High-Value Customers",
        (true, false) => "Big Spenders",
        (false, true) => "Frequent Buyers",
        (false, false) => "Occasional Buyers",
    }
}

/// Cluster customers on the fixed behavioral feature vector and label each
/// cluster from its mean statistics.
pub fn segment_customers(
    rows: &[CustomerFeatureRow],
    cluster_count: usize,
    seed: u64,
) -> AnalysisResult<SegmentationOutcome> {
    if cluster_count == 0 {
        return Err(AnalysisError::DegenerateInput {
            stage: "value segmentation",
            reason: "cluster count must be at least 1".to_string(),
        });
    }
    if rows.len() < cluster_count {
        return Err(AnalysisError::DegenerateInput {
            stage: "value segmentation",
            reason: format!(
                "{} customers cannot be split into {} clusters",
                rows.len(),
                cluster_count
            ),
        });
    }

    let matrix = clustering_matrix(rows);
    let raw = matrix.to_imputed_array();
    let names: Vec<String> = CLUSTERING_FEATURES.iter().map(|n| n.to_string()).collect();
    let scaler = StandardScaler::fit(&names, &raw);
    let standardized = scaler.transform(&raw);

    let targets: Array1<usize> = Array1::zeros(rows.len());
    let dataset = Dataset::new(standardized.clone(), targets);
    let rng = StdRng::seed_from_u64(seed);
    let model = KMeans::params_with(cluster_count, rng, L2Dist)
        .max_n_iterations(MAX_ITERATIONS)
        .tolerance(TOLERANCE)
        .fit(&dataset)
        .map_err(anyhow::Error::from)?;
    let labels = model.predict(&standardized);

    let population_mean = raw
        .mean_axis(Axis(0))
        .unwrap_or_else(|| Array1::zeros(raw.ncols()))
        .to_vec();

    let mut cluster_sizes = vec![0usize; cluster_count];
    let mut cluster_sums: Vec<Array1<f64>> =
        vec![Array1::zeros(raw.ncols()); cluster_count];
    for (i, &cluster) in labels.iter().enumerate() {
        cluster_sizes[cluster] += 1;
        cluster_sums[cluster] += &raw.row(i);
    }

    let cluster_means: Vec<Vec<f64>> = cluster_sums
        .iter()
        .zip(&cluster_sizes)
        .map(|(sum, &size)| {
            if size == 0 {
                population_mean.clone()
            } else {
                (sum / size as f64).to_vec()
            }
        })
        .collect();

    let cluster_labels: Vec<String> = cluster_means
        .iter()
        .map(|mean| label_cluster(mean, &population_mean).to_string())
        .collect();

    let assignments = rows
        .iter()
        .zip(labels.iter())
        .map(|(row, &cluster)| ClusterAssignment {
            customer_id: row.customer_id,
            cluster_id: cluster,
            segment: cluster_labels[cluster].clone(),
        })
        .collect();

    log::debug!(
        "segmented {} customers into {} clusters (sizes {:?})",
        rows.len(),
        cluster_count,
        cluster_sizes
    );

    Ok(SegmentationOutcome {
        assignments,
        cluster_labels,
        cluster_means,
        cluster_sizes,
    })
}
