//! Churn feature engineering: derived ratios, transaction patterns,
//! categorical encoding, and feature selection.
//!
//! Every tenure ratio uses a "+1" denominator so a customer whose first and
//! last purchase fall on the same day still gets finite features.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{AnalysisError, AnalysisResult};
use crate::features::CustomerFeatureRow;
use crate::scaling::FeatureMatrix;
use crate::tables::TransactionRecord;

/// Columns whose missing-value fraction exceeds this are dropped.
pub const MISSING_THRESHOLD: f64 = 0.5;

/// Columns whose variance falls below this are dropped. Near-constant
/// features add no discriminative signal and destabilize scaling.
pub const VARIANCE_THRESHOLD: f64 = 0.01;

/// One-hot encoder with a fitted category vocabulary. Encoding new data
/// reuses the exact vocabulary; an unseen category sets no indicator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    pub column: String,
    pub categories: Vec<String>,
}

impl CategoricalEncoder {
    /// Record the sorted set of observed category values.
    pub fn fit<'a>(column: &str, values: impl IntoIterator<Item = &'a str>) -> Self {
        let categories: BTreeSet<&str> = values.into_iter().filter(|v| !v.is_empty()).collect();
        Self {
            column: column.to_string(),
            categories: categories.into_iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn indicator_names(&self) -> Vec<String> {
        self.categories
            .iter()
            .map(|category| format!("{}_{}", self.column, category))
            .collect()
    }

    /// Indicator vector for one value; all zeros for an unknown category.
    pub fn encode(&self, value: &str) -> Vec<f64> {
        self.categories
            .iter()
            .map(|category| if category == value { 1.0 } else { 0.0 })
            .collect()
    }
}

/// Per-customer churn features with label, ids aligned row-for-row with the
/// feature matrix.
#[derive(Debug, Clone)]
pub struct ChurnTable {
    pub customer_ids: Vec<i64>,
    pub is_churned: Vec<u8>,
    pub features: FeatureMatrix,
    pub encoders: Vec<CategoricalEncoder>,
}

impl ChurnTable {
    pub fn churn_rate(&self) -> f64 {
        if self.is_churned.is_empty() {
            return 0.0;
        }
        self.is_churned.iter().map(|&c| c as f64).sum::<f64>() / self.is_churned.len() as f64
    }
}

struct TransactionStats {
    mean_amount: f64,
    std_amount: Option<f64>,
    avg_quantity: f64,
    total_quantity: i64,
    count: usize,
}

fn transaction_stats(transactions: &[TransactionRecord]) -> BTreeMap<i64, TransactionStats> {
    let mut grouped: BTreeMap<i64, Vec<&TransactionRecord>> = BTreeMap::new();
    for tx in transactions {
        grouped.entry(tx.customer_id).or_default().push(tx);
    }

    grouped
        .into_iter()
        .map(|(customer_id, txs)| {
            let count = txs.len();
            let amounts: Vec<f64> = txs.iter().map(|t| t.total_amount).collect();
            let mean_amount = amounts.iter().sum::<f64>() / count as f64;
            // Sample std, undefined for a single transaction.
            let std_amount = if count > 1 {
                let variance = amounts
                    .iter()
                    .map(|a| (a - mean_amount).powi(2))
                    .sum::<f64>()
                    / (count - 1) as f64;
                Some(variance.sqrt())
            } else {
                None
            };
            let total_quantity: i64 = txs.iter().map(|t| t.quantity).sum();
            (
                customer_id,
                TransactionStats {
                    mean_amount,
                    std_amount,
                    avg_quantity: total_quantity as f64 / count as f64,
                    total_quantity,
                    count,
                },
            )
        })
        .collect()
}

/// Build the churn feature table: label, behavioral ratios, transaction
/// patterns, and one-hot encoded demographics.
pub fn engineer_churn_features(
    rows: &[CustomerFeatureRow],
    transactions: &[TransactionRecord],
    churn_threshold_days: i64,
) -> AnalysisResult<ChurnTable> {
    if rows.is_empty() {
        return Err(AnalysisError::DegenerateInput {
            stage: "churn feature engineering",
            reason: "no customers to engineer features for".to_string(),
        });
    }

    let customer_ids: Vec<i64> = rows.iter().map(|r| r.customer_id).collect();
    let is_churned: Vec<u8> = rows
        .iter()
        .map(|r| u8::from(r.days_since_last_purchase > churn_threshold_days))
        .collect();

    let tenure: Vec<f64> = rows
        .iter()
        .map(|r| r.days_since_first_purchase as f64 + 1.0)
        .collect();

    let mut features = FeatureMatrix::new(rows.len());
    features.push_dense_column(
        "total_orders",
        rows.iter().map(|r| r.total_orders as f64).collect(),
    );
    features.push_dense_column("total_spent", rows.iter().map(|r| r.total_spent).collect());
    features.push_dense_column(
        "avg_order_value",
        rows.iter().map(|r| r.avg_order_value).collect(),
    );
    features.push_dense_column(
        "total_items",
        rows.iter().map(|r| r.total_items as f64).collect(),
    );
    features.push_dense_column(
        "unique_products",
        rows.iter().map(|r| r.unique_products as f64).collect(),
    );
    features.push_dense_column("total_profit", rows.iter().map(|r| r.total_profit).collect());
    features.push_dense_column(
        "days_since_first_purchase",
        rows.iter().map(|r| r.days_since_first_purchase as f64).collect(),
    );
    features.push_dense_column(
        "days_since_last_purchase",
        rows.iter().map(|r| r.days_since_last_purchase as f64).collect(),
    );
    features.push_dense_column(
        "avg_items_per_order",
        rows.iter().map(|r| r.avg_items_per_order).collect(),
    );
    features.push_dense_column(
        "avg_order_frequency",
        rows.iter()
            .zip(&tenure)
            .map(|(r, t)| r.total_orders as f64 / t)
            .collect(),
    );
    features.push_dense_column(
        "total_spent_per_day",
        rows.iter().zip(&tenure).map(|(r, t)| r.total_spent / t).collect(),
    );
    features.push_dense_column(
        "recency_ratio",
        rows.iter()
            .zip(&tenure)
            .map(|(r, t)| r.days_since_last_purchase as f64 / t)
            .collect(),
    );
    features.push_dense_column(
        "loyalty_score",
        rows.iter()
            .zip(&tenure)
            .map(|(r, t)| (r.total_orders as f64 * r.total_spent) / t)
            .collect(),
    );
    features.push_dense_column(
        "total_profit_per_order",
        rows.iter()
            .map(|r| r.total_profit / r.total_orders as f64)
            .collect(),
    );
    features.push_dense_column(
        "product_diversity",
        rows.iter()
            .map(|r| r.unique_products as f64 / r.total_orders as f64)
            .collect(),
    );
    features.push_dense_column(
        "days_between_orders",
        rows.iter()
            .map(|r| r.days_since_first_purchase as f64 / (r.total_orders as f64 + 1.0))
            .collect(),
    );

    if !transactions.is_empty() {
        let stats = transaction_stats(transactions);
        let lookup = |id: i64| stats.get(&id);
        features.push_column(
            "avg_transaction_amount",
            customer_ids
                .iter()
                .map(|&id| lookup(id).map(|s| s.mean_amount))
                .collect(),
        );
        features.push_column(
            "std_transaction_amount",
            customer_ids
                .iter()
                .map(|&id| lookup(id).and_then(|s| s.std_amount))
                .collect(),
        );
        features.push_column(
            "avg_quantity",
            customer_ids
                .iter()
                .map(|&id| lookup(id).map(|s| s.avg_quantity))
                .collect(),
        );
        features.push_column(
            "total_quantity",
            customer_ids
                .iter()
                .map(|&id| lookup(id).map(|s| s.total_quantity as f64))
                .collect(),
        );
        features.push_column(
            "transaction_volatility",
            customer_ids
                .iter()
                .map(|&id| {
                    lookup(id).and_then(|s| s.std_amount.map(|std| std / (s.mean_amount + 1.0)))
                })
                .collect(),
        );
        features.push_column(
            "avg_quantity_per_transaction",
            customer_ids
                .iter()
                .map(|&id| lookup(id).map(|s| s.total_quantity as f64 / s.count as f64))
                .collect(),
        );
    }

    let mut encoders = Vec::new();
    for (column, values) in [
        ("location", rows.iter().map(|r| r.location.as_str()).collect::<Vec<_>>()),
        ("age_group", rows.iter().map(|r| r.age_group.as_str()).collect()),
        ("income_level", rows.iter().map(|r| r.income_level.as_str()).collect()),
    ] {
        let encoder = CategoricalEncoder::fit(column, values.iter().copied());
        for (name, index) in encoder
            .indicator_names()
            .into_iter()
            .zip(0..encoder.categories.len())
        {
            features.push_dense_column(
                name,
                values
                    .iter()
                    .map(|v| if *v == encoder.categories[index] { 1.0 } else { 0.0 })
                    .collect(),
            );
        }
        encoders.push(encoder);
    }

    Ok(ChurnTable {
        customer_ids,
        is_churned,
        features,
        encoders,
    })
}

/// Drop columns that are mostly missing, then columns that are
/// near-constant. Returns the filtered matrix and the kept column names.
pub fn select_features(matrix: &FeatureMatrix) -> (FeatureMatrix, Vec<String>) {
    let keep: Vec<bool> = (0..matrix.n_columns())
        .map(|j| {
            matrix.missing_fraction(j) <= MISSING_THRESHOLD
                && matrix.variance_zero_filled(j) >= VARIANCE_THRESHOLD
        })
        .collect();

    let dropped: Vec<&str> = keep
        .iter()
        .enumerate()
        .filter(|(_, kept)| !**kept)
        .map(|(j, _)| matrix.names[j].as_str())
        .collect();
    if !dropped.is_empty() {
        log::debug!("feature selection dropped {} columns: {:?}", dropped.len(), dropped);
    }

    let selected = matrix.select(&keep);
    let names = selected.names.clone();
    (selected, names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn feature_row(id: i64, orders: usize, spent: f64, last_days: i64) -> CustomerFeatureRow {
        CustomerFeatureRow {
            customer_id: id,
            total_orders: orders,
            total_spent: spent,
            avg_order_value: spent / orders as f64,
            total_items: orders as i64,
            unique_products: orders,
            total_profit: spent * 0.3,
            first_purchase: Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap(),
            last_purchase: Utc.with_ymd_and_hms(2023, 6, 1, 0, 0, 0).unwrap(),
            days_since_first_purchase: 200,
            days_since_last_purchase: last_days,
            avg_items_per_order: 1.0,
            location: if id % 2 == 0 { "US" } else { "UK" }.to_string(),
            age_group: "26-35".to_string(),
            income_level: "Medium".to_string(),
        }
    }

    #[test]
    fn churn_label_follows_threshold() {
        let rows = vec![
            feature_row(1, 3, 100.0, 10),
            feature_row(2, 3, 100.0, 90),
            feature_row(3, 3, 100.0, 91),
        ];
        let table = engineer_churn_features(&rows, &[], 90).unwrap();
        // Strictly greater than the threshold churns; exactly at it does not.
        assert_eq!(table.is_churned, vec![0, 0, 1]);
        assert!((table.churn_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn single_day_tenure_divides_safely() {
        let mut row = feature_row(1, 1, 100.0, 0);
        row.days_since_first_purchase = 0;
        let table = engineer_churn_features(&[row], &[], 90).unwrap();
        let index = table.features.column_index("avg_order_frequency").unwrap();
        assert_eq!(table.features.columns[index][0], Some(1.0));
        let index = table.features.column_index("total_spent_per_day").unwrap();
        assert_eq!(table.features.columns[index][0], Some(100.0));
    }

    #[test]
    fn one_hot_uses_fitted_vocabulary() {
        let rows = vec![feature_row(1, 2, 50.0, 5), feature_row(2, 2, 50.0, 5)];
        let table = engineer_churn_features(&rows, &[], 90).unwrap();
        let location = table.encoders.iter().find(|e| e.column == "location").unwrap();
        assert_eq!(location.categories, vec!["UK".to_string(), "US".to_string()]);
        assert_eq!(location.encode("US"), vec![0.0, 1.0]);
        // Unknown categories set no indicator.
        assert_eq!(location.encode("DE"), vec![0.0, 0.0]);
        assert!(table.features.column_index("location_US").is_some());
        assert!(table.features.column_index("location_UK").is_some());
    }

    #[test]
    fn selection_drops_mostly_missing_columns() {
        let mut matrix = FeatureMatrix::new(20);
        // 95% missing despite high variance among present values.
        let mut sparse: Vec<Option<f64>> = vec![None; 20];
        sparse[0] = Some(1_000.0);
        matrix.push_column("mostly_missing", sparse);
        matrix.push_dense_column("useful", (0..20).map(|v| v as f64).collect());
        let (selected, names) = select_features(&matrix);
        assert_eq!(names, vec!["useful".to_string()]);
        assert_eq!(selected.n_columns(), 1);
    }

    #[test]
    fn selection_drops_near_constant_columns() {
        let mut matrix = FeatureMatrix::new(10);
        matrix.push_dense_column("constant", vec![3.0; 10]);
        matrix.push_dense_column("varying", (0..10).map(|v| v as f64).collect());
        let (_, names) = select_features(&matrix);
        assert_eq!(names, vec!["varying".to_string()]);
    }

    #[test]
    fn transaction_patterns_merge_when_present() {
        let rows = vec![feature_row(1, 2, 50.0, 5)];
        let tx = |id, amount: f64| TransactionRecord {
            transaction_id: id,
            customer_id: 1,
            product_id: 1,
            quantity: 2,
            unit_price: amount / 2.0,
            timestamp: Utc.with_ymd_and_hms(2023, 3, 1, 0, 0, 0).unwrap(),
            payment_method: "PayPal".to_string(),
            total_amount: amount,
            profit: amount * 0.2,
        };
        let table = engineer_churn_features(&rows, &[tx(1, 20.0), tx(2, 30.0)], 90).unwrap();
        let mean = table.features.column_index("avg_transaction_amount").unwrap();
        assert_eq!(table.features.columns[mean][0], Some(25.0));
        let volatility = table.features.column_index("transaction_volatility").unwrap();
        assert!(table.features.columns[volatility][0].is_some());
    }
}
