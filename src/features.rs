//! Feature builder: per-customer and per-product behavioral summaries.
//!
//! Aggregation groups the cleaned transaction table by customer (or
//! product). Age-in-days fields are relative to a single reference instant
//! captured once per pipeline run so every row shares the same horizon.
//! A customer with zero transactions after cleaning is simply absent from
//! the output; no zero-valued rows are synthesized.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::tables::{CleanTables, TransactionRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerFeatureRow {
    pub customer_id: i64,
    pub total_orders: usize,
    pub total_spent: f64,
    pub avg_order_value: f64,
    pub total_items: i64,
    pub unique_products: usize,
    pub total_profit: f64,
    pub first_purchase: DateTime<Utc>,
    pub last_purchase: DateTime<Utc>,
    pub days_since_first_purchase: i64,
    pub days_since_last_purchase: i64,
    pub avg_items_per_order: f64,
    // Demographics carried along for categorical encoding downstream.
    pub location: String,
    pub age_group: String,
    pub income_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductFeatureRow {
    pub product_id: i64,
    pub category: String,
    pub total_sales: usize,
    pub total_units_sold: i64,
    pub total_revenue: f64,
    pub total_profit: f64,
    pub unique_customers: usize,
    pub avg_order_quantity: f64,
    pub revenue_per_customer: f64,
}

/// Group transactions by customer and aggregate behavioral features.
///
/// `reference_time` is the run's fixed "now"; purchase-age fields are
/// clamped at zero so transactions at or after the reference never produce
/// negative ages.
pub fn build_customer_features(
    tables: &CleanTables,
    reference_time: DateTime<Utc>,
) -> Vec<CustomerFeatureRow> {
    let mut grouped: BTreeMap<i64, Vec<&TransactionRecord>> = BTreeMap::new();
    for tx in &tables.transactions {
        grouped.entry(tx.customer_id).or_default().push(tx);
    }

    let demographics: BTreeMap<i64, (&str, &str, &str)> = tables
        .customers
        .iter()
        .map(|c| {
            (
                c.customer_id,
                (
                    c.location.as_str(),
                    c.age_group.as_str(),
                    c.income_level.as_str(),
                ),
            )
        })
        .collect();

    let mut rows = Vec::with_capacity(grouped.len());
    for (customer_id, txs) in grouped {
        let total_orders = txs.len();
        let total_spent: f64 = txs.iter().map(|t| t.total_amount).sum();
        let total_items: i64 = txs.iter().map(|t| t.quantity).sum();
        let total_profit: f64 = txs.iter().map(|t| t.profit).sum();
        let first_purchase = txs.iter().map(|t| t.timestamp).min().expect("non-empty group");
        let last_purchase = txs.iter().map(|t| t.timestamp).max().expect("non-empty group");
        let unique_products = txs
            .iter()
            .map(|t| t.product_id)
            .collect::<std::collections::BTreeSet<_>>()
            .len();

        let (location, age_group, income_level) = demographics
            .get(&customer_id)
            .copied()
            .unwrap_or(("", "", ""));

        rows.push(CustomerFeatureRow {
            customer_id,
            total_orders,
            total_spent,
            avg_order_value: total_spent / total_orders as f64,
            total_items,
            unique_products,
            total_profit,
            first_purchase,
            last_purchase,
            days_since_first_purchase: (reference_time - first_purchase).num_days().max(0),
            days_since_last_purchase: (reference_time - last_purchase).num_days().max(0),
            avg_items_per_order: total_items as f64 / total_orders as f64,
            location: location.to_string(),
            age_group: age_group.to_string(),
            income_level: income_level.to_string(),
        });
    }

    log::debug!("built features for {} customers", rows.len());
    rows
}

/// Group transactions by product and aggregate sales features. Products
/// never sold are absent, mirroring the customer rule.
pub fn build_product_features(tables: &CleanTables) -> Vec<ProductFeatureRow> {
    let mut grouped: BTreeMap<i64, Vec<&TransactionRecord>> = BTreeMap::new();
    for tx in &tables.transactions {
        grouped.entry(tx.product_id).or_default().push(tx);
    }

    let categories: BTreeMap<i64, &str> = tables
        .products
        .iter()
        .map(|p| (p.product_id, p.category.as_str()))
        .collect();

    let mut rows = Vec::with_capacity(grouped.len());
    for (product_id, txs) in grouped {
        let total_sales = txs.len();
        let total_units_sold: i64 = txs.iter().map(|t| t.quantity).sum();
        let total_revenue: f64 = txs.iter().map(|t| t.total_amount).sum();
        let total_profit: f64 = txs.iter().map(|t| t.profit).sum();
        let unique_customers = txs
            .iter()
            .map(|t| t.customer_id)
            .collect::<std::collections::BTreeSet<_>>()
            .len();

        rows.push(ProductFeatureRow {
            product_id,
            category: categories.get(&product_id).copied().unwrap_or("").to_string(),
            total_sales,
            total_units_sold,
            total_revenue,
            total_profit,
            unique_customers,
            avg_order_quantity: total_units_sold as f64 / total_sales as f64,
            revenue_per_customer: total_revenue / unique_customers as f64,
        });
    }
    rows
}
