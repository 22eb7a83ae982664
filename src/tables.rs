//! Input tables: typed records, CSV ingest, and the cleaning pass.
//!
//! CSV files are scanned lazily with Polars and filtered before the rows are
//! materialized into typed records. Everything downstream of this module
//! works on the typed tables; no stage mutates another stage's input.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::error::{AnalysisError, AnalysisResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerRecord {
    pub customer_id: i64,
    pub customer_name: String,
    pub registration_date: DateTime<Utc>,
    pub location: String,
    pub age_group: String,
    pub income_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRecord {
    pub product_id: i64,
    pub product_name: String,
    pub category: String,
    pub price: f64,
    pub cost: f64,
}

/// A transaction as it arrives from ingest, before derived fields exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransaction {
    pub transaction_id: i64,
    pub customer_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: f64,
    pub timestamp: DateTime<Utc>,
    pub payment_method: String,
}

/// A cleaned transaction with derived monetary fields. Immutable once
/// ingested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: i64,
    pub customer_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub unit_price: f64,
    pub timestamp: DateTime<Utc>,
    pub payment_method: String,
    pub total_amount: f64,
    pub profit: f64,
}

/// The three cleaned input tables, foreign keys resolved.
#[derive(Debug, Clone)]
pub struct CleanTables {
    pub customers: Vec<CustomerRecord>,
    pub products: Vec<ProductRecord>,
    pub transactions: Vec<TransactionRecord>,
}

/// Clean the raw tables: deduplicate primary keys (first occurrence wins),
/// drop transactions with non-positive quantity or non-finite monetary
/// fields, derive per-transaction amounts, and resolve foreign keys.
///
/// A transaction referencing a customer or product that does not exist
/// after cleaning is a fatal [`AnalysisError::DataIntegrity`].
pub fn clean_tables(
    customers: Vec<CustomerRecord>,
    products: Vec<ProductRecord>,
    transactions: Vec<RawTransaction>,
) -> AnalysisResult<CleanTables> {
    let mut seen = HashSet::new();
    let customers: Vec<CustomerRecord> = customers
        .into_iter()
        .filter(|c| seen.insert(c.customer_id))
        .collect();

    let mut seen = HashSet::new();
    let products: Vec<ProductRecord> = products
        .into_iter()
        .filter(|p| p.price.is_finite() && p.cost.is_finite() && p.price > 0.0)
        .filter(|p| seen.insert(p.product_id))
        .collect();

    let customer_ids: HashSet<i64> = customers.iter().map(|c| c.customer_id).collect();
    let product_costs: BTreeMap<i64, f64> =
        products.iter().map(|p| (p.product_id, p.cost)).collect();

    let mut seen = HashSet::new();
    let mut cleaned = Vec::with_capacity(transactions.len());
    for tx in transactions {
        if tx.quantity <= 0 || !tx.unit_price.is_finite() || tx.unit_price <= 0.0 {
            continue;
        }
        if !seen.insert(tx.transaction_id) {
            continue;
        }
        if !customer_ids.contains(&tx.customer_id) {
            return Err(AnalysisError::DataIntegrity(format!(
                "transaction {} references unknown customer {}",
                tx.transaction_id, tx.customer_id
            )));
        }
        let cost = *product_costs.get(&tx.product_id).ok_or_else(|| {
            AnalysisError::DataIntegrity(format!(
                "transaction {} references unknown product {}",
                tx.transaction_id, tx.product_id
            ))
        })?;
        let total_amount = tx.quantity as f64 * tx.unit_price;
        let profit = total_amount - tx.quantity as f64 * cost;
        cleaned.push(TransactionRecord {
            transaction_id: tx.transaction_id,
            customer_id: tx.customer_id,
            product_id: tx.product_id,
            quantity: tx.quantity,
            unit_price: tx.unit_price,
            timestamp: tx.timestamp,
            payment_method: tx.payment_method,
            total_amount,
            profit,
        });
    }

    if cleaned.is_empty() {
        return Err(AnalysisError::DataIntegrity(
            "no transactions survived cleaning".to_string(),
        ));
    }

    log::info!(
        "cleaned tables: {} customers, {} products, {} transactions",
        customers.len(),
        products.len(),
        cleaned.len()
    );

    Ok(CleanTables {
        customers,
        products,
        transactions: cleaned,
    })
}

/// Parse a timestamp in RFC 3339 or plain `YYYY-MM-DDTHH:MM:SS` form.
pub fn parse_timestamp(value: &str) -> crate::Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")?;
    Ok(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight is valid")))
}

/// Load the customers table from CSV.
///
/// Rows with missing fields are dropped, mirroring the transaction cleaning
/// rules.
pub fn load_customers_csv(path: &str) -> crate::Result<Vec<CustomerRecord>> {
    let df = LazyCsvReader::new(path).finish()?.collect()?;

    let ids = df.column("customer_id")?.i64()?;
    let names = df.column("customer_name")?.utf8()?;
    let registered = df.column("registration_date")?.utf8()?;
    let locations = df.column("location")?.utf8()?;
    let age_groups = df.column("age_group")?.utf8()?;
    let income_levels = df.column("income_level")?.utf8()?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(id), Some(name), Some(reg), Some(loc), Some(age), Some(income)) = (
            ids.get(i),
            names.get(i),
            registered.get(i),
            locations.get(i),
            age_groups.get(i),
            income_levels.get(i),
        ) else {
            continue;
        };
        records.push(CustomerRecord {
            customer_id: id,
            customer_name: name.to_string(),
            registration_date: parse_timestamp(reg)?,
            location: loc.to_string(),
            age_group: age.to_string(),
            income_level: income.to_string(),
        });
    }
    Ok(records)
}

/// Load the products table from CSV.
pub fn load_products_csv(path: &str) -> crate::Result<Vec<ProductRecord>> {
    let df = LazyCsvReader::new(path).finish()?.collect()?;

    let ids = df.column("product_id")?.i64()?;
    let names = df.column("product_name")?.utf8()?;
    let categories = df.column("category")?.utf8()?;
    let prices = df.column("price")?.cast(&DataType::Float64)?;
    let prices = prices.f64()?;
    let costs = df.column("cost")?.cast(&DataType::Float64)?;
    let costs = costs.f64()?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(id), Some(name), Some(category), Some(price), Some(cost)) = (
            ids.get(i),
            names.get(i),
            categories.get(i),
            prices.get(i),
            costs.get(i),
        ) else {
            continue;
        };
        records.push(ProductRecord {
            product_id: id,
            product_name: name.to_string(),
            category: category.to_string(),
            price,
            cost,
        });
    }
    Ok(records)
}

/// Load the transactions table from CSV. Invalid rows are filtered out
/// lazily before materialization.
pub fn load_transactions_csv(path: &str) -> crate::Result<Vec<RawTransaction>> {
    let df = LazyCsvReader::new(path)
        .finish()?
        .filter(
            col("quantity")
                .gt(lit(0))
                .and(col("unit_price").gt(lit(0.0)))
                .and(col("customer_id").is_not_null()),
        )
        .collect()?;

    if df.height() == 0 {
        anyhow::bail!("no valid transactions found after filtering");
    }

    let tx_ids = df.column("transaction_id")?.i64()?;
    let customer_ids = df.column("customer_id")?.i64()?;
    let product_ids = df.column("product_id")?.i64()?;
    let quantities = df.column("quantity")?.i64()?;
    let unit_prices = df.column("unit_price")?.cast(&DataType::Float64)?;
    let unit_prices = unit_prices.f64()?;
    let timestamps = df.column("timestamp")?.utf8()?;
    let payment_methods = df.column("payment_method")?.utf8()?;

    let mut records = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let (Some(tx), Some(customer), Some(product), Some(qty), Some(price), Some(ts), Some(pay)) = (
            tx_ids.get(i),
            customer_ids.get(i),
            product_ids.get(i),
            quantities.get(i),
            unit_prices.get(i),
            timestamps.get(i),
            payment_methods.get(i),
        ) else {
            continue;
        };
        records.push(RawTransaction {
            transaction_id: tx,
            customer_id: customer,
            product_id: product,
            quantity: qty,
            unit_price: price,
            timestamp: parse_timestamp(ts)?,
            payment_method: pay.to_string(),
        });
    }
    Ok(records)
}
