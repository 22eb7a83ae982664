//! Seeded sample-data generator for demo runs and tests.
//!
//! Everything flows through one seeded RNG; no platform randomness, so a
//! given seed always yields the same tables.

use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::tables::{CustomerRecord, ProductRecord, RawTransaction};

const LOCATIONS: [&str; 5] = ["US", "UK", "CA", "AU", "DE"];
const AGE_GROUPS: [&str; 5] = ["18-25", "26-35", "36-45", "46-55", "55+"];
const INCOME_LEVELS: [&str; 3] = ["Low", "Medium", "High"];
const CATEGORIES: [&str; 6] = [
    "Electronics",
    "Clothing",
    "Home & Garden",
    "Books",
    "Sports",
    "Beauty",
];
const PAYMENT_METHODS: [&str; 3] = ["Credit Card", "PayPal", "Bank Transfer"];

#[derive(Debug, Clone)]
pub struct SampleConfig {
    pub n_customers: usize,
    pub n_products: usize,
    pub n_transactions: usize,
    pub seed: u64,
    /// Latest possible transaction timestamp; purchases spread over the
    /// preceding year.
    pub end_time: DateTime<Utc>,
}

impl SampleConfig {
    pub fn new(end_time: DateTime<Utc>) -> Self {
        Self {
            n_customers: 1000,
            n_products: 200,
            n_transactions: 5000,
            seed: 42,
            end_time,
        }
    }
}

/// Generate the three raw input tables.
pub fn generate_sample_data(
    config: &SampleConfig,
) -> (Vec<CustomerRecord>, Vec<ProductRecord>, Vec<RawTransaction>) {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let span_days = 365;

    let customers: Vec<CustomerRecord> = (1..=config.n_customers as i64)
        .map(|id| CustomerRecord {
            customer_id: id,
            customer_name: format!("Customer_{id}"),
            registration_date: config.end_time - Duration::days(span_days + rng.gen_range(0..730)),
            location: (*LOCATIONS.choose(&mut rng).expect("non-empty pool")).to_string(),
            age_group: (*AGE_GROUPS.choose(&mut rng).expect("non-empty pool")).to_string(),
            income_level: (*INCOME_LEVELS.choose(&mut rng).expect("non-empty pool")).to_string(),
        })
        .collect();

    let products: Vec<ProductRecord> = (1..=config.n_products as i64)
        .map(|id| {
            let price = rng.gen_range(10.0..500.0);
            ProductRecord {
                product_id: id,
                product_name: format!("Product_{id}"),
                category: (*CATEGORIES.choose(&mut rng).expect("non-empty pool")).to_string(),
                price,
                cost: price * rng.gen_range(0.4..0.9),
            }
        })
        .collect();

    let transactions: Vec<RawTransaction> = (1..=config.n_transactions as i64)
        .map(|id| {
            let product = products.choose(&mut rng).expect("non-empty products");
            let minutes_back = rng.gen_range(0..span_days * 24 * 60);
            RawTransaction {
                transaction_id: id,
                customer_id: rng.gen_range(1..=config.n_customers as i64),
                product_id: product.product_id,
                quantity: rng.gen_range(1..10),
                unit_price: product.price,
                timestamp: config.end_time - Duration::minutes(minutes_back),
                payment_method: (*PAYMENT_METHODS.choose(&mut rng).expect("non-empty pool"))
                    .to_string(),
            }
        })
        .collect();

    (customers, products, transactions)
}
