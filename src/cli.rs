//! Command-line interface definitions and argument parsing

use chrono::Utc;
use clap::Parser;

use crate::config::{
    PipelineConfig, DEFAULT_CHURN_THRESHOLD_DAYS, DEFAULT_CLUSTER_COUNT, DEFAULT_SEED,
    DEFAULT_TRAIN_RATIO,
};
use crate::tables::parse_timestamp;

/// Customer value analysis and churn prediction over retail transactions
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the customers CSV file
    #[arg(long)]
    pub customers: Option<String>,

    /// Path to the products CSV file
    #[arg(long)]
    pub products: Option<String>,

    /// Path to the transactions CSV file
    #[arg(long)]
    pub transactions: Option<String>,

    /// Run against generated sample data instead of CSV input
    #[arg(long)]
    pub demo: bool,

    /// Number of clusters for value segmentation
    #[arg(short = 'k', long, default_value_t = DEFAULT_CLUSTER_COUNT)]
    pub clusters: usize,

    /// Days without a purchase after which a customer counts as churned
    #[arg(long, default_value_t = DEFAULT_CHURN_THRESHOLD_DAYS)]
    pub churn_threshold: i64,

    /// Fraction of customers used for model training
    #[arg(long, default_value_t = DEFAULT_TRAIN_RATIO)]
    pub train_ratio: f64,

    /// Random seed for clustering, splitting, and model training
    #[arg(long, default_value_t = DEFAULT_SEED)]
    pub seed: u64,

    /// Reference instant for customer-age features (RFC 3339; defaults to now)
    #[arg(long)]
    pub reference_time: Option<String>,

    /// Reference instant for RFM recency (RFC 3339; defaults to the latest
    /// transaction in the data)
    #[arg(long)]
    pub rfm_reference_time: Option<String>,

    /// Write the insight summary and model comparison as JSON
    #[arg(long)]
    pub json: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Build a pipeline config from the parsed flags.
    pub fn to_config(&self) -> crate::Result<PipelineConfig> {
        let feature_reference_time = match &self.reference_time {
            Some(value) => parse_timestamp(value)?,
            None => Utc::now(),
        };
        let rfm_reference_time = match &self.rfm_reference_time {
            Some(value) => Some(parse_timestamp(value)?),
            None => None,
        };
        Ok(PipelineConfig {
            feature_reference_time,
            rfm_reference_time,
            churn_threshold_days: self.churn_threshold,
            cluster_count: self.clusters,
            train_ratio: self.train_ratio,
            seed: self.seed,
        })
    }

    /// CSV paths when all three were provided.
    pub fn csv_paths(&self) -> Option<(&str, &str, &str)> {
        match (&self.customers, &self.products, &self.transactions) {
            (Some(c), Some(p), Some(t)) => Some((c.as_str(), p.as_str(), t.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> Args {
        Args {
            customers: None,
            products: None,
            transactions: None,
            demo: true,
            clusters: 4,
            churn_threshold: 90,
            train_ratio: 0.8,
            seed: 42,
            reference_time: None,
            rfm_reference_time: None,
            json: None,
            verbose: false,
        }
    }

    #[test]
    fn config_carries_flags() {
        let mut args = base_args();
        args.clusters = 3;
        args.churn_threshold = 60;
        args.train_ratio = 0.75;
        args.seed = 7;
        args.reference_time = Some("2023-06-01T00:00:00Z".to_string());

        let config = args.to_config().unwrap();
        assert_eq!(config.cluster_count, 3);
        assert_eq!(config.churn_threshold_days, 60);
        assert_eq!(config.train_ratio, 0.75);
        assert_eq!(config.seed, 7);
        assert!(config.rfm_reference_time.is_none());
    }

    #[test]
    fn csv_paths_require_all_three() {
        let mut args = base_args();
        args.customers = Some("c.csv".to_string());
        args.products = Some("p.csv".to_string());
        assert!(args.csv_paths().is_none());
        args.transactions = Some("t.csv".to_string());
        assert!(args.csv_paths().is_some());
    }
}
