//! ChurnForge: customer value analysis and churn prediction for retail
//! transaction histories.
//!
//! The library is a sequence of pure transformation functions over tabular
//! data: cleaned transactions become per-customer behavioral features, RFM
//! segments, value-based clusters, engineered churn features, trained
//! classification models, and calibrated risk scores with summary insights.

pub mod churn;
pub mod cli;
pub mod config;
pub mod error;
pub mod features;
pub mod models;
pub mod pipeline;
pub mod rfm;
pub mod risk;
pub mod sample;
pub mod scaling;
pub mod segmentation;
pub mod tables;
pub mod tree;

// Re-export public items for easier access
pub use churn::{engineer_churn_features, select_features, CategoricalEncoder, ChurnTable};
pub use cli::Args;
pub use config::PipelineConfig;
pub use error::{AnalysisError, AnalysisResult};
pub use features::{build_customer_features, build_product_features, CustomerFeatureRow};
pub use models::{train_models, Classifier, ModelResult, TrainingOutcome};
pub use pipeline::AnalysisReport;
pub use rfm::{compute_rfm, RfmRow};
pub use risk::{generate_insights, generate_recommendations, score_population, RiskTier};
pub use scaling::{FeatureMatrix, StandardScaler};
pub use segmentation::{segment_customers, ClusterAssignment, SegmentationOutcome};
pub use tables::{clean_tables, CleanTables, TransactionRecord};

/// Common result type used throughout the application
pub type Result<T> = anyhow::Result<T>;
