//! End-to-end pipeline orchestration.
//!
//! Stages run strictly forward; each consumes completed tables from the
//! previous stage and produces a new one. A failed stage halts the run and
//! surfaces its error kind — nothing here catches and downgrades.

use crate::churn::{engineer_churn_features, select_features, ChurnTable};
use crate::config::PipelineConfig;
use crate::error::AnalysisResult;
use crate::features::{build_customer_features, build_product_features, CustomerFeatureRow, ProductFeatureRow};
use crate::models::{train_models, TrainingOutcome};
use crate::rfm::{compute_rfm, RfmRow};
use crate::risk::{
    generate_insights, generate_recommendations, score_population, InsightSummary, RiskScoreRow,
};
use crate::scaling::FeatureMatrix;
use crate::segmentation::{segment_customers, SegmentationOutcome};
use crate::tables::CleanTables;

/// Every output table of one analysis run.
pub struct AnalysisReport {
    pub customer_features: Vec<CustomerFeatureRow>,
    pub product_features: Vec<ProductFeatureRow>,
    pub rfm: Vec<RfmRow>,
    pub segmentation: SegmentationOutcome,
    pub churn: ChurnTable,
    pub selected_features: FeatureMatrix,
    pub selected_feature_names: Vec<String>,
    pub training: TrainingOutcome,
    pub risk_scores: Vec<RiskScoreRow>,
    pub insights: InsightSummary,
    pub recommendations: Vec<String>,
}

/// Run the full analysis over cleaned tables.
pub fn run(tables: &CleanTables, config: &PipelineConfig) -> AnalysisResult<AnalysisReport> {
    log::info!("analysis run over {} transactions", tables.transactions.len());

    let customer_features = build_customer_features(tables, config.feature_reference_time);
    let product_features = build_product_features(tables);

    let rfm = compute_rfm(&tables.transactions, config.rfm_reference_time)?;

    let segmentation = segment_customers(&customer_features, config.cluster_count, config.seed)?;

    let churn = engineer_churn_features(
        &customer_features,
        &tables.transactions,
        config.churn_threshold_days,
    )?;
    let (selected_features, selected_feature_names) = select_features(&churn.features);

    let training = train_models(
        &selected_features,
        &churn.is_churned,
        config.train_ratio,
        config.seed,
    )?;

    let risk_scores = score_population(&churn, &selected_features, &training)?;

    let insights = generate_insights(
        &customer_features,
        &rfm,
        &segmentation,
        &churn,
        &risk_scores,
    );
    let recommendations = generate_recommendations(&insights);

    Ok(AnalysisReport {
        customer_features,
        product_features,
        rfm,
        segmentation,
        churn,
        selected_features,
        selected_feature_names,
        training,
        risk_scores,
        insights,
        recommendations,
    })
}
