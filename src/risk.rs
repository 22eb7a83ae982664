//! Churn risk scoring and insight aggregation.
//!
//! The full population is imputed and scaled with the exact scaler retained
//! from training, scored with the selected model, and bucketed into fixed
//! risk tiers. Tier boundaries are fixed cut points, never recomputed per
//! population. Recommendation text is a pure function of the aggregates.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::churn::ChurnTable;
use crate::error::AnalysisResult;
use crate::features::CustomerFeatureRow;
use crate::models::TrainingOutcome;
use crate::rfm::RfmRow;
use crate::scaling::quantile_sorted;
use crate::segmentation::SegmentationOutcome;

/// Probabilities at or above this cut are at least Medium risk.
pub const RISK_MEDIUM_CUT: f64 = 0.3;
/// Probabilities at or above this cut are High risk.
pub const RISK_HIGH_CUT: f64 = 0.7;

/// Probability above which a customer counts as "at risk" in the insight
/// aggregates.
const AT_RISK_PROBABILITY: f64 = 0.5;

/// Customers with a purchase in the last 30 days count as retained.
const RETENTION_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

impl RiskTier {
    /// Bucket a probability into a tier. Boundary values belong to the
    /// upper tier, consistent with half-open intervals.
    pub fn from_probability(probability: f64) -> Self {
        if probability >= RISK_HIGH_CUT {
            RiskTier::High
        } else if probability >= RISK_MEDIUM_CUT {
            RiskTier::Medium
        } else {
            RiskTier::Low
        }
    }
}

impl std::fmt::Display for RiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RiskTier::Low => "Low",
            RiskTier::Medium => "Medium",
            RiskTier::High => "High",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScoreRow {
    pub customer_id: i64,
    pub churn_probability: f64,
    pub risk_tier: RiskTier,
}

/// Score churn probability for every customer in the table using the
/// retained model and scaler from training.
pub fn score_population(
    table: &ChurnTable,
    selected: &crate::scaling::FeatureMatrix,
    outcome: &TrainingOutcome,
) -> AnalysisResult<Vec<RiskScoreRow>> {
    let x = outcome.scaler.transform_named(selected)?;
    let probabilities = outcome.best_model.predict_proba(&x)?;

    Ok(table
        .customer_ids
        .iter()
        .zip(probabilities.iter())
        .map(|(&customer_id, &probability)| RiskScoreRow {
            customer_id,
            churn_probability: probability,
            risk_tier: RiskTier::from_probability(probability),
        })
        .collect())
}

/// Flat key-value summary of the whole analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightSummary {
    pub total_customers: usize,
    pub total_revenue: f64,
    pub avg_customer_value: f64,
    pub avg_order_value: f64,
    pub churn_rate: f64,
    pub high_risk_customers: usize,
    pub medium_risk_customers: usize,
    pub low_risk_customers: usize,
    pub avg_churn_probability: f64,
    pub customers_at_risk: usize,
    pub top_segment: String,
    pub champions_count: usize,
    pub at_risk_count: usize,
    pub customer_retention_rate: f64,
    pub high_value_customers: usize,
}

/// Aggregate summary insights across the pipeline outputs.
pub fn generate_insights(
    customer_features: &[CustomerFeatureRow],
    rfm: &[RfmRow],
    segmentation: &SegmentationOutcome,
    churn: &ChurnTable,
    risk_scores: &[RiskScoreRow],
) -> InsightSummary {
    let total_customers = customer_features.len();
    let total_revenue: f64 = customer_features.iter().map(|r| r.total_spent).sum();
    let avg_customer_value = if total_customers > 0 {
        total_revenue / total_customers as f64
    } else {
        0.0
    };
    let avg_order_value = if total_customers > 0 {
        customer_features.iter().map(|r| r.avg_order_value).sum::<f64>() / total_customers as f64
    } else {
        0.0
    };

    let mut tier_counts: BTreeMap<RiskTier, usize> = BTreeMap::new();
    for row in risk_scores {
        *tier_counts.entry(row.risk_tier).or_default() += 1;
    }
    let avg_churn_probability = if risk_scores.is_empty() {
        0.0
    } else {
        risk_scores.iter().map(|r| r.churn_probability).sum::<f64>() / risk_scores.len() as f64
    };
    let customers_at_risk = risk_scores
        .iter()
        .filter(|r| r.churn_probability > AT_RISK_PROBABILITY)
        .count();

    // Most common cluster segment; ties resolve alphabetically so repeated
    // runs agree.
    let mut segment_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for assignment in &segmentation.assignments {
        *segment_counts.entry(assignment.segment.as_str()).or_default() += 1;
    }
    let top_segment = segment_counts
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(segment, _)| segment.to_string())
        .unwrap_or_default();

    let champions_count = rfm.iter().filter(|r| r.segment == "Champions").count();
    let at_risk_count = rfm.iter().filter(|r| r.segment == "At Risk").count();

    let retained = customer_features
        .iter()
        .filter(|r| r.days_since_last_purchase <= RETENTION_WINDOW_DAYS)
        .count();
    let customer_retention_rate = if total_customers > 0 {
        retained as f64 / total_customers as f64
    } else {
        0.0
    };

    let high_value_customers = if total_customers > 0 {
        let mut spend: Vec<f64> = customer_features.iter().map(|r| r.total_spent).collect();
        spend.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let cutoff = quantile_sorted(&spend, 0.8);
        customer_features
            .iter()
            .filter(|r| r.total_spent > cutoff)
            .count()
    } else {
        0
    };

    InsightSummary {
        total_customers,
        total_revenue,
        avg_customer_value,
        avg_order_value,
        churn_rate: churn.churn_rate(),
        high_risk_customers: tier_counts.get(&RiskTier::High).copied().unwrap_or(0),
        medium_risk_customers: tier_counts.get(&RiskTier::Medium).copied().unwrap_or(0),
        low_risk_customers: tier_counts.get(&RiskTier::Low).copied().unwrap_or(0),
        avg_churn_probability,
        customers_at_risk,
        top_segment,
        champions_count,
        at_risk_count,
        customer_retention_rate,
        high_value_customers,
    }
}

/// Actionable recommendations derived from the aggregates; deterministic
/// given the same summary.
pub fn generate_recommendations(insights: &InsightSummary) -> Vec<String> {
    let mut recommendations = Vec::new();

    if insights.high_value_customers > 0 {
        recommendations.push(format!(
            "Focus on {} high-value customers with VIP programs",
            insights.high_value_customers
        ));
    }
    if insights.at_risk_count > 0 {
        recommendations.push(format!(
            "Implement retention campaigns for {} at-risk customers",
            insights.at_risk_count
        ));
    }
    if insights.champions_count > 0 {
        recommendations.push(format!(
            "Reward {} champion customers with exclusive offers",
            insights.champions_count
        ));
    }
    if insights.customer_retention_rate < 0.7 {
        recommendations
            .push("Improve customer retention through better engagement strategies".to_string());
    }

    if insights.high_risk_customers > 0 {
        recommendations.push(format!(
            "Implement immediate retention campaigns for {} high-risk customers",
            insights.high_risk_customers
        ));
    }
    if insights.medium_risk_customers > 0 {
        recommendations.push(format!(
            "Develop targeted engagement strategies for {} medium-risk customers",
            insights.medium_risk_customers
        ));
    }
    if insights.low_risk_customers > 0 {
        recommendations.push(format!(
            "Maintain engagement with {} low-risk customers through regular communication",
            insights.low_risk_customers
        ));
    }
    if insights.churn_rate > 0.2 {
        recommendations.push(format!(
            "Address high churn rate ({:.1}%) through improved customer experience",
            insights.churn_rate * 100.0
        ));
    }

    recommendations.push(
        "Implement real-time churn prediction to identify at-risk customers early".to_string(),
    );
    recommendations.push("Enhance customer service and support to reduce churn".to_string());
    recommendations
        .push("Implement cross-selling strategies based on customer segments".to_string());
    recommendations
        .push("Develop personalized product recommendations to increase engagement".to_string());

    recommendations
}
