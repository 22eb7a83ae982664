//! RFM scoring: recency/frequency/monetary metrics, quantile scores, and
//! rule-based segments.
//!
//! Each metric is split independently into five equal-population quantile
//! bins. Recency labels are inverted so more recent purchases score higher.
//! Segment assignment walks an ordered rule table and takes the first match.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{AnalysisError, AnalysisResult};
use crate::scaling::quantile_sorted;
use crate::tables::TransactionRecord;

const RFM_BINS: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RfmRow {
    pub customer_id: i64,
    /// Days between the reference instant and the last purchase.
    pub recency: f64,
    /// Transaction count.
    pub frequency: f64,
    /// Total spend.
    pub monetary: f64,
    pub r_score: u8,
    pub f_score: u8,
    pub m_score: u8,
    /// Concatenated ordinal scores, e.g. "543".
    pub rfm_score: String,
    pub segment: String,
}

type RfmPredicate = fn(u8, u8, u8) -> bool;

fn is_champion(r: u8, f: u8, m: u8) -> bool {
    r >= 4 && f >= 4 && m >= 4
}

fn is_loyal(r: u8, f: u8, m: u8) -> bool {
    r >= 3 && f >= 3 && m >= 3
}

fn is_at_risk(r: u8, f: u8, m: u8) -> bool {
    r >= 3 && f >= 1 && m >= 1
}

fn is_cant_lose(r: u8, f: u8, m: u8) -> bool {
    r >= 4 && f >= 1 && m >= 1
}

fn is_new_customer(r: u8, f: u8, m: u8) -> bool {
    r >= 4 && f >= 1 && m >= 1
}

/// Ordered (label, predicate) rule table; the first matching rule wins and
/// anything unmatched falls through to "Lost".
///
/// The "Can't Lose" and "New Customers" predicates are shadowed by the
/// "At Risk" rule above them (scores are always at least 1, so any R >= 4
/// row already matched R >= 3). They never fire under first-match
/// evaluation; the table keeps them so the published segment definitions
/// stay auditable rather than silently rewriting the business logic.
pub fn segment_rules() -> Vec<(&'static str, RfmPredicate)> {
    vec![
        ("Champions", is_champion),
        ("Loyal Customers", is_loyal),
        ("At Risk", is_at_risk),
        ("Can't Lose", is_cant_lose),
        ("New Customers", is_new_customer),
    ]
}

/// Assign the first matching segment for an (R, F, M) score triple.
pub fn assign_segment(r: u8, f: u8, m: u8) -> &'static str {
    for (label, predicate) in segment_rules() {
        if predicate(r, f, m) {
            return label;
        }
    }
    "Lost"
}

/// Split values into `bins` equal-population quantile bins, returning the
/// ascending bin index (0-based) per value.
///
/// Fails with [`AnalysisError::DegenerateInput`] when the population is too
/// small or too concentrated to form distinct bin edges, rather than
/// silently collapsing bins.
pub fn quantile_bins(values: &[f64], bins: usize) -> AnalysisResult<Vec<u8>> {
    if bins < 2 {
        return Err(AnalysisError::DegenerateInput {
            stage: "rfm scoring",
            reason: format!("{bins} quantile bins requested; need at least 2"),
        });
    }
    if values.len() < bins {
        return Err(AnalysisError::DegenerateInput {
            stage: "rfm scoring",
            reason: format!(
                "population of {} cannot be split into {} quantile bins",
                values.len(),
                bins
            ),
        });
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let edges: Vec<f64> = (1..bins)
        .map(|i| quantile_sorted(&sorted, i as f64 / bins as f64))
        .collect();
    for pair in edges.windows(2) {
        if pair[1] <= pair[0] {
            return Err(AnalysisError::DegenerateInput {
                stage: "rfm scoring",
                reason: "duplicate quantile edges; values are too concentrated".to_string(),
            });
        }
    }

    Ok(values
        .iter()
        .map(|&v| edges.iter().filter(|&&edge| v > edge).count() as u8)
        .collect())
}

/// Compute RFM metrics, quantile scores, and segments for every customer in
/// the transaction table.
///
/// `reference_time` defaults to the maximum transaction timestamp, keeping
/// recency relative to the dataset's own horizon rather than wall-clock now.
pub fn compute_rfm(
    transactions: &[TransactionRecord],
    reference_time: Option<DateTime<Utc>>,
) -> AnalysisResult<Vec<RfmRow>> {
    if transactions.is_empty() {
        return Err(AnalysisError::DegenerateInput {
            stage: "rfm scoring",
            reason: "no transactions to score".to_string(),
        });
    }

    let reference = reference_time.unwrap_or_else(|| {
        transactions
            .iter()
            .map(|t| t.timestamp)
            .max()
            .expect("non-empty transactions")
    });

    let mut grouped: BTreeMap<i64, (DateTime<Utc>, usize, f64)> = BTreeMap::new();
    for tx in transactions {
        let entry = grouped
            .entry(tx.customer_id)
            .or_insert((tx.timestamp, 0, 0.0));
        entry.0 = entry.0.max(tx.timestamp);
        entry.1 += 1;
        entry.2 += tx.total_amount;
    }

    let customer_ids: Vec<i64> = grouped.keys().copied().collect();
    let recency: Vec<f64> = grouped
        .values()
        .map(|(last, _, _)| (reference - *last).num_days() as f64)
        .collect();
    let frequency: Vec<f64> = grouped.values().map(|(_, count, _)| *count as f64).collect();
    let monetary: Vec<f64> = grouped.values().map(|(_, _, total)| *total).collect();

    let recency_bins = quantile_bins(&recency, RFM_BINS)?;
    let frequency_bins = quantile_bins(&frequency, RFM_BINS)?;
    let monetary_bins = quantile_bins(&monetary, RFM_BINS)?;

    log::warn!(
        "RFM rule table contains shadowed rules (\"Can't Lose\", \"New Customers\") \
         that can never match under first-match evaluation"
    );

    let rows = customer_ids
        .iter()
        .enumerate()
        .map(|(i, &customer_id)| {
            // Low recency bins are the most recent buyers, so invert.
            let r_score = (RFM_BINS as u8) - recency_bins[i];
            let f_score = frequency_bins[i] + 1;
            let m_score = monetary_bins[i] + 1;
            RfmRow {
                customer_id,
                recency: recency[i],
                frequency: frequency[i],
                monetary: monetary[i],
                r_score,
                f_score,
                m_score,
                rfm_score: format!("{r_score}{f_score}{m_score}"),
                segment: assign_segment(r_score, f_score, m_score).to_string(),
            }
        })
        .collect();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bins_are_equal_population() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let bins = quantile_bins(&values, 5).unwrap();
        let mut counts = [0usize; 5];
        for bin in &bins {
            counts[*bin as usize] += 1;
        }
        for count in counts {
            assert!((19..=21).contains(&count), "bin size {count} out of range");
        }
    }

    #[test]
    fn binning_is_deterministic() {
        let values: Vec<f64> = (0..50).map(|v| (v * 7 % 50) as f64).collect();
        let first = quantile_bins(&values, 5).unwrap();
        let second = quantile_bins(&values, 5).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn degenerate_populations_fail_explicitly() {
        // Too small.
        let err = quantile_bins(&[1.0, 2.0, 3.0], 5).unwrap_err();
        assert!(matches!(err, AnalysisError::DegenerateInput { .. }));

        // All identical values collapse every edge.
        let identical = vec![5.0; 20];
        let err = quantile_bins(&identical, 5).unwrap_err();
        assert!(matches!(err, AnalysisError::DegenerateInput { .. }));
    }

    #[test]
    fn segment_is_pure_function_of_scores() {
        assert_eq!(assign_segment(5, 5, 5), "Champions");
        assert_eq!(assign_segment(4, 4, 4), "Champions");
        assert_eq!(assign_segment(3, 3, 3), "Loyal Customers");
        assert_eq!(assign_segment(3, 1, 1), "At Risk");
        assert_eq!(assign_segment(1, 5, 5), "Lost");
        // Same triple always maps to the same label.
        assert_eq!(assign_segment(4, 2, 1), assign_segment(4, 2, 1));
    }

    #[test]
    fn shadowed_rules_never_fire() {
        // Every triple that satisfies the "Can't Lose" predicate also
        // satisfies "At Risk", which precedes it.
        for r in 1..=5u8 {
            for f in 1..=5u8 {
                for m in 1..=5u8 {
                    let segment = assign_segment(r, f, m);
                    assert_ne!(segment, "Can't Lose");
                    assert_ne!(segment, "New Customers");
                }
            }
        }
    }

    #[test]
    fn recency_scores_invert() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64 * 10.0).collect();
        let bins = quantile_bins(&values, 5).unwrap();
        // The smallest recency lands in bin 0, which maps to score 5.
        assert_eq!(bins[0], 0);
        assert_eq!(5 - bins[0], 5);
        assert_eq!(bins[9], 4);
        assert_eq!(5 - bins[9], 1);
    }
}
