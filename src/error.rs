//! Error taxonomy for the analysis pipeline.
//!
//! Stages fail fast with a specific kind; the orchestrator never downgrades
//! an error to a warning. Retrying without changing input cannot fix a data
//! or configuration problem, so there is no retry path.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Broken foreign keys, or duplicate primary keys surviving the
    /// cleaning pass. Aborts the run.
    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    /// Quantile binning or clustering requested with insufficient distinct
    /// values or population size.
    #[error("degenerate input in {stage}: {reason}")]
    DegenerateInput { stage: &'static str, reason: String },

    /// The churn label has only one class, so stratified splitting and
    /// area-under-ROC are undefined.
    #[error("churn label has a single class ({class}) in the training population")]
    SingleClassLabel { class: u8 },

    /// A feature expected by a previously-fitted scaler is absent from the
    /// scoring data. Never silently substituted with zero.
    #[error("feature '{0}' expected by the fitted scaler is missing from scoring data")]
    MissingFeature(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type AnalysisResult<T> = Result<T, AnalysisError>;
