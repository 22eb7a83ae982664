//! Churn model training, evaluation, and selection.
//!
//! Three model families train independently behind one contract: a bagged
//! forest of classification trees, gradient-boosted regression trees on
//! logistic loss, and a linear model from linfa. The best model is the one
//! with the highest held-out area-under-ROC; ties resolve to whichever
//! model was trained first. Training returns an immutable outcome carrying
//! the fitted model together with the scaler it was trained with, so a
//! stale scaler can never be paired with a model at scoring time.

use linfa::prelude::*;
use linfa_logistic::{FittedLogisticRegression, LogisticRegression};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{AnalysisError, AnalysisResult};
use crate::scaling::{FeatureMatrix, StandardScaler};
use crate::tree::{grow_tree, Tree, TreeParams};

const FOREST_TREES: usize = 100;
const FOREST_MAX_DEPTH: usize = 16;
const BOOSTING_ROUNDS: usize = 100;
const BOOSTING_LEARNING_RATE: f64 = 0.1;
const BOOSTING_MAX_DEPTH: usize = 3;
const LOGISTIC_MAX_ITERATIONS: u64 = 200;

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

/// Uniform contract over interchangeable classifier implementations.
pub trait Classifier {
    fn name(&self) -> &'static str;

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<u8>) -> AnalysisResult<()>;

    /// Probability of the positive (churned) class per row, in [0, 1].
    fn predict_proba(&self, x: &Array2<f64>) -> AnalysisResult<Array1<f64>>;

    fn predict(&self, x: &Array2<f64>) -> AnalysisResult<Array1<u8>> {
        Ok(self.predict_proba(x)?.mapv(|p| u8::from(p >= 0.5)))
    }

    /// Per-feature importance scores when the algorithm exposes them.
    fn feature_importances(&self) -> Option<Vec<f64>>;
}

/// Bagged ensemble of classification trees with per-split feature
/// subsampling.
pub struct RandomForestClassifier {
    seed: u64,
    trees: Vec<Tree>,
    importances: Option<Vec<f64>>,
}

impl RandomForestClassifier {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            trees: Vec::new(),
            importances: None,
        }
    }
}

impl Classifier for RandomForestClassifier {
    fn name(&self) -> &'static str {
        "Random Forest"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<u8>) -> AnalysisResult<()> {
        let n = x.nrows();
        let targets: Vec<f64> = y.iter().map(|&v| v as f64).collect();
        let feature_subsample = ((x.ncols() as f64).sqrt().round() as usize).max(1);
        let params = TreeParams {
            max_depth: FOREST_MAX_DEPTH,
            min_samples_split: 2,
            feature_subsample: Some(feature_subsample),
        };

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut importances = vec![0.0; x.ncols()];
        let mut trees = Vec::with_capacity(FOREST_TREES);
        for _ in 0..FOREST_TREES {
            let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
            let leaf = |indices: &[usize]| {
                indices.iter().map(|&i| targets[i]).sum::<f64>() / indices.len().max(1) as f64
            };
            let tree = grow_tree(
                x,
                &targets,
                &bootstrap,
                &params,
                Some(&mut rng),
                &leaf,
                Some(&mut importances),
            );
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for value in importances.iter_mut() {
                *value /= total;
            }
        }
        self.trees = trees;
        self.importances = Some(importances);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> AnalysisResult<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(AnalysisError::Other(anyhow::anyhow!(
                "random forest used before fitting"
            )));
        }
        let mut probabilities = Array1::zeros(x.nrows());
        for tree in &self.trees {
            for (i, value) in tree.predict(x).into_iter().enumerate() {
                probabilities[i] += value;
            }
        }
        Ok(probabilities.mapv(|sum: f64| sum / self.trees.len() as f64))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.importances.clone()
    }
}

/// Gradient-boosted regression trees on binary logistic loss with Newton
/// leaf steps.
pub struct GradientBoostingClassifier {
    base_score: f64,
    trees: Vec<Tree>,
    importances: Option<Vec<f64>>,
}

impl GradientBoostingClassifier {
    pub fn new() -> Self {
        Self {
            base_score: 0.0,
            trees: Vec::new(),
            importances: None,
        }
    }

    fn raw_scores(&self, x: &Array2<f64>) -> Array1<f64> {
        let mut scores = Array1::from_elem(x.nrows(), self.base_score);
        for tree in &self.trees {
            for (i, value) in tree.predict(x).into_iter().enumerate() {
                scores[i] += BOOSTING_LEARNING_RATE * value;
            }
        }
        scores
    }
}

impl Default for GradientBoostingClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for GradientBoostingClassifier {
    fn name(&self) -> &'static str {
        "Gradient Boosting"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<u8>) -> AnalysisResult<()> {
        let n = x.nrows();
        let positive_rate = (y.iter().map(|&v| v as f64).sum::<f64>() / n as f64)
            .clamp(1e-6, 1.0 - 1e-6);
        self.base_score = (positive_rate / (1.0 - positive_rate)).ln();

        let params = TreeParams {
            max_depth: BOOSTING_MAX_DEPTH,
            min_samples_split: 2,
            feature_subsample: None,
        };
        let indices: Vec<usize> = (0..n).collect();
        let mut scores = vec![self.base_score; n];
        let mut importances = vec![0.0; x.ncols()];
        let mut trees = Vec::with_capacity(BOOSTING_ROUNDS);

        for _ in 0..BOOSTING_ROUNDS {
            let mut residuals = vec![0.0; n];
            let mut hessians = vec![0.0; n];
            for i in 0..n {
                let p = sigmoid(scores[i]);
                residuals[i] = y[i] as f64 - p;
                hessians[i] = p * (1.0 - p);
            }

            let leaf = |members: &[usize]| {
                let gradient: f64 = members.iter().map(|&i| residuals[i]).sum();
                let hessian: f64 = members.iter().map(|&i| hessians[i]).sum();
                gradient / (hessian + 1e-12)
            };
            let tree = grow_tree(
                x,
                &residuals,
                &indices,
                &params,
                None,
                &leaf,
                Some(&mut importances),
            );
            for i in 0..n {
                scores[i] += BOOSTING_LEARNING_RATE * tree.predict_row(x.row(i));
            }
            trees.push(tree);
        }

        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            for value in importances.iter_mut() {
                *value /= total;
            }
        }
        self.trees = trees;
        self.importances = Some(importances);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> AnalysisResult<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(AnalysisError::Other(anyhow::anyhow!(
                "gradient boosting used before fitting"
            )));
        }
        Ok(self.raw_scores(x).mapv(sigmoid))
    }

    fn feature_importances(&self) -> Option<Vec<f64>> {
        self.importances.clone()
    }
}

/// Logistic regression via linfa.
pub struct LogisticRegressionClassifier {
    fitted: Option<FittedLogisticRegression<f64, u8>>,
    /// True when the library's positive class is our 0 label, so reported
    /// probabilities must be inverted.
    flip: bool,
}

impl LogisticRegressionClassifier {
    pub fn new() -> Self {
        Self {
            fitted: None,
            flip: false,
        }
    }
}

impl Default for LogisticRegressionClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for LogisticRegressionClassifier {
    fn name(&self) -> &'static str {
        "Logistic Regression"
    }

    fn fit(&mut self, x: &Array2<f64>, y: &Array1<u8>) -> AnalysisResult<()> {
        let dataset = Dataset::new(x.clone(), y.clone());
        let fitted = LogisticRegression::default()
            .max_iterations(LOGISTIC_MAX_ITERATIONS)
            .fit(&dataset)
            .map_err(anyhow::Error::from)?;

        // Establish which of our labels the library treats as positive.
        let probabilities = fitted.predict_probabilities(x);
        let predictions = fitted.predict(x);
        if let (Some(p), Some(label)) = (probabilities.first(), predictions.first()) {
            self.flip = if *p >= 0.5 { *label == 0 } else { *label == 1 };
        }
        self.fitted = Some(fitted);
        Ok(())
    }

    fn predict_proba(&self, x: &Array2<f64>) -> AnalysisResult<Array1<f64>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| {
            AnalysisError::Other(anyhow::anyhow!("logistic regression used before fitting"))
        })?;
        let probabilities = fitted.predict_probabilities(x);
        Ok(if self.flip {
            probabilities.mapv(|p| 1.0 - p)
        } else {
            probabilities
        })
    }

    /// Coefficient magnitudes, normalized to sum to one.
    fn feature_importances(&self) -> Option<Vec<f64>> {
        let fitted = self.fitted.as_ref()?;
        let magnitudes: Vec<f64> = fitted.params().iter().map(|c| c.abs()).collect();
        let total: f64 = magnitudes.iter().sum();
        if total > 0.0 {
            Some(magnitudes.into_iter().map(|m| m / total).collect())
        } else {
            Some(magnitudes)
        }
    }
}

/// Held-out evaluation of one trained model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelResult {
    pub name: String,
    pub accuracy: f64,
    pub auc: f64,
    pub predictions: Vec<u8>,
    pub probabilities: Vec<f64>,
    pub feature_importances: Option<Vec<f64>>,
}

/// Immutable result of the training stage: evaluation rows, the winning
/// fitted model, and the exact scaler used for training.
pub struct TrainingOutcome {
    pub results: Vec<ModelResult>,
    pub best_index: usize,
    pub best_model: Box<dyn Classifier>,
    pub scaler: StandardScaler,
    pub feature_names: Vec<String>,
}

impl std::fmt::Debug for TrainingOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainingOutcome")
            .field("results", &self.results)
            .field("best_index", &self.best_index)
            .field("best_model", &self.best_model.name())
            .field("scaler", &self.scaler)
            .field("feature_names", &self.feature_names)
            .finish()
    }
}

impl TrainingOutcome {
    pub fn best_result(&self) -> &ModelResult {
        &self.results[self.best_index]
    }
}

/// Index of the result with the maximum area-under-ROC. Ties resolve to the
/// earliest-trained model.
pub fn select_best(results: &[ModelResult]) -> usize {
    let mut best = 0;
    for (index, result) in results.iter().enumerate().skip(1) {
        if result.auc > results[best].auc {
            best = index;
        }
    }
    best
}

/// Stratified index split preserving label proportions in both partitions.
pub fn stratified_split(
    labels: &[u8],
    train_ratio: f64,
    seed: u64,
) -> AnalysisResult<(Vec<usize>, Vec<usize>)> {
    if !(train_ratio > 0.0 && train_ratio < 1.0) {
        return Err(AnalysisError::DegenerateInput {
            stage: "model training",
            reason: format!("train ratio {train_ratio} must be strictly between 0 and 1"),
        });
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [0u8, 1u8] {
        let mut members: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &label)| label == class)
            .map(|(index, _)| index)
            .collect();
        if members.len() < 2 {
            return Err(AnalysisError::DegenerateInput {
                stage: "model training",
                reason: format!(
                    "class {class} has {} member(s); need at least 2 to stratify",
                    members.len()
                ),
            });
        }
        members.shuffle(&mut rng);
        let n_test = (((1.0 - train_ratio) * members.len() as f64).round() as usize)
            .clamp(1, members.len() - 1);
        test.extend_from_slice(&members[..n_test]);
        train.extend_from_slice(&members[n_test..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Ok((train, test))
}

/// Ranking-quality metric for a binary classifier, computed with average
/// ranks so tied scores are handled exactly.
pub fn roc_auc(labels: &[u8], scores: &[f64]) -> AnalysisResult<f64> {
    let n_pos = labels.iter().filter(|&&l| l == 1).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return Err(AnalysisError::DegenerateInput {
            stage: "model evaluation",
            reason: "area-under-ROC is undefined for a single-class partition".to_string(),
        });
    }

    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|&a, &b| scores[a].partial_cmp(&scores[b]).unwrap_or(std::cmp::Ordering::Equal));

    let mut ranks = vec![0.0; labels.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based average rank across the tie group.
        let average = (i + j + 2) as f64 / 2.0;
        for &index in &order[i..=j] {
            ranks[index] = average;
        }
        i = j + 1;
    }

    let positive_rank_sum: f64 = labels
        .iter()
        .zip(&ranks)
        .filter(|(&label, _)| label == 1)
        .map(|(_, &rank)| rank)
        .sum();
    let auc = (positive_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0)
        / (n_pos as f64 * n_neg as f64);
    Ok(auc)
}

pub fn accuracy(labels: &[u8], predictions: &[u8]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = labels
        .iter()
        .zip(predictions)
        .filter(|(a, b)| a == b)
        .count();
    correct as f64 / labels.len() as f64
}

/// Impute, scale, split, and train all model families; evaluate each on the
/// held-out partition and select the best by area-under-ROC.
///
/// Fails with [`AnalysisError::SingleClassLabel`] before any model trains
/// if the label vector has one class.
pub fn train_models(
    features: &FeatureMatrix,
    labels: &[u8],
    train_ratio: f64,
    seed: u64,
) -> AnalysisResult<TrainingOutcome> {
    assert_eq!(features.n_rows(), labels.len(), "feature/label length mismatch");

    let has_positive = labels.iter().any(|&l| l == 1);
    let has_negative = labels.iter().any(|&l| l == 0);
    if !has_positive || !has_negative {
        return Err(AnalysisError::SingleClassLabel {
            class: labels.first().copied().unwrap_or(0),
        });
    }

    let x_raw = features.to_imputed_array();
    let scaler = StandardScaler::fit(&features.names, &x_raw);
    let x = scaler.transform(&x_raw);

    let (train_idx, test_idx) = stratified_split(labels, train_ratio, seed)?;
    let x_train = x.select(Axis(0), &train_idx);
    let x_test = x.select(Axis(0), &test_idx);
    let y_train: Array1<u8> = train_idx.iter().map(|&i| labels[i]).collect();
    let y_test: Vec<u8> = test_idx.iter().map(|&i| labels[i]).collect();
    log::debug!(
        "stratified split: {} train / {} test rows",
        train_idx.len(),
        test_idx.len()
    );

    let mut models: Vec<Box<dyn Classifier>> = vec![
        Box::new(RandomForestClassifier::new(seed)),
        Box::new(GradientBoostingClassifier::new()),
        Box::new(LogisticRegressionClassifier::new()),
    ];

    let mut results = Vec::with_capacity(models.len());
    for model in models.iter_mut() {
        log::info!("training {}", model.name());
        model.fit(&x_train, &y_train)?;
        let probabilities = model.predict_proba(&x_test)?;
        let predictions: Vec<u8> = probabilities.iter().map(|&p| u8::from(p >= 0.5)).collect();
        let auc = roc_auc(&y_test, probabilities.as_slice().expect("contiguous"))?;
        results.push(ModelResult {
            name: model.name().to_string(),
            accuracy: accuracy(&y_test, &predictions),
            auc,
            predictions,
            probabilities: probabilities.to_vec(),
            feature_importances: model.feature_importances(),
        });
    }

    let best_index = select_best(&results);
    log::info!(
        "selected {} (AUC {:.4})",
        results[best_index].name,
        results[best_index].auc
    );
    let best_model = models.remove(best_index);

    Ok(TrainingOutcome {
        results,
        best_index,
        best_model,
        scaler,
        feature_names: features.names.clone(),
    })
}
