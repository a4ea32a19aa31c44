use super::{artifact_field, ModelBackend, Predictor, Trainer, TrainingJob, TrainingOutcome};
use crate::data::dataset::label_key;
use crate::data::DataValidator;
use crate::error::{ForgeError, Result};
use crate::ml::split::HoldoutSplitter;
use crate::ml::{AlgorithmParams, KnnParams, LinearRegressionParams};
use crate::runtime::CancelFlag;
use crate::types::{ClassProbabilities, Explanation, ExplanationKind, FeatureWeight, ModelRecord, PredictionOutput};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Real in-process estimators, evaluated on a held-out split.
///
/// Supports K-Nearest Neighbors (classification) and Linear Regression
/// (gradient descent). Other algorithms need the subprocess or remote
/// backend.
pub struct NativeBackend {
    splitter: HoldoutSplitter,
}

impl NativeBackend {
    pub fn new(test_size: f64, seed: Option<u64>) -> Self {
        Self {
            splitter: HoldoutSplitter::new(test_size, seed),
        }
    }
}

/// Per-feature standardization learned from the training partition
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Scaler {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Scaler {
    fn fit(rows: &[Vec<f64>]) -> Self {
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len().max(1) as f64;
        let mut means = vec![0.0; width];
        let mut stds = vec![0.0; width];

        for row in rows {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        for row in rows {
            for ((s, v), m) in stds.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in &mut stds {
            *s = s.sqrt();
            if *s < 1e-12 {
                *s = 1.0;
            }
        }
        Self { means, stds }
    }

    fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.stds))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnnArtifact {
    scaler: Scaler,
    points: Vec<Vec<f64>>,
    labels: Vec<Value>,
    classes: Vec<Value>,
    params: KnnParams,
}

impl KnnArtifact {
    fn distance(&self, a: &[f64], b: &[f64]) -> f64 {
        match self.params.metric.as_str() {
            "manhattan" => a.iter().zip(b).map(|(x, y)| (x - y).abs()).sum(),
            _ => a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt(),
        }
    }

    /// Vote share per class for one raw (unscaled) row
    fn vote(&self, row: &[f64]) -> Vec<f64> {
        let query = self.scaler.transform(row);
        let mut neighbours: Vec<(f64, usize)> = self
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| (self.distance(&query, p), i))
            .collect();
        neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));

        let k = (self.params.n_neighbors as usize).min(neighbours.len()).max(1);
        let mut votes = vec![0.0; self.classes.len()];
        for (distance, i) in neighbours.into_iter().take(k) {
            let weight = match self.params.weights.as_str() {
                "distance" => 1.0 / (distance + 1e-9),
                _ => 1.0,
            };
            let key = label_key(&self.labels[i]);
            if let Some(c) = self.classes.iter().position(|c| label_key(c) == key) {
                votes[c] += weight;
            }
        }

        let total: f64 = votes.iter().sum();
        if total > 0.0 {
            for v in &mut votes {
                *v /= total;
            }
        }
        votes
    }

    fn classify(&self, row: &[f64]) -> (Value, ClassProbabilities) {
        let votes = self.vote(row);
        let best = votes
            .iter()
            .enumerate()
            .fold((0, f64::MIN), |acc, (i, v)| if *v > acc.1 { (i, *v) } else { acc })
            .0;
        let dist = self
            .classes
            .iter()
            .zip(&votes)
            .map(|(c, v)| (label_key(c), *v))
            .collect();
        (self.classes[best].clone(), dist)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinearArtifact {
    scaler: Scaler,
    weights: Vec<f64>,
    bias: f64,
}

impl LinearArtifact {
    fn predict(&self, row: &[f64]) -> f64 {
        let x = self.scaler.transform(row);
        self.bias + x.iter().zip(&self.weights).map(|(a, w)| a * w).sum::<f64>()
    }

    /// Coefficients on the original feature scale
    fn coefficients(&self) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.scaler.stds)
            .map(|(w, s)| w / s)
            .collect()
    }
}

fn pick(rows: &[Vec<f64>], indices: &[usize]) -> Vec<Vec<f64>> {
    indices.iter().map(|&i| rows[i].clone()).collect()
}

fn pick_values<T: Clone>(values: &[T], indices: &[usize]) -> Vec<T> {
    indices.iter().map(|&i| values[i].clone()).collect()
}

impl NativeBackend {
    fn train_knn(&self, job: &TrainingJob<'_>, params: &KnnParams) -> Result<(f64, Value)> {
        let x = DataValidator::feature_matrix(job.dataset, job.features)?;
        let y = DataValidator::target_column(job.dataset, job.target)?;
        let split = self.splitter.split(x.len())?;

        let train_x = pick(&x, &split.train);
        let scaler = Scaler::fit(&train_x);
        let labels = pick_values(&y, &split.train);

        let mut classes: Vec<Value> = Vec::new();
        for label in &y {
            if !classes.iter().any(|c| label_key(c) == label_key(label)) {
                classes.push(label.clone());
            }
        }

        let model = KnnArtifact {
            points: train_x.iter().map(|r| scaler.transform(r)).collect(),
            scaler,
            labels,
            classes,
            params: params.clone(),
        };

        let correct = split
            .test
            .par_iter()
            .filter(|&&i| label_key(&model.classify(&x[i]).0) == label_key(&y[i]))
            .count();
        let accuracy = correct as f64 / split.test.len() as f64;

        Ok((accuracy, serde_json::to_value(&model)?))
    }

    fn train_linear(
        &self,
        job: &TrainingJob<'_>,
        params: &LinearRegressionParams,
        cancel: &CancelFlag,
    ) -> Result<(f64, Value)> {
        let x = DataValidator::feature_matrix(job.dataset, job.features)?;
        let y = DataValidator::numeric_target(job.dataset, job.target)?;
        let split = self.splitter.split(x.len())?;

        let train_raw = pick(&x, &split.train);
        let scaler = Scaler::fit(&train_raw);
        let train_x: Vec<Vec<f64>> = train_raw.iter().map(|r| scaler.transform(r)).collect();
        let train_y = pick_values(&y, &split.train);

        let n = train_x.len() as f64;
        let mut weights = vec![0.0; job.features.len()];
        let mut bias = if params.fit_intercept {
            train_y.iter().sum::<f64>() / n
        } else {
            0.0
        };

        for epoch in 0..params.epochs {
            if epoch % 100 == 0 && cancel.is_cancelled() {
                return Err(ForgeError::Cancelled);
            }
            let mut grad_w = vec![0.0; weights.len()];
            let mut grad_b = 0.0;
            for (row, target) in train_x.iter().zip(&train_y) {
                let error = bias + row.iter().zip(&weights).map(|(a, w)| a * w).sum::<f64>() - target;
                for (g, a) in grad_w.iter_mut().zip(row) {
                    *g += 2.0 * error * a / n;
                }
                grad_b += 2.0 * error / n;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= params.learning_rate * g;
            }
            if params.fit_intercept {
                bias -= params.learning_rate * grad_b;
            }
        }

        if weights.iter().any(|w| !w.is_finite()) || !bias.is_finite() {
            return Err(ForgeError::backend(format!(
                "Linear regression diverged with learning_rate {}",
                params.learning_rate
            )));
        }

        let model = LinearArtifact { scaler, weights, bias };

        let test_y = pick_values(&y, &split.test);
        let predictions: Vec<f64> = split.test.par_iter().map(|&i| model.predict(&x[i])).collect();
        let accuracy = r_squared(&test_y, &predictions).clamp(0.0, 1.0);

        Ok((accuracy, serde_json::to_value(&model)?))
    }
}

/// Coefficient of determination; a constant target scores 1 only when
/// predicted exactly
fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len() as f64;
    let mean = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean).powi(2)).sum();
    let ss_res: f64 = actual.iter().zip(predicted).map(|(a, p)| (a - p).powi(2)).sum();
    if ss_tot < 1e-12 {
        return if ss_res < 1e-9 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

impl Trainer for NativeBackend {
    fn train(&self, job: &TrainingJob<'_>, cancel: &CancelFlag) -> Result<TrainingOutcome> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }

        let (accuracy, artifact) = match job.params {
            AlgorithmParams::KNearestNeighbors(p) => self.train_knn(job, p)?,
            AlgorithmParams::LinearRegression(p) => self.train_linear(job, p, cancel)?,
            other => {
                return Err(ForgeError::backend(format!(
                    "{} is not available in the native backend (supported: K-Nearest Neighbors, Linear Regression)",
                    other.algorithm()
                )))
            }
        };

        log::info!(
            "Native training of {} on '{}': held-out score {:.4}",
            job.algorithm(),
            job.target,
            accuracy
        );

        Ok(TrainingOutcome {
            algorithm: job.algorithm(),
            accuracy,
            parameters: job.params.to_map(),
            artifact,
        })
    }
}

impl Predictor for NativeBackend {
    fn predict(&self, model: &ModelRecord, rows: &[Vec<f64>], cancel: &CancelFlag) -> Result<PredictionOutput> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        let target = model
            .primary_target()
            .ok_or_else(|| ForgeError::Validation(format!("Model {} has no target", model.id)))?;
        let artifact = model.artifacts.get(target).ok_or_else(|| {
            ForgeError::backend(format!("Model {} has no artifact for '{}'", model.id, target))
        })?;

        if artifact_field(model, target, "points").is_ok() {
            let knn: KnnArtifact = serde_json::from_value(artifact.clone())?;
            let results: Vec<(Value, ClassProbabilities)> = rows.par_iter().map(|r| knn.classify(r)).collect();
            let (predictions, probabilities): (Vec<Value>, Vec<ClassProbabilities>) =
                results.into_iter().unzip();
            return Ok(PredictionOutput {
                predictions,
                probabilities: Some(probabilities),
                explanation: None,
            });
        }

        let linear: LinearArtifact = serde_json::from_value(artifact.clone())?;
        let predictions: Vec<Value> = rows.par_iter().map(|r| json!(linear.predict(r))).collect();
        let explanation = Explanation {
            kind: ExplanationKind::Coefficients,
            weights: model
                .features
                .iter()
                .zip(linear.coefficients())
                .map(|(feature, weight)| FeatureWeight { feature: feature.clone(), weight })
                .collect(),
        };

        Ok(PredictionOutput {
            predictions,
            probabilities: None,
            explanation: Some(explanation),
        })
    }
}

impl ModelBackend for NativeBackend {
    fn name(&self) -> &'static str {
        "native"
    }
}
