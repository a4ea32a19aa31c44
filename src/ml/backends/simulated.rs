use super::{artifact_field, ModelBackend, Predictor, Trainer, TrainingJob, TrainingOutcome};
use crate::data::dataset::label_key;
use crate::data::DataValidator;
use crate::error::{ForgeError, Result};
use crate::ml::Task;
use crate::runtime::CancelFlag;
use crate::types::{ClassProbabilities, Explanation, ExplanationKind, FeatureWeight, ModelRecord, PredictionOutput};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// In-process stand-in for a real trainer.
///
/// Accuracy is drawn uniformly from [0.70, 0.98] and is NOT a measurement
/// of anything; predictions are sampled from the target distribution seen
/// during training. Use it for demos and UI work only.
pub struct SimulatedBackend {
    rng: Mutex<StdRng>,
}

impl SimulatedBackend {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng: Mutex::new(rng) }
    }

    fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut rng)
    }
}

impl Trainer for SimulatedBackend {
    fn train(&self, job: &TrainingJob<'_>, cancel: &CancelFlag) -> Result<TrainingOutcome> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }

        let target_summary = match job.task {
            Task::Classification => {
                let values = DataValidator::target_column(job.dataset, job.target)?;
                let mut counts: BTreeMap<String, (Value, usize)> = BTreeMap::new();
                for value in values {
                    counts.entry(label_key(&value)).or_insert((value, 0)).1 += 1;
                }
                let total = counts.values().map(|(_, n)| *n).sum::<usize>() as f64;
                let classes: Vec<Value> = counts.values().map(|(v, _)| v.clone()).collect();
                let priors: Vec<f64> = counts.values().map(|(_, n)| *n as f64 / total).collect();
                json!({ "classes": classes, "priors": priors })
            }
            Task::Regression => {
                let values = DataValidator::numeric_target(job.dataset, job.target)?;
                let n = values.len() as f64;
                let mean = values.iter().sum::<f64>() / n;
                let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
                json!({ "mean": mean, "std": std })
            }
        };

        let (accuracy, importances) = self.with_rng(|rng| {
            let accuracy = rng.gen_range(0.70..0.98);
            let raw: Vec<f64> = job.features.iter().map(|_| rng.gen_range(0.05..1.0)).collect();
            let sum: f64 = raw.iter().sum();
            (accuracy, raw.into_iter().map(|w| w / sum).collect::<Vec<_>>())
        });

        log::info!(
            "Simulated training of {} on '{}' ({} rows): accuracy {:.3} (synthetic)",
            job.algorithm(),
            job.target,
            job.dataset.len(),
            accuracy
        );

        Ok(TrainingOutcome {
            algorithm: job.algorithm(),
            accuracy,
            parameters: job.params.to_map(),
            artifact: json!({
                "synthetic": true,
                "target": target_summary,
                "importances": importances,
            }),
        })
    }
}

impl Predictor for SimulatedBackend {
    fn predict(&self, model: &ModelRecord, rows: &[Vec<f64>], cancel: &CancelFlag) -> Result<PredictionOutput> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        let target = model
            .primary_target()
            .ok_or_else(|| ForgeError::Validation(format!("Model {} has no target", model.id)))?;
        let summary = artifact_field(model, target, "target")?;

        let explanation = artifact_field(model, target, "importances")
            .ok()
            .and_then(|v| serde_json::from_value::<Vec<f64>>(v.clone()).ok())
            .map(|weights| Explanation {
                kind: ExplanationKind::FeatureImportance,
                weights: model
                    .features
                    .iter()
                    .zip(weights)
                    .map(|(feature, weight)| FeatureWeight { feature: feature.clone(), weight })
                    .collect(),
            });

        match model.task {
            Task::Classification => {
                let classes: Vec<Value> = serde_json::from_value(summary["classes"].clone())?;
                let priors: Vec<f64> = serde_json::from_value(summary["priors"].clone())?;
                if classes.is_empty() || classes.len() != priors.len() {
                    return Err(ForgeError::backend(format!(
                        "Model {} has an inconsistent class artifact",
                        model.id
                    )));
                }

                let (predictions, probabilities) = self.with_rng(|rng| {
                    let mut predictions = Vec::with_capacity(rows.len());
                    let mut probabilities = Vec::with_capacity(rows.len());
                    for _ in rows {
                        let raw: Vec<f64> = priors.iter().map(|p| p * rng.gen_range(0.5..1.5)).collect();
                        let sum: f64 = raw.iter().sum();
                        let dist: ClassProbabilities = classes
                            .iter()
                            .zip(raw.iter())
                            .map(|(c, p)| (label_key(c), p / sum))
                            .collect();
                        let best = raw
                            .iter()
                            .enumerate()
                            .max_by(|a, b| a.1.total_cmp(b.1))
                            .map(|(i, _)| i)
                            .unwrap_or(0);
                        predictions.push(classes[best].clone());
                        probabilities.push(dist);
                    }
                    (predictions, probabilities)
                });

                Ok(PredictionOutput {
                    predictions,
                    probabilities: Some(probabilities),
                    explanation,
                })
            }
            Task::Regression => {
                let mean = summary["mean"].as_f64().unwrap_or(0.0);
                let std = summary["std"].as_f64().unwrap_or(0.0);
                let predictions = self.with_rng(|rng| {
                    rows.iter()
                        .map(|_| {
                            let noise = if std > 0.0 { rng.gen_range(-std..std) } else { 0.0 };
                            json!(mean + noise)
                        })
                        .collect()
                });
                Ok(PredictionOutput {
                    predictions,
                    probabilities: None,
                    explanation,
                })
            }
        }
    }
}

impl ModelBackend for SimulatedBackend {
    fn name(&self) -> &'static str {
        "simulated"
    }
}
