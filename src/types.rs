use crate::data::TrainingData;
use crate::error::{ForgeError, Result};
use crate::ml::{Algorithm, ParamMap, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Persisted result of a training invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(rename = "type", default = "default_model_type")]
    pub model_type: String,
    pub algorithm: Algorithm,
    pub task: Task,
    pub accuracy: f64,
    pub dataset_name: String,
    pub parameters: ParamMap,
    pub features: Vec<String>,
    pub targets: Vec<String>,
    pub trained: bool,
    /// Backend that produced the artifacts
    pub backend: String,
    /// Backend-specific state keyed by target column
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    #[serde(default)]
    pub versions: Vec<ModelVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_data: Option<TrainingData>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

fn default_model_type() -> String {
    "ML".to_string()
}

impl ModelRecord {
    pub fn validate(&self) -> Result<()> {
        if !self.accuracy.is_finite() || !(0.0..=1.0).contains(&self.accuracy) {
            return Err(ForgeError::Validation(format!(
                "Accuracy must be within [0, 1], got {}",
                self.accuracy
            )));
        }
        if self.targets.is_empty() {
            return Err(ForgeError::Validation("Model must have at least one target".to_string()));
        }
        if self.versions.iter().filter(|v| v.is_active).count() > 1 {
            return Err(ForgeError::Validation(format!(
                "Model {} has more than one active version",
                self.id
            )));
        }
        Ok(())
    }

    /// Target predicted by `predict`; the first listed one
    pub fn primary_target(&self) -> Option<&str> {
        self.targets.first().map(|s| s.as_str())
    }

    pub fn active_version(&self) -> Option<&ModelVersion> {
        self.versions.iter().find(|v| v.is_active)
    }

    /// Snapshots the current training state as a new active version
    pub fn push_version(&mut self) -> &ModelVersion {
        let number = self.versions.len() + 1;
        for version in &mut self.versions {
            version.is_active = false;
        }
        self.versions.push(ModelVersion {
            id: uuid::Uuid::new_v4().to_string(),
            name: format!("v{}", number),
            created: Utc::now(),
            algorithm: self.algorithm,
            task: Some(self.task),
            parameters: self.parameters.clone(),
            accuracy: self.accuracy,
            features: self.features.clone(),
            targets: self.targets.clone(),
            backend: self.backend.clone(),
            artifacts: self.artifacts.clone(),
            is_active: true,
        });
        &self.versions[self.versions.len() - 1]
    }

    /// Makes `version_id` the only active version and restores its
    /// snapshot onto the record
    pub fn activate_version(&mut self, version_id: &str) -> Result<()> {
        let index = self
            .versions
            .iter()
            .position(|v| v.id == version_id || v.name == version_id)
            .ok_or_else(|| {
                ForgeError::NotFound(format!("version {} of model {}", version_id, self.id))
            })?;

        for (i, version) in self.versions.iter_mut().enumerate() {
            version.is_active = i == index;
        }

        let chosen = &self.versions[index];
        self.algorithm = chosen.algorithm;
        self.task = chosen.task.unwrap_or_else(|| chosen.algorithm.task());
        self.parameters = chosen.parameters.clone();
        self.accuracy = chosen.accuracy;
        self.artifacts = chosen.artifacts.clone();
        // snapshots written before these fields existed leave them empty
        if !chosen.features.is_empty() {
            self.features = chosen.features.clone();
        }
        if !chosen.targets.is_empty() {
            self.targets = chosen.targets.clone();
        }
        if !chosen.backend.is_empty() {
            self.backend = chosen.backend.clone();
        }
        self.updated = Utc::now();
        Ok(())
    }
}

/// Snapshot of one training outcome within a model's lineage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelVersion {
    pub id: String,
    pub name: String,
    pub created: DateTime<Utc>,
    pub algorithm: Algorithm,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Task>,
    pub parameters: ParamMap,
    pub accuracy: f64,
    /// Input columns the snapshot's artifacts expect
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub artifacts: BTreeMap<String, Value>,
    pub is_active: bool,
}

/// Metadata-only update
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelPatch {
    pub name: Option<String>,
    pub dataset_name: Option<String>,
    #[serde(rename = "type")]
    pub model_type: Option<String>,
}

/// Per-feature weight attached to a prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureWeight {
    pub feature: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExplanationKind {
    FeatureImportance,
    Coefficients,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub kind: ExplanationKind,
    pub weights: Vec<FeatureWeight>,
}

/// Class label -> probability, one map per input row
pub type ClassProbabilities = BTreeMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionOutput {
    pub predictions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<ClassProbabilities>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}
