//! Request and response bodies of the HTTP endpoints.

use crate::data::dataset::cell_as_f64;
use crate::data::{Dataset, Row};
use crate::error::{ForgeError, Result};
use crate::ml::{Algorithm, ParamMap};
use crate::types::{ClassProbabilities, Explanation};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single target column or several
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TargetSpec {
    One(String),
    Many(Vec<String>),
}

impl TargetSpec {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            TargetSpec::One(target) => vec![target],
            TargetSpec::Many(targets) => targets,
        }
    }
}

/// Rows to predict: a matrix, one row, or records keyed by feature name
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum InputData {
    Matrix(Vec<Vec<f64>>),
    Single(Vec<f64>),
    Records(Vec<Row>),
    Record(Row),
}

impl InputData {
    /// Numeric rows in model feature order. Records are read by name.
    pub fn into_rows(self, features: &[String]) -> Result<Vec<Vec<f64>>> {
        match self {
            InputData::Matrix(rows) => Ok(rows),
            InputData::Single(row) => Ok(vec![row]),
            InputData::Record(record) => Ok(vec![record_row(&record, features, 0)?]),
            InputData::Records(records) => records
                .iter()
                .enumerate()
                .map(|(i, record)| record_row(record, features, i))
                .collect(),
        }
    }
}

fn record_row(record: &Row, features: &[String], index: usize) -> Result<Vec<f64>> {
    if let Some(extra) = record.keys().find(|k| !features.contains(k)) {
        return Err(ForgeError::Validation(format!(
            "Input row {} has column '{}' the model was not trained on",
            index, extra
        )));
    }
    features
        .iter()
        .map(|feature| {
            record.get(feature).and_then(cell_as_f64).ok_or_else(|| {
                ForgeError::Validation(format!(
                    "Input row {} needs a numeric value for '{}'",
                    index, feature
                ))
            })
        })
        .collect()
}

fn default_dataset_name() -> String {
    "dataset".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainBody {
    pub data: Dataset,
    pub features: Vec<String>,
    pub target: TargetSpec,
    pub algorithm: Algorithm,
    #[serde(default)]
    pub model_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    #[serde(default)]
    pub hyperparameters: Option<ParamMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainResponse {
    pub success: bool,
    pub accuracy: f64,
    pub model_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictBody {
    pub model_id: String,
    pub input_data: InputData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictResponse {
    pub success: bool,
    pub predictions: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<ClassProbabilities>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportModelBody {
    pub model_id: String,
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportModelResponse {
    pub success: bool,
    pub model_id: String,
    pub accuracy: f64,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportNotebookBody {
    pub data: Dataset,
    pub features: Vec<String>,
    pub targets: TargetSpec,
    pub algorithm: Algorithm,
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    pub model_id: String,
    #[serde(default)]
    pub architecture: Option<Vec<u32>>,
    #[serde(default)]
    pub epochs: Option<u32>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
    #[serde(default)]
    pub hyperparameters: Option<ParamMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportNotebookResponse {
    pub success: bool,
    /// The `.ipynb` document as JSON text
    pub notebook_content: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn features() -> Vec<String> {
        vec!["a".to_string(), "b".to_string()]
    }

    #[test]
    fn test_input_shapes() {
        let matrix: InputData = serde_json::from_value(json!([[1.2, 3.4], [5.6, 7.8]])).unwrap();
        assert_eq!(matrix.into_rows(&features()).unwrap().len(), 2);

        let single: InputData = serde_json::from_value(json!([1.0, 2.0])).unwrap();
        assert_eq!(single.into_rows(&features()).unwrap(), vec![vec![1.0, 2.0]]);

        let records: InputData = serde_json::from_value(json!([{"b": 2, "a": "1.5"}])).unwrap();
        assert_eq!(records.into_rows(&features()).unwrap(), vec![vec![1.5, 2.0]]);
    }

    #[test]
    fn test_record_with_missing_feature() {
        let records: InputData = serde_json::from_value(json!([{"a": 1}])).unwrap();
        let err = records.into_rows(&features()).unwrap_err();
        assert!(err.to_string().contains("'b'"));
    }

    #[test]
    fn test_target_spec_forms() {
        let one: TargetSpec = serde_json::from_value(json!("y")).unwrap();
        let many: TargetSpec = serde_json::from_value(json!(["y", "z"])).unwrap();
        assert_eq!(one.into_vec(), vec!["y"]);
        assert_eq!(many.into_vec().len(), 2);
    }

    #[test]
    fn test_train_body_defaults() {
        let body: TrainBody = serde_json::from_value(json!({
            "data": [{"a": 1, "y": 0}],
            "features": ["a"],
            "target": "y",
            "algorithm": "Random Forest"
        }))
        .unwrap();
        assert_eq!(body.dataset_name, "dataset");
        assert!(body.model_id.is_none());
        assert_eq!(body.algorithm, Algorithm::RandomForest);
    }
}
