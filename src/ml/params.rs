use super::algorithms::Algorithm;
use crate::error::{ForgeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Flat name -> value record, the shape stored on a model
pub type ParamMap = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForestParams {
    pub n_estimators: u32,
    pub max_depth: u32,
    pub min_samples_split: u32,
    pub bootstrap: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeParams {
    pub max_depth: u32,
    pub min_samples_split: u32,
    pub criterion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostingParams {
    pub n_estimators: u32,
    pub learning_rate: f64,
    pub max_depth: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticRegressionParams {
    pub c: f64,
    pub max_iter: u32,
    pub penalty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressionParams {
    pub fit_intercept: bool,
    pub epochs: u32,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmParams {
    pub c: f64,
    pub kernel: String,
    pub gamma: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnnParams {
    pub n_neighbors: u32,
    pub weights: String,
    pub metric: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeuralNetworkParams {
    pub hidden_layers: u32,
    pub hidden_units: u32,
    pub epochs: u32,
    pub learning_rate: f64,
    pub activation: String,
}

/// Strongly typed hyperparameters, one variant per algorithm
#[derive(Debug, Clone, PartialEq)]
pub enum AlgorithmParams {
    RandomForest(RandomForestParams),
    DecisionTree(DecisionTreeParams),
    GradientBoosting(GradientBoostingParams),
    LogisticRegression(LogisticRegressionParams),
    LinearRegression(LinearRegressionParams),
    Svm(SvmParams),
    KNearestNeighbors(KnnParams),
    NeuralNetwork(NeuralNetworkParams),
}

impl AlgorithmParams {
    /// Defaults for every option of `algorithm`
    pub fn defaults(algorithm: Algorithm) -> Self {
        // Schema defaults always satisfy the schema.
        Self::resolve(algorithm, &ParamMap::new()).unwrap_or_else(|e| {
            unreachable!("schema defaults for {} are invalid: {}", algorithm, e)
        })
    }

    /// Validates `supplied` against the algorithm's schema, substituting
    /// defaults for missing keys. Unknown keys are rejected.
    pub fn resolve(algorithm: Algorithm, supplied: &ParamMap) -> Result<Self> {
        let schema = algorithm.schema();

        if let Some(unknown) = supplied
            .keys()
            .find(|k| !schema.iter().any(|o| &o.name == *k))
        {
            return Err(ForgeError::Validation(format!(
                "Unknown hyperparameter '{}' for {} (known: {})",
                unknown,
                algorithm,
                schema.iter().map(|o| o.name.as_str()).collect::<Vec<_>>().join(", ")
            )));
        }

        let mut resolved = ParamMap::new();
        for option in &schema {
            let value = match supplied.get(&option.name) {
                Some(Value::Null) | None => option.check(&option.default)?,
                Some(v) => option.check(v)?,
            };
            resolved.insert(option.name.clone(), value);
        }

        Self::from_resolved(algorithm, resolved)
    }

    fn from_resolved(algorithm: Algorithm, resolved: ParamMap) -> Result<Self> {
        let value = Value::Object(resolved);
        Ok(match algorithm {
            Algorithm::RandomForest => Self::RandomForest(typed(value)?),
            Algorithm::DecisionTree => Self::DecisionTree(typed(value)?),
            Algorithm::GradientBoosting => Self::GradientBoosting(typed(value)?),
            Algorithm::LogisticRegression => Self::LogisticRegression(typed(value)?),
            Algorithm::LinearRegression => Self::LinearRegression(typed(value)?),
            Algorithm::Svm => Self::Svm(typed(value)?),
            Algorithm::KNearestNeighbors => Self::KNearestNeighbors(typed(value)?),
            Algorithm::NeuralNetwork => Self::NeuralNetwork(typed(value)?),
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            Self::RandomForest(_) => Algorithm::RandomForest,
            Self::DecisionTree(_) => Algorithm::DecisionTree,
            Self::GradientBoosting(_) => Algorithm::GradientBoosting,
            Self::LogisticRegression(_) => Algorithm::LogisticRegression,
            Self::LinearRegression(_) => Algorithm::LinearRegression,
            Self::Svm(_) => Algorithm::Svm,
            Self::KNearestNeighbors(_) => Algorithm::KNearestNeighbors,
            Self::NeuralNetwork(_) => Algorithm::NeuralNetwork,
        }
    }

    pub fn to_map(&self) -> ParamMap {
        let value = match self {
            Self::RandomForest(p) => serde_json::to_value(p),
            Self::DecisionTree(p) => serde_json::to_value(p),
            Self::GradientBoosting(p) => serde_json::to_value(p),
            Self::LogisticRegression(p) => serde_json::to_value(p),
            Self::LinearRegression(p) => serde_json::to_value(p),
            Self::Svm(p) => serde_json::to_value(p),
            Self::KNearestNeighbors(p) => serde_json::to_value(p),
            Self::NeuralNetwork(p) => serde_json::to_value(p),
        };
        match value {
            Ok(Value::Object(map)) => map,
            _ => ParamMap::new(),
        }
    }

    /// Applies `overrides` on top of the current values and re-validates
    pub fn merge(&self, overrides: &ParamMap) -> Result<Self> {
        let mut combined = self.to_map();
        for (k, v) in overrides {
            combined.insert(k.clone(), v.clone());
        }
        Self::resolve(self.algorithm(), &combined)
    }
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| ForgeError::Validation(format!("Invalid hyperparameters: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> ParamMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_defaults_fill_missing_keys() {
        let params = AlgorithmParams::resolve(
            Algorithm::RandomForest,
            &map(json!({"n_estimators": 250})),
        )
        .unwrap();

        match params {
            AlgorithmParams::RandomForest(p) => {
                assert_eq!(p.n_estimators, 250);
                assert_eq!(p.max_depth, 10);
                assert!(p.bootstrap);
            }
            other => panic!("unexpected variant {:?}", other),
        }
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = AlgorithmParams::resolve(Algorithm::Svm, &map(json!({"epochs": 10}))).unwrap_err();
        assert!(err.to_string().contains("Unknown hyperparameter 'epochs'"));
    }

    #[test]
    fn test_to_map_contains_every_schema_key() {
        for algorithm in Algorithm::all() {
            let params = AlgorithmParams::defaults(algorithm);
            let m = params.to_map();
            for option in algorithm.schema() {
                assert!(m.contains_key(&option.name), "{} missing {}", algorithm, option.name);
            }
        }
    }

    #[test]
    fn test_merge_revalidates() {
        let base = AlgorithmParams::defaults(Algorithm::LinearRegression);
        let merged = base.merge(&map(json!({"epochs": 900}))).unwrap();
        assert_eq!(merged.to_map()["epochs"], json!(900));
        assert!(base.merge(&map(json!({"learning_rate": 5.0}))).is_err());
    }

    #[test]
    fn test_null_means_default() {
        let params = AlgorithmParams::resolve(
            Algorithm::KNearestNeighbors,
            &map(json!({"n_neighbors": null})),
        )
        .unwrap();
        assert_eq!(params.to_map()["n_neighbors"], json!(5));
    }
}
