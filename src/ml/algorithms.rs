use crate::error::{ForgeError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::json;
use std::fmt;

/// Closed set of supported algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    RandomForest,
    DecisionTree,
    GradientBoosting,
    LogisticRegression,
    LinearRegression,
    Svm,
    KNearestNeighbors,
    NeuralNetwork,
}

/// What the model's target column is predicted as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Task {
    Classification,
    Regression,
}

impl Algorithm {
    pub fn all() -> Vec<Self> {
        vec![
            Self::RandomForest,
            Self::DecisionTree,
            Self::GradientBoosting,
            Self::LogisticRegression,
            Self::LinearRegression,
            Self::Svm,
            Self::KNearestNeighbors,
            Self::NeuralNetwork,
        ]
    }

    /// Display name, also the wire representation
    pub fn name(&self) -> &'static str {
        match self {
            Self::RandomForest => "Random Forest",
            Self::DecisionTree => "Decision Tree",
            Self::GradientBoosting => "Gradient Boosting",
            Self::LogisticRegression => "Logistic Regression",
            Self::LinearRegression => "Linear Regression",
            Self::Svm => "SVM",
            Self::KNearestNeighbors => "K-Nearest Neighbors",
            Self::NeuralNetwork => "Neural Network",
        }
    }

    /// Identifier used in generated code and file names
    pub fn slug(&self) -> &'static str {
        match self {
            Self::RandomForest => "random_forest",
            Self::DecisionTree => "decision_tree",
            Self::GradientBoosting => "gradient_boosting",
            Self::LogisticRegression => "logistic_regression",
            Self::LinearRegression => "linear_regression",
            Self::Svm => "svm",
            Self::KNearestNeighbors => "knn",
            Self::NeuralNetwork => "neural_network",
        }
    }

    /// Accepts the display name or the slug, case-insensitively
    pub fn from_name(name: &str) -> Result<Self> {
        let wanted = name.trim();
        Self::all()
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(wanted) || a.slug().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                ForgeError::Validation(format!(
                    "Unsupported algorithm '{}' (expected one of: {})",
                    name,
                    Self::all().iter().map(|a| a.name()).collect::<Vec<_>>().join(", ")
                ))
            })
    }

    pub fn task(&self) -> Task {
        match self {
            Self::LinearRegression => Task::Regression,
            _ => Task::Classification,
        }
    }

    /// Tunable hyperparameters with their bounds and defaults
    pub fn schema(&self) -> Vec<HyperparameterOption> {
        use HyperparameterOption as H;
        match self {
            Self::RandomForest => vec![
                H::number("n_estimators", "Number of trees", 10.0, 500.0, 10.0, 100),
                H::number("max_depth", "Maximum depth", 1.0, 50.0, 1.0, 10),
                H::number("min_samples_split", "Min samples to split", 2.0, 20.0, 1.0, 2),
                H::boolean("bootstrap", "Bootstrap samples", true),
            ],
            Self::DecisionTree => vec![
                H::number("max_depth", "Maximum depth", 1.0, 50.0, 1.0, 5),
                H::number("min_samples_split", "Min samples to split", 2.0, 20.0, 1.0, 2),
                H::choice("criterion", "Split criterion", &["gini", "entropy"], "gini"),
            ],
            Self::GradientBoosting => vec![
                H::number("n_estimators", "Boosting rounds", 10.0, 500.0, 10.0, 100),
                H::range("learning_rate", "Learning rate", 0.001, 1.0, 0.001, 0.1),
                H::number("max_depth", "Maximum depth", 1.0, 20.0, 1.0, 3),
            ],
            Self::LogisticRegression => vec![
                H::range("c", "Inverse regularization (C)", 0.01, 100.0, 0.01, 1.0),
                H::number("max_iter", "Maximum iterations", 100.0, 10000.0, 100.0, 1000),
                H::choice("penalty", "Penalty", &["l2", "l1", "none"], "l2"),
            ],
            Self::LinearRegression => vec![
                H::boolean("fit_intercept", "Fit intercept", true),
                H::number("epochs", "Epochs", 1.0, 10000.0, 1.0, 500),
                H::range("learning_rate", "Learning rate", 0.0001, 1.0, 0.0001, 0.01),
            ],
            Self::Svm => vec![
                H::range("c", "Regularization (C)", 0.01, 100.0, 0.01, 1.0),
                H::choice("kernel", "Kernel", &["rbf", "linear", "poly", "sigmoid"], "rbf"),
                H::choice("gamma", "Gamma", &["scale", "auto"], "scale"),
            ],
            Self::KNearestNeighbors => vec![
                H::number("n_neighbors", "Neighbors (k)", 1.0, 50.0, 1.0, 5),
                H::choice("weights", "Vote weighting", &["uniform", "distance"], "uniform"),
                H::choice("metric", "Distance metric", &["euclidean", "manhattan"], "euclidean"),
            ],
            Self::NeuralNetwork => vec![
                H::number("hidden_layers", "Hidden layers", 1.0, 10.0, 1.0, 2),
                H::number("hidden_units", "Units per layer", 1.0, 1024.0, 1.0, 64),
                H::number("epochs", "Epochs", 1.0, 1000.0, 1.0, 50),
                H::range("learning_rate", "Learning rate", 0.0001, 1.0, 0.0001, 0.001),
                H::choice("activation", "Activation", &["relu", "tanh", "sigmoid"], "relu"),
            ],
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Algorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Algorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Algorithm::from_name(&name).map_err(serde::de::Error::custom)
    }
}

/// How a hyperparameter is edited and validated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ParamKind {
    /// Real-valued slider
    Range { min: f64, max: f64, step: f64 },
    /// Whole number input
    Number { min: f64, max: f64, step: f64 },
    Choice { options: Vec<String> },
    Boolean,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterOption {
    pub name: String,
    pub label: String,
    #[serde(flatten)]
    pub kind: ParamKind,
    pub default: serde_json::Value,
}

impl HyperparameterOption {
    fn range(name: &str, label: &str, min: f64, max: f64, step: f64, default: f64) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: ParamKind::Range { min, max, step },
            default: json!(default),
        }
    }

    fn number(name: &str, label: &str, min: f64, max: f64, step: f64, default: i64) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: ParamKind::Number { min, max, step },
            default: json!(default),
        }
    }

    fn choice(name: &str, label: &str, options: &[&str], default: &str) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: ParamKind::Choice {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
            default: json!(default),
        }
    }

    fn boolean(name: &str, label: &str, default: bool) -> Self {
        Self {
            name: name.to_string(),
            label: label.to_string(),
            kind: ParamKind::Boolean,
            default: json!(default),
        }
    }

    /// Checks a supplied value against this option and returns it in
    /// canonical form (integers for `Number`, floats for `Range`).
    pub fn check(&self, value: &serde_json::Value) -> Result<serde_json::Value> {
        let invalid = |why: String| {
            ForgeError::Validation(format!("Hyperparameter '{}' {}", self.name, why))
        };

        match &self.kind {
            ParamKind::Range { min, max, .. } => {
                let v = as_f64(value).ok_or_else(|| invalid(format!("must be a number, got {}", value)))?;
                if !v.is_finite() || v < *min || v > *max {
                    return Err(invalid(format!("must be between {} and {}, got {}", min, max, v)));
                }
                Ok(json!(v))
            }
            ParamKind::Number { min, max, .. } => {
                let v = as_f64(value).ok_or_else(|| invalid(format!("must be a number, got {}", value)))?;
                if v.fract() != 0.0 {
                    return Err(invalid(format!("must be a whole number, got {}", v)));
                }
                if v < *min || v > *max {
                    return Err(invalid(format!("must be between {} and {}, got {}", min, max, v)));
                }
                Ok(json!(v as i64))
            }
            ParamKind::Choice { options } => {
                let s = value
                    .as_str()
                    .ok_or_else(|| invalid(format!("must be a string, got {}", value)))?;
                if !options.iter().any(|o| o == s) {
                    return Err(invalid(format!("must be one of {:?}, got '{}'", options, s)));
                }
                Ok(json!(s))
            }
            ParamKind::Boolean => match value {
                serde_json::Value::Bool(b) => Ok(json!(*b)),
                serde_json::Value::String(s) if s == "true" || s == "false" => Ok(json!(s == "true")),
                _ => Err(invalid(format!("must be a boolean, got {}", value))),
            },
        }
    }
}

/// Numbers arrive from the dashboard as JSON numbers or numeric strings
fn as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_accepts_display_and_slug() {
        assert_eq!(Algorithm::from_name("Random Forest").unwrap(), Algorithm::RandomForest);
        assert_eq!(Algorithm::from_name("knn").unwrap(), Algorithm::KNearestNeighbors);
        assert_eq!(Algorithm::from_name("svm").unwrap(), Algorithm::Svm);
        assert!(Algorithm::from_name("Quantum Forest").is_err());
    }

    #[test]
    fn test_every_default_passes_its_own_check() {
        for algorithm in Algorithm::all() {
            for option in algorithm.schema() {
                assert!(
                    option.check(&option.default).is_ok(),
                    "{} default for {} rejected",
                    option.name,
                    algorithm
                );
            }
        }
    }

    #[test]
    fn test_number_rejects_fraction_and_out_of_range() {
        let option = &Algorithm::RandomForest.schema()[0];
        assert!(option.check(&json!(10.5)).is_err());
        assert!(option.check(&json!(5000)).is_err());
        assert_eq!(option.check(&json!("200")).unwrap(), json!(200));
    }

    #[test]
    fn test_serde_uses_display_name() {
        let encoded = serde_json::to_string(&Algorithm::GradientBoosting).unwrap();
        assert_eq!(encoded, "\"Gradient Boosting\"");
        let decoded: Algorithm = serde_json::from_str("\"decision_tree\"").unwrap();
        assert_eq!(decoded, Algorithm::DecisionTree);
    }
}
