//! Python source generation shared by the subprocess backend, the
//! `python` export format and the notebook export.

use crate::ml::{AlgorithmParams, NeuralNetworkParams, Task};

/// Python string literal. JSON string escaping is valid Python.
pub fn py_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

fn py_bool(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}

fn py_seed(seed: Option<u64>) -> String {
    seed.map(|s| s.to_string()).unwrap_or_else(|| "None".to_string())
}

/// Import line and constructor expression of the scikit-learn estimator
/// matching `params`
pub fn estimator(params: &AlgorithmParams, seed_opt: Option<u64>) -> (&'static str, String) {
    let seed = py_seed(seed_opt);
    match params {
        AlgorithmParams::RandomForest(p) => (
            "from sklearn.ensemble import RandomForestClassifier",
            format!(
                "RandomForestClassifier(n_estimators={}, max_depth={}, min_samples_split={}, bootstrap={}, random_state={})",
                p.n_estimators, p.max_depth, p.min_samples_split, py_bool(p.bootstrap), seed
            ),
        ),
        AlgorithmParams::DecisionTree(p) => (
            "from sklearn.tree import DecisionTreeClassifier",
            format!(
                "DecisionTreeClassifier(max_depth={}, min_samples_split={}, criterion={}, random_state={})",
                p.max_depth, p.min_samples_split, py_str(&p.criterion), seed
            ),
        ),
        AlgorithmParams::GradientBoosting(p) => (
            "from sklearn.ensemble import GradientBoostingClassifier",
            format!(
                "GradientBoostingClassifier(n_estimators={}, learning_rate={}, max_depth={}, random_state={})",
                p.n_estimators, p.learning_rate, p.max_depth, seed
            ),
        ),
        AlgorithmParams::LogisticRegression(p) => {
            let (penalty, solver) = match p.penalty.as_str() {
                "l1" => ("\"l1\"", "\"liblinear\""),
                "none" => ("None", "\"lbfgs\""),
                _ => ("\"l2\"", "\"lbfgs\""),
            };
            (
                "from sklearn.linear_model import LogisticRegression",
                format!(
                    "LogisticRegression(C={}, max_iter={}, penalty={}, solver={}, random_state={})",
                    p.c, p.max_iter, penalty, solver, seed
                ),
            )
        }
        AlgorithmParams::LinearRegression(p) => (
            "from sklearn.linear_model import LinearRegression",
            format!("LinearRegression(fit_intercept={})", py_bool(p.fit_intercept)),
        ),
        AlgorithmParams::Svm(p) => (
            "from sklearn.svm import SVC",
            format!(
                "SVC(C={}, kernel={}, gamma={}, probability=True, random_state={})",
                p.c,
                py_str(&p.kernel),
                py_str(&p.gamma),
                seed
            ),
        ),
        AlgorithmParams::KNearestNeighbors(p) => (
            "from sklearn.neighbors import KNeighborsClassifier",
            format!(
                "KNeighborsClassifier(n_neighbors={}, weights={}, metric={})",
                p.n_neighbors,
                py_str(&p.weights),
                py_str(&p.metric)
            ),
        ),
        AlgorithmParams::NeuralNetwork(p) => (
            "from sklearn.neural_network import MLPClassifier",
            mlp_constructor(p, &vec![p.hidden_units; p.hidden_layers as usize], seed_opt),
        ),
    }
}

/// `MLPClassifier` with an explicit layer layout
pub fn mlp_constructor(p: &NeuralNetworkParams, layers: &[u32], seed: Option<u64>) -> String {
    let activation = match p.activation.as_str() {
        "sigmoid" => "logistic",
        other => other,
    };
    let sizes = match layers {
        [single] => format!("({},)", single),
        many => format!(
            "({})",
            many.iter().map(|u| u.to_string()).collect::<Vec<_>>().join(", ")
        ),
    };
    format!(
        "MLPClassifier(hidden_layer_sizes={}, max_iter={}, learning_rate_init={}, activation={}, random_state={})",
        sizes,
        p.epochs,
        p.learning_rate,
        py_str(activation),
        py_seed(seed)
    )
}

/// Python expression scoring `model` on `X_test`/`y_test`, clamped to [0, 1]
pub fn score_expression(task: Task) -> &'static str {
    match task {
        Task::Classification => "float(accuracy_score(y_test, model.predict(X_test)))",
        Task::Regression => "float(max(0.0, min(1.0, r2_score(y_test, model.predict(X_test)))))",
    }
}

/// Standalone training script. Reads a job file (`argv[1]`) holding
/// `rows`, `target`, `task`, `test_size` and `seed`, saves the fitted model
/// to `argv[2]` and prints one JSON line with the held-out score.
pub fn training_script(params: &AlgorithmParams, seed: Option<u64>) -> String {
    let (import, constructor) = estimator(params, seed);
    format!(
        r#"# Generated by modelforge: {algorithm}
import json
import sys

import joblib
import numpy as np
from sklearn.metrics import accuracy_score, r2_score
from sklearn.model_selection import train_test_split
{import}


def main():
    with open(sys.argv[1]) as fh:
        job = json.load(fh)

    X = np.asarray(job["rows"], dtype=float)
    y = np.asarray(job["target"])
    if job["task"] == "regression":
        y = y.astype(float)
    else:
        y = y.astype(str)

    X_train, X_test, y_train, y_test = train_test_split(
        X, y, test_size=job["test_size"], random_state=job.get("seed")
    )

    model = {constructor}
    model.fit(X_train, y_train)

    if job["task"] == "regression":
        score = {regression_score}
    else:
        score = {classification_score}

    joblib.dump(model, sys.argv[2])

    result = {{"accuracy": score}}
    if hasattr(model, "classes_"):
        result["classes"] = [str(c) for c in model.classes_]
    if hasattr(model, "feature_importances_"):
        result["importances"] = [float(v) for v in model.feature_importances_]
    elif hasattr(model, "coef_"):
        coef = np.atleast_2d(model.coef_)
        result["coefficients"] = [float(v) for v in np.abs(coef).mean(axis=0)]
    print(json.dumps(result))


if __name__ == "__main__":
    main()
"#,
        algorithm = params.algorithm(),
        import = import,
        constructor = constructor,
        regression_score = score_expression(Task::Regression),
        classification_score = score_expression(Task::Classification),
    )
}

/// Loads the model saved by [`training_script`] (`argv[1]`), predicts the
/// rows in `argv[2]` and prints one JSON line
pub const PREDICTION_SCRIPT: &str = r#"# Generated by modelforge: prediction
import json
import sys

import joblib
import numpy as np


def main():
    model = joblib.load(sys.argv[1])
    with open(sys.argv[2]) as fh:
        rows = json.load(fh)

    X = np.asarray(rows, dtype=float)
    predictions = model.predict(X)
    result = {"predictions": [p.item() if hasattr(p, "item") else p for p in predictions]}

    if hasattr(model, "predict_proba"):
        try:
            classes = [str(c) for c in model.classes_]
            result["probabilities"] = [
                dict(zip(classes, [float(v) for v in row])) for row in model.predict_proba(X)
            ]
        except Exception as exc:  # some estimators only expose it after fitting with probability=True
            print(f"predict_proba unavailable: {exc}", file=sys.stderr)

    print(json.dumps(result))


if __name__ == "__main__":
    main()
"#;
