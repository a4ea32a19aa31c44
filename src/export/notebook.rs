//! Jupyter notebook (nbformat 4) generation.
//!
//! The notebook retrains the model with scikit-learn, one estimator per
//! target, and writes `<model id>.json` plus one `.joblib` file per target
//! so the result can be registered again through the import endpoint.

use super::script::{estimator, mlp_constructor, py_str, score_expression};
use crate::data::{CsvConnector, Dataset};
use crate::error::{ForgeError, Result};
use crate::ml::{AlgorithmParams, ParamMap, Task};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notebook {
    pub cells: Vec<Cell>,
    pub metadata: Value,
    pub nbformat: u32,
    pub nbformat_minor: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cell_type", rename_all = "lowercase")]
pub enum Cell {
    Markdown {
        metadata: Map<String, Value>,
        source: Vec<String>,
    },
    Code {
        execution_count: Option<u32>,
        metadata: Map<String, Value>,
        outputs: Vec<Value>,
        source: Vec<String>,
    },
}

impl Cell {
    fn markdown(text: &str) -> Self {
        Cell::Markdown {
            metadata: Map::new(),
            source: source_lines(text),
        }
    }

    fn code(text: &str) -> Self {
        Cell::Code {
            execution_count: None,
            metadata: Map::new(),
            outputs: Vec::new(),
            source: source_lines(text),
        }
    }

    pub fn source(&self) -> String {
        match self {
            Cell::Markdown { source, .. } | Cell::Code { source, .. } => source.concat(),
        }
    }
}

/// nbformat stores cell text as a list of lines, each keeping its newline
/// except the last
fn source_lines(text: &str) -> Vec<String> {
    let text = text.trim_end_matches('\n');
    let mut lines: Vec<String> = text.split_inclusive('\n').map(str::to_string).collect();
    if lines.is_empty() {
        lines.push(String::new());
    }
    lines
}

/// What the generated training code needs to know
#[derive(Debug, Clone)]
pub struct NotebookPlan<'a> {
    pub model_id: &'a str,
    pub dataset_name: &'a str,
    /// Embedded as CSV. Without it the code reads the CSV named on the
    /// command line.
    pub dataset: Option<&'a Dataset>,
    pub features: &'a [String],
    pub targets: &'a [String],
    pub params: &'a AlgorithmParams,
    /// Explicit hidden layer sizes for `Neural Network`
    pub architecture: Option<&'a [u32]>,
    pub test_size: f64,
    pub seed: Option<u64>,
}

/// Applies the network options of a notebook request. They only affect
/// `Neural Network`; other algorithms keep their parameters.
pub fn apply_network_options(
    params: AlgorithmParams,
    architecture: Option<&[u32]>,
    epochs: Option<u32>,
    learning_rate: Option<f64>,
) -> Result<AlgorithmParams> {
    if !matches!(params, AlgorithmParams::NeuralNetwork(_)) {
        if architecture.is_some() || epochs.is_some() || learning_rate.is_some() {
            log::debug!("Ignoring network options for {}", params.algorithm());
        }
        return Ok(params);
    }

    let mut overrides = ParamMap::new();
    if let Some(layers) = architecture {
        if layers.is_empty() || layers.contains(&0) {
            return Err(ForgeError::Validation(
                "Architecture must list at least one non-empty hidden layer".to_string(),
            ));
        }
        overrides.insert("hidden_layers".to_string(), json!(layers.len()));
        overrides.insert("hidden_units".to_string(), json!(layers.iter().max()));
    }
    if let Some(epochs) = epochs {
        overrides.insert("epochs".to_string(), json!(epochs));
    }
    if let Some(rate) = learning_rate {
        overrides.insert("learning_rate".to_string(), json!(rate));
    }
    params.merge(&overrides)
}

fn constructor(plan: &NotebookPlan<'_>) -> (&'static str, String) {
    let (import, default_constructor) = estimator(plan.params, plan.seed);
    match (plan.params, plan.architecture) {
        (AlgorithmParams::NeuralNetwork(p), Some(layers)) if !layers.is_empty() => {
            (import, mlp_constructor(p, layers, plan.seed))
        }
        _ => (import, default_constructor),
    }
}

fn imports_source(import: &str) -> String {
    format!(
        "import io
import json
import sys

import joblib
import numpy as np
import pandas as pd
from sklearn.metrics import accuracy_score, r2_score
from sklearn.model_selection import train_test_split
{}
",
        import
    )
}

fn data_source(plan: &NotebookPlan<'_>) -> Result<String> {
    match plan.dataset {
        Some(dataset) => {
            let columns: Vec<String> = plan.features.iter().chain(plan.targets.iter()).cloned().collect();
            let csv = CsvConnector::to_csv_string(dataset, &columns)?;
            Ok(format!(
                "CSV_DATA = {}\n\ndf = pd.read_csv(io.StringIO(CSV_DATA))\nprint(df.shape)\ndf.head()\n",
                py_str(&csv)
            ))
        }
        None => Ok("df = pd.read_csv(sys.argv[1])\nprint(df.shape)\n".to_string()),
    }
}

fn columns_source(plan: &NotebookPlan<'_>) -> Result<String> {
    let parameters = serde_json::to_string(&plan.params.to_map())?;
    Ok(format!(
        "MODEL_ID = {model_id}
ALGORITHM = {algorithm}
PARAMETERS = json.loads({parameters})
FEATURES = {features}
TARGETS = {targets}
TEST_SIZE = {test_size}
SEED = {seed}

X = df[FEATURES].astype(float).values
",
        model_id = py_str(plan.model_id),
        algorithm = py_str(plan.params.algorithm().name()),
        parameters = py_str(&parameters),
        features = serde_json::to_string(plan.features)?,
        targets = serde_json::to_string(plan.targets)?,
        test_size = plan.test_size,
        seed = plan.seed.map(|s| s.to_string()).unwrap_or_else(|| "None".to_string()),
    ))
}

fn training_source(plan: &NotebookPlan<'_>, constructor: &str) -> String {
    let task = plan.params.algorithm().task();
    let cast = match task {
        Task::Regression => "float",
        Task::Classification => "str",
    };
    format!(
        "def build_model():
    return {constructor}


results = {{}}
for target in TARGETS:
    y = df[target].astype({cast}).values
    X_train, X_test, y_train, y_test = train_test_split(
        X, y, test_size=TEST_SIZE, random_state=SEED
    )

    model = build_model()
    model.fit(X_train, y_train)
    score = {score}

    model_file = f\"{{MODEL_ID}}_{{target}}.joblib\"
    joblib.dump(model, model_file)

    artifact = {{\"model_path\": model_file}}
    if hasattr(model, \"classes_\"):
        artifact[\"classes\"] = [str(c) for c in model.classes_]
    if hasattr(model, \"feature_importances_\"):
        artifact[\"importances\"] = [float(v) for v in model.feature_importances_]
    elif hasattr(model, \"coef_\"):
        coef = np.atleast_2d(model.coef_)
        artifact[\"coefficients\"] = [float(v) for v in np.abs(coef).mean(axis=0)]

    results[target] = (score, artifact)
    print(f\"{{target}}: {{score:.4f}}\")
",
        constructor = constructor,
        cast = cast,
        score = score_expression(task),
    )
}

fn result_source() -> &'static str {
    "result = {
    \"accuracy\": float(np.mean([score for score, _ in results.values()])),
    \"algorithm\": ALGORITHM,
    \"parameters\": PARAMETERS,
    \"features\": FEATURES,
    \"targets\": TARGETS,
    \"artifacts\": {target: artifact for target, (_, artifact) in results.items()},
}

with open(f\"{MODEL_ID}.json\", \"w\") as fh:
    json.dump(result, fh, indent=2)

print(f\"Wrote {MODEL_ID}.json, accuracy {result['accuracy']:.4f}\")
"
}

fn code_cells(plan: &NotebookPlan<'_>) -> Result<Vec<String>> {
    if plan.features.is_empty() || plan.targets.is_empty() {
        return Err(ForgeError::Validation(
            "Notebook export needs at least one feature and one target".to_string(),
        ));
    }
    let (import, constructor) = constructor(plan);
    Ok(vec![
        imports_source(import),
        data_source(plan)?,
        columns_source(plan)?,
        training_source(plan, &constructor),
        result_source().to_string(),
    ])
}

pub fn build_notebook(plan: &NotebookPlan<'_>) -> Result<Notebook> {
    let code = code_cells(plan)?;
    let header = format!(
        "# {model_id}: {algorithm}\n\n\
         Dataset **{dataset}**, features {features}, targets {targets}.\n\n\
         Run every cell, then place `{model_id}.json` and the `.joblib` files in the \
         import directory and call `POST /import-model` with this model id.",
        model_id = plan.model_id,
        algorithm = plan.params.algorithm(),
        dataset = plan.dataset_name,
        features = plan.features.join(", "),
        targets = plan.targets.join(", "),
    );

    let titles = ["## Setup", "## Data", "## Columns", "## Training", "## Result"];
    let mut cells = vec![Cell::markdown(&header)];
    for (title, source) in titles.iter().zip(code.iter()) {
        cells.push(Cell::markdown(title));
        cells.push(Cell::code(source));
    }

    Ok(Notebook {
        cells,
        metadata: json!({
            "kernelspec": {"display_name": "Python 3", "language": "python", "name": "python3"},
            "language_info": {"name": "python"},
        }),
        nbformat: 4,
        nbformat_minor: 4,
    })
}

/// The notebook's code as one standalone script
pub fn python_source(plan: &NotebookPlan<'_>) -> Result<String> {
    let code = code_cells(plan)?;
    let mut script = format!(
        "# Generated by modelforge: {} ({})\n",
        plan.model_id,
        plan.params.algorithm()
    );
    if plan.dataset.is_none() {
        script.push_str("# Usage: python script.py data.csv\n");
    }
    for block in code {
        script.push('\n');
        script.push_str(block.trim_end_matches("df.head()\n"));
    }
    Ok(script)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::Algorithm;

    fn dataset() -> Dataset {
        serde_json::from_value(json!([
            {"a": 1.0, "b": 2.0, "y": "x"},
            {"a": 3.0, "b": 4.0, "y": "z"}
        ]))
        .unwrap()
    }

    fn plan<'a>(ds: &'a Dataset, features: &'a [String], targets: &'a [String], params: &'a AlgorithmParams) -> NotebookPlan<'a> {
        NotebookPlan {
            model_id: "churn-1",
            dataset_name: "customers",
            dataset: Some(ds),
            features,
            targets,
            params,
            architecture: None,
            test_size: 0.2,
            seed: Some(42),
        }
    }

    #[test]
    fn test_notebook_structure() {
        let ds = dataset();
        let features = vec!["a".to_string(), "b".to_string()];
        let targets = vec!["y".to_string()];
        let params = AlgorithmParams::defaults(Algorithm::RandomForest);
        let notebook = build_notebook(&plan(&ds, &features, &targets, &params)).unwrap();

        let encoded = serde_json::to_value(&notebook).unwrap();
        assert_eq!(encoded["nbformat"], json!(4));
        assert_eq!(encoded["cells"][0]["cell_type"], json!("markdown"));
        assert_eq!(encoded["cells"][2]["cell_type"], json!("code"));
        assert_eq!(encoded["cells"][2]["outputs"], json!([]));
        assert!(encoded["cells"][2]["execution_count"].is_null());

        let all: String = notebook.cells.iter().map(Cell::source).collect();
        assert!(all.contains("RandomForestClassifier(n_estimators=100"));
        assert!(all.contains("MODEL_ID = \"churn-1\""));
        assert!(all.contains("FEATURES = [\"a\",\"b\"]"));
        assert!(all.contains("json.dump(result, fh, indent=2)"));
    }

    #[test]
    fn test_architecture_drives_layers() {
        let ds = dataset();
        let features = vec!["a".to_string(), "b".to_string()];
        let targets = vec!["y".to_string()];
        let layers = [128, 32];
        let params = apply_network_options(
            AlgorithmParams::defaults(Algorithm::NeuralNetwork),
            Some(&layers),
            Some(300),
            Some(0.01),
        )
        .unwrap();
        let mut plan = plan(&ds, &features, &targets, &params);
        plan.architecture = Some(&layers);

        let script = python_source(&plan).unwrap();
        assert!(script.contains("hidden_layer_sizes=(128, 32)"));
        assert!(script.contains("max_iter=300"));
        assert!(script.contains("learning_rate_init=0.01"));
    }

    #[test]
    fn test_network_options_ignored_for_trees() {
        let params = apply_network_options(
            AlgorithmParams::defaults(Algorithm::DecisionTree),
            Some(&[10]),
            Some(5),
            None,
        )
        .unwrap();
        assert_eq!(params, AlgorithmParams::defaults(Algorithm::DecisionTree));
    }

    #[test]
    fn test_source_lines_keep_newlines() {
        assert_eq!(source_lines("a\nb\n"), vec!["a\n".to_string(), "b".to_string()]);
        assert_eq!(source_lines(""), vec![String::new()]);
    }
}
