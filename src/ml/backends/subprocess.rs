use super::{artifact_field, ModelBackend, Predictor, Trainer, TrainingJob, TrainingOutcome};
use crate::config::SubprocessConfig;
use crate::data::DataValidator;
use crate::error::{ForgeError, Result};
use crate::export::script::{training_script, PREDICTION_SCRIPT};
use crate::ml::Task;
use crate::runtime::{parse_json_output, CancelFlag, ProcessRunner};
use crate::types::{ClassProbabilities, Explanation, ExplanationKind, FeatureWeight, ModelRecord, PredictionOutput};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// Trains and predicts by running generated scikit-learn scripts with
/// the configured Python interpreter
pub struct SubprocessBackend {
    config: SubprocessConfig,
    runner: ProcessRunner,
    test_size: f64,
    seed: Option<u64>,
    work_dir: PathBuf,
}

/// Files written for one invocation, removed on drop unless kept
struct Scratch {
    paths: Vec<PathBuf>,
    keep: bool,
}

impl Scratch {
    fn write(&mut self, dir: &Path, suffix: &str, contents: &str) -> Result<PathBuf> {
        let path = dir.join(format!("{}{}", uuid::Uuid::new_v4(), suffix));
        std::fs::write(&path, contents)?;
        self.paths.push(path.clone());
        Ok(path)
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                log::debug!("Could not remove {}: {}", path.display(), e);
            }
        }
    }
}

impl SubprocessBackend {
    pub fn new(config: SubprocessConfig, test_size: f64, seed: Option<u64>) -> Result<Self> {
        let work_dir = config
            .work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("modelforge"));
        std::fs::create_dir_all(work_dir.join("models"))?;

        Ok(Self {
            runner: ProcessRunner::new(Duration::from_secs(config.timeout_secs)),
            config,
            test_size,
            seed,
            work_dir,
        })
    }

    fn scratch(&self) -> Scratch {
        Scratch {
            paths: Vec::new(),
            keep: self.config.keep_scripts,
        }
    }

    fn run_script(&self, script: &Path, args: &[&Path], cancel: &CancelFlag) -> Result<Value> {
        let mut command = Command::new(&self.config.interpreter);
        command.arg(script).args(args).current_dir(&self.work_dir);

        let output = self.runner.run_checked(command, cancel)?;
        parse_json_output(&output.stdout).map_err(|e| {
            if let ForgeError::Parse { raw, .. } = &e {
                log::error!(
                    "Unparseable backend output from {}:\n{}\nstderr:\n{}",
                    script.display(),
                    raw,
                    output.stderr
                );
            }
            e
        })
    }
}

fn weights_from(values: Option<&Value>) -> Option<Vec<f64>> {
    values.and_then(|v| serde_json::from_value(v.clone()).ok())
}

impl Trainer for SubprocessBackend {
    fn train(&self, job: &TrainingJob<'_>, cancel: &CancelFlag) -> Result<TrainingOutcome> {
        let rows = DataValidator::feature_matrix(job.dataset, job.features)?;
        let target = match job.task {
            Task::Regression => json!(DataValidator::numeric_target(job.dataset, job.target)?),
            Task::Classification => json!(DataValidator::target_column(job.dataset, job.target)?),
        };
        let payload = json!({
            "rows": rows,
            "target": target,
            "task": job.task,
            "test_size": self.test_size,
            "seed": self.seed,
        });

        let mut scratch = self.scratch();
        let script = scratch.write(&self.work_dir, ".train.py", &training_script(job.params, self.seed))?;
        let job_file = scratch.write(&self.work_dir, ".job.json", &payload.to_string())?;
        let model_path = self
            .work_dir
            .join("models")
            .join(format!("{}.joblib", uuid::Uuid::new_v4()));

        log::info!(
            "Training {} on '{}' via {} ({} rows)",
            job.algorithm(),
            job.target,
            self.config.interpreter,
            rows.len()
        );
        let result = self
            .run_script(&script, &[job_file.as_path(), model_path.as_path()], cancel)
            .inspect_err(|_| remove_model_file(&model_path))?;

        let accuracy = match result.get("accuracy").and_then(Value::as_f64) {
            Some(accuracy) => accuracy,
            None => {
                remove_model_file(&model_path);
                return Err(ForgeError::Parse {
                    message: "missing numeric 'accuracy'".to_string(),
                    raw: result.to_string(),
                });
            }
        };

        let mut artifact = json!({ "model_path": model_path.to_string_lossy() });
        for key in ["classes", "importances", "coefficients"] {
            if let Some(v) = result.get(key) {
                artifact[key] = v.clone();
            }
        }

        Ok(TrainingOutcome {
            algorithm: job.algorithm(),
            accuracy,
            parameters: job.params.to_map(),
            artifact,
        })
    }

    fn discard(&self, artifact: &Value) {
        if let Some(path) = artifact.get("model_path").and_then(Value::as_str) {
            remove_model_file(Path::new(path));
        }
    }
}

fn remove_model_file(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::debug!("Removed model file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => log::warn!("Could not remove model file {}: {}", path.display(), e),
    }
}

impl Predictor for SubprocessBackend {
    fn predict(&self, model: &ModelRecord, rows: &[Vec<f64>], cancel: &CancelFlag) -> Result<PredictionOutput> {
        let target = model
            .primary_target()
            .ok_or_else(|| ForgeError::Validation(format!("Model {} has no target", model.id)))?;
        let model_path = artifact_field(model, target, "model_path")?
            .as_str()
            .map(PathBuf::from)
            .ok_or_else(|| ForgeError::backend(format!("Model {} has an invalid model_path", model.id)))?;
        if !model_path.exists() {
            return Err(ForgeError::backend(format!(
                "Model file {} for {} is missing",
                model_path.display(),
                model.id
            )));
        }

        let mut scratch = self.scratch();
        let script = scratch.write(&self.work_dir, ".predict.py", PREDICTION_SCRIPT)?;
        let input = scratch.write(&self.work_dir, ".rows.json", &serde_json::to_string(rows)?)?;

        let result = self.run_script(&script, &[model_path.as_path(), input.as_path()], cancel)?;

        let predictions: Vec<Value> = result
            .get("predictions")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .ok_or_else(|| ForgeError::Parse {
                message: "missing 'predictions'".to_string(),
                raw: result.to_string(),
            })?;

        let probabilities: Option<Vec<ClassProbabilities>> = match model.task {
            Task::Classification => result
                .get("probabilities")
                .cloned()
                .map(serde_json::from_value)
                .transpose()?,
            Task::Regression => None,
        };

        let artifact = model.artifacts.get(target);
        let explanation = weights_from(artifact.and_then(|a| a.get("importances")))
            .map(|w| (ExplanationKind::FeatureImportance, w))
            .or_else(|| {
                weights_from(artifact.and_then(|a| a.get("coefficients")))
                    .map(|w| (ExplanationKind::Coefficients, w))
            })
            .map(|(kind, weights)| Explanation {
                kind,
                weights: model
                    .features
                    .iter()
                    .zip(weights)
                    .map(|(feature, weight)| FeatureWeight { feature: feature.clone(), weight })
                    .collect(),
            });

        Ok(PredictionOutput {
            predictions,
            probabilities,
            explanation,
        })
    }
}

impl ModelBackend for SubprocessBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::ml::{Algorithm, AlgorithmParams};

    /// Stands in for python: ignores the script and prints canned output
    fn fake_interpreter(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-python");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    fn backend(dir: &Path, body: &str) -> SubprocessBackend {
        let config = SubprocessConfig {
            interpreter: fake_interpreter(dir, body),
            timeout_secs: 10,
            work_dir: Some(dir.join("work")),
            keep_scripts: false,
        };
        SubprocessBackend::new(config, 0.2, Some(1)).unwrap()
    }

    fn dataset() -> Dataset {
        serde_json::from_value(json!([
            {"a": 1, "y": "x"}, {"a": 2, "y": "z"}, {"a": 3, "y": "x"}
        ]))
        .unwrap()
    }

    #[test]
    fn test_train_parses_result_line() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(
            dir.path(),
            r#"echo "fitting..."; echo '{"accuracy": 0.75, "classes": ["x", "z"], "importances": [1.0]}'"#,
        );

        let ds = dataset();
        let features = vec!["a".to_string()];
        let params = AlgorithmParams::defaults(Algorithm::RandomForest);
        let job = TrainingJob {
            dataset: &ds,
            features: &features,
            target: "y",
            params: &params,
            task: Task::Classification,
        };

        let outcome = backend.train(&job, &CancelFlag::new()).unwrap();
        assert_eq!(outcome.accuracy, 0.75);
        assert!(outcome.artifact["model_path"].as_str().unwrap().ends_with(".joblib"));
        assert_eq!(outcome.artifact["classes"], json!(["x", "z"]));

        // scratch files are cleaned up, only the models dir remains
        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("work"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_garbage_stdout_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), "echo 'not json at all'");

        let ds = dataset();
        let features = vec!["a".to_string()];
        let params = AlgorithmParams::defaults(Algorithm::DecisionTree);
        let job = TrainingJob {
            dataset: &ds,
            features: &features,
            target: "y",
            params: &params,
            task: Task::Classification,
        };

        match backend.train(&job, &CancelFlag::new()) {
            Err(ForgeError::Parse { raw, .. }) => assert!(raw.contains("not json at all")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    fn model_files(dir: &Path) -> usize {
        std::fs::read_dir(dir.join("work").join("models")).unwrap().count()
    }

    #[test]
    fn test_rejected_outcome_removes_model_file() {
        let dir = tempfile::tempdir().unwrap();
        // $3 is the model path handed to the training script
        let backend = backend(dir.path(), r#"touch "$3"; echo '{"accuracy": 1.7}'"#);

        let ds = dataset();
        let features = vec!["a".to_string()];
        let params = AlgorithmParams::defaults(Algorithm::RandomForest);
        let err = crate::ml::run_training(&backend, &ds, &features, "y", &params, 2, &CancelFlag::new()).unwrap_err();
        assert!(err.to_string().contains("1.7"));
        assert_eq!(model_files(dir.path()), 0);
    }

    #[test]
    fn test_missing_accuracy_removes_model_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), r#"touch "$3"; echo '{"classes": ["x"]}'"#);

        let ds = dataset();
        let features = vec!["a".to_string()];
        let params = AlgorithmParams::defaults(Algorithm::DecisionTree);
        let job = TrainingJob {
            dataset: &ds,
            features: &features,
            target: "y",
            params: &params,
            task: Task::Classification,
        };

        assert!(matches!(backend.train(&job, &CancelFlag::new()), Err(ForgeError::Parse { .. })));
        assert_eq!(model_files(dir.path()), 0);
    }

    #[test]
    fn test_discard_removes_trained_model() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), r#"touch "$3"; echo '{"accuracy": 0.6}'"#);

        let ds = dataset();
        let features = vec!["a".to_string()];
        let params = AlgorithmParams::defaults(Algorithm::RandomForest);
        let job = TrainingJob {
            dataset: &ds,
            features: &features,
            target: "y",
            params: &params,
            task: Task::Classification,
        };

        let outcome = backend.train(&job, &CancelFlag::new()).unwrap();
        assert_eq!(model_files(dir.path()), 1);
        backend.discard(&outcome.artifact);
        backend.discard(&outcome.artifact);
        assert_eq!(model_files(dir.path()), 0);
    }

    #[test]
    fn test_stderr_surfaces_on_failure() {
        let dir = tempfile::tempdir().unwrap();
        let backend = backend(dir.path(), "echo 'ModuleNotFoundError: sklearn' 1>&2; exit 1");

        let ds = dataset();
        let features = vec!["a".to_string()];
        let params = AlgorithmParams::defaults(Algorithm::Svm);
        let job = TrainingJob {
            dataset: &ds,
            features: &features,
            target: "y",
            params: &params,
            task: Task::Classification,
        };

        let err = backend.train(&job, &CancelFlag::new()).unwrap_err();
        assert!(err.to_string().contains("ModuleNotFoundError"));
    }
}
