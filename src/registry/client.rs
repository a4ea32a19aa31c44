use super::file_store::JsonFileRepository;
use super::locks::IdLocks;
use super::progress::{NoProgress, ProgressCallback};
use super::repository::{InMemoryRepository, ModelRepository};
use crate::config::{AppConfig, BackendKind, StorageKind, TrainingConfig};
use crate::data::{DataValidator, Dataset, TrainingData};
use crate::error::{ForgeError, Result};
use crate::export::{export_model, ExportFormat, ExportedModel};
use crate::ml::backends::{self, NativeBackend, SimulatedBackend, SubprocessBackend};
use crate::ml::{run_prediction, run_training, Algorithm, AlgorithmParams, ModelBackend, ParamMap};
use crate::runtime::CancelFlag;
use crate::types::{ModelPatch, ModelRecord, ModelVersion, PredictionOutput};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

/// Everything needed to train and store one model
#[derive(Debug, Clone)]
pub struct TrainRequest {
    /// Reusing an existing id retrains that model as a new version
    pub model_id: Option<String>,
    pub name: Option<String>,
    pub dataset_name: String,
    pub dataset: Dataset,
    pub features: Vec<String>,
    pub targets: Vec<String>,
    pub algorithm: Algorithm,
    pub hyperparameters: ParamMap,
}

/// Overrides applied on top of a model's stored hyperparameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FineTuneOptions {
    pub epochs: Option<u32>,
    pub learning_rate: Option<f64>,
    #[serde(default)]
    pub hyperparameters: ParamMap,
}

impl FineTuneOptions {
    fn overrides(&self) -> ParamMap {
        let mut overrides = self.hyperparameters.clone();
        if let Some(epochs) = self.epochs {
            overrides.insert("epochs".to_string(), json!(epochs));
        }
        if let Some(rate) = self.learning_rate {
            overrides.insert("learning_rate".to_string(), json!(rate));
        }
        overrides
    }
}

/// Result file written by an externally executed training notebook
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImportedResult {
    accuracy: f64,
    algorithm: Algorithm,
    #[serde(default)]
    parameters: ParamMap,
    features: Vec<String>,
    targets: Vec<String>,
    #[serde(default)]
    artifacts: BTreeMap<String, Value>,
}

/// Training outcome of every target, folded into the record fields
struct TrainedState {
    algorithm: Algorithm,
    parameters: ParamMap,
    accuracy: f64,
    artifacts: BTreeMap<String, Value>,
}

pub struct ModelRegistry {
    repository: Arc<dyn ModelRepository>,
    backends: HashMap<&'static str, Arc<dyn ModelBackend>>,
    default_backend: Arc<dyn ModelBackend>,
    training: TrainingConfig,
    import_dir: PathBuf,
    seed: Option<u64>,
    locks: IdLocks,
}

impl ModelRegistry {
    pub fn new(
        repository: Arc<dyn ModelRepository>,
        backend: Arc<dyn ModelBackend>,
        training: TrainingConfig,
        import_dir: PathBuf,
    ) -> Self {
        let mut backends: HashMap<&'static str, Arc<dyn ModelBackend>> = HashMap::new();
        backends.insert(backend.name(), backend.clone());
        Self {
            repository,
            backends,
            default_backend: backend,
            training,
            import_dir,
            seed: None,
            locks: IdLocks::default(),
        }
    }

    /// Process-local registry with default training settings
    pub fn in_memory(backend: Arc<dyn ModelBackend>) -> Self {
        Self::new(
            Arc::new(InMemoryRepository::new()),
            backend,
            TrainingConfig::default(),
            PathBuf::from("data/imports"),
        )
    }

    /// Makes `backend` available for predicting and fine-tuning models
    /// tagged with its name. The training default is unchanged.
    pub fn with_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.backends.entry(backend.name()).or_insert(backend);
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_import_dir(mut self, import_dir: PathBuf) -> Self {
        self.import_dir = import_dir;
        self
    }

    /// Builds the store and backends selected in `config`.
    ///
    /// The simulated and native backends are always registered so stored
    /// models keep routing to them; the subprocess backend is registered
    /// when its work directory can be created, for imported models.
    ///
    /// # Errors
    ///
    /// Returns an error if the file store cannot be opened or the
    /// configured backend cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let repository: Arc<dyn ModelRepository> = match config.storage.kind {
            StorageKind::Memory => Arc::new(InMemoryRepository::new()),
            StorageKind::File => Arc::new(JsonFileRepository::open(&config.storage.path)?),
        };
        let default_backend = backends::from_config(config)?;

        let mut registry = Self::new(
            repository,
            default_backend,
            config.training.clone(),
            config.storage.import_dir.clone(),
        )
        .with_seed(config.backend.seed)
        .with_backend(Arc::new(SimulatedBackend::new(config.backend.seed)))
        .with_backend(Arc::new(NativeBackend::new(config.training.test_size, config.backend.seed)));

        if config.backend.kind != BackendKind::Subprocess {
            match SubprocessBackend::new(config.subprocess.clone(), config.training.test_size, config.backend.seed) {
                Ok(backend) => registry = registry.with_backend(Arc::new(backend)),
                Err(e) => log::warn!("Subprocess backend unavailable, imported models cannot predict: {}", e),
            }
        }

        Ok(registry)
    }

    pub fn default_backend(&self) -> &str {
        self.default_backend.name()
    }

    pub fn training_config(&self) -> &TrainingConfig {
        &self.training
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    fn backend_for(&self, record: &ModelRecord) -> Result<Arc<dyn ModelBackend>> {
        self.backends.get(record.backend.as_str()).cloned().ok_or_else(|| {
            ForgeError::backend(format!(
                "Model {} was produced by the '{}' backend, which is not available",
                record.id, record.backend
            ))
        })
    }

    fn require(&self, id: &str) -> Result<ModelRecord> {
        self.repository
            .get(id)?
            .ok_or_else(|| ForgeError::NotFound(id.to_string()))
    }

    /// Trains `targets` one after another on `backend`. Nothing is stored.
    fn train_targets(
        &self,
        backend: &dyn ModelBackend,
        data: &TrainingData,
        params: &AlgorithmParams,
        progress: &mut dyn ProgressCallback,
        cancel: &CancelFlag,
    ) -> Result<TrainedState> {
        DataValidator::validate_columns(&data.dataset, &data.features, &data.targets)?;

        let total = data.targets.len();
        let mut artifacts = BTreeMap::new();
        let mut accuracy_sum = 0.0;
        let mut parameters = params.to_map();

        for (index, target) in data.targets.iter().enumerate() {
            let step = if cancel.is_cancelled() {
                Err(ForgeError::Cancelled)
            } else {
                progress.on_target_start(target, index, total);
                run_training(
                    backend,
                    &data.dataset,
                    &data.features,
                    target,
                    params,
                    self.training.min_rows,
                    cancel,
                )
            };
            let outcome = match step {
                Ok(outcome) => outcome,
                Err(e) => {
                    artifacts.values().for_each(|a| backend.discard(a));
                    return Err(e);
                }
            };

            progress.on_target_complete(target, outcome.accuracy);
            accuracy_sum += outcome.accuracy;
            parameters = outcome.parameters;
            artifacts.insert(target.clone(), outcome.artifact);
        }

        Ok(TrainedState {
            algorithm: params.algorithm(),
            parameters,
            accuracy: accuracy_sum / total as f64,
            artifacts,
        })
    }

    /// Stores `record` as given, assigning an id when it has none
    ///
    /// # Errors
    ///
    /// Returns a validation error for an out-of-range accuracy, an empty
    /// target list or an id that is already taken.
    pub fn add_model(&self, mut record: ModelRecord) -> Result<ModelRecord> {
        if record.id.trim().is_empty() {
            record.id = uuid::Uuid::new_v4().to_string();
        }
        record.validate()?;

        let lock = self.locks.for_id(&record.id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let stored = self.repository.create(record)?;
        log::info!("Added model {} ({})", stored.id, stored.name);
        Ok(stored)
    }

    pub fn get_model(&self, id: &str) -> Result<ModelRecord> {
        self.require(id)
    }

    pub fn list_models(&self) -> Result<Vec<ModelRecord>> {
        self.repository.list()
    }

    /// # Errors
    ///
    /// Returns `NotFound` if no model has this id.
    pub fn delete_model(&self, id: &str) -> Result<()> {
        let lock = self.locks.for_id(id);
        let guard = lock.lock().unwrap_or_else(|e| e.into_inner());
        let record = self.require(id)?;
        if !self.repository.delete(id)? {
            return Err(ForgeError::NotFound(id.to_string()));
        }
        self.discard_artifacts(&record);
        drop(guard);
        drop(lock);

        self.locks.release(id);
        log::info!("Deleted model {}", id);
        Ok(())
    }

    /// Releases the files behind every version of a deleted record
    fn discard_artifacts(&self, record: &ModelRecord) {
        let snapshots = record
            .versions
            .iter()
            .map(|v| (v.backend.as_str(), &v.artifacts))
            .chain(std::iter::once((record.backend.as_str(), &record.artifacts)));

        for (name, artifacts) in snapshots {
            let name = if name.is_empty() { record.backend.as_str() } else { name };
            match self.backends.get(name) {
                Some(backend) => artifacts.values().for_each(|a| backend.discard(a)),
                None => log::debug!("No '{}' backend to release artifacts of {}", name, record.id),
            }
        }
    }

    /// Applies a metadata patch (name, dataset name, type tag)
    pub fn update_model(&self, id: &str, patch: &ModelPatch) -> Result<ModelRecord> {
        let lock = self.locks.for_id(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut record = self.require(id)?;
        if let Some(name) = &patch.name {
            if name.trim().is_empty() {
                return Err(ForgeError::Validation("Model name cannot be empty".to_string()));
            }
            record.name = name.clone();
        }
        if let Some(dataset_name) = &patch.dataset_name {
            record.dataset_name = dataset_name.clone();
        }
        if let Some(model_type) = &patch.model_type {
            record.model_type = model_type.clone();
        }
        record.updated = Utc::now();
        self.repository.update(record)
    }

    /// Trains one model per target with the default backend and stores
    /// the result. The record accuracy is the mean over targets.
    pub fn train_model(
        &self,
        request: TrainRequest,
        progress: &mut dyn ProgressCallback,
        cancel: &CancelFlag,
    ) -> Result<ModelRecord> {
        let params = AlgorithmParams::resolve(request.algorithm, &request.hyperparameters)?;
        let id = request
            .model_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let data = TrainingData {
            dataset: request.dataset,
            features: request.features,
            targets: request.targets,
        };

        log::info!(
            "Training {} for model {} on {} rows, targets: {}",
            request.algorithm,
            id,
            data.dataset.len(),
            data.targets.join(", ")
        );
        let state = self.train_targets(self.default_backend.as_ref(), &data, &params, progress, cancel)?;

        let lock = self.locks.for_id(&id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let now = Utc::now();
        let existing = self.repository.get(&id)?;
        let mut record = match &existing {
            Some(previous) => previous.clone(),
            None => ModelRecord {
                id: id.clone(),
                name: request.name.clone().unwrap_or_else(|| id.clone()),
                model_type: "ML".to_string(),
                algorithm: state.algorithm,
                task: state.algorithm.task(),
                accuracy: state.accuracy,
                dataset_name: request.dataset_name.clone(),
                parameters: ParamMap::new(),
                features: Vec::new(),
                targets: Vec::new(),
                trained: true,
                backend: String::new(),
                artifacts: BTreeMap::new(),
                versions: Vec::new(),
                training_data: None,
                created: now,
                updated: now,
            },
        };

        if let Some(name) = request.name {
            record.name = name;
        }
        record.dataset_name = request.dataset_name;
        record.algorithm = state.algorithm;
        record.task = state.algorithm.task();
        record.accuracy = state.accuracy;
        record.parameters = state.parameters;
        record.artifacts = state.artifacts;
        record.features = data.features.clone();
        record.targets = data.targets.clone();
        record.trained = true;
        record.backend = self.default_backend.name().to_string();
        // only the columns a later fine-tune reads are kept
        record.training_data = self.training.retain_training_data.then(|| {
            let columns: Vec<String> = data.features.iter().chain(data.targets.iter()).cloned().collect();
            TrainingData {
                dataset: data.dataset.project(&columns),
                ..data
            }
        });
        record.updated = now;
        record.push_version();
        record.validate()?;

        let stored = match existing {
            Some(_) => self.repository.update(record)?,
            None => self.repository.create(record)?,
        };
        log::info!(
            "Model {} trained with {} (accuracy {:.4}, {} versions)",
            stored.id,
            stored.algorithm,
            stored.accuracy,
            stored.versions.len()
        );
        Ok(stored)
    }

    /// Re-trains a stored model on its retained data with adjusted
    /// hyperparameters. On success a new active version is appended; on
    /// any failure the stored record is left as it was.
    pub fn fine_tune_model(&self, id: &str, options: &FineTuneOptions, cancel: &CancelFlag) -> Result<ModelRecord> {
        let lock = self.locks.for_id(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut record = self.require(id)?;
        let data = record.training_data.clone().ok_or_else(|| {
            ForgeError::Validation(format!("Model {} has no retained training data to fine-tune on", id))
        })?;

        let params = AlgorithmParams::resolve(record.algorithm, &record.parameters)?.merge(&options.overrides())?;
        let backend = self.backend_for(&record)?;

        log::info!("Fine-tuning model {} ({}) on {} backend", id, record.algorithm, backend.name());
        let state = self.train_targets(backend.as_ref(), &data, &params, &mut NoProgress, cancel)?;

        record.algorithm = state.algorithm;
        record.task = state.algorithm.task();
        record.parameters = state.parameters;
        record.accuracy = state.accuracy;
        record.artifacts = state.artifacts;
        // the retained data may belong to a later version than the active one
        record.features = data.features;
        record.targets = data.targets;
        record.backend = backend.name().to_string();
        record.trained = true;
        record.updated = Utc::now();
        record.push_version();
        record.validate()?;

        let stored = self.repository.update(record)?;
        log::info!("Model {} fine-tuned, accuracy {:.4}", id, stored.accuracy);
        Ok(stored)
    }

    /// One prediction per row, in order, from the model's primary target
    pub fn predict_with_model(&self, id: &str, rows: &[Vec<f64>], cancel: &CancelFlag) -> Result<PredictionOutput> {
        let record = self.require(id)?;
        let backend = self.backend_for(&record)?;
        log::debug!("Predicting {} rows with model {} on {}", rows.len(), id, backend.name());
        run_prediction(backend.as_ref(), &record, rows, cancel)
    }

    pub fn download_model(&self, id: &str, format: ExportFormat) -> Result<ExportedModel> {
        let record = self.require(id)?;
        export_model(&record, format, self.training.test_size, self.seed)
    }

    /// Registers the result file `<import_dir>/<id>.json` written by an
    /// exported notebook. Relative model paths resolve against the
    /// import directory. An existing id gains a new version.
    pub fn import_model(&self, id: &str, dataset_name: &str) -> Result<ModelRecord> {
        if id.trim().is_empty() || id.contains(['/', '\\']) || id.contains("..") {
            return Err(ForgeError::Validation(format!("Invalid model id: '{}'", id)));
        }
        let path = self.import_dir.join(format!("{}.json", id));
        if !path.exists() {
            return Err(ForgeError::NotFound(format!("{} (no result file at {})", id, path.display())));
        }

        let contents = std::fs::read_to_string(&path)?;
        let imported: ImportedResult = serde_json::from_str(&contents).map_err(|e| ForgeError::Parse {
            message: format!("Invalid result file {}: {}", path.display(), e),
            raw: contents.clone(),
        })?;

        let params = AlgorithmParams::resolve(imported.algorithm, &imported.parameters)?;
        let mut artifacts = BTreeMap::new();
        for target in &imported.targets {
            let mut artifact = imported.artifacts.get(target).cloned().ok_or_else(|| {
                ForgeError::Validation(format!("Result file has no artifact for target '{}'", target))
            })?;
            if let Some(model_path) = artifact.get("model_path").and_then(Value::as_str) {
                let resolved = self.import_dir.join(model_path);
                artifact["model_path"] = json!(resolved.to_string_lossy());
            }
            artifacts.insert(target.clone(), artifact);
        }

        let lock = self.locks.for_id(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let now = Utc::now();
        let existing = self.repository.get(id)?;
        let mut record = match &existing {
            Some(previous) => previous.clone(),
            None => ModelRecord {
                id: id.to_string(),
                name: id.to_string(),
                model_type: "ML".to_string(),
                algorithm: imported.algorithm,
                task: imported.algorithm.task(),
                accuracy: imported.accuracy,
                dataset_name: dataset_name.to_string(),
                parameters: ParamMap::new(),
                features: Vec::new(),
                targets: Vec::new(),
                trained: true,
                backend: String::new(),
                artifacts: BTreeMap::new(),
                versions: Vec::new(),
                training_data: None,
                created: now,
                updated: now,
            },
        };

        record.dataset_name = dataset_name.to_string();
        record.algorithm = imported.algorithm;
        record.task = imported.algorithm.task();
        record.accuracy = imported.accuracy;
        record.parameters = params.to_map();
        record.features = imported.features;
        record.targets = imported.targets;
        record.artifacts = artifacts;
        record.trained = true;
        record.backend = "subprocess".to_string();
        record.updated = now;
        record.push_version();
        record.validate()?;

        let stored = match existing {
            Some(_) => self.repository.update(record)?,
            None => self.repository.create(record)?,
        };
        log::info!("Imported model {} from {} (accuracy {:.4})", id, path.display(), stored.accuracy);
        Ok(stored)
    }

    pub fn list_versions(&self, id: &str) -> Result<Vec<ModelVersion>> {
        Ok(self.require(id)?.versions)
    }

    /// Makes `version` (id or name such as `v2`) the single active
    /// version and restores its snapshot onto the record
    pub fn activate_version(&self, id: &str, version: &str) -> Result<ModelRecord> {
        let lock = self.locks.for_id(id);
        let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut record = self.require(id)?;
        record.activate_version(version)?;
        record.validate()?;
        let stored = self.repository.update(record)?;
        log::info!(
            "Activated {} of model {}",
            stored.active_version().map(|v| v.name.as_str()).unwrap_or(version),
            id
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dataset(n: usize) -> Dataset {
        let rows = (0..n)
            .map(|i| {
                json!({"a": i as f64, "b": (i * 2) as f64, "y": if i % 2 == 0 { "even" } else { "odd" }})
                    .as_object()
                    .cloned()
                    .unwrap()
            })
            .collect();
        Dataset::new(rows)
    }

    fn request(algorithm: Algorithm) -> TrainRequest {
        TrainRequest {
            model_id: Some("m1".to_string()),
            name: None,
            dataset_name: "numbers".to_string(),
            dataset: dataset(20),
            features: vec!["a".to_string(), "b".to_string()],
            targets: vec!["y".to_string()],
            algorithm,
            hyperparameters: ParamMap::new(),
        }
    }

    fn registry() -> ModelRegistry {
        ModelRegistry::in_memory(Arc::new(SimulatedBackend::new(Some(3))))
    }

    #[test]
    fn test_fine_tune_overrides_map_to_schema_keys() {
        let options = FineTuneOptions {
            epochs: Some(40),
            learning_rate: Some(0.05),
            hyperparameters: ParamMap::new(),
        };
        let overrides = options.overrides();
        assert_eq!(overrides["epochs"], json!(40));
        assert_eq!(overrides["learning_rate"], json!(0.05));
    }

    #[test]
    fn test_retraining_same_id_adds_version() {
        let registry = registry();
        registry
            .train_model(request(Algorithm::RandomForest), &mut NoProgress, &CancelFlag::new())
            .unwrap();
        let second = registry
            .train_model(request(Algorithm::DecisionTree), &mut NoProgress, &CancelFlag::new())
            .unwrap();

        assert_eq!(second.versions.len(), 2);
        assert_eq!(second.algorithm, Algorithm::DecisionTree);
        assert_eq!(second.active_version().unwrap().name, "v2");
        assert_eq!(registry.list_models().unwrap().len(), 1);
    }

    #[test]
    fn test_fine_tune_rejects_unknown_override() {
        let registry = registry();
        let trained = registry
            .train_model(request(Algorithm::RandomForest), &mut NoProgress, &CancelFlag::new())
            .unwrap();

        let options = FineTuneOptions {
            epochs: Some(10),
            ..FineTuneOptions::default()
        };
        let err = registry.fine_tune_model("m1", &options, &CancelFlag::new()).unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));
        assert_eq!(registry.get_model("m1").unwrap(), trained);
    }

    #[test]
    fn test_training_data_not_retained_blocks_fine_tune() {
        let mut registry = registry();
        registry.training.retain_training_data = false;
        registry
            .train_model(request(Algorithm::NeuralNetwork), &mut NoProgress, &CancelFlag::new())
            .unwrap();

        let err = registry
            .fine_tune_model("m1", &FineTuneOptions::default(), &CancelFlag::new())
            .unwrap_err();
        assert!(err.to_string().contains("no retained training data"));
    }

    #[test]
    fn test_cancelled_training_stores_nothing() {
        let registry = registry();
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            registry.train_model(request(Algorithm::Svm), &mut NoProgress, &cancel),
            Err(ForgeError::Cancelled)
        ));
        assert!(registry.list_models().unwrap().is_empty());
    }

    #[test]
    fn test_delete_releases_lock_entry() {
        let registry = registry();
        registry
            .train_model(request(Algorithm::RandomForest), &mut NoProgress, &CancelFlag::new())
            .unwrap();
        registry.delete_model("m1").unwrap();
        assert_eq!(registry.locks.len(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_delete_removes_model_files_of_every_version() {
        use crate::config::SubprocessConfig;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let interpreter = dir.path().join("fake-python");
        std::fs::write(&interpreter, "#!/bin/sh\ntouch \"$3\"\necho '{\"accuracy\": 0.7}'\n").unwrap();
        std::fs::set_permissions(&interpreter, std::fs::Permissions::from_mode(0o755)).unwrap();
        let config = SubprocessConfig {
            interpreter: interpreter.to_string_lossy().into_owned(),
            timeout_secs: 10,
            work_dir: Some(dir.path().join("work")),
            keep_scripts: false,
        };
        let backend = SubprocessBackend::new(config, 0.2, None).unwrap();
        let registry = ModelRegistry::in_memory(Arc::new(backend));
        let models = dir.path().join("work").join("models");

        for algorithm in [Algorithm::RandomForest, Algorithm::DecisionTree] {
            registry
                .train_model(request(algorithm), &mut NoProgress, &CancelFlag::new())
                .unwrap();
        }
        assert_eq!(std::fs::read_dir(&models).unwrap().count(), 2);

        registry.delete_model("m1").unwrap();
        assert_eq!(std::fs::read_dir(&models).unwrap().count(), 0);
    }

    #[test]
    fn test_import_rejects_path_like_ids() {
        let registry = registry();
        assert!(matches!(
            registry.import_model("../etc/passwd", "x"),
            Err(ForgeError::Validation(_))
        ));
    }
}
