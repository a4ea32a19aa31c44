//! Training and prediction capabilities.
//!
//! Callers depend on [`Trainer`] and [`Predictor`] only; which backend
//! actually fits the model (an in-process stand-in, real in-process
//! estimators, a Python subprocess or a remote service) is chosen from
//! configuration.

mod native;
mod remote;
mod simulated;
mod subprocess;

pub use native::NativeBackend;
pub use remote::RemoteBackend;
pub use simulated::SimulatedBackend;
pub use subprocess::SubprocessBackend;

use super::{AlgorithmParams, ParamMap, Task};
use crate::config::{AppConfig, BackendKind};
use crate::data::Dataset;
use crate::error::Result;
use crate::ml::Algorithm;
use crate::runtime::CancelFlag;
use crate::types::{ModelRecord, PredictionOutput};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// One validated training job for a single target column
#[derive(Debug, Clone, Copy)]
pub struct TrainingJob<'a> {
    pub dataset: &'a Dataset,
    pub features: &'a [String],
    pub target: &'a str,
    pub params: &'a AlgorithmParams,
    pub task: Task,
}

impl TrainingJob<'_> {
    pub fn algorithm(&self) -> Algorithm {
        self.params.algorithm()
    }
}

/// What a backend hands back after fitting one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub algorithm: Algorithm,
    pub accuracy: f64,
    pub parameters: ParamMap,
    /// State the same backend needs later to predict
    pub artifact: Value,
}

pub trait Trainer: Send + Sync {
    fn train(&self, job: &TrainingJob<'_>, cancel: &CancelFlag) -> Result<TrainingOutcome>;

    /// Frees whatever an artifact keeps outside the record, once the
    /// outcome is rejected or its model deleted
    fn discard(&self, _artifact: &Value) {}
}

pub trait Predictor: Send + Sync {
    /// One prediction per row, in row order. Input width has already
    /// been checked against `model.features`.
    fn predict(&self, model: &ModelRecord, rows: &[Vec<f64>], cancel: &CancelFlag) -> Result<PredictionOutput>;
}

/// A backend able to both train and serve the models it trained
pub trait ModelBackend: Trainer + Predictor {
    /// Tag stored on model records so predictions route back here
    fn name(&self) -> &'static str;
}

/// Builds the backend selected by `backend.kind`
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn ModelBackend>> {
    let backend: Arc<dyn ModelBackend> = match config.backend.kind {
        BackendKind::Simulated => Arc::new(SimulatedBackend::new(config.backend.seed)),
        BackendKind::Native => Arc::new(NativeBackend::new(config.training.test_size, config.backend.seed)),
        BackendKind::Subprocess => Arc::new(SubprocessBackend::new(
            config.subprocess.clone(),
            config.training.test_size,
            config.backend.seed,
        )?),
        BackendKind::Remote => Arc::new(RemoteBackend::new(config.remote.clone())?),
    };
    log::info!("Using {} training backend", backend.name());
    Ok(backend)
}

/// Looks up `key` in a backend artifact, naming the model on failure
pub(crate) fn artifact_field<'a>(model: &'a ModelRecord, target: &str, key: &str) -> Result<&'a Value> {
    model
        .artifacts
        .get(target)
        .and_then(|a| a.get(key))
        .ok_or_else(|| {
            crate::error::ForgeError::backend(format!(
                "Model {} has no '{}' artifact for target '{}'",
                model.id, key, target
            ))
        })
}
