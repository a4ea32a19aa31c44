use super::{ModelBackend, Predictor, Trainer, TrainingJob, TrainingOutcome};
use crate::config::RemoteConfig;
use crate::data::DataValidator;
use crate::error::{ForgeError, Result};
use crate::ml::Task;
use crate::runtime::CancelFlag;
use crate::types::{ModelRecord, PredictionOutput};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

/// Delegates training and inference to a trainer service speaking JSON
/// over HTTP (`POST {base_url}/train`, `POST {base_url}/predict`)
pub struct RemoteBackend {
    client: Client,
    config: RemoteConfig,
}

#[derive(Debug, Deserialize)]
struct RemoteTrainResponse {
    accuracy: f64,
    #[serde(default)]
    artifact: Value,
}

impl RemoteBackend {
    pub fn new(config: RemoteConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ForgeError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn post(&self, path: &str, body: &Value, cancel: &CancelFlag) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }

        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().map_err(|e| {
            if e.is_timeout() {
                ForgeError::Timeout(self.config.timeout_secs)
            } else {
                ForgeError::transient(format!("Request to {} failed: {}", path, e))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .map_err(|e| ForgeError::transient(format!("Failed to read {} response: {}", path, e)))?;

        if status.is_server_error() {
            return Err(ForgeError::transient(format!("{} returned {}: {}", path, status, text.trim())));
        }
        if !status.is_success() {
            return Err(ForgeError::backend(format!("{} returned {}: {}", path, status, text.trim())));
        }
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        Ok(text)
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| ForgeError::Parse {
        message: e.to_string(),
        raw: text.to_string(),
    })
}

impl Trainer for RemoteBackend {
    fn train(&self, job: &TrainingJob<'_>, cancel: &CancelFlag) -> Result<TrainingOutcome> {
        let rows = DataValidator::feature_matrix(job.dataset, job.features)?;
        let target = match job.task {
            Task::Regression => json!(DataValidator::numeric_target(job.dataset, job.target)?),
            Task::Classification => json!(DataValidator::target_column(job.dataset, job.target)?),
        };

        let body = json!({
            "algorithm": job.algorithm(),
            "parameters": job.params.to_map(),
            "task": job.task,
            "features": job.features,
            "target": job.target,
            "rows": rows,
            "targetValues": target,
        });

        log::info!("Training {} remotely at {}", job.algorithm(), self.config.base_url);
        let text = self.post("train", &body, cancel)?;
        let response: RemoteTrainResponse = parse_body(&text)?;

        Ok(TrainingOutcome {
            algorithm: job.algorithm(),
            accuracy: response.accuracy,
            parameters: job.params.to_map(),
            artifact: response.artifact,
        })
    }
}

impl Predictor for RemoteBackend {
    fn predict(&self, model: &ModelRecord, rows: &[Vec<f64>], cancel: &CancelFlag) -> Result<PredictionOutput> {
        let target = model
            .primary_target()
            .ok_or_else(|| ForgeError::Validation(format!("Model {} has no target", model.id)))?;

        let body = json!({
            "modelId": model.id,
            "algorithm": model.algorithm,
            "task": model.task,
            "artifact": model.artifacts.get(target).cloned().unwrap_or(Value::Null),
            "rows": rows,
        });

        let text = self.post("predict", &body, cancel)?;
        parse_body(&text)
    }
}

impl ModelBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "remote"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let backend = RemoteBackend::new(RemoteConfig {
            base_url: "http://trainer.local:9000/".to_string(),
            ..RemoteConfig::default()
        })
        .unwrap();
        assert_eq!(backend.url("train"), "http://trainer.local:9000/train");
    }

    #[test]
    fn test_parse_body_keeps_raw_text() {
        match parse_body::<RemoteTrainResponse>("<html>502 Bad Gateway</html>") {
            Err(ForgeError::Parse { raw, .. }) => assert!(raw.contains("Bad Gateway")),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_cancelled_before_send() {
        let backend = RemoteBackend::new(RemoteConfig::default()).unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert!(matches!(
            backend.post("train", &json!({}), &cancel),
            Err(ForgeError::Cancelled)
        ));
    }
}
