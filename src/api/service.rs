use super::dto::{
    ErrorResponse, ExportNotebookBody, ExportNotebookResponse, ImportModelBody, ImportModelResponse, PredictBody,
    PredictResponse, TrainBody, TrainResponse,
};
use crate::error::{ErrorKind, ForgeError, Result};
use crate::export::{apply_network_options, build_notebook, NotebookPlan};
use crate::ml::AlgorithmParams;
use crate::registry::{LogProgressCallback, ModelRegistry, TrainRequest};
use crate::runtime::CancelFlag;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, Authorization"),
];

/// Transport-neutral HTTP request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: String,
    pub path: String,
    pub body: String,
}

impl ApiRequest {
    pub fn post(path: &str, body: impl Into<String>) -> Self {
        Self {
            method: "POST".to_string(),
            path: path.to_string(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl ApiResponse {
    fn new(status: u16, body: String) -> Self {
        let mut headers: Vec<(String, String)> = CORS_HEADERS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        if !body.is_empty() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        Self { status, headers, body }
    }

    fn json<T: Serialize>(status: u16, payload: &T) -> Self {
        match serde_json::to_string(payload) {
            Ok(body) => Self::new(status, body),
            Err(e) => {
                log::error!("Failed to encode response: {}", e);
                Self::error(500, "Failed to encode response")
            }
        }
    }

    fn error(status: u16, message: &str) -> Self {
        let body = serde_json::to_string(&ErrorResponse::new(message))
            .unwrap_or_else(|_| r#"{"success":false,"error":"internal error"}"#.to_string());
        Self::new(status, body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    Train,
    Predict,
    ImportModel,
    ExportNotebook,
}

impl Endpoint {
    fn from_path(path: &str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path);
        match path.trim_end_matches('/') {
            "/train" => Some(Self::Train),
            "/predict" => Some(Self::Predict),
            "/import-model" => Some(Self::ImportModel),
            "/export-notebook" => Some(Self::ExportNotebook),
            _ => None,
        }
    }
}

/// The four JSON endpoints over a shared [`ModelRegistry`]
pub struct ApiService {
    registry: Arc<ModelRegistry>,
}

impl ApiService {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Routes one request. Never panics and always answers with a JSON
    /// body (empty for `OPTIONS`) plus CORS headers.
    pub fn handle(&self, request: &ApiRequest) -> ApiResponse {
        self.handle_with_cancel(request, &CancelFlag::new())
    }

    /// Like [`ApiService::handle`], for hosts that can notice a client
    /// going away: setting `cancel` stops training and prediction work,
    /// including spawned processes, and the request fails as cancelled.
    pub fn handle_with_cancel(&self, request: &ApiRequest, cancel: &CancelFlag) -> ApiResponse {
        if request.method.eq_ignore_ascii_case("OPTIONS") {
            return ApiResponse::new(200, String::new());
        }

        let endpoint = match Endpoint::from_path(&request.path) {
            Some(endpoint) => endpoint,
            None => return ApiResponse::error(404, &format!("No endpoint at {}", request.path)),
        };
        if !request.method.eq_ignore_ascii_case("POST") {
            return ApiResponse::error(405, &format!("{} does not accept {}", request.path, request.method));
        }

        let result = self.dispatch(endpoint, &request.body, cancel);

        result.unwrap_or_else(|e| {
            match e.kind() {
                ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::NotTrained => {
                    log::warn!("{} {} rejected: {}", request.method, request.path, e)
                }
                ErrorKind::Backend | ErrorKind::Parse => {
                    if let ForgeError::Parse { raw, .. } = &e {
                        log::error!("{} {} failed: {}\nraw output:\n{}", request.method, request.path, e, raw);
                    } else {
                        log::error!("{} {} failed: {}", request.method, request.path, e);
                    }
                }
            }
            ApiResponse::error(500, &e.public_message())
        })
    }

    fn dispatch(&self, endpoint: Endpoint, body: &str, cancel: &CancelFlag) -> Result<ApiResponse> {
        if cancel.is_cancelled() {
            return Err(ForgeError::Cancelled);
        }
        Ok(match endpoint {
            Endpoint::Train => ApiResponse::json(200, &self.train(parse(body)?, cancel)?),
            Endpoint::Predict => ApiResponse::json(200, &self.predict(parse(body)?, cancel)?),
            Endpoint::ImportModel => ApiResponse::json(200, &self.import_model(parse(body)?)?),
            Endpoint::ExportNotebook => ApiResponse::json(200, &self.export_notebook(parse(body)?)?),
        })
    }

    fn train(&self, body: TrainBody, cancel: &CancelFlag) -> Result<TrainResponse> {
        let request = TrainRequest {
            model_id: body.model_id,
            name: body.name,
            dataset_name: body.dataset_name,
            dataset: body.data,
            features: body.features,
            targets: body.target.into_vec(),
            algorithm: body.algorithm,
            hyperparameters: body.hyperparameters.unwrap_or_default(),
        };
        let record = self.registry.train_model(request, &mut LogProgressCallback, cancel)?;

        Ok(TrainResponse {
            success: true,
            accuracy: record.accuracy,
            message: format!(
                "Trained {} on {} ({} backend), accuracy {:.4}",
                record.algorithm, record.dataset_name, record.backend, record.accuracy
            ),
            model_id: record.id,
        })
    }

    fn predict(&self, body: PredictBody, cancel: &CancelFlag) -> Result<PredictResponse> {
        let model = self.registry.get_model(&body.model_id)?;
        let rows = body.input_data.into_rows(&model.features)?;
        let output = self.registry.predict_with_model(&body.model_id, &rows, cancel)?;

        Ok(PredictResponse {
            success: true,
            predictions: output.predictions,
            probabilities: output.probabilities,
            explanation: output.explanation,
        })
    }

    fn import_model(&self, body: ImportModelBody) -> Result<ImportModelResponse> {
        let record = self.registry.import_model(&body.model_id, &body.dataset_name)?;
        Ok(ImportModelResponse {
            success: true,
            accuracy: record.accuracy,
            message: format!(
                "Imported {} ({} versions)",
                record.algorithm,
                record.versions.len()
            ),
            model_id: record.id,
        })
    }

    fn export_notebook(&self, body: ExportNotebookBody) -> Result<ExportNotebookResponse> {
        let targets = body.targets.into_vec();
        crate::data::DataValidator::validate_columns(&body.data, &body.features, &targets)?;

        let params = AlgorithmParams::resolve(body.algorithm, &body.hyperparameters.unwrap_or_default())?;
        let architecture = body.architecture.as_deref();
        let params = apply_network_options(params, architecture, body.epochs, body.learning_rate)?;

        let plan = NotebookPlan {
            model_id: &body.model_id,
            dataset_name: &body.dataset_name,
            dataset: Some(&body.data),
            features: &body.features,
            targets: &targets,
            params: &params,
            architecture,
            test_size: self.registry.training_config().test_size,
            seed: self.registry.seed(),
        };
        let notebook = build_notebook(&plan)?;

        Ok(ExportNotebookResponse {
            success: true,
            notebook_content: serde_json::to_string_pretty(&notebook)?,
            message: format!(
                "Notebook for {} with {} cells; run it and import {}.json",
                params.algorithm(),
                notebook.cells.len(),
                body.model_id
            ),
        })
    }
}

fn parse<T: DeserializeOwned>(body: &str) -> Result<T> {
    if body.trim().is_empty() {
        return Err(ForgeError::Validation("Request body is empty".to_string()));
    }
    serde_json::from_str(body).map_err(|e| ForgeError::Validation(format!("Invalid request body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::backends::SimulatedBackend;
    use serde_json::{json, Value};

    fn service() -> ApiService {
        ApiService::new(Arc::new(ModelRegistry::in_memory(Arc::new(SimulatedBackend::new(Some(1))))))
    }

    fn body(response: &ApiResponse) -> Value {
        serde_json::from_str(&response.body).unwrap()
    }

    #[test]
    fn test_options_is_empty_with_cors() {
        let response = service().handle(&ApiRequest {
            method: "OPTIONS".to_string(),
            path: "/anything".to_string(),
            body: String::new(),
        });
        assert_eq!(response.status, 200);
        assert!(response.body.is_empty());
        assert_eq!(response.header("access-control-allow-origin"), Some("*"));
    }

    #[test]
    fn test_unknown_path_and_method() {
        let service = service();
        let missing = service.handle(&ApiRequest::post("/nope", "{}"));
        assert_eq!(missing.status, 404);
        assert_eq!(body(&missing)["success"], json!(false));

        let wrong_method = service.handle(&ApiRequest {
            method: "GET".to_string(),
            path: "/train".to_string(),
            body: String::new(),
        });
        assert_eq!(wrong_method.status, 405);
        assert!(wrong_method.header("Access-Control-Allow-Methods").is_some());
    }

    #[test]
    fn test_malformed_body_is_500_with_message() {
        let response = service().handle(&ApiRequest::post("/train", "{not json"));
        assert_eq!(response.status, 500);
        let payload = body(&response);
        assert_eq!(payload["success"], json!(false));
        assert!(payload["error"].as_str().unwrap().contains("Invalid request body"));
    }

    #[test]
    fn test_unknown_algorithm_is_rejected() {
        let request = json!({
            "data": [{"a": 1, "y": 0}, {"a": 2, "y": 1}],
            "features": ["a"],
            "target": "y",
            "algorithm": "Quantum Forest"
        });
        let response = service().handle(&ApiRequest::post("/train", request.to_string()));
        assert_eq!(response.status, 500);
        assert!(body(&response)["error"].as_str().unwrap().contains("Quantum Forest"));
    }

    #[test]
    fn test_cancelled_request_is_rejected() {
        let service = service();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let request = json!({
            "data": [{"a": 1, "y": 0}, {"a": 2, "y": 1}, {"a": 3, "y": 0}],
            "features": ["a"],
            "target": "y",
            "algorithm": "Decision Tree",
            "modelId": "late"
        });
        let response = service.handle_with_cancel(&ApiRequest::post("/train", request.to_string()), &cancel);
        assert_eq!(response.status, 500);
        assert_eq!(body(&response)["error"], json!("Operation cancelled"));
        assert!(matches!(service.registry().get_model("late"), Err(ForgeError::NotFound(_))));
    }

    #[test]
    fn test_path_normalisation() {
        assert_eq!(Endpoint::from_path("/predict/"), Some(Endpoint::Predict));
        assert_eq!(Endpoint::from_path("/train?debug=1"), Some(Endpoint::Train));
        assert_eq!(Endpoint::from_path("/trainer"), None);
    }
}
