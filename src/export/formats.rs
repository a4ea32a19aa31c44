use super::notebook::{build_notebook, python_source, NotebookPlan};
use crate::error::{ForgeError, Result};
use crate::ml::{Algorithm, AlgorithmParams, ParamMap, Task};
use crate::types::ModelRecord;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Toml,
    /// Standalone scikit-learn training script
    Python,
    /// Jupyter notebook, nbformat 4
    Notebook,
}

impl ExportFormat {
    pub fn all() -> [Self; 4] {
        [Self::Json, Self::Toml, Self::Python, Self::Notebook]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Python => "python",
            Self::Notebook => "notebook",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Python => "py",
            Self::Notebook => "ipynb",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json | Self::Notebook => "application/json",
            Self::Toml => "application/toml",
            Self::Python => "text/x-python",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportFormat {
    type Err = ForgeError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::all()
            .into_iter()
            .find(|f| f.as_str() == wanted || f.extension() == wanted)
            .ok_or_else(|| {
                ForgeError::Validation(format!(
                    "Unknown export format '{}' (expected one of: json, toml, python, notebook)",
                    s
                ))
            })
    }
}

/// A downloadable rendering of one model
#[derive(Debug, Clone, PartialEq)]
pub struct ExportedModel {
    pub file_name: String,
    pub content_type: &'static str,
    pub content: String,
}

/// TOML view of a record. Plain values come before the tables.
#[derive(Serialize)]
struct ModelSummary<'a> {
    id: &'a str,
    name: &'a str,
    #[serde(rename = "type")]
    model_type: &'a str,
    algorithm: Algorithm,
    task: Task,
    accuracy: f64,
    dataset_name: &'a str,
    features: &'a [String],
    targets: &'a [String],
    backend: &'a str,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    parameters: &'a ParamMap,
    versions: Vec<VersionSummary<'a>>,
}

#[derive(Serialize)]
struct VersionSummary<'a> {
    name: &'a str,
    created: DateTime<Utc>,
    algorithm: Algorithm,
    accuracy: f64,
    is_active: bool,
    parameters: &'a ParamMap,
}

fn to_toml(record: &ModelRecord) -> Result<String> {
    let summary = ModelSummary {
        id: &record.id,
        name: &record.name,
        model_type: &record.model_type,
        algorithm: record.algorithm,
        task: record.task,
        accuracy: record.accuracy,
        dataset_name: &record.dataset_name,
        features: &record.features,
        targets: &record.targets,
        backend: &record.backend,
        created: record.created,
        updated: record.updated,
        parameters: &record.parameters,
        versions: record
            .versions
            .iter()
            .map(|v| VersionSummary {
                name: &v.name,
                created: v.created,
                algorithm: v.algorithm,
                accuracy: v.accuracy,
                is_active: v.is_active,
                parameters: &v.parameters,
            })
            .collect(),
    };
    toml::to_string_pretty(&summary)
        .map_err(|e| ForgeError::Validation(format!("Model {} cannot be written as TOML: {}", record.id, e)))
}

fn file_stem(record: &ModelRecord) -> String {
    let stem: String = record
        .name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if stem.trim_matches('_').is_empty() {
        record.id.clone()
    } else {
        stem
    }
}

/// Renders `record` in `format`. The JSON form leaves out retained
/// training data; the notebook form requires it.
pub fn export_model(
    record: &ModelRecord,
    format: ExportFormat,
    test_size: f64,
    seed: Option<u64>,
) -> Result<ExportedModel> {
    let content = match format {
        ExportFormat::Json => {
            let mut exported = record.clone();
            exported.training_data = None;
            serde_json::to_string_pretty(&exported)?
        }
        ExportFormat::Toml => to_toml(record)?,
        ExportFormat::Python | ExportFormat::Notebook => {
            let params = AlgorithmParams::resolve(record.algorithm, &record.parameters)?;
            let dataset = record.training_data.as_ref().map(|d| &d.dataset);
            if format == ExportFormat::Notebook && dataset.is_none() {
                return Err(ForgeError::Validation(format!(
                    "Model {} has no retained training data to embed in a notebook",
                    record.id
                )));
            }
            let plan = NotebookPlan {
                model_id: &record.id,
                dataset_name: &record.dataset_name,
                dataset,
                features: &record.features,
                targets: &record.targets,
                params: &params,
                architecture: None,
                test_size,
                seed,
            };
            if format == ExportFormat::Python {
                python_source(&plan)?
            } else {
                serde_json::to_string_pretty(&build_notebook(&plan)?)?
            }
        }
    };

    log::debug!("Exported model {} as {} ({} bytes)", record.id, format, content.len());
    Ok(ExportedModel {
        file_name: format!("{}.{}", file_stem(record), format.extension()),
        content_type: format.content_type(),
        content,
    })
}
