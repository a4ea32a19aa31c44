use super::traits::ConfigSection;
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,
    /// JSON file used by the file store
    pub path: PathBuf,
    /// Where externally trained results are dropped for import
    pub import_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Memory,
    File,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::File,
            path: PathBuf::from("data/models.json"),
            import_dir: PathBuf::from("data/imports"),
        }
    }
}

impl ConfigSection for StorageConfig {
    fn section_name() -> &'static str {
        "storage"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        if self.kind == StorageKind::File && self.path.as_os_str().is_empty() {
            return Err(ForgeError::Configuration(
                "File storage requires a path".to_string()
            ));
        }
        Ok(())
    }
}
