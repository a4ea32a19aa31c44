//! JSON-file backed repository.

use super::repository::ModelRepository;
use crate::error::{ForgeError, Result};
use crate::types::ModelRecord;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Keeps every record in one JSON document, rewritten atomically
/// (write to a sibling temp file, then rename) after each mutation
pub struct JsonFileRepository {
    path: PathBuf,
    records: RwLock<BTreeMap<String, ModelRecord>>,
}

impl JsonFileRepository {
    /// Opens the store at `path`, creating parent directories. A missing
    /// file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let records = if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            if contents.trim().is_empty() {
                BTreeMap::new()
            } else {
                let list: Vec<ModelRecord> = serde_json::from_str(&contents).map_err(|e| {
                    ForgeError::Configuration(format!(
                        "Model store {} is corrupt: {}",
                        path.display(),
                        e
                    ))
                })?;
                list.into_iter().map(|r| (r.id.clone(), r)).collect()
            }
        } else {
            BTreeMap::new()
        };

        log::info!("Opened model store {} ({} models)", path.display(), records.len());
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    fn persist(&self, records: &BTreeMap<String, ModelRecord>) -> Result<()> {
        let list: Vec<&ModelRecord> = records.values().collect();
        let json = serde_json::to_string_pretty(&list)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl ModelRepository for JsonFileRepository {
    fn create(&self, record: ModelRecord) -> Result<ModelRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&record.id) {
            return Err(ForgeError::Validation(format!("Model {} already exists", record.id)));
        }
        records.insert(record.id.clone(), record.clone());
        if let Err(e) = self.persist(&records) {
            records.remove(&record.id);
            return Err(e);
        }
        Ok(record)
    }

    fn get(&self, id: &str) -> Result<Option<ModelRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(id).cloned())
    }

    fn update(&self, record: ModelRecord) -> Result<ModelRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let previous = match records.get(&record.id) {
            Some(existing) => existing.clone(),
            None => return Err(ForgeError::NotFound(record.id)),
        };
        records.insert(record.id.clone(), record.clone());
        if let Err(e) = self.persist(&records) {
            records.insert(previous.id.clone(), previous);
            return Err(e);
        }
        Ok(record)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.remove(id) {
            Some(removed) => {
                if let Err(e) = self.persist(&records) {
                    records.insert(removed.id.clone(), removed);
                    return Err(e);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list(&self) -> Result<Vec<ModelRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<ModelRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(all)
    }
}
