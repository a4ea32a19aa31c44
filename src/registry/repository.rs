//! Storage for model records.

use crate::error::{ForgeError, Result};
use crate::types::ModelRecord;
use std::collections::HashMap;
use std::sync::RwLock;

/// Create/read/update/delete of model records by id
pub trait ModelRepository: Send + Sync {
    /// Stores a new record.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the id is already taken.
    fn create(&self, record: ModelRecord) -> Result<ModelRecord>;

    fn get(&self, id: &str) -> Result<Option<ModelRecord>>;

    /// Replaces an existing record.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no record has this id.
    fn update(&self, record: ModelRecord) -> Result<ModelRecord>;

    /// Removes a record, returning whether it existed
    fn delete(&self, id: &str) -> Result<bool>;

    /// All records, newest first
    fn list(&self) -> Result<Vec<ModelRecord>>;
}

/// Process-local store, lost on exit
#[derive(Default)]
pub struct InMemoryRepository {
    records: RwLock<HashMap<String, ModelRecord>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelRepository for InMemoryRepository {
    fn create(&self, record: ModelRecord) -> Result<ModelRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        if records.contains_key(&record.id) {
            return Err(ForgeError::Validation(format!("Model {} already exists", record.id)));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn get(&self, id: &str) -> Result<Option<ModelRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(id).cloned())
    }

    fn update(&self, record: ModelRecord) -> Result<ModelRecord> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record.clone();
                Ok(record)
            }
            None => Err(ForgeError::NotFound(record.id)),
        }
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        Ok(records.remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<ModelRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<ModelRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(all)
    }
}
