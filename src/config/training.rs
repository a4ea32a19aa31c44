use super::traits::ConfigSection;
use crate::error::ForgeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Fraction of rows held out for evaluation
    pub test_size: f64,
    pub min_rows: usize,
    /// Keep the dataset on the record so the model can be fine-tuned
    pub retain_training_data: bool,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_size: 0.2,
            min_rows: 2,
            retain_training_data: true,
        }
    }
}

impl ConfigSection for TrainingConfig {
    fn section_name() -> &'static str {
        "training"
    }

    fn validate(&self) -> Result<(), ForgeError> {
        if self.test_size <= 0.0 || self.test_size >= 1.0 {
            return Err(ForgeError::Configuration(
                "Test size must be between 0 and 1".to_string()
            ));
        }
        if self.min_rows < 2 {
            return Err(ForgeError::Configuration(
                "Minimum rows must be at least 2 to hold out an evaluation split".to_string()
            ));
        }
        Ok(())
    }
}
