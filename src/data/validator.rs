use super::dataset::{cell_as_f64, Dataset};
use crate::error::{ForgeError, Result};
use serde_json::Value;
use std::collections::HashSet;

pub struct DataValidator;

impl DataValidator {
    /// Validate that every row carries every feature and target column
    pub fn validate_columns(dataset: &Dataset, features: &[String], targets: &[String]) -> Result<()> {
        if dataset.is_empty() {
            return Err(ForgeError::Validation("Dataset is empty".to_string()));
        }
        if features.is_empty() {
            return Err(ForgeError::Validation("At least one feature column is required".to_string()));
        }
        if targets.is_empty() {
            return Err(ForgeError::Validation("At least one target column is required".to_string()));
        }

        let mut seen = HashSet::new();
        for feature in features {
            if !seen.insert(feature.as_str()) {
                return Err(ForgeError::Validation(format!(
                    "Duplicate feature column: {}",
                    feature
                )));
            }
        }
        if let Some(overlap) = targets.iter().find(|t| seen.contains(t.as_str())) {
            return Err(ForgeError::Validation(format!(
                "Column '{}' is listed as both feature and target",
                overlap
            )));
        }

        let available = dataset.columns();
        if let Some(unknown) = features.iter().chain(targets.iter()).find(|c| !available.contains(c)) {
            return Err(ForgeError::Validation(format!(
                "Unknown column '{}'; the dataset has: {}",
                unknown,
                available.join(", ")
            )));
        }

        for (i, row) in dataset.rows.iter().enumerate() {
            for column in features.iter().chain(targets.iter()) {
                match row.get(column) {
                    None | Some(Value::Null) => {
                        return Err(ForgeError::Validation(format!(
                            "Missing column '{}' at row {}",
                            column, i
                        )));
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    /// Check for minimum required rows
    pub fn validate_minimum_rows(dataset: &Dataset, min_rows: usize) -> Result<()> {
        if dataset.len() < min_rows {
            return Err(ForgeError::Validation(format!(
                "Insufficient data: {} rows, minimum {} required",
                dataset.len(),
                min_rows
            )));
        }
        Ok(())
    }

    /// Numeric feature matrix, one vector per row in dataset order
    pub fn feature_matrix(dataset: &Dataset, features: &[String]) -> Result<Vec<Vec<f64>>> {
        dataset
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                features
                    .iter()
                    .map(|f| {
                        let cell = row.get(f).unwrap_or(&Value::Null);
                        cell_as_f64(cell).ok_or_else(|| {
                            ForgeError::Validation(format!(
                                "Feature '{}' at row {} is not numeric: {}",
                                f, i, cell
                            ))
                        })
                    })
                    .collect()
            })
            .collect()
    }

    /// Raw target cells, in dataset order
    pub fn target_column(dataset: &Dataset, target: &str) -> Result<Vec<Value>> {
        dataset
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| match row.get(target) {
                None | Some(Value::Null) => Err(ForgeError::Validation(format!(
                    "Missing column '{}' at row {}",
                    target, i
                ))),
                Some(v) => Ok(v.clone()),
            })
            .collect()
    }

    /// Target cells as numbers, for regression
    pub fn numeric_target(dataset: &Dataset, target: &str) -> Result<Vec<f64>> {
        Self::target_column(dataset, target)?
            .iter()
            .enumerate()
            .map(|(i, v)| {
                cell_as_f64(v).ok_or_else(|| {
                    ForgeError::Validation(format!(
                        "Target '{}' at row {} is not numeric: {}",
                        target, i, v
                    ))
                })
            })
            .collect()
    }

    /// Every input vector must match the model's feature count
    pub fn validate_input_width(rows: &[Vec<f64>], expected: usize) -> Result<()> {
        if rows.is_empty() {
            return Err(ForgeError::Validation("No input rows supplied".to_string()));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != expected {
                return Err(ForgeError::Validation(format!(
                    "Input row {} has {} values, model expects {}",
                    i,
                    row.len(),
                    expected
                )));
            }
            if let Some(bad) = row.iter().find(|v| !v.is_finite()) {
                return Err(ForgeError::Validation(format!(
                    "Input row {} contains a non-finite value: {}",
                    i, bad
                )));
            }
        }
        Ok(())
    }
}
