use super::dataset::{cell_as_f64, Dataset, Row};
use crate::error::{ForgeError, Result};
use polars::prelude::*;
use serde_json::{json, Value};
use std::path::Path;

pub struct CsvConnector;

impl CsvConnector {
    /// Load CSV file into DataFrame
    pub fn load<P: AsRef<Path>>(path: P) -> Result<DataFrame> {
        let df = CsvReadOptions::default()
            .with_has_header(true)
            .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
            .finish()
            .map_err(|e| ForgeError::Validation(format!("Failed to read CSV: {}", e)))?;

        log::debug!(
            "Loaded {} rows x {} columns from {}",
            df.height(),
            df.width(),
            path.as_ref().display()
        );
        Ok(df)
    }

    /// Load a CSV file as dashboard-style rows
    pub fn load_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
        let df = Self::load(path)?;
        Self::to_dataset(&df)
    }

    pub fn to_dataset(df: &DataFrame) -> Result<Dataset> {
        let columns = df.get_columns();
        let mut rows = Vec::with_capacity(df.height());

        for i in 0..df.height() {
            let mut row = Row::new();
            for column in columns {
                let cell = any_to_json(column.get(i)?);
                row.insert(column.name().to_string(), cell);
            }
            rows.push(row);
        }

        Ok(Dataset::new(rows))
    }

    /// Builds a DataFrame over `columns`. A column becomes Float64 when
    /// every cell is numeric, otherwise String.
    pub fn to_dataframe(dataset: &Dataset, columns: &[String]) -> Result<DataFrame> {
        let mut built = Vec::with_capacity(columns.len());

        for name in columns {
            let cells: Vec<&Value> = dataset
                .rows
                .iter()
                .map(|r| r.get(name).unwrap_or(&Value::Null))
                .collect();

            let numeric = cells
                .iter()
                .all(|c| c.is_null() || (!c.is_string() && cell_as_f64(c).is_some()));

            let column = if numeric {
                let values: Vec<Option<f64>> = cells.iter().map(|c| cell_as_f64(c)).collect();
                Column::new(name.as_str().into(), values)
            } else {
                let values: Vec<Option<String>> = cells
                    .iter()
                    .map(|c| match c {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    })
                    .collect();
                Column::new(name.as_str().into(), values)
            };
            built.push(column);
        }

        Ok(DataFrame::new(built)?)
    }

    /// CSV text for the listed columns, header included
    pub fn to_csv_string(dataset: &Dataset, columns: &[String]) -> Result<String> {
        let mut df = Self::to_dataframe(dataset, columns)?;
        let mut buffer = Vec::new();
        CsvWriter::new(&mut buffer)
            .include_header(true)
            .finish(&mut df)?;
        String::from_utf8(buffer)
            .map_err(|e| ForgeError::Validation(format!("CSV output is not UTF-8: {}", e)))
    }
}

fn any_to_json(value: AnyValue<'_>) -> Value {
    match value {
        AnyValue::Null => Value::Null,
        AnyValue::Boolean(b) => json!(b),
        AnyValue::String(s) => json!(s),
        AnyValue::StringOwned(s) => json!(s.as_str()),
        AnyValue::Int8(v) => json!(v),
        AnyValue::Int16(v) => json!(v),
        AnyValue::Int32(v) => json!(v),
        AnyValue::Int64(v) => json!(v),
        AnyValue::UInt8(v) => json!(v),
        AnyValue::UInt16(v) => json!(v),
        AnyValue::UInt32(v) => json!(v),
        AnyValue::UInt64(v) => json!(v),
        AnyValue::Float32(v) => json!(v),
        AnyValue::Float64(v) => json!(v),
        other => json!(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_dataset_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a,b,label").unwrap();
        writeln!(file, "1.5,2,yes").unwrap();
        writeln!(file, "3.0,4,no").unwrap();
        file.flush().unwrap();

        let ds = CsvConnector::load_dataset(file.path()).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.rows[0]["a"], json!(1.5));
        assert_eq!(ds.rows[1]["label"], json!("no"));
    }

    #[test]
    fn test_to_csv_string_keeps_column_order() {
        let ds: Dataset = serde_json::from_value(json!([
            {"x": 1, "y": "a"},
            {"x": 2.5, "y": "b"}
        ]))
        .unwrap();

        let csv = CsvConnector::to_csv_string(&ds, &["y".to_string(), "x".to_string()]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("y,x"));
        assert!(lines.next().unwrap().starts_with("a,1"));
        assert_eq!(lines.next(), Some("b,2.5"));
    }
}
