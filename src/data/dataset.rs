use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record keyed by column name
pub type Row = Map<String, Value>;

/// Ordered sequence of rows as sent by the dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    pub rows: Vec<Row>,
}

impl Dataset {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column names in first-seen order across all rows
    pub fn columns(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for row in &self.rows {
            for key in row.keys() {
                if !seen.contains(key) {
                    seen.push(key.clone());
                }
            }
        }
        seen
    }

    /// Keeps only the listed columns, in the listed order
    pub fn project(&self, columns: &[String]) -> Dataset {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                    .collect()
            })
            .collect();
        Dataset { rows }
    }
}

/// Dataset plus the column roles of one training run. Retained on the
/// model record so fine-tuning can re-run training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingData {
    pub dataset: Dataset,
    pub features: Vec<String>,
    pub targets: Vec<String>,
}

/// Canonical key for a class label so `1`, `1.0` and `"1"` coincide
pub fn label_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
            Some(f) => format!("{}", f),
            None => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Numeric view of a cell: numbers, booleans and numeric strings
pub fn cell_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_label_key_normalizes_numbers() {
        assert_eq!(label_key(&json!(1)), "1");
        assert_eq!(label_key(&json!(1.0)), "1");
        assert_eq!(label_key(&json!("1")), "1");
        assert_eq!(label_key(&json!(2.5)), "2.5");
        assert_eq!(label_key(&json!("cat")), "cat");
    }

    #[test]
    fn test_cell_as_f64() {
        assert_eq!(cell_as_f64(&json!("3.5")), Some(3.5));
        assert_eq!(cell_as_f64(&json!(true)), Some(1.0));
        assert_eq!(cell_as_f64(&json!("abc")), None);
        assert_eq!(cell_as_f64(&json!(null)), None);
    }

    #[test]
    fn test_columns_and_project() {
        let ds: Dataset = serde_json::from_value(json!([
            {"a": 1, "b": 2},
            {"a": 3, "c": 4}
        ]))
        .unwrap();
        assert_eq!(ds.columns(), vec!["a", "b", "c"]);

        let projected = ds.project(&["c".to_string(), "a".to_string()]);
        assert_eq!(projected.rows[0]["c"], Value::Null);
        assert_eq!(projected.rows[1]["c"], json!(4));
    }
}
