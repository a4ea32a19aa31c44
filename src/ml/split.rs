use crate::error::{ForgeError, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Row indices of one train/evaluation partition
#[derive(Debug, Clone, PartialEq)]
pub struct HoldoutSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

pub struct HoldoutSplitter {
    test_size: f64,
    seed: Option<u64>,
}

impl HoldoutSplitter {
    pub fn new(test_size: f64, seed: Option<u64>) -> Self {
        Self { test_size, seed }
    }

    /// Shuffles `0..total_rows` and holds out `test_size` of them.
    /// Both partitions are guaranteed non-empty.
    pub fn split(&self, total_rows: usize) -> Result<HoldoutSplit> {
        if total_rows < 2 {
            return Err(ForgeError::Validation(format!(
                "Invalid split: need at least 2 rows to hold out an evaluation set, got {}",
                total_rows
            )));
        }

        let test_rows = ((total_rows as f64 * self.test_size).round() as usize).clamp(1, total_rows - 1);

        let mut indices: Vec<usize> = (0..total_rows).collect();
        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        indices.shuffle(&mut rng);

        let test = indices.split_off(total_rows - test_rows);
        Ok(HoldoutSplit { train: indices, test })
    }
}
