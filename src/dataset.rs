use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Number;
use crate::error::DatasetError;
use crate::features::FEATURE_COUNT;

/// Train/evaluation split persisted next to the model artifact.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetSplit {
    pub feature_names: Vec<String>,
    pub x_train: Vec<Vec<Number>>,
    pub x_test: Vec<Vec<Number>>,
}

impl DatasetSplit {
    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let file = File::open(path).map_err(|source| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let split: DatasetSplit = bincode::deserialize_from(BufReader::new(file))?;
        split.validate()?;
        info!(
            path = %path.display(),
            train_rows = split.x_train.len(),
            test_rows = split.x_test.len(),
            "Loaded dataset split"
        );
        Ok(split)
    }

    pub fn save(&self, path: &Path) -> Result<(), DatasetError> {
        let io_err = |source: std::io::Error| DatasetError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = File::create(path).map_err(io_err)?;
        bincode::serialize_into(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), DatasetError> {
        if self.feature_names.len() != FEATURE_COUNT {
            return Err(DatasetError::Shape(format!(
                "expected {FEATURE_COUNT} feature names, found {}",
                self.feature_names.len()
            )));
        }
        for (name, rows) in [("x_train", &self.x_train), ("x_test", &self.x_test)] {
            if let Some(i) = rows.iter().position(|row| row.len() != FEATURE_COUNT) {
                return Err(DatasetError::Shape(format!(
                    "{name} row {i} has {} values",
                    rows[i].len()
                )));
            }
        }
        Ok(())
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    /// Draws `size` training rows without replacement, reproducibly for `seed`.
    /// The whole training set is returned when it is smaller than `size`.
    pub fn sample_background(&self, size: usize, seed: u64) -> Vec<Vec<Number>> {
        if size >= self.x_train.len() {
            return self.x_train.clone();
        }
        let mut rng = StdRng::seed_from_u64(seed);
        index::sample(&mut rng, self.x_train.len(), size)
            .into_iter()
            .map(|i| self.x_train[i].clone())
            .collect()
    }
}
