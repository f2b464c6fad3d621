//! Pretrained heart-disease classifier.
//!
//! The artifact is a JSON document describing a small dense network. Its
//! architecture is opaque to the rest of the application: callers only see a
//! class-1 probability for a feature vector.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use crate::config::Number;
use crate::error::ModelError;
use crate::features::{FeatureVector, FEATURE_COUNT};
use crate::vector_ops::dot_simd;

pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Linear,
}

impl Activation {
    fn apply(self, x: Number) -> Number {
        match self {
            Self::Relu => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Linear => x,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    /// One row of input weights per output unit.
    pub weights: Vec<Vec<Number>>,
    pub bias: Vec<Number>,
    pub activation: Activation,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn forward(&self, input: &[Number], out: &mut Vec<Number>) {
        out.clear();
        out.extend(
            self.weights
                .iter()
                .zip(&self.bias)
                .map(|(row, b)| self.activation.apply(dot_simd(row, input) + b)),
        );
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Standardization {
    pub mean: Vec<Number>,
    pub scale: Vec<Number>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classifier {
    #[serde(default)]
    pub standardization: Option<Standardization>,
    pub layers: Vec<DenseLayer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    HeartDisease,
    NoHeartDisease,
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeartDisease => write!(f, "heart disease"),
            Self::NoHeartDisease => write!(f, "no heart disease"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub probability: f64,
    pub diagnosis: Diagnosis,
}

impl Prediction {
    pub fn from_probability(probability: f64) -> Self {
        let diagnosis = if probability >= DECISION_THRESHOLD {
            Diagnosis::HeartDisease
        } else {
            Diagnosis::NoHeartDisease
        };
        Self {
            probability,
            diagnosis,
        }
    }
}

impl Classifier {
    /// Reads and validates the artifact at `path`. Any failure here is fatal
    /// to startup.
    pub fn load(path: &Path) -> Result<Self, ModelError> {
        let bytes = fs::read(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let classifier: Classifier = serde_json::from_slice(&bytes)?;
        classifier.validate()?;
        info!(
            path = %path.display(),
            sha256 = %hex_digest(&bytes),
            layers = classifier.layers.len(),
            "Loaded classifier"
        );
        Ok(classifier)
    }

    pub fn save(&self, path: &Path) -> Result<(), ModelError> {
        let json = serde_json::to_vec_pretty(self)?;
        fs::write(path, json).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.layers.is_empty() {
            return Err(ModelError::Shape("no layers".into()));
        }
        if let Some(scaling) = &self.standardization {
            if scaling.mean.len() != FEATURE_COUNT || scaling.scale.len() != FEATURE_COUNT {
                return Err(ModelError::Shape(format!(
                    "standardization must cover {FEATURE_COUNT} features"
                )));
            }
        }

        let mut width = FEATURE_COUNT;
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() || layer.weights.len() != layer.bias.len() {
                return Err(ModelError::Shape(format!(
                    "layer {i} has {} weight rows and {} biases",
                    layer.weights.len(),
                    layer.bias.len()
                )));
            }
            if layer.weights.iter().any(|row| row.len() != width) {
                return Err(ModelError::Shape(format!(
                    "layer {i} expects {} inputs, previous width is {width}",
                    layer.inputs()
                )));
            }
            width = layer.weights.len();
        }
        if width != 1 {
            return Err(ModelError::Shape(format!(
                "final layer must have one output unit, found {width}"
            )));
        }
        Ok(())
    }

    /// Raw forward pass returning the class-1 probability, clamped to [0, 1].
    pub fn probability(&self, features: &[Number]) -> Number {
        let mut current: Vec<Number> = match &self.standardization {
            Some(s) => features
                .iter()
                .zip(s.mean.iter().zip(&s.scale))
                .map(|(x, (m, sc))| if *sc == 0.0 { x - m } else { (x - m) / sc })
                .collect(),
            None => features.to_vec(),
        };
        let mut next = Vec::new();
        for layer in &self.layers {
            layer.forward(&current, &mut next);
            std::mem::swap(&mut current, &mut next);
        }
        current.first().copied().unwrap_or(Number::NAN).clamp(0.0, 1.0)
    }

    pub fn predict(&self, features: &FeatureVector) -> Result<Prediction, ModelError> {
        let input = features.as_slice();
        if input.len() != FEATURE_COUNT {
            return Err(ModelError::InputWidth {
                expected: FEATURE_COUNT,
                actual: input.len(),
            });
        }
        let p = self.probability(input);
        if !p.is_finite() {
            return Err(ModelError::NonFinite);
        }
        Ok(Prediction::from_probability(f64::from(p)))
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
