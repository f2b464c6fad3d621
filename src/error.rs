//! Error types for each stage of the request and startup pipeline.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FeatureError {
    #[error("missing required field '{0}'")]
    Missing(&'static str),
    #[error("field '{field}' has invalid value '{value}'")]
    Invalid { field: &'static str, value: String },
}

#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("failed to read model artifact '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode model artifact: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid model artifact: {0}")]
    Shape(String),
    #[error("expected {expected} input features, got {actual}")]
    InputWidth { expected: usize, actual: usize },
    #[error("model produced a non-finite output")]
    NonFinite,
}

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("failed to access dataset artifact '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode dataset artifact: {0}")]
    Decode(#[from] bincode::Error),
    #[error("invalid dataset: {0}")]
    Shape(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ExplainError {
    #[error("background sample is empty")]
    EmptyBackground,
    #[error("evaluation set is empty")]
    EmptyEvaluation,
    #[error("unknown feature '{0}'")]
    UnknownFeature(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

#[derive(Debug, thiserror::Error)]
pub enum ChartError {
    #[error("failed to draw {chart}: {message}")]
    Render { chart: &'static str, message: String },
    #[error("failed to encode chart image: {0}")]
    Encode(#[from] image::ImageError),
    #[error(transparent)]
    Explain(#[from] ExplainError),
}

#[derive(Debug, thiserror::Error)]
pub enum NarrationError {
    #[error("no API key configured for the narration service")]
    MissingApiKey,
    #[error("narration request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("narration service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("narration service returned no text")]
    Empty,
}

#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("{charts} charts but {narrations} narrations")]
    Mismatch { charts: usize, narrations: usize },
    #[error("failed to decode chart image: {0}")]
    Image(#[from] image::ImageError),
    #[error("failed to write PDF: {0}")]
    Pdf(String),
}
