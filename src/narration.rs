//! Natural-language narration of chart types.
//!
//! Narrations are requested fresh on every call and never cached.

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{NarrationProvider, NarrationSettings};
use crate::error::NarrationError;

/// Upper bound applied to narration text before it reaches pages or reports.
pub const MAX_NARRATION_CHARS: usize = 2000;

const API_KEY_HEADER: &str = "x-goog-api-key";

pub fn prompt_for(chart_type: &str) -> String {
    format!("Explain the insights provided by a {chart_type} in heart disease prediction.")
}

pub trait Narrator: Send + Sync {
    fn narrate<'a>(&'a self, chart_type: &'a str) -> BoxFuture<'a, Result<String, NarrationError>>;
}

/// Builds the narrator selected by configuration.
pub fn from_settings(settings: &NarrationSettings) -> Result<Box<dyn Narrator>, NarrationError> {
    Ok(match settings.provider {
        NarrationProvider::Gemini => Box::new(GeminiNarrator::new(settings.clone())?),
        NarrationProvider::Static => Box::new(StaticNarrator),
    })
}

/// Fixed sentence per chart type, for offline use.
pub struct StaticNarrator;

impl Narrator for StaticNarrator {
    fn narrate<'a>(&'a self, chart_type: &'a str) -> BoxFuture<'a, Result<String, NarrationError>> {
        Box::pin(async move {
            Ok(format!(
                "This {chart_type} explains the model's decision-making process."
            ))
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: [Content<'a>; 1],
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [PartIn<'a>; 1],
}

#[derive(Serialize)]
struct PartIn<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize, Default)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Default)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize, Default)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<PartOut>,
}

#[derive(Deserialize, Default)]
struct PartOut {
    #[serde(default)]
    text: Option<String>,
}

/// Client for the Gemini `generateContent` endpoint. No retries.
pub struct GeminiNarrator {
    client: Client,
    settings: NarrationSettings,
}

impl GeminiNarrator {
    pub fn new(settings: NarrationSettings) -> Result<Self, NarrationError> {
        let client = Client::builder().timeout(settings.timeout).build()?;
        Ok(Self { client, settings })
    }

    /// The key travels in a header so it never appears in URLs or errors.
    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        )
    }

    async fn generate(&self, chart_type: &str) -> Result<String, NarrationError> {
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(NarrationError::MissingApiKey)?;
        let prompt = prompt_for(chart_type);
        let body = GenerateRequest {
            contents: [Content {
                parts: [PartIn { text: &prompt }],
            }],
            generation_config: GenerationConfig {
                max_output_tokens: self.settings.max_output_tokens,
                temperature: self.settings.temperature,
            },
        };

        debug!(model = %self.settings.model, chart_type, "Requesting narration");
        let response = self
            .client
            .post(self.url())
            .header(API_KEY_HEADER, api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NarrationError::Request(e.without_url()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Narration request rejected");
            return Err(NarrationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| NarrationError::Request(e.without_url()))?;
        extract_text(parsed)
    }
}

impl Narrator for GeminiNarrator {
    fn narrate<'a>(&'a self, chart_type: &'a str) -> BoxFuture<'a, Result<String, NarrationError>> {
        Box::pin(self.generate(chart_type))
    }
}

fn extract_text(response: GenerateResponse) -> Result<String, NarrationError> {
    let text: String = response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();
    let text = text.trim();
    if text.is_empty() {
        return Err(NarrationError::Empty);
    }
    Ok(truncate_chars(text, MAX_NARRATION_CHARS))
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
