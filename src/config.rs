use anyhow::{Context, Result};
use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub type Number = f32;

pub const EPSILON: f32 = 1e-6;

/// Environment variables checked, in order, for the narration API key.
pub const API_KEY_VARS: [&str; 2] = ["GEMINI_API_KEY", "HEARTIFY_API_KEY"];

#[derive(Deserialize, Default)]
pub struct HeartifyConfig {
    pub bind_address: Option<String>,
    pub model_path: Option<String>,
    pub data_path: Option<String>,
    pub background_size: Option<usize>,
    pub seed: Option<u64>,
    pub attribution_passes: Option<usize>,
    pub dependence_feature: Option<String>,
    pub narration_provider: Option<String>,
    pub narration_model: Option<String>,
    pub narration_endpoint: Option<String>,
    pub narration_max_tokens: Option<u32>,
    pub narration_temperature: Option<f32>,
    pub narration_timeout_secs: Option<u64>,
}

impl HeartifyConfig {
    pub fn try_from(config: &Config) -> Result<Self, ConfigError> {
        Ok(HeartifyConfig {
            bind_address: config.get("bind_address").ok(),
            model_path: config.get("model_path").ok(),
            data_path: config.get("data_path").ok(),
            background_size: config.get("background_size").ok(),
            seed: config.get("seed").ok(),
            attribution_passes: config.get("attribution_passes").ok(),
            dependence_feature: config.get("dependence_feature").ok(),
            narration_provider: config.get("narration_provider").ok(),
            narration_model: config.get("narration_model").ok(),
            narration_endpoint: config.get("narration_endpoint").ok(),
            narration_max_tokens: config.get("narration_max_tokens").ok(),
            narration_temperature: config.get("narration_temperature").ok(),
            narration_timeout_secs: config.get("narration_timeout_secs").ok(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrationProvider {
    Gemini,
    Static,
}

impl NarrationProvider {
    fn parse(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "static" => Ok(Self::Static),
            other => anyhow::bail!("Unknown narration provider: {other}"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::Static => "static",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NarrationSettings {
    pub provider: NarrationProvider,
    pub model: String,
    pub endpoint: String,
    pub max_output_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_address: SocketAddr,
    pub model_path: PathBuf,
    pub data_path: PathBuf,
    pub background_size: usize,
    pub seed: u64,
    pub attribution_passes: usize,
    pub dependence_feature: String,
    pub narration: NarrationSettings,
}

impl Settings {
    /// Reads `heartify_config.*` (optional) and `HEARTIFY_*` environment variables.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(ConfigFile::with_name("heartify_config").required(false))
            .add_source(Environment::with_prefix("HEARTIFY"))
            .build()
            .context("Failed to read heartify configuration")?;

        let api_key = API_KEY_VARS
            .iter()
            .find_map(|var| env::var(var).ok())
            .filter(|key| !key.trim().is_empty());

        Self::from_config(&config, api_key)
    }

    pub fn from_config(config: &Config, api_key: Option<String>) -> Result<Self> {
        let raw = HeartifyConfig::try_from(config)?;

        let bind_address = raw
            .bind_address
            .unwrap_or_else(|| "127.0.0.1:5000".to_string());
        let bind_address: SocketAddr = bind_address
            .parse()
            .with_context(|| format!("Invalid bind_address '{bind_address}'"))?;

        let background_size = raw.background_size.unwrap_or(100);
        if background_size == 0 {
            anyhow::bail!("background_size must be at least 1.");
        }

        let attribution_passes = raw.attribution_passes.unwrap_or(1);
        if attribution_passes == 0 {
            anyhow::bail!("attribution_passes must be at least 1.");
        }

        let provider = raw
            .narration_provider
            .as_deref()
            .map(NarrationProvider::parse)
            .transpose()?
            .unwrap_or(NarrationProvider::Gemini);

        let temperature = raw.narration_temperature.unwrap_or(0.1);
        if !(0.0..=2.0).contains(&temperature) {
            anyhow::bail!("narration_temperature must be within [0, 2], got {temperature}.");
        }

        Ok(Self {
            bind_address,
            model_path: PathBuf::from(
                raw.model_path
                    .unwrap_or_else(|| "artifacts/model.json".to_string()),
            ),
            data_path: PathBuf::from(
                raw.data_path
                    .unwrap_or_else(|| "artifacts/dataset.bin".to_string()),
            ),
            background_size,
            seed: raw.seed.unwrap_or(42),
            attribution_passes,
            dependence_feature: raw
                .dependence_feature
                .unwrap_or_else(|| "Cholesterol".to_string()),
            narration: NarrationSettings {
                provider,
                model: raw
                    .narration_model
                    .unwrap_or_else(|| "gemini-2.0-flash".to_string()),
                endpoint: raw.narration_endpoint.unwrap_or_else(|| {
                    "https://generativelanguage.googleapis.com/v1beta".to_string()
                }),
                max_output_tokens: raw.narration_max_tokens.unwrap_or(100),
                temperature,
                timeout: Duration::from_secs(raw.narration_timeout_secs.unwrap_or(30)),
                api_key,
            },
        })
    }

    pub fn print_config(&self) {
        println!("bind_address={}", self.bind_address);
        println!("model_path={}", self.model_path.display());
        println!("data_path={}", self.data_path.display());
        println!("background_size={}", self.background_size);
        println!("seed={}", self.seed);
        println!("attribution_passes={}", self.attribution_passes);
        println!("dependence_feature={}", self.dependence_feature);
        println!("narration_provider={}", self.narration.provider.as_str());
        println!("narration_model={}", self.narration.model);
        println!("narration_endpoint={}", self.narration.endpoint);
        println!("narration_max_tokens={}", self.narration.max_output_tokens);
        println!("narration_temperature={}", self.narration.temperature);
        println!("narration_timeout_secs={}", self.narration.timeout.as_secs());
        println!(
            "api_key={}",
            if self.narration.api_key.is_some() {
                "<set>"
            } else {
                "<unset>"
            }
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(overrides: &[(&str, &str)]) -> Config {
        let mut builder = Config::builder();
        for (key, value) in overrides {
            builder = builder.set_override(*key, *value).unwrap();
        }
        builder.build().unwrap()
    }

    #[test]
    fn defaults_match_the_demo_layout() {
        let settings = Settings::from_config(&build(&[]), None).unwrap();
        assert_eq!(settings.bind_address.to_string(), "127.0.0.1:5000");
        assert_eq!(settings.model_path, PathBuf::from("artifacts/model.json"));
        assert_eq!(settings.background_size, 100);
        assert_eq!(settings.seed, 42);
        assert_eq!(settings.dependence_feature, "Cholesterol");
        assert_eq!(settings.narration.provider, NarrationProvider::Gemini);
        assert_eq!(settings.narration.max_output_tokens, 100);
        assert!((settings.narration.temperature - 0.1).abs() < EPSILON);
        assert!(settings.narration.api_key.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = build(&[
            ("seed", "7"),
            ("background_size", "12"),
            ("narration_provider", "static"),
            ("bind_address", "0.0.0.0:8080"),
        ]);
        let settings = Settings::from_config(&config, Some("k".into())).unwrap();
        assert_eq!(settings.seed, 7);
        assert_eq!(settings.background_size, 12);
        assert_eq!(settings.narration.provider, NarrationProvider::Static);
        assert_eq!(settings.bind_address.port(), 8080);
        assert_eq!(settings.narration.api_key.as_deref(), Some("k"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(Settings::from_config(&build(&[("background_size", "0")]), None).is_err());
        assert!(Settings::from_config(&build(&[("narration_provider", "other")]), None).is_err());
        assert!(Settings::from_config(&build(&[("bind_address", "nowhere")]), None).is_err());
    }
}
