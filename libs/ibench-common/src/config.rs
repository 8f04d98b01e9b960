use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_MODEL_NAME: &str = "deepseek-ai/deepseek-r1-distill-qwen-7b";

/// Startup misconfiguration; fatal before any task is processed
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("RUNPOD_API_KEY is not set. Copy .env.example to .env and fill in values.")]
    MissingApiKey,
    #[error("RUNPOD_ENDPOINT_ID is not set (or set INFERENCE_BASE_URL). Copy .env.example to .env and fill in values.")]
    MissingEndpoint,
    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },
}

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub endpoint_id: Option<String>,
    pub base_url_override: Option<String>,
    pub model_name: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub n_samples: u32,
    pub data_dir: PathBuf,
    pub sandbox_timeout_ms: u64,
    pub python_bin: String,
    pub inference_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    /// Empty values count as unset; unparseable numbers fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            api_key: get("RUNPOD_API_KEY"),
            endpoint_id: get("RUNPOD_ENDPOINT_ID"),
            base_url_override: get("INFERENCE_BASE_URL"),
            model_name: get("MODEL_NAME").unwrap_or_else(|| DEFAULT_MODEL_NAME.to_string()),
            temperature: get("TEMPERATURE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.6),
            max_tokens: get("MAX_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(32768),
            n_samples: get("N_SAMPLES")
                .and_then(|v| v.parse().ok())
                .unwrap_or(1),
            data_dir: get("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            sandbox_timeout_ms: get("SANDBOX_TIMEOUT_MS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            python_bin: get("PYTHON_BIN").unwrap_or_else(|| "python3".to_string()),
            inference_timeout_secs: get("INFERENCE_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(900),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    pub fn rollouts_dir(&self) -> PathBuf {
        self.data_dir.join("rollouts")
    }

    pub fn datasets_dir(&self) -> PathBuf {
        self.data_dir.join("datasets")
    }

    /// OpenAI-compatible base URL for the inference endpoint
    pub fn base_url(&self) -> Result<String, ConfigError> {
        if let Some(url) = &self.base_url_override {
            return Ok(url.trim_end_matches('/').to_string());
        }
        let endpoint = self.endpoint_id.as_ref().ok_or(ConfigError::MissingEndpoint)?;
        Ok(format!("https://api.runpod.ai/v2/{}/openai/v1", endpoint))
    }

    /// Validate everything an evaluation run needs, once, at startup
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_none() {
            return Err(ConfigError::MissingApiKey);
        }
        self.base_url()?;
        if self.n_samples == 0 {
            return Err(ConfigError::InvalidValue {
                name: "n_samples",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sandbox_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "sandbox_timeout_ms",
                reason: "must be positive".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                name: "temperature",
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
