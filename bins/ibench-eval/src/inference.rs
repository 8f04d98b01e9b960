/// Inference Client - Batched Completions from an OpenAI-compatible Endpoint
///
/// One request per task asks for `n` completions. The assistant turn is
/// prefilled with the reasoning-open tag so the model starts inside its
/// reasoning block; the same tag is prepended to every returned completion
/// so downstream parsing always sees a complete opening delimiter.

use async_trait::async_trait;
use ibench_common::config::{Config, ConfigError};
use ibench_common::types::SamplingParams;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use thiserror::Error;

/// Prefill for the assistant turn, also prepended to each completion
pub const REASONING_PREFILL: &str = "<think>\n";

/// Transport-level failure for a whole task
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("inference endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("inference response was not understood: {0}")]
    Decode(String),
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Request `n` completions for `prompt` in a single batched call
    async fn complete(
        &self,
        prompt: &str,
        params: &SamplingParams,
        n: u32,
    ) -> Result<Vec<String>, InferenceError>;
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for `POST {base_url}/chat/completions`
pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatClient {
    /// Build a client from validated configuration
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let api_key = config.api_key.clone().ok_or(ConfigError::MissingApiKey)?;
        let base_url = config.base_url()?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.inference_timeout_secs))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                name: "http_client",
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            base_url,
            api_key,
            model: config.model_name.clone(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn request_body(&self, prompt: &str, params: &SamplingParams, n: u32) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "user", "content": prompt },
                { "role": "assistant", "content": REASONING_PREFILL },
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "n": n,
        })
    }
}

#[async_trait]
impl InferenceClient for OpenAiCompatClient {
    async fn complete(
        &self,
        prompt: &str,
        params: &SamplingParams,
        n: u32,
    ) -> Result<Vec<String>, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(url = %url, n, max_tokens = params.max_tokens, "Requesting completions");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt, params, n))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(InferenceError::Status { status, body });
        }

        let body = response.text().await?;
        completions_from_body(&body)
    }
}

/// Decode a chat-completions response body into prefixed raw samples
fn completions_from_body(body: &str) -> Result<Vec<String>, InferenceError> {
    let parsed: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::Decode(e.to_string()))?;

    Ok(parsed
        .choices
        .into_iter()
        .map(|choice| {
            let content = choice.message.content.unwrap_or_default();
            format!("{REASONING_PREFILL}{content}")
        })
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Fake client keyed by a substring of the prompt
    #[derive(Default)]
    pub(crate) struct ScriptedInference {
        pub responses: HashMap<String, Vec<String>>,
        pub failing: Vec<String>,
        pub requests: Mutex<Vec<(String, u32)>>,
    }

    #[async_trait]
    impl InferenceClient for ScriptedInference {
        async fn complete(
            &self,
            prompt: &str,
            _params: &SamplingParams,
            n: u32,
        ) -> Result<Vec<String>, InferenceError> {
            self.requests.lock().unwrap().push((prompt.to_string(), n));
            if self.failing.iter().any(|marker| prompt.contains(marker.as_str())) {
                return Err(InferenceError::Status {
                    status: 503,
                    body: "upstream unavailable".to_string(),
                });
            }
            let samples = self
                .responses
                .iter()
                .find(|(marker, _)| prompt.contains(marker.as_str()))
                .map(|(_, samples)| samples.clone())
                .unwrap_or_default();
            Ok(samples
                .into_iter()
                .take(n as usize)
                .map(|s| format!("{REASONING_PREFILL}{s}"))
                .collect())
        }
    }

    fn test_client() -> OpenAiCompatClient {
        let config = Config::from_lookup(|key| match key {
            "RUNPOD_API_KEY" => Some("secret".to_string()),
            "INFERENCE_BASE_URL" => Some("http://localhost:9/v1".to_string()),
            "MODEL_NAME" => Some("tiny".to_string()),
            _ => None,
        });
        OpenAiCompatClient::from_config(&config).unwrap()
    }

    #[test]
    fn test_request_body_prefills_assistant_turn() {
        let client = test_client();
        let params = SamplingParams {
            temperature: 0.5,
            max_tokens: 64,
        };
        let body = client.request_body("Solve it", &params, 3);

        assert_eq!(body["model"], "tiny");
        assert_eq!(body["n"], 3);
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Solve it");
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert_eq!(body["messages"][1]["content"], REASONING_PREFILL);
    }

    #[test]
    fn test_completions_are_prefixed() {
        let body = r#"{"id":"x","choices":[
            {"index":0,"message":{"role":"assistant","content":"think more</think>\nanswer"}},
            {"index":1,"message":{"role":"assistant","content":null}}
        ]}"#;

        let samples = completions_from_body(body).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0], "<think>\nthink more</think>\nanswer");
        assert_eq!(samples[1], "<think>\n");
    }

    #[test]
    fn test_undecodable_body() {
        let err = completions_from_body("<html>bad gateway</html>").unwrap_err();
        assert!(matches!(err, InferenceError::Decode(_)));
    }

    #[test]
    fn test_from_config_requires_credentials() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(
            OpenAiCompatClient::from_config(&config).err(),
            Some(ConfigError::MissingApiKey)
        );
    }
}
