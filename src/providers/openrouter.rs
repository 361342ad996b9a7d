use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::app_config::TranslationConfig;
use crate::errors::ProviderError;
use crate::language_utils;

use super::{ProviderInfo, Translator};

/// OpenRouter client for the OpenAI-compatible chat completions API
pub struct OpenRouter {
    /// HTTP client for API requests
    client: Client,
    api_key: String,
    /// Base URL, without the `/chat/completions` suffix
    endpoint: String,
    model: String,
    temperature: f32,
    /// Pause between the requests of one batch
    request_delay: Duration,
    tokens_per_word: f64,
    price_per_1k_tokens: f64,
    source_name: String,
    target_name: String,
    prompt_template: Option<String>,
}

impl std::fmt::Debug for OpenRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouter")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .finish()
    }
}

/// Chat completion request
#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

/// Chat completion response
#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

impl OpenRouter {
    pub fn from_config(config: &TranslationConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Self::with_client(config, client)
    }

    /// Build around an existing HTTP client
    pub fn with_client(config: &TranslationConfig, client: Client) -> anyhow::Result<Self> {
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            request_delay: Duration::from_millis(config.request_delay_ms),
            tokens_per_word: config.tokens_per_word,
            price_per_1k_tokens: config.price_per_1k_tokens,
            source_name: language_utils::get_language_name(&config.source_language)?,
            target_name: language_utils::get_language_name(&config.target_language)?,
            prompt_template: config.prompt_template.clone(),
        })
    }

    fn build_prompt(&self, text: &str) -> String {
        match &self.prompt_template {
            Some(template) => template
                .replace("{source}", &self.source_name)
                .replace("{target}", &self.target_name)
                .replace("{text}", text),
            None => format!(
                "Translate the following {} text into {}. \
                 Preserve the meaning and tone. \
                 Respond with the translation only, without notes or explanations.\n\n{}",
                self.source_name, self.target_name, text
            ),
        }
    }

    async fn translate_one(&self, text: &str) -> Result<String, ProviderError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: self.build_prompt(text),
            }],
            temperature: self.temperature,
        };

        let api_url = format!("{}/chat/completions", self.endpoint);
        let response = self
            .client
            .post(&api_url)
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .header("X-Title", "nicoforge")
            .json(&request)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to get error response text".to_string());
            error!("OpenRouter API error ({}): {}", status, error_text);
            return Err(ProviderError::from_status(status.as_u16(), error_text));
        }

        let body = response
            .json::<ChatResponse>()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("Failed to parse response: {}", e)))?;

        extract_translation(body)
    }
}

fn classify_transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(e.to_string())
    } else {
        ProviderError::ConnectionError(e.to_string())
    }
}

fn extract_translation(response: ChatResponse) -> Result<String, ProviderError> {
    let content = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content.trim().to_string())
        .ok_or_else(|| ProviderError::MalformedResponse("response has no choices".to_string()))?;

    if content.is_empty() {
        return Err(ProviderError::MalformedResponse("empty translation".to_string()));
    }
    Ok(content)
}

#[async_trait]
impl Translator for OpenRouter {
    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, ProviderError> {
        let mut translations = Vec::with_capacity(texts.len());

        for (i, text) in texts.iter().enumerate() {
            if i > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            translations.push(self.translate_one(text).await?);
        }

        debug!("OpenRouter translated {} texts with {}", translations.len(), self.model);
        Ok(translations)
    }

    fn estimate_cost(&self, word_count: usize) -> f64 {
        if self.model.ends_with(":free") {
            return 0.0;
        }
        let tokens = word_count as f64 * self.tokens_per_word;
        tokens / 1000.0 * self.price_per_1k_tokens
    }

    fn describe(&self) -> ProviderInfo {
        ProviderInfo {
            provider_name: "openrouter".to_string(),
            model_identifier: self.model.clone(),
        }
    }
}
