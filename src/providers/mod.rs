/*!
 * Translator implementations.
 *
 * This module contains the `Translator` capability and its variants:
 * - OpenRouter: OpenAI-compatible chat completions API
 * - Mock: offline translator with scriptable failure modes
 *
 * The variant in use is chosen from configuration through
 * `TranslatorBackend`, never by inspecting types at runtime.
 */

use async_trait::async_trait;
use serde::Serialize;
use std::fmt::Debug;

use crate::app_config::{TranslationConfig, TranslationProvider};
use crate::errors::ProviderError;

pub mod mock;
pub mod openrouter;

pub use mock::{MockBehavior, MockTranslator};
pub use openrouter::OpenRouter;

/// Who is translating, for logs and run metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderInfo {
    pub provider_name: String,
    pub model_identifier: String,
}

/// Common trait for all translators
///
/// Implementations are stateless per call and safe to share across the
/// executor's workers.
#[async_trait]
pub trait Translator: Send + Sync + Debug {
    /// Translate `texts` positionally.
    ///
    /// The result has the same length as the input. A failure fails the
    /// whole batch; there are no partial results.
    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, ProviderError>;

    /// Projected cost of translating `word_count` words
    fn estimate_cost(&self, word_count: usize) -> f64;

    fn describe(&self) -> ProviderInfo;
}

/// Configured translator variant
#[derive(Debug)]
pub enum TranslatorBackend {
    OpenRouter(OpenRouter),
    Mock(MockTranslator),
}

impl TranslatorBackend {
    /// Build the translator selected by `config.provider`
    pub fn from_config(config: &TranslationConfig) -> anyhow::Result<Self> {
        match config.provider {
            TranslationProvider::OpenRouter => Ok(Self::OpenRouter(OpenRouter::from_config(config)?)),
            TranslationProvider::Mock => Ok(Self::Mock(MockTranslator::new(MockBehavior::Uppercase))),
        }
    }
}

#[async_trait]
impl Translator for TranslatorBackend {
    async fn translate_batch(&self, texts: &[String]) -> Result<Vec<String>, ProviderError> {
        match self {
            Self::OpenRouter(client) => client.translate_batch(texts).await,
            Self::Mock(mock) => mock.translate_batch(texts).await,
        }
    }

    fn estimate_cost(&self, word_count: usize) -> f64 {
        match self {
            Self::OpenRouter(client) => client.estimate_cost(word_count),
            Self::Mock(mock) => mock.estimate_cost(word_count),
        }
    }

    fn describe(&self) -> ProviderInfo {
        match self {
            Self::OpenRouter(client) => client.describe(),
            Self::Mock(mock) => mock.describe(),
        }
    }
}
