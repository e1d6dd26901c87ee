pub mod openai;
pub mod openai_compat;
pub mod types;

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::{OpenAiProvider, ProviderErrorKind};
pub use openai_compat::{custom, deepseek, groq, ollama, ollama_with_base};
pub use types::*;

/// The LLM capability consumed by the dialogue engine. The engine treats
/// responses as opaque free text and does its own structure parsing.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// Provider Configuration
// ============================================================

/// Provider type identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    OpenAI,
    DeepSeek,
    Groq,
    Ollama,
    /// Custom OpenAI-compatible endpoint
    Custom,
    /// Deterministic echo provider for tests and offline runs
    Stub,
}

/// Configuration for a single provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider ID (e.g., "openai", "my-ollama")
    pub id: String,
    /// Provider type
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// API key (optional for Ollama and stub)
    #[serde(default)]
    pub api_key: Option<String>,
    /// Custom base URL (optional, uses the default for each provider type)
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            id: id.into(),
            provider_type,
            api_key: None,
            base_url: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

/// Create a provider from configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::OpenAI => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("openai requires api_key"))?;
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("https://api.openai.com/v1");
            Arc::new(OpenAiProvider::new(key.clone(), base_url))
        }
        ProviderType::DeepSeek => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("deepseek requires api_key"))?;
            Arc::new(deepseek(key.clone()))
        }
        ProviderType::Groq => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("groq requires api_key"))?;
            Arc::new(groq(key.clone()))
        }
        ProviderType::Ollama => {
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("http://localhost:11434/v1");
            Arc::new(ollama_with_base(base_url))
        }
        ProviderType::Custom => {
            let key = config
                .api_key
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider requires api_key"))?;
            let base_url = config
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider requires base_url"))?;
            Arc::new(custom(key.clone(), base_url.clone()))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    tracing::debug!("created provider {} ({:?})", config.id, config.provider_type);
    Ok(provider)
}

// ============================================================
// Provider Registry
// ============================================================

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("provider not found: {id}"))
    }

    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Echo provider for offline runs.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let user_text = request
            .messages
            .last()
            .map(|m| m.text.clone())
            .unwrap_or_default();
        Ok(CompletionResponse {
            text: format!("[stub:{}] {user_text}", request.model),
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}

/// Test provider replaying a scripted queue of responses. Queued errors are
/// returned in order too; an exhausted queue is an error so a test that
/// under-provisions responses fails loudly.
#[derive(Default)]
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, text: impl Into<String>) {
        self.queue
            .lock()
            .expect("scripted provider lock")
            .push_back(Ok(text.into()));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        self.queue
            .lock()
            .expect("scripted provider lock")
            .push_back(Err(message.into()));
    }

    pub fn remaining(&self) -> usize {
        self.queue.lock().expect("scripted provider lock").len()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        let next = self
            .queue
            .lock()
            .expect("scripted provider lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted provider queue exhausted"))?;
        match next {
            Ok(text) => Ok(CompletionResponse {
                text,
                input_tokens: None,
                output_tokens: None,
                stop_reason: Some("end_turn".into()),
            }),
            Err(message) => Err(anyhow!(message)),
        }
    }
}
