use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_env")]
    pub env: String,
}

fn default_app_name() -> String {
    "tickethive".to_string()
}

fn default_app_env() -> String {
    "dev".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            env: default_app_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "openai", "deepseek", "groq", "ollama", "custom", "stub"
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_llm_provider() -> String {
    "stub".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    30
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: String::new(),
            base_url: String::new(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai", "ollama", "stub"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    #[serde(default)]
    pub base_url: String,
}

fn default_embedding_provider() -> String {
    "stub".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: String::new(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
            base_url: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum cosine similarity for a KB match to be accepted.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    /// When true, a retriever outage is treated as "no match" (the incident
    /// escalates to admin review). Fail-closed is the default.
    #[serde(default)]
    pub fail_open: bool,
}

fn default_similarity_threshold() -> f32 {
    0.4
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            fail_open: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl")]
    pub ttl_seconds: i64,
}

fn default_session_ttl() -> i64 {
    1800
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_session_ttl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    #[serde(default = "default_kb_path")]
    pub kb_path: String,
}

fn default_db_path() -> String {
    "tickethive.db".to_string()
}

fn default_kb_path() -> String {
    "knowledge_base.txt".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            kb_path: default_kb_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

const LLM_PROVIDERS: &[&str] = &["openai", "deepseek", "groq", "ollama", "custom", "stub"];
const EMBEDDING_PROVIDERS: &[&str] = &["openai", "ollama", "stub"];

impl Config {
    pub fn validate(&self) -> Result<()> {
        if !LLM_PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(anyhow!(
                "unknown llm provider '{}' (expected one of {LLM_PROVIDERS:?})",
                self.llm.provider
            ));
        }
        if !EMBEDDING_PROVIDERS.contains(&self.embedding.provider.as_str()) {
            return Err(anyhow!(
                "unknown embedding provider '{}' (expected one of {EMBEDDING_PROVIDERS:?})",
                self.embedding.provider
            ));
        }
        if self.retrieval.similarity_threshold <= 0.0 || self.retrieval.similarity_threshold > 1.0 {
            return Err(anyhow!(
                "retrieval.similarity_threshold must be in (0, 1], got {}",
                self.retrieval.similarity_threshold
            ));
        }
        if self.session.ttl_seconds <= 0 {
            return Err(anyhow!("session.ttl_seconds must be positive"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("llm.timeout_secs must be positive"));
        }
        if self.embedding.dimensions == 0 {
            return Err(anyhow!("embedding.dimensions must be positive"));
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_gives_full_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.app.name, "tickethive");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.llm.provider, "stub");
        assert_eq!(config.retrieval.similarity_threshold, 0.4);
        assert!(!config.retrieval.fail_open);
        assert_eq!(config.session.ttl_seconds, 1800);
        config.validate().unwrap();
    }

    #[test]
    fn partial_yaml_overrides() {
        let raw = r#"
llm:
  provider: ollama
  model: llama3.1
retrieval:
  similarity_threshold: 0.55
  fail_open: true
"#;
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "llama3.1");
        assert_eq!(config.retrieval.similarity_threshold, 0.55);
        assert!(config.retrieval.fail_open);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.retrieval.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
        config.retrieval.similarity_threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_providers() {
        let mut config = Config::default();
        config.llm.provider = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.provider = "word2vec".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "server:\n  port: 9090\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9090);
    }

    #[test]
    fn load_config_missing_file_errors() {
        let err = load_config("/definitely/not/here.yaml").unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }
}
