//! OpenAI-compatible endpoints (DeepSeek, Groq, Ollama, self-hosted).
//!
//! Same wire format as OpenAI, different base URLs.

use crate::OpenAiProvider;

/// DeepSeek API - OpenAI compatible
/// https://platform.deepseek.com/api-docs
pub fn deepseek(api_key: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, "https://api.deepseek.com/v1")
}

/// Groq API - OpenAI compatible, very fast inference
/// https://console.groq.com/docs/api
pub fn groq(api_key: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, "https://api.groq.com/openai/v1")
}

/// Ollama local API - OpenAI compatible
/// Default: http://localhost:11434/v1
pub fn ollama() -> OpenAiProvider {
    ollama_with_base("http://localhost:11434/v1")
}

/// Ollama with custom base URL
pub fn ollama_with_base(base_url: impl Into<String>) -> OpenAiProvider {
    // Ollama doesn't require an API key, but the header wants something
    OpenAiProvider::new("ollama", base_url)
}

/// Custom OpenAI-compatible endpoint
pub fn custom(api_key: impl Into<String>, base_url: impl Into<String>) -> OpenAiProvider {
    OpenAiProvider::new(api_key, base_url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factories_construct() {
        let provider = deepseek("sk-test");
        assert!(std::mem::size_of_val(&provider) > 0);
        let provider = ollama();
        assert!(std::mem::size_of_val(&provider) > 0);
        let provider = custom("key", "https://my-llm.example.com/v1");
        assert!(std::mem::size_of_val(&provider) > 0);
    }
}
