//! Responsiveness validation for clarifying answers.
//!
//! What counts as "responsive to the question asked" is a pluggable policy
//! seam: the default asks the LLM for a strict JSON verdict, tests use
//! `AcceptAllPolicy`, and deployments can swap in their own heuristic.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tickethive_provider::{CompletionRequest, LlmProvider};
use tickethive_schema::Result;

use crate::classify::extract_json_object;
use crate::llm::complete_with_retry;

#[async_trait]
pub trait AnswerPolicy: Send + Sync {
    /// Whether `answer` actually addresses `question`. A non-responsive
    /// answer makes the engine re-ask without consuming a required-info
    /// slot.
    async fn is_responsive(&self, question: &str, answer: &str) -> Result<bool>;
}

pub struct LlmAnswerPolicy {
    llm: Arc<dyn LlmProvider>,
    model: String,
    timeout: Duration,
}

impl LlmAnswerPolicy {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            llm,
            model: model.into(),
            timeout,
        }
    }

    fn prompt(question: &str, answer: &str) -> String {
        format!(
            r#"You are validating one step of an IT support dialogue.

Question asked: "{question}"
User's answer: "{answer}"

Does the answer actually provide the information the question asked for? An answer that changes the subject, asks something else, or clearly does not contain the requested information is not responsive.

Answer with ONLY this JSON object, no other text:
{{"responsive": true | false}}"#
        )
    }
}

#[async_trait]
impl AnswerPolicy for LlmAnswerPolicy {
    async fn is_responsive(&self, question: &str, answer: &str) -> Result<bool> {
        let request =
            CompletionRequest::simple(self.model.clone(), None, Self::prompt(question, answer));
        let raw = complete_with_retry(self.llm.as_ref(), request, self.timeout).await?;
        Ok(parse_verdict(&raw))
    }
}

/// Lenient fallback: an unreadable verdict counts as responsive, so a flaky
/// model cannot trap the user in a re-ask loop.
fn parse_verdict(raw: &str) -> bool {
    extract_json_object(raw)
        .and_then(|value| value.get("responsive").and_then(Value::as_bool))
        .unwrap_or(true)
}

/// Accepts every answer. For tests and for deployments that prefer to trust
/// the user.
pub struct AcceptAllPolicy;

#[async_trait]
impl AnswerPolicy for AcceptAllPolicy {
    async fn is_responsive(&self, _question: &str, _answer: &str) -> Result<bool> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickethive_provider::ScriptedProvider;

    #[test]
    fn verdict_parses_both_ways() {
        assert!(parse_verdict(r#"{"responsive": true}"#));
        assert!(!parse_verdict(r#"{"responsive": false}"#));
    }

    #[test]
    fn unreadable_verdict_is_lenient() {
        assert!(parse_verdict("sure, that looks fine"));
        assert!(parse_verdict(r#"{"something": "else"}"#));
    }

    #[tokio::test]
    async fn llm_policy_round_trip() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_response(r#"{"responsive": false}"#);
        let policy = LlmAnswerPolicy::new(provider.clone(), "m", Duration::from_secs(5));

        let verdict = policy
            .is_responsive("What OS version?", "tell me a joke")
            .await
            .unwrap();
        assert!(!verdict);
    }

    #[tokio::test]
    async fn llm_policy_surfaces_capability_errors() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error("connection refused");
        let policy = LlmAnswerPolicy::new(provider, "m", Duration::from_secs(5));

        let err = policy
            .is_responsive("What OS version?", "Windows 11")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            tickethive_schema::Error::CapabilityUnavailable(_)
        ));
    }

    #[tokio::test]
    async fn accept_all_accepts() {
        assert!(AcceptAllPolicy
            .is_responsive("anything", "whatever")
            .await
            .unwrap());
    }
}
