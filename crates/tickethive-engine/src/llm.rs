//! Bounded LLM calls: every completion gets a time budget and at most one
//! internal retry with backoff for transient failures. A turn that still
//! fails surfaces `CapabilityUnavailable` before any record write happens.

use std::time::Duration;

use tickethive_provider::{CompletionRequest, LlmProvider};
use tickethive_schema::{Error, Result};

const MAX_RETRIES: usize = 1;
const BASE_BACKOFF_MS: u64 = 500;

pub async fn complete_with_retry(
    provider: &dyn LlmProvider,
    request: CompletionRequest,
    timeout: Duration,
) -> Result<String> {
    let mut attempts = 0;
    loop {
        let outcome = tokio::time::timeout(timeout, provider.complete(request.clone())).await;
        let err_text = match outcome {
            Ok(Ok(response)) => return Ok(response.text),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!(
                "completion timed out after {}s [retryable]",
                timeout.as_secs()
            ),
        };

        if err_text.contains("[retryable]") && attempts < MAX_RETRIES {
            attempts += 1;
            let backoff = BASE_BACKOFF_MS * (1 << (attempts - 1));
            tracing::warn!(
                attempts,
                backoff_ms = backoff,
                "transient completion failure, backing off: {err_text}"
            );
            tokio::time::sleep(Duration::from_millis(backoff)).await;
            continue;
        }

        return Err(Error::capability(err_text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickethive_provider::ScriptedProvider;

    fn request() -> CompletionRequest {
        CompletionRequest::simple("test-model", None, "hello")
    }

    #[tokio::test]
    async fn success_passes_through() {
        let provider = ScriptedProvider::new();
        provider.push_response("ok");
        let text = complete_with_retry(&provider, request(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }

    #[tokio::test]
    async fn retryable_failure_retries_once() {
        let provider = ScriptedProvider::new();
        provider.push_error("503 boom [retryable]");
        provider.push_response("recovered");

        let text = complete_with_retry(&provider, request(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(provider.remaining(), 0);
    }

    #[tokio::test]
    async fn second_retryable_failure_surfaces() {
        let provider = ScriptedProvider::new();
        provider.push_error("503 boom [retryable]");
        provider.push_error("503 boom again [retryable]");

        let err = complete_with_retry(&provider, request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityUnavailable(_)));
    }

    #[tokio::test]
    async fn non_retryable_failure_does_not_retry() {
        let provider = ScriptedProvider::new();
        provider.push_error("401 bad key");
        provider.push_response("never reached");

        let err = complete_with_retry(&provider, request(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CapabilityUnavailable(_)));
        assert_eq!(provider.remaining(), 1);
    }
}
