//! Helpers for tests that talk to a live Ollama.
//!
//! Such tests are `#[ignore]`d and run with `cargo test -- --ignored` once
//! `OLLAMA_BASE_URL` and `OLLAMA_MODEL` point at a running server.

use crate::infrastructure::ollama::OllamaClient;
use crate::infrastructure::ports::{LlmPort, LlmRequest};

pub fn create_test_ollama_client() -> OllamaClient {
    OllamaClient::from_env()
}

/// True if the server answers a minimal request.
pub async fn ollama_available() -> bool {
    let request = LlmRequest::prompt("Hi")
        .with_temperature(0.0)
        .with_max_tokens(Some(5));
    create_test_ollama_client().generate(request).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::structured_output::complete_json;
    use crate::prompt_templates::{keys, PromptTemplates};
    use crate::use_cases::continuity::ContinuityExtractor;
    use std::sync::Arc;

    #[tokio::test]
    #[ignore = "requires ollama"]
    async fn live_model_returns_json_object() {
        assert!(ollama_available().await, "Ollama is not reachable");
        let client = create_test_ollama_client();

        let value: serde_json::Value = complete_json(
            &client,
            LlmRequest::prompt("Return {\"ok\": true} as JSON.").with_temperature(0.0),
        )
        .await
        .expect("json reply");

        assert!(value.is_object());
    }

    #[tokio::test]
    #[ignore = "requires ollama"]
    async fn live_model_extracts_a_record() {
        assert!(ollama_available().await, "Ollama is not reachable");
        let templates = PromptTemplates::defaults();
        assert!(!templates.get(keys::CONTINUITY_ANALYSIS).is_empty());
        let extractor = ContinuityExtractor::new(
            Arc::new(create_test_ollama_client()),
            Arc::new(templates),
            crate::infrastructure::ollama::DEFAULT_OLLAMA_MODEL,
            "English",
        );

        let record = extractor
            .extract(
                "The Bell",
                "Ines climbed the lighthouse stairs with a brass key in her fist. \
                 At the top she unlocked the lamp room and stood beside the great lens.",
            )
            .await
            .expect("record");

        assert!(!record.location.is_empty());
    }
}
