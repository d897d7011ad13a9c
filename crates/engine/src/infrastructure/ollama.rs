//! Ollama LLM client (OpenAI-compatible API)
//!
//! Speaks `/v1/chat/completions`, so any OpenAI-compatible server works. Streaming
//! uses server-sent events (`data: {...}` lines terminated by `data: [DONE]`).

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::infrastructure::ports::{
    FinishReason, LlmError, LlmPort, LlmRequest, LlmResponse, MessageRole, TextStream, TokenUsage,
};

/// Default Ollama base URL.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Default model for Ollama.
pub const DEFAULT_OLLAMA_MODEL: &str = "qwen2.5:14b";

/// Client for Ollama's OpenAI-compatible API
#[derive(Clone)]
pub struct OllamaClient {
    client: Client,
    /// No overall timeout: a long chapter can stream for several minutes.
    stream_client: Client,
    base_url: String,
    model: String,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str) -> Self {
        Self::with_timeout(base_url, model, 120)
    }

    pub fn with_timeout(base_url: &str, model: &str, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_else(|_| Client::new());
        let stream_client = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            client,
            stream_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        }
    }

    /// Create client from environment variables.
    ///
    /// Uses `OLLAMA_BASE_URL` and `OLLAMA_MODEL` environment variables,
    /// falling back to defaults if not set.
    pub fn from_env() -> Self {
        let base_url = std::env::var("OLLAMA_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_OLLAMA_BASE_URL.to_string());
        let model =
            std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| DEFAULT_OLLAMA_MODEL.to_string());
        Self::new(&base_url, &model)
    }

    fn chat_request(&self, request: &LlmRequest, stream: bool) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: request.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: build_messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
            response_format: request.json_mode.then(|| ResponseFormat {
                r#type: "json_object".to_string(),
            }),
        }
    }

    async fn post(
        &self,
        client: &Client,
        body: &OpenAIChatRequest,
    ) -> Result<reqwest::Response, LlmError> {
        let response = client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .map_err(|e| LlmError::RequestFailed(e.to_string()))?;
            return Err(LlmError::RequestFailed(format!(
                "{}: {}",
                status.as_u16(),
                error_text
            )));
        }
        Ok(response)
    }
}

impl Default for OllamaClient {
    fn default() -> Self {
        Self::new(DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL)
    }
}

#[async_trait]
impl LlmPort for OllamaClient {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = self.chat_request(&request, false);
        let response = self.post(&self.client, &body).await?;

        let api_response: OpenAIChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        convert_response(api_response)
    }

    async fn generate_stream(&self, request: LlmRequest) -> Result<TextStream, LlmError> {
        let body = self.chat_request(&request, true);
        let response = self.post(&self.stream_client, &body).await?;
        tracing::debug!(model = %body.model, "LLM stream opened");
        Ok(Box::pin(decode_sse(response.bytes_stream())))
    }
}

fn decode_sse<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, LlmError>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<Result<String, LlmError>>,
        exhausted: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        exhausted: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.exhausted || state.decoder.is_done() {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => state.pending.extend(state.decoder.feed(chunk.as_ref())),
                Some(Err(e)) => {
                    state.exhausted = true;
                    state
                        .pending
                        .push_back(Err(LlmError::StreamInterrupted(e.to_string())));
                }
                None => {
                    state.exhausted = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
}

/// Incremental decoder for OpenAI-style SSE chat chunks.
///
/// Bytes are buffered until a full line arrives, so multi-byte characters split
/// across network chunks decode correctly.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    pub(crate) fn feed(&mut self, bytes: &[u8]) -> Vec<Result<String, LlmError>> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            if let Some(item) = self.decode_line(&line) {
                out.push(item);
            }
            if self.done {
                self.buffer.clear();
                break;
            }
        }
        out
    }

    /// Flush a final unterminated line. A stream that ends without `[DONE]` and
    /// without a finish reason is reported as interrupted.
    pub(crate) fn finish(&mut self) -> Vec<Result<String, LlmError>> {
        let mut out = Vec::new();
        if !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            if let Some(item) = self.decode_line(&line) {
                out.push(item);
            }
        }
        if !self.done {
            out.push(Err(LlmError::StreamInterrupted(
                "stream ended before completion".to_string(),
            )));
            self.done = true;
        }
        out
    }

    fn decode_line(&mut self, raw: &[u8]) -> Option<Result<String, LlmError>> {
        let line = match std::str::from_utf8(raw) {
            Ok(line) => line.trim(),
            Err(e) => return Some(Err(LlmError::InvalidResponse(e.to_string()))),
        };
        if line.is_empty() || line.starts_with(':') {
            return None;
        }
        let payload = line.strip_prefix("data:")?.trim();
        if payload == "[DONE]" {
            self.done = true;
            return None;
        }

        let chunk: OpenAIStreamChunk = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => return Some(Err(LlmError::InvalidResponse(e.to_string()))),
        };
        let choice = chunk.choices.into_iter().next()?;
        if choice.finish_reason.is_some() {
            self.done = true;
        }
        choice
            .delta
            .content
            .filter(|text| !text.is_empty())
            .map(Ok)
    }
}

fn build_messages(request: &LlmRequest) -> Vec<OpenAIMessage> {
    let mut messages = Vec::new();

    if let Some(system) = &request.system_prompt {
        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: Some(system.clone()),
        });
    }

    for msg in &request.messages {
        messages.push(OpenAIMessage {
            role: match msg.role {
                MessageRole::User => "user",
                MessageRole::Assistant => "assistant",
                MessageRole::System => "system",
            }
            .to_string(),
            content: Some(msg.content.clone()),
        });
    }

    messages
}

fn convert_response(response: OpenAIChatResponse) -> Result<LlmResponse, LlmError> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::InvalidResponse("No choices in LLM response".to_string()))?;

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        finish_reason: FinishReason::from_wire(choice.finish_reason.as_deref()),
        usage: response.usage.map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        }),
    })
}

// =============================================================================
// OpenAI API types
// =============================================================================

#[derive(Debug, Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: OpenAIDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}
