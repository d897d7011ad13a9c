//! Scripted stand-in for [`LlmPort`].

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::infrastructure::ports::{
    FinishReason, LlmError, LlmPort, LlmRequest, LlmResponse, TextStream,
};

enum StreamScript {
    Refused(LlmError),
    Fragments {
        items: Vec<Result<String, LlmError>>,
        stall: bool,
    },
}

/// Replays replies in the order they were scripted and records every request.
///
/// An exhausted script answers with `InvalidResponse`, which keeps an
/// unexpected extra call visible in the test that made it.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, content: impl Into<String>) -> Self {
        self.replies.lock().expect("replies").push_back(Ok(content.into()));
        self
    }

    pub fn reply_err(self, error: LlmError) -> Self {
        self.replies.lock().expect("replies").push_back(Err(error));
        self
    }

    /// A stream that yields `fragments` and ends cleanly.
    pub fn stream(self, fragments: &[&str]) -> Self {
        let items = fragments.iter().map(|f| Ok(f.to_string())).collect();
        self.push_stream(StreamScript::Fragments { items, stall: false })
    }

    /// A stream that yields `fragments` and then breaks with `error`.
    pub fn stream_then_fail(self, fragments: &[&str], error: LlmError) -> Self {
        let mut items: Vec<_> = fragments.iter().map(|f| Ok(f.to_string())).collect();
        items.push(Err(error));
        self.push_stream(StreamScript::Fragments { items, stall: false })
    }

    /// A stream that yields `fragments` and then never produces another item.
    pub fn stream_then_stall(self, fragments: &[&str]) -> Self {
        let items = fragments.iter().map(|f| Ok(f.to_string())).collect();
        self.push_stream(StreamScript::Fragments { items, stall: true })
    }

    /// The stream cannot be established at all.
    pub fn stream_refused(self, error: LlmError) -> Self {
        self.push_stream(StreamScript::Refused(error))
    }

    fn push_stream(self, script: StreamScript) -> Self {
        self.streams.lock().expect("streams").push_back(script);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().expect("requests").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests").len()
    }

    /// Concatenated user-message content of the `index`-th request.
    pub fn prompt_of(&self, index: usize) -> String {
        self.requests()
            .get(index)
            .map(|request| {
                request
                    .messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default()
    }

    fn record(&self, request: LlmRequest) {
        self.requests.lock().expect("requests").push(request);
    }
}

#[async_trait]
impl LlmPort for ScriptedLlm {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        self.record(request);
        let next = self.replies.lock().expect("replies").pop_front();
        let content = next.unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted reply".into())))?;
        Ok(LlmResponse {
            content,
            finish_reason: FinishReason::Stop,
            usage: None,
        })
    }

    async fn generate_stream(&self, request: LlmRequest) -> Result<TextStream, LlmError> {
        self.record(request);
        let next = self.streams.lock().expect("streams").pop_front();
        match next {
            None => Err(LlmError::InvalidResponse("no scripted stream".into())),
            Some(StreamScript::Refused(error)) => Err(error),
            Some(StreamScript::Fragments { items, stall: false }) => Ok(stream::iter(items).boxed()),
            Some(StreamScript::Fragments { items, stall: true }) => {
                Ok(stream::iter(items).chain(stream::pending()).boxed())
            }
        }
    }
}
