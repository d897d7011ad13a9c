//! JSON completions on top of [`LlmPort::generate`].
//!
//! Models asked for JSON still wrap it in Markdown fences or add a sentence of
//! preamble now and then; [`parse_json_payload`] tolerates both.

use serde::de::DeserializeOwned;

use crate::infrastructure::ports::{LlmError, LlmPort, LlmRequest};

/// Run `request` in JSON mode and decode the reply into `T`.
pub async fn complete_json<T: DeserializeOwned>(
    llm: &dyn LlmPort,
    request: LlmRequest,
) -> Result<T, LlmError> {
    let response = llm.generate(request.json()).await?;
    parse_json_payload(&response.content)
}

pub fn parse_json_payload<T: DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        return Err(LlmError::InvalidResponse("empty JSON payload".to_string()));
    }

    match serde_json::from_str(cleaned) {
        Ok(value) => Ok(value),
        Err(first_error) => outermost_json(cleaned)
            .and_then(|slice| serde_json::from_str(slice).ok())
            .ok_or_else(|| LlmError::InvalidResponse(first_error.to_string())),
    }
}

fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening fence line.
    let body = match body.split_once('\n') {
        Some((_, rest)) => rest,
        None => body.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// The span from the first `{` or `[` to the last matching closer.
fn outermost_json(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let closer = if text[start..].starts_with('{') { '}' } else { ']' };
    let end = text.rfind(closer)?;
    (end > start).then(|| &text[start..=end])
}
