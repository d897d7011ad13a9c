//! Continuity extraction from finished prose.

use std::sync::Arc;

use folio_domain::{ContinuityRecord, DomainError};
use serde::Deserialize;

use crate::infrastructure::ports::{LlmError, LlmPort, LlmRequest};
use crate::infrastructure::structured_output::complete_json;
use crate::prompt_templates::{keys, PromptTemplates};

const ANALYSIS_TEMPERATURE: f32 = 0.2;

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Nothing to analyze: the chapter has no prose")]
    EmptyProse,
    #[error("Analysis call failed: {0}")]
    Llm(#[from] LlmError),
    #[error("Analysis is missing field '{0}'")]
    MissingField(&'static str),
    #[error("Analysis rejected: {0}")]
    Rejected(#[from] DomainError),
}

/// Wire shape of the analysis reply. Every field is optional here so a
/// missing one can be named in the error.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisReply {
    summary: Option<String>,
    key_events: Option<Vec<String>>,
    items: Option<Vec<String>>,
    location: Option<String>,
    characters: Option<Vec<String>>,
}

impl AnalysisReply {
    fn into_record(self) -> Result<ContinuityRecord, ExtractionError> {
        Ok(ContinuityRecord::new(
            self.summary.ok_or(ExtractionError::MissingField("summary"))?,
            self.key_events.ok_or(ExtractionError::MissingField("keyEvents"))?,
            self.items.ok_or(ExtractionError::MissingField("items"))?,
            self.location.ok_or(ExtractionError::MissingField("location"))?,
            self.characters.ok_or(ExtractionError::MissingField("characters"))?,
        )?)
    }
}

/// Turns a chapter's prose into a [`ContinuityRecord`].
///
/// Sees only the chapter it is given. Any malformed or incomplete analysis is
/// an error; a partial record is never produced.
pub struct ContinuityExtractor {
    llm: Arc<dyn LlmPort>,
    templates: Arc<PromptTemplates>,
    model: String,
    language: String,
}

impl ContinuityExtractor {
    pub fn new(
        llm: Arc<dyn LlmPort>,
        templates: Arc<PromptTemplates>,
        model: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            templates,
            model: model.into(),
            language: language.into(),
        }
    }

    pub async fn extract(&self, title: &str, prose: &str) -> Result<ContinuityRecord, ExtractionError> {
        if prose.trim().is_empty() {
            return Err(ExtractionError::EmptyProse);
        }

        let prompt = self.templates.render(
            keys::CONTINUITY_ANALYSIS,
            &[
                ("title", title),
                ("content", prose),
                ("language", &self.language),
            ],
        );
        let request = LlmRequest::prompt(prompt)
            .with_model(&self.model)
            .with_temperature(ANALYSIS_TEMPERATURE);

        let reply: AnalysisReply = complete_json(self.llm.as_ref(), request).await?;
        let record = reply.into_record()?;

        tracing::debug!(
            title,
            location = %record.location,
            items = record.items.len(),
            "Continuity extracted"
        );
        Ok(record)
    }
}
