//! Process configuration read from the environment.
//!
//! `.env.local` and `.env` at the repository root are loaded by the binary
//! before [`AppConfig::from_env`] runs.

use anyhow::Context;

use crate::infrastructure::ollama::{DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL};
use crate::infrastructure::resilient_llm::RetryConfig;
use crate::use_cases::credits::RefundPolicy;

pub const DEFAULT_DATABASE_PATH: &str = "folio.db";
pub const DEFAULT_OUTPUT_LANGUAGE: &str = "Simplified Chinese (简体中文)";
pub const DEFAULT_DRAFT_FLUSH_FRAGMENTS: usize = 24;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_path: String,
    pub ollama_base_url: String,
    /// Model used for chapter prose and bible assistance.
    pub chapter_model: String,
    /// Model used for continuity analysis; usually a smaller, faster one.
    pub analysis_model: String,
    pub output_language: String,
    pub server_host: String,
    pub server_port: u16,
    pub refund_policy: RefundPolicy,
    pub retry: RetryConfig,
    /// Persist the draft every this many streamed fragments.
    pub draft_flush_fragments: usize,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let chapter_model = env_or("OLLAMA_MODEL", DEFAULT_OLLAMA_MODEL);
        let analysis_model = env_opt("FOLIO_ANALYSIS_MODEL").unwrap_or_else(|| chapter_model.clone());

        let server_port = env_opt("SERVER_PORT")
            .or_else(|| env_opt("PORT"))
            .map(|raw| raw.parse::<u16>())
            .transpose()
            .context("SERVER_PORT must be a port number")?
            .unwrap_or(3000);

        let refund_policy = env_opt("FOLIO_REFUND_POLICY")
            .map(|raw| {
                raw.parse::<RefundPolicy>()
                    .map_err(|_| anyhow::anyhow!("unknown FOLIO_REFUND_POLICY '{raw}'"))
            })
            .transpose()?
            .unwrap_or_default();

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            max_retries: parse_env("LLM_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            base_delay_ms: parse_env("LLM_RETRY_BASE_DELAY_MS")?.unwrap_or(defaults.base_delay_ms),
            ..defaults
        };

        let draft_flush_fragments = parse_env::<usize>("FOLIO_DRAFT_FLUSH_FRAGMENTS")?
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_DRAFT_FLUSH_FRAGMENTS);

        Ok(Self {
            database_path: env_or("FOLIO_DATABASE_PATH", DEFAULT_DATABASE_PATH),
            ollama_base_url: env_opt("OLLAMA_BASE_URL")
                .or_else(|| env_opt("OLLAMA_URL"))
                .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string()),
            chapter_model,
            analysis_model,
            output_language: env_or("FOLIO_OUTPUT_LANGUAGE", DEFAULT_OUTPUT_LANGUAGE),
            server_host: env_or("SERVER_HOST", "0.0.0.0"),
            server_port,
            refund_policy,
            retry,
            draft_flush_fragments,
        })
    }
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn parse_env<T>(name: &'static str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_opt(name)
        .map(|raw| raw.parse::<T>())
        .transpose()
        .with_context(|| format!("{name} is not valid"))
}
