//! Folio Engine - Main entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::header::HeaderName;
use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use folio_engine::api;
use folio_engine::app::{App, Repositories};
use folio_engine::infrastructure::{
    clock::SystemClock,
    config::AppConfig,
    ollama::OllamaClient,
    ports::ClockPort,
    resilient_llm::ResilientLlmClient,
    sqlite::SqliteStore,
};
use folio_engine::prompt_templates::PromptTemplates;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment from repo root (the engine is usually run from `crates/engine`).
    load_dotenv_from_repo_root();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "folio_engine=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Folio Engine");

    let config = AppConfig::from_env()?;
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock::new());

    tracing::info!(path = %config.database_path, "Opening SQLite store");
    let store = Arc::new(SqliteStore::new(&config.database_path, clock.clone()).await?);

    let ollama_client = Arc::new(OllamaClient::new(&config.ollama_base_url, &config.chapter_model));
    tracing::info!(
        base_url = %config.ollama_base_url,
        chapter_model = %config.chapter_model,
        analysis_model = %config.analysis_model,
        max_retries = config.retry.max_retries,
        base_delay_ms = config.retry.base_delay_ms,
        "LLM client configured"
    );
    let llm = Arc::new(ResilientLlmClient::new(ollama_client, config.retry.clone()));

    let repositories = Repositories {
        bible: store.clone(),
        chapter: store.clone(),
        credit: store,
    };
    let app = Arc::new(App::new(
        repositories,
        llm,
        clock,
        PromptTemplates::from_env(),
        &config,
    ));

    let mut router = api::routes()
        .with_state(app.clone())
        .layer(TraceLayer::new_for_http());

    if let Some(cors) = build_cors_layer_from_env() {
        router = router.layer(cors);
    }

    // Start server
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drafts still waiting for a write go out before the process exits.
    let report = app
        .pending_writes
        .flush_all(app.repositories.chapter.as_ref())
        .await;
    if report.is_clean() {
        tracing::info!(written = report.written.len(), "Pending drafts flushed");
    } else {
        tracing::warn!(
            written = report.written.len(),
            failed = report.failed,
            "Some drafts could not be flushed on shutdown"
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

fn load_dotenv_from_repo_root() {
    let repo_root = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..");

    // Prefer local overrides.
    for filename in [".env.local", ".env"] {
        let path = repo_root.join(filename);
        if path.exists() {
            let _ = dotenvy::from_path(path);
        }
    }
}

fn build_cors_layer_from_env() -> Option<CorsLayer> {
    let allowed_origins = std::env::var("CORS_ALLOWED_ORIGINS")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())?;

    let mut cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        // Clients send X-User-Id and JSON content types, which trigger preflights.
        .allow_headers([
            HeaderName::from_static("x-user-id"),
            axum::http::header::CONTENT_TYPE,
        ]);

    if allowed_origins == "*" {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .filter_map(|s| HeaderValue::from_str(s).ok())
            .collect();

        if origins.is_empty() {
            return None;
        }

        cors = cors.allow_origin(origins);
    }

    Some(cors)
}
