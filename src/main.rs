//! Field Service Business Assistant server
//!
//! Entry point: loads configuration, connects the business backend and the
//! model provider, installs the first snapshot and serves the HTTP API.

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::map_err_ignore)]
#![allow(clippy::manual_let_else)]

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context as _;
use dotenvy::dotenv;
use tracing::{info, warn};

use fieldservice_assistant::assistant::AssistantBuilder;
use fieldservice_assistant::config::{AppConfig, load_llm_settings};
use fieldservice_assistant::llm::ChatCompletionsConnector;
use fieldservice_assistant::server::start_server;
use fieldservice_assistant::telemetry;
use fieldservice_assistant::tools::{DomainService, InMemoryDomainService, RestDomainService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    let config = match AppConfig::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    // Initialize tracing (M-LOG-STRUCTURED)
    telemetry::init(config.logging.json);

    // Load LLM settings
    let mut settings = match load_llm_settings() {
        Ok(s) => s,
        Err(msg) => {
            eprintln!("Configuration error: {msg}");
            std::process::exit(1);
        }
    };
    if settings.temperature.is_none() {
        settings.temperature = config.llm.temperature;
    }

    info!(
        name: "llm.config.loaded",
        base_url = %settings.base_url,
        model = %settings.model,
        provider = ?settings.provider,
        "LLM configuration loaded"
    );

    let domain = build_domain_service(&config)?;
    let connector = Arc::new(ChatCompletionsConnector::new(settings));

    let assistant = Arc::new(AssistantBuilder::from_config(&config, connector, domain)?.build());

    // The server still starts when the backend is down; chat answers
    // `not_initialized` until a refresh succeeds.
    match assistant.refresh_from_domain().await {
        Ok(snapshot) => info!(
            snapshot_version = snapshot.version,
            jobs = snapshot.jobs.len(),
            invoices = snapshot.invoices.len(),
            "Initial business snapshot loaded"
        ),
        Err(e) => warn!(error = %format!("{e:#}"), "Initial snapshot load failed"),
    }

    start_server(config, assistant).await
}

fn build_domain_service(config: &AppConfig) -> anyhow::Result<Arc<dyn DomainService>> {
    if let Some(base_url) = config.backend.base_url.as_deref() {
        let token = std::env::var("BACKEND_API_TOKEN")
            .ok()
            .filter(|t| !t.trim().is_empty());
        let service = RestDomainService::new(base_url, token)
            .with_context(|| format!("invalid backend.base_url '{base_url}'"))?;
        info!(base_url = %base_url, "Using REST business backend");
        return Ok(Arc::new(service));
    }

    match config.backend.seed_file.as_deref() {
        Some(path) => {
            info!(seed_file = %path, "Using in-memory business backend");
            Ok(Arc::new(InMemoryDomainService::from_file(path)?))
        }
        None => {
            warn!("No business backend configured; starting with an empty in-memory backend");
            Ok(Arc::new(InMemoryDomainService::default()))
        }
    }
}
