use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::llm::{LlmSettings, Provider};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE")]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    /// Enable the chat request budget
    #[arg(long, env = "RATE_LIMIT_ENABLED")]
    pub rate_limit_enabled: Option<bool>,

    /// Chat messages admitted per minute
    #[arg(long)]
    pub requests_per_minute: Option<u32>,

    /// Disable timeout middleware
    #[arg(long, env = "TIMEOUT_DISABLED")]
    pub timeout_disabled: Option<bool>,

    /// Seed the in-memory backend from a snapshot JSON file
    #[arg(long)]
    pub seed_file: Option<String>,

    /// Emit JSON logs
    #[arg(long, env = "LOG_JSON")]
    pub json_logs: Option<bool>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub assistant: AssistantConfig,
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub timeout_disabled: bool,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    pub summary_sample_size: usize,
    pub max_tool_rounds: usize,
    pub tool_timeout_secs: u64,
    /// Replaces the built-in domain knowledge text.
    #[serde(default)]
    pub knowledge_file: Option<String>,
    /// Restricts the tool set; all tools when absent.
    #[serde(default)]
    pub enabled_tools: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// Retrieval service URL; augmentation is off when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_retrieval_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: default_retrieval_timeout_ms(),
        }
    }
}

fn default_retrieval_timeout_ms() -> u64 {
    3_000
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    /// Business REST API; an in-memory backend is used when absent.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Snapshot JSON used to seed the in-memory backend.
    #[serde(default)]
    pub seed_file: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    pub fn load_from_args<I, T>(args: I) -> Result<Self, config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;

        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.timeout_disabled", false)?
            .set_default("server.request_timeout_secs", 180)?
            .set_default("assistant.summary_sample_size", 10)?
            .set_default("assistant.max_tool_rounds", 5)?
            .set_default("assistant.tool_timeout_secs", 30)?
            .set_default("rate_limit.enabled", true)?
            .set_default("rate_limit.requests_per_minute", 15)?
            .set_default("retrieval.timeout_ms", default_retrieval_timeout_ms())?
            .set_default("llm.timeout_secs", 60)?
            .set_default("logging.json", false)?;

        // An explicit file must exist; ./config.{yaml,toml,json} is optional.
        builder = match &cli.config {
            Some(path) => builder.add_source(File::with_name(path).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        // FSA_RATE_LIMIT__REQUESTS_PER_MINUTE=30
        builder = builder.add_source(
            Environment::with_prefix("FSA")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("assistant.enabled_tools")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(enabled) = cli.rate_limit_enabled {
            builder = builder.set_override("rate_limit.enabled", enabled)?;
        }
        if let Some(rpm) = cli.requests_per_minute {
            builder = builder.set_override("rate_limit.requests_per_minute", rpm)?;
        }
        if let Some(disabled) = cli.timeout_disabled {
            builder = builder.set_override("server.timeout_disabled", disabled)?;
        }
        if let Some(seed) = cli.seed_file {
            builder = builder.set_override("backend.seed_file", seed)?;
        }
        if let Some(json) = cli.json_logs {
            builder = builder.set_override("logging.json", json)?;
        }

        builder.build()?.try_deserialize()
    }

    #[must_use]
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs.max(1))
    }

    #[must_use]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.assistant.tool_timeout_secs.max(1))
    }

    #[must_use]
    pub fn retrieval_timeout(&self) -> Duration {
        Duration::from_millis(self.retrieval.timeout_ms)
    }

    #[must_use]
    pub fn knowledge_path(&self) -> Option<PathBuf> {
        self.assistant.knowledge_file.as_ref().map(PathBuf::from)
    }
}

pub fn load_llm_settings() -> Result<LlmSettings, String> {
    let base_url = std::env::var("LLM_BASE_URL")
        .map_err(|_| "Missing required env var: LLM_BASE_URL".to_string())?;
    if base_url.trim().is_empty() {
        return Err("LLM_BASE_URL cannot be empty".to_string());
    }

    let model = std::env::var("LLM_MODEL")
        .map_err(|_| "Missing required env var: LLM_MODEL".to_string())?;
    if model.trim().is_empty() {
        return Err("LLM_MODEL cannot be empty".to_string());
    }

    let api_key = std::env::var("LLM_API_KEY")
        .ok()
        .filter(|s| !s.trim().is_empty());

    let mut provider = Provider::detect_from_url(&base_url, &model);
    if let Provider::AzureOpenAI {
        deployment_name,
        api_version,
    } = &mut provider
    {
        if let Ok(deployment) = std::env::var("AZURE_DEPLOYMENT_NAME") {
            *deployment_name = deployment;
        }
        if let Ok(version) = std::env::var("AZURE_API_VERSION") {
            *api_version = version;
        }
    }

    let temperature = match std::env::var("LLM_TEMPERATURE") {
        Ok(raw) => Some(
            raw.trim()
                .parse::<f32>()
                .map_err(|_| format!("LLM_TEMPERATURE must be a number, got '{raw}'"))?,
        ),
        Err(_) => None,
    };

    Ok(LlmSettings {
        base_url,
        api_key,
        model,
        provider,
        temperature,
    })
}
