//! Differences between OpenAI-compatible vendors: endpoint layout and auth.

/// Supported LLM providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    /// `OpenAI` (api.openai.com)
    OpenAI,
    /// Azure `OpenAI` Service
    AzureOpenAI {
        /// Deployment name; the model id is not part of Azure URLs.
        deployment_name: String,
        api_version: String,
    },
    /// `OpenRouter` (openrouter.ai)
    OpenRouter,
    /// Groq (groq.com)
    Groq,
    /// Local Ollama server (port 11434)
    Ollama,
    /// Generic OpenAI-compatible provider
    Generic,
}

const AZURE_API_VERSION: &str = "2024-08-01-preview";

impl Provider {
    /// Detect provider from base URL.
    ///
    /// Azure deployments default to the model name; use [`Provider::azure`]
    /// when they differ.
    #[must_use]
    pub fn detect_from_url(base_url: &str, model: &str) -> Self {
        let lower = base_url.to_lowercase();

        if lower.contains("openai.azure.com") {
            Self::azure(model)
        } else if lower.contains("openrouter.ai") {
            Self::OpenRouter
        } else if lower.contains("groq.com") {
            Self::Groq
        } else if lower.contains(":11434") {
            Self::Ollama
        } else if lower.contains("openai.com") {
            Self::OpenAI
        } else {
            Self::Generic
        }
    }

    #[must_use]
    pub fn azure(deployment_name: impl Into<String>) -> Self {
        Self::AzureOpenAI {
            deployment_name: deployment_name.into(),
            api_version: AZURE_API_VERSION.to_string(),
        }
    }

    /// Build the chat completions URL for this provider.
    ///
    /// Groq and `OpenRouter` publish their OpenAI-compatible API under a
    /// path prefix, so a bare host gets the prefix added.
    #[must_use]
    pub fn build_chat_url(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');

        match self {
            Self::AzureOpenAI {
                deployment_name,
                api_version,
            } => format!(
                "{base}/openai/deployments/{deployment_name}/chat/completions?api-version={api_version}"
            ),
            Self::Groq if !base.ends_with("/openai") => {
                format!("{base}/openai/v1/chat/completions")
            }
            Self::OpenRouter if !base.ends_with("/api") => {
                format!("{base}/api/v1/chat/completions")
            }
            _ => format!("{base}/v1/chat/completions"),
        }
    }

    /// Attach credentials the way the provider expects them.
    #[must_use]
    pub fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        api_key: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match (self, api_key) {
            (_, None) => request,
            (Self::AzureOpenAI { .. }, Some(key)) => request.header("api-key", key),
            (_, Some(key)) => request.bearer_auth(key),
        }
    }

    /// Whether requests should name the model in the body.
    #[must_use]
    pub fn sends_model_in_body(&self) -> bool {
        !matches!(self, Self::AzureOpenAI { .. })
    }
}
