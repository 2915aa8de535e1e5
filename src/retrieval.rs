//! Retrieval augmentation for outgoing user messages.
//!
//! Retrieval is best effort: an error, a timeout or an empty answer all
//! leave the user's message exactly as typed.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Default budget for one retrieval round trip.
pub const DEFAULT_RETRIEVAL_TIMEOUT: Duration = Duration::from_millis(3_000);

/// Source of supporting text for a query.
#[async_trait::async_trait]
pub trait Retriever: Send + Sync + std::fmt::Debug {
    async fn retrieve(&self, query: &str) -> anyhow::Result<String>;
}

#[derive(Debug, Serialize)]
struct RetrievalRequest<'a> {
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    text: String,
}

/// [`Retriever`] that POSTs `{"query": ...}` and reads `{"text": ...}`.
#[derive(Debug, Clone)]
pub struct HttpRetriever {
    http: reqwest::Client,
    endpoint: url::Url,
}

impl HttpRetriever {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let endpoint = url::Url::parse(endpoint)
            .with_context(|| format!("invalid retrieval endpoint '{endpoint}'"))?;
        Ok(Self {
            http: reqwest::Client::new(),
            endpoint,
        })
    }
}

#[async_trait::async_trait]
impl Retriever for HttpRetriever {
    async fn retrieve(&self, query: &str) -> anyhow::Result<String> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&RetrievalRequest { query })
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<RetrievalResponse>().await?.text)
    }
}

/// Message to send to the model and whether retrieval changed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Augmented {
    pub message: String,
    pub augmented: bool,
}

/// Wrap `query` with retrieved context.
#[must_use]
pub fn compose_augmented_message(query: &str, retrieved: &str) -> String {
    format!("User Question: {query}\n\n---\nContext:\n{retrieved}\n---")
}

/// Optional retriever plus the time it is allowed to take.
#[derive(Debug, Clone)]
pub struct RetrievalAugmenter {
    retriever: Option<Arc<dyn Retriever>>,
    timeout: Duration,
}

impl Default for RetrievalAugmenter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl RetrievalAugmenter {
    #[must_use]
    pub fn new(retriever: Arc<dyn Retriever>, timeout: Duration) -> Self {
        Self {
            retriever: Some(retriever),
            timeout,
        }
    }

    /// Pass-through augmenter.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            retriever: None,
            timeout: DEFAULT_RETRIEVAL_TIMEOUT,
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.retriever.is_some()
    }

    pub async fn augment(&self, query: &str) -> Augmented {
        let unchanged = || Augmented {
            message: query.to_string(),
            augmented: false,
        };
        let Some(retriever) = &self.retriever else {
            return unchanged();
        };

        match tokio::time::timeout(self.timeout, retriever.retrieve(query)).await {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                debug!(retrieved_chars = text.len(), "Augmenting message with retrieved context");
                Augmented {
                    message: compose_augmented_message(query, &text),
                    augmented: true,
                }
            }
            Ok(Ok(_)) => {
                debug!("Retrieval returned no context");
                unchanged()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Retrieval failed, sending message without context");
                unchanged()
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.timeout.as_millis(),
                    "Retrieval timed out, sending message without context"
                );
                unchanged()
            }
        }
    }
}
