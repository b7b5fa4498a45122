//! Search provider access.
//!
//! [`SearchGateway`] is the seam between the router and the remote search
//! API. [`SerperGateway`] is the production implementation; tests plug in
//! their own.
//!
//! A gateway makes exactly one outbound call per invocation. It does not
//! retry, cache, or look at the HTTP status: the body goes back to the
//! caller as text, and decoding is the router's business.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::http::build_api_client;
use serde_json::json;
use std::future::Future;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// A remote web/image search provider.
pub trait SearchGateway: Send + Sync {
    /// Run a web search and return the provider's raw response body.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Transport`] if the request cannot be sent or
    /// the body cannot be read.
    fn search(&self, keyword: &str) -> impl Future<Output = Result<String, PipelineError>> + Send;

    /// Run an image search and return the provider's raw response body.
    fn image_search(
        &self,
        keywords: &str,
    ) -> impl Future<Output = Result<String, PipelineError>> + Send;
}

/// [`SearchGateway`] backed by the Serper Google Search API.
#[derive(Clone)]
pub struct SerperGateway {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    locale: String,
    image_results: u32,
}

impl std::fmt::Debug for SerperGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerperGateway")
            .field("base_url", &self.base_url)
            .field("locale", &self.locale)
            .field("image_results", &self.image_results)
            .finish_non_exhaustive()
    }
}

impl SerperGateway {
    /// Create a gateway for the Serper API.
    ///
    /// # Arguments
    ///
    /// * `api_key` - Sent as `X-API-KEY` on every request
    /// * `config` - Supplies the base URL, `gl` locale, and image count
    ///
    /// # Errors
    ///
    /// [`PipelineError::Config`] if the HTTP client cannot be built.
    pub fn new(api_key: impl Into<String>, config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_api_client()?,
            api_key: api_key.into(),
            base_url: config.serper_base_url.trim_end_matches('/').to_string(),
            locale: config.locale.clone(),
            image_results: config.image_results_per_query,
        })
    }

    async fn post(&self, endpoint: &str, body: serde_json::Value) -> Result<String, PipelineError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let t0 = Instant::now();

        let response = self
            .client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                warn!(%url, error = %e, "Search request failed");
                PipelineError::Transport(format!("{url}: {e}"))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PipelineError::Transport(format!("{url}: reading body: {e}")))?;

        debug!(
            %url,
            %status,
            bytes = text.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Search provider responded"
        );
        Ok(text)
    }
}

impl SearchGateway for SerperGateway {
    #[instrument(level = "info", skip(self))]
    async fn search(&self, keyword: &str) -> Result<String, PipelineError> {
        self.post("/search", json!({ "q": keyword, "gl": self.locale }))
            .await
    }

    #[instrument(level = "info", skip(self))]
    async fn image_search(&self, keywords: &str) -> Result<String, PipelineError> {
        self.post(
            "/images",
            json!({
                "q": keywords,
                "gl": self.locale,
                "type": "images",
                "engine": "google",
                "num": self.image_results,
            }),
        )
        .await
    }
}
