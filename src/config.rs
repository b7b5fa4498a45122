//! Pipeline configuration with sensible defaults.
//!
//! [`PipelineConfig`] controls the search provider endpoint, fetch behaviour,
//! concurrency, and bundle limits. It can be loaded from a YAML file; any
//! field left out of the file keeps its default.

use crate::error::PipelineError;
use crate::extractor::TextOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, instrument};

/// Settings for the optional URL-keyed extraction cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Maximum number of cached pages.
    pub capacity: u64,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 256,
            ttl_secs: 600,
        }
    }
}

/// Configuration for one routing + formatting run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Base URL of the Serper API.
    pub serper_base_url: String,
    /// Country code sent as `gl` with every search.
    pub locale: String,
    /// `num` sent with image searches.
    pub image_results_per_query: u32,
    /// Per-page fetch timeout in seconds.
    pub fetch_timeout_secs: u64,
    /// Fixed User-Agent for page fetches. `None` picks a browser UA at random.
    pub user_agent: Option<String>,
    /// Serialized bundle size above which a warning is logged.
    pub max_content_length: usize,
    /// Keywords dispatched to the provider at once.
    pub keyword_concurrency: usize,
    /// Pages fetched at once during enrichment.
    pub enrichment_concurrency: usize,
    /// Upper bound on the whole formatting run. `None` means unbounded.
    pub enrichment_deadline_secs: Option<u64>,
    /// Where the router persists raw results. `None` disables persistence.
    pub raw_results_path: Option<PathBuf>,
    pub cache: CacheConfig,
    /// Text cleaning applied to every extracted string.
    pub text: TextOptions,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            serper_base_url: "https://google.serper.dev".to_string(),
            locale: "in".to_string(),
            image_results_per_query: 10,
            fetch_timeout_secs: 10,
            user_agent: None,
            max_content_length: 2000,
            keyword_concurrency: 4,
            enrichment_concurrency: 8,
            enrichment_deadline_secs: None,
            raw_results_path: Some(PathBuf::from("keywords_result_dict.json")),
            cache: CacheConfig::default(),
            text: TextOptions::default(),
        }
    }
}

impl PipelineConfig {
    /// Load a YAML config file and validate it.
    #[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| PipelineError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: PipelineConfig = serde_yaml::from_str(&raw)
            .map_err(|e| PipelineError::Config(format!("invalid YAML in {}: {e}", path.display())))?;
        config.validate()?;
        info!("Loaded pipeline configuration");
        Ok(config)
    }

    /// Validates this configuration, returning an error if any field is invalid.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.fetch_timeout_secs == 0 {
            return Err(PipelineError::Config(
                "fetch_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.keyword_concurrency == 0 || self.enrichment_concurrency == 0 {
            return Err(PipelineError::Config(
                "concurrency limits must be greater than 0".into(),
            ));
        }
        if self.locale.trim().is_empty() {
            return Err(PipelineError::Config("locale must not be empty".into()));
        }
        if !self.serper_base_url.starts_with("http://") && !self.serper_base_url.starts_with("https://") {
            return Err(PipelineError::Config(
                "serper_base_url must be an http(s) URL".into(),
            ));
        }
        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(PipelineError::Config(
                "cache capacity must be greater than 0 when caching is enabled".into(),
            ));
        }
        Ok(())
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn enrichment_deadline(&self) -> Option<Duration> {
        self.enrichment_deadline_secs.map(Duration::from_secs)
    }
}
