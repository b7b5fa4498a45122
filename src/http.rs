//! Shared HTTP client construction for page fetches and provider calls.
//!
//! Page fetches go out with a browser-like User-Agent; some hosts serve a
//! stripped or blocked page to obvious bots.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use rand::seq::IndexedRandom;
use std::time::Duration;

/// Realistic browser User-Agent strings.
const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
];

/// Build the client used for page fetches.
///
/// Timeout comes from the config; redirects are followed (up to 10).
pub fn build_fetch_client(config: &PipelineConfig) -> Result<reqwest::Client, PipelineError> {
    let ua = match config.user_agent {
        Some(ref custom) => custom.clone(),
        None => random_user_agent().to_owned(),
    };

    reqwest::Client::builder()
        .timeout(config.fetch_timeout())
        .user_agent(ua)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))
}

/// Build the client used for search provider calls.
pub fn build_api_client() -> Result<reqwest::Client, PipelineError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| PipelineError::Config(format!("failed to build HTTP client: {e}")))
}

/// Pick one of the bundled desktop browser User-Agent strings.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}
