//! Keyword routing: fan categorized keywords out to the search provider.
//!
//! Each (category, keyword) pair is one unit of work. Units run through a
//! bounded stream, and their outcomes are merged into the result map in
//! dispatch order once the stream completes. A unit that fails at the
//! gateway or returns undecodable JSON is logged and left out; the batch
//! always completes.

use crate::error::PipelineError;
use crate::gateway::SearchGateway;
use crate::models::{CategorizedKeywords, CategoryKey, KeywordCategory, RawApiResult, RawResultsByCategory};
use crate::outputs::json::write_raw_results;
use crate::utils::truncate_for_log;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use tracing::{debug, error, info, instrument, warn};

/// Routes keywords to a [`SearchGateway`] and collects the decoded payloads.
#[derive(Debug)]
pub struct ResultRouter<G> {
    gateway: G,
    concurrency: usize,
    artifact_path: Option<PathBuf>,
}

impl<G: SearchGateway> ResultRouter<G> {
    /// Create a router over `gateway` with a concurrency of 4 and no
    /// artifact persistence.
    pub fn new(gateway: G) -> Self {
        Self {
            gateway,
            concurrency: 4,
            artifact_path: None,
        }
    }

    /// Number of keywords dispatched at once. Clamped to at least 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Persist each routed map to `path` as a JSON artifact.
    pub fn with_artifact_path(mut self, path: Option<PathBuf>) -> Self {
        self.artifact_path = path;
        self
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    /// Dispatch every keyword and collect the decoded responses by category.
    ///
    /// The `api_needed` control key, unrecognized categories, and blank
    /// keywords never reach the gateway. Persistence, when configured, is
    /// best-effort: a failed write is logged and the in-memory result is
    /// returned regardless.
    #[instrument(level = "info", skip_all, fields(buckets = keywords.buckets.len()))]
    pub async fn route(&self, keywords: &CategorizedKeywords) -> RawResultsByCategory {
        let mut units: Vec<(KeywordCategory, &str)> = Vec::new();
        for (key, bucket) in &keywords.buckets {
            let category = match key {
                CategoryKey::Known(category) => *category,
                CategoryKey::Control => {
                    debug!("Ignoring control key");
                    continue;
                }
                CategoryKey::Unrecognized(name) => {
                    warn!(category = %name, keywords = bucket.len(), "Unknown category; skipping");
                    continue;
                }
            };
            for keyword in bucket {
                if keyword.trim().is_empty() {
                    warn!(category = category.wire_key(), "Blank keyword; skipping");
                    continue;
                }
                units.push((category, keyword.as_str()));
            }
        }

        let total = units.len();
        info!(total, concurrency = self.concurrency, "Dispatching keywords");

        let outcomes: Vec<Option<RawApiResult>> = stream::iter(units)
            .map(|(category, keyword)| async move {
                match self.dispatch(category, keyword).await {
                    Ok(result) => Some(result),
                    Err(e) => {
                        warn!(%keyword, category = category.wire_key(), error = %e, "Keyword dropped");
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut results = RawResultsByCategory::new();
        for result in outcomes.into_iter().flatten() {
            results.push(result);
        }
        info!(total, routed = results.len(), failed = total - results.len(), "Routing complete");

        if let Some(path) = &self.artifact_path {
            if let Err(e) = write_raw_results(&results, path).await {
                error!(path = %path.display(), error = %e, "Failed to persist raw results");
            }
        }

        results
    }

    async fn dispatch(
        &self,
        category: KeywordCategory,
        keyword: &str,
    ) -> Result<RawApiResult, PipelineError> {
        let body = match category {
            KeywordCategory::TextSearch => self.gateway.search(keyword).await?,
            KeywordCategory::ImageSearch => self.gateway.image_search(keyword).await?,
        };

        let payload = serde_json::from_str(&body).map_err(|source| {
            debug!(%keyword, body = %truncate_for_log(&body, 300), "Undecodable provider body");
            PipelineError::Decode {
                keyword: keyword.to_string(),
                source,
            }
        })?;

        Ok(RawApiResult {
            keyword: keyword.to_string(),
            category,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outputs::json::read_raw_results;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every call and answers from a fixed table.
    #[derive(Default)]
    struct StubGateway {
        calls: Mutex<Vec<(String, String)>>,
    }

    impl StubGateway {
        fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(keyword: &str) -> Result<String, PipelineError> {
            match keyword {
                "broken" => Ok("{\"organic\": [".to_string()),
                "offline" => Err(PipelineError::Transport("connection refused".into())),
                other => Ok(json!({ "searchParameters": { "q": other }, "organic": [] }).to_string()),
            }
        }
    }

    impl SearchGateway for StubGateway {
        async fn search(&self, keyword: &str) -> Result<String, PipelineError> {
            self.calls
                .lock()
                .unwrap()
                .push(("search".to_string(), keyword.to_string()));
            Self::answer(keyword)
        }

        async fn image_search(&self, keywords: &str) -> Result<String, PipelineError> {
            self.calls
                .lock()
                .unwrap()
                .push(("images".to_string(), keywords.to_string()));
            Self::answer(keywords)
        }
    }

    fn keywords(value: serde_json::Value) -> CategorizedKeywords {
        CategorizedKeywords::from_value(&value).unwrap()
    }

    #[tokio::test]
    async fn test_api_needed_never_forwarded() {
        let router = ResultRouter::new(StubGateway::default());
        let input = CategorizedKeywords::new()
            .with(CategoryKey::Control, &["api_needed", "yes"])
            .with(
                CategoryKey::Known(KeywordCategory::TextSearch),
                &["history of Varanasi"],
            );

        let results = router.route(&input).await;

        let calls = router.gateway().calls();
        assert_eq!(calls, vec![("search".to_string(), "history of Varanasi".to_string())]);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_categories_go_to_matching_endpoint() {
        let router = ResultRouter::new(StubGateway::default());
        let results = router
            .route(&keywords(json!({
                "text_api": ["varanasi ghats history"],
                "image_api": ["varanasi ghats"],
            })))
            .await;

        let mut calls = router.gateway().calls();
        calls.sort();
        assert_eq!(
            calls,
            vec![
                ("images".to_string(), "varanasi ghats".to_string()),
                ("search".to_string(), "varanasi ghats history".to_string()),
            ]
        );
        assert_eq!(results.get(KeywordCategory::TextSearch).len(), 1);
        assert_eq!(results.get(KeywordCategory::ImageSearch).len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_json_drops_only_that_keyword() {
        let router = ResultRouter::new(StubGateway::default()).with_concurrency(2);
        let results = router
            .route(&keywords(json!({ "text_api": ["first", "broken", "offline", "last"] })))
            .await;

        let routed: Vec<&str> = results
            .get(KeywordCategory::TextSearch)
            .iter()
            .map(|r| r.keyword.as_str())
            .collect();
        assert_eq!(routed, vec!["first", "last"]);
    }

    #[tokio::test]
    async fn test_unknown_category_and_blank_keywords_skipped() {
        let router = ResultRouter::new(StubGateway::default());
        let results = router
            .route(&keywords(json!({
                "video_api": ["cats"],
                "text_api": ["  ", "real"],
            })))
            .await;

        assert_eq!(router.gateway().calls().len(), 1);
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_results_keep_dispatch_order() {
        let router = ResultRouter::new(StubGateway::default()).with_concurrency(8);
        let input: Vec<String> = (0..20).map(|i| format!("kw{i}")).collect();
        let results = router
            .route(&keywords(json!({ "text_api": input.clone() })))
            .await;

        let routed: Vec<String> = results.iter().map(|r| r.keyword.clone()).collect();
        assert_eq!(routed, input);
    }

    #[tokio::test]
    async fn test_route_persists_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.json");
        let router = ResultRouter::new(StubGateway::default()).with_artifact_path(Some(path.clone()));

        let results = router.route(&keywords(json!({ "text_api": ["varanasi"] }))).await;

        let replayed = read_raw_results(&path).await.unwrap();
        assert_eq!(replayed, results);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be written as a file
        let router = ResultRouter::new(StubGateway::default())
            .with_artifact_path(Some(dir.path().to_path_buf()));

        let results = router.route(&keywords(json!({ "text_api": ["varanasi"] }))).await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_mapping_makes_no_calls() {
        let router = ResultRouter::new(StubGateway::default());
        let results = router.route(&CategorizedKeywords::new()).await;
        assert!(results.is_empty());
        assert!(router.gateway().calls().is_empty());
    }
}
