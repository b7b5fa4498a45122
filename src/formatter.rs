//! Bundle formatting: enrich, truncate, rank, and measure routed results.
//!
//! [`ResultFormatter::format`] walks every routed payload, turns organic
//! hits, image cards, and related questions into bundle entries, fetches
//! each organic link through a [`ContentExtractor`], and sorts the organic
//! list by `(position, quality)`.
//!
//! # Failure containment
//!
//! | Failure | Effect |
//! |---------|--------|
//! | payload is not an object | payload skipped |
//! | one list has the wrong type | that list skipped, sibling lists kept |
//! | one list item has the wrong shape | item skipped |
//! | organic link missing or not absolute http(s) | item dropped |
//! | page fetch fails, is not HTML, or misses the deadline | entry kept, empty content |
//! | anything else, including a panic | bundle is only an error marker |

use crate::error::PipelineError;
use crate::extractor::ContentExtractor;
use crate::models::{
    BundleMetadata, ContentBlock, ExtractedContent, FormattedBundle, FormattedResults,
    ImageItem, ImageResultEntry, OrganicItem, OrganicResultEntry, PayloadView, QuestionItem,
    QuestionSource, RawResultsByCategory, RelatedQuestionEntry, SourceQuality, UNRANKED_POSITION,
};
use crate::utils::{assess_source_quality, domain_of, is_absolute_http, truncate_text};
use chrono::Local;
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

pub const MAX_TITLE_CHARS: usize = 120;
pub const MAX_SNIPPET_CHARS: usize = 300;
pub const MAX_PARAGRAPH_CHARS: usize = 500;
pub const MAX_IMAGE_CONTEXT_CHARS: usize = 200;
pub const MAX_QUESTION_SUMMARY_CHARS: usize = 300;

/// Paragraphs and headings requested per enriched page.
pub const ENRICH_PARAGRAPHS: usize = 5;
pub const ENRICH_HEADINGS: usize = 3;

pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 2000;

const FAILURE_MARKER: &str = "Failed to process search results";

/// An organic hit that passed link validation, waiting for enrichment.
#[derive(Debug)]
struct OrganicCandidate {
    title: String,
    domain: String,
    link: String,
    snippet: String,
    position: i64,
    source_quality: SourceQuality,
}

impl OrganicCandidate {
    /// `Ok(None)` when the link is missing or unusable.
    fn from_value(item: Value) -> Result<Option<Self>, PipelineError> {
        let item: OrganicItem = serde_json::from_value(item)
            .map_err(|e| PipelineError::Structural(format!("organic entry: {e}")))?;

        let Some(link) = item.link.filter(|l| is_absolute_http(l)) else {
            return Ok(None);
        };
        let Some(domain) = domain_of(&link) else {
            return Ok(None);
        };

        Ok(Some(Self {
            title: truncate_text(&item.title.unwrap_or_default(), MAX_TITLE_CHARS),
            snippet: truncate_text(&item.snippet.unwrap_or_default(), MAX_SNIPPET_CHARS),
            position: item.position.unwrap_or(UNRANKED_POSITION),
            source_quality: assess_source_quality(&link),
            domain,
            link,
        }))
    }

    fn into_entry(self, content: Option<ExtractedContent>, today: &str) -> OrganicResultEntry {
        let content = match content {
            Some(extracted) => ContentBlock {
                key_points: extracted.headings.into_iter().take(ENRICH_HEADINGS).collect(),
                main_content: extracted
                    .paragraphs
                    .iter()
                    .take(ENRICH_PARAGRAPHS)
                    .map(|p| truncate_text(p, MAX_PARAGRAPH_CHARS))
                    .collect(),
                meta_description: extracted.meta_description,
                last_updated: today.to_string(),
            },
            None => ContentBlock {
                last_updated: today.to_string(),
                ..Default::default()
            },
        };

        OrganicResultEntry {
            title: self.title,
            domain: self.domain,
            link: self.link,
            snippet: self.snippet,
            content,
            position: self.position,
            source_quality: self.source_quality,
        }
    }
}

fn image_entry(item: Value) -> Result<ImageResultEntry, PipelineError> {
    let item: ImageItem = serde_json::from_value(item)
        .map_err(|e| PipelineError::Structural(format!("image entry: {e}")))?;
    Ok(ImageResultEntry {
        title: item.title.unwrap_or_default(),
        url: item.image_url.unwrap_or_default(),
        context: truncate_text(&item.snippet.unwrap_or_default(), MAX_IMAGE_CONTEXT_CHARS),
    })
}

fn question_entry(item: Value) -> Result<RelatedQuestionEntry, PipelineError> {
    let item: QuestionItem = serde_json::from_value(item)
        .map_err(|e| PipelineError::Structural(format!("related question: {e}")))?;
    Ok(RelatedQuestionEntry {
        question: item.question.unwrap_or_default(),
        summary: truncate_text(&item.snippet.unwrap_or_default(), MAX_QUESTION_SUMMARY_CHARS),
        sources: vec![QuestionSource {
            title: item.title.unwrap_or_default(),
            url: item.link.unwrap_or_default(),
        }],
    })
}

/// Turns routed results into a [`FormattedBundle`].
#[derive(Debug)]
pub struct ResultFormatter<E> {
    extractor: E,
    max_content_length: usize,
    concurrency: usize,
    deadline: Option<Duration>,
}

impl<E: ContentExtractor> ResultFormatter<E> {
    /// Create a formatter that enriches through `extractor`.
    ///
    /// Defaults: 8 pages at once, no deadline, and a warning threshold of
    /// [`DEFAULT_MAX_CONTENT_LENGTH`].
    pub fn new(extractor: E) -> Self {
        Self {
            extractor,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            concurrency: 8,
            deadline: None,
        }
    }

    /// Serialized size above which a warning is logged. Never enforced.
    pub fn with_max_content_length(mut self, max_content_length: usize) -> Self {
        self.max_content_length = max_content_length;
        self
    }

    /// Pages fetched at once. Clamped to at least 1.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Bound the whole run; fetches still pending at expiry are abandoned.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Build the bundle. Always returns one; see the module docs for how
    /// failures surface.
    #[instrument(level = "info", skip_all, fields(payloads = raw.len()))]
    pub async fn format(&self, raw: &RawResultsByCategory) -> FormattedBundle {
        match AssertUnwindSafe(self.format_results(raw)).catch_unwind().await {
            Ok(Ok(results)) => FormattedBundle::Formatted(results),
            Ok(Err(e)) => {
                error!(error = %e, "Formatting failed");
                FormattedBundle::failed(FAILURE_MARKER)
            }
            Err(_) => {
                error!("Formatting panicked");
                FormattedBundle::failed(FAILURE_MARKER)
            }
        }
    }

    async fn format_results(
        &self,
        raw: &RawResultsByCategory,
    ) -> Result<FormattedResults, PipelineError> {
        let t0 = Instant::now();
        let deadline = self.deadline.map(|d| tokio::time::Instant::now() + d);

        let mut candidates = Vec::new();
        let mut image_results = Vec::new();
        let mut related_questions = Vec::new();

        for result in raw.iter() {
            let view = match PayloadView::from_payload(&result.payload) {
                Ok(view) => view,
                Err(e) => {
                    warn!(keyword = %result.keyword, error = %e, "Skipping payload");
                    continue;
                }
            };

            for item in view.organic.unwrap_or_default() {
                match OrganicCandidate::from_value(item) {
                    Ok(Some(candidate)) => candidates.push(candidate),
                    Ok(None) => debug!(keyword = %result.keyword, "Dropping organic hit without usable link"),
                    Err(e) => warn!(keyword = %result.keyword, error = %e, "Skipping organic entry"),
                }
            }

            for item in view.images.unwrap_or_default() {
                match image_entry(item) {
                    Ok(entry) => image_results.push(entry),
                    Err(e) => warn!(keyword = %result.keyword, error = %e, "Skipping image entry"),
                }
            }

            for item in view.people_also_ask.unwrap_or_default() {
                match question_entry(item) {
                    Ok(entry) => related_questions.push(entry),
                    Err(e) => warn!(keyword = %result.keyword, error = %e, "Skipping related question"),
                }
            }
        }

        info!(
            organic = candidates.len(),
            images = image_results.len(),
            questions = related_questions.len(),
            concurrency = self.concurrency,
            "Enriching organic results"
        );

        let enriched: Vec<(OrganicCandidate, Option<ExtractedContent>)> = stream::iter(candidates)
            .map(|candidate| async move {
                let content = self.enrich(&candidate.link, deadline).await;
                (candidate, content)
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let today = Local::now().format("%Y-%m-%d").to_string();
        let mut sources_used = 0;
        let mut organic_results = Vec::with_capacity(enriched.len());
        for (candidate, content) in enriched {
            if content.is_some() {
                sources_used += 1;
            }
            organic_results.push(candidate.into_entry(content, &today));
        }

        // Stable: equal keys keep insertion order.
        organic_results.sort_by_key(|entry| (entry.position, entry.source_quality.sort_rank()));

        let mut results = FormattedResults {
            metadata: BundleMetadata {
                processing_date: Local::now().to_rfc3339(),
                sources_used,
                total_content_length: 0,
            },
            organic_results,
            image_results,
            related_questions,
        };

        let serialized = serde_json::to_string(&results)
            .map_err(|e| PipelineError::Catastrophic(format!("serializing bundle: {e}")))?;
        results.metadata.total_content_length = serialized.chars().count();

        if results.metadata.total_content_length > self.max_content_length {
            warn!(
                total_content_length = results.metadata.total_content_length,
                max = self.max_content_length,
                "Formatted content exceeds configured maximum"
            );
        }

        info!(
            organic = results.organic_results.len(),
            sources_used,
            total_content_length = results.metadata.total_content_length,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Bundle formatted"
        );
        Ok(results)
    }

    async fn enrich(
        &self,
        link: &str,
        deadline: Option<tokio::time::Instant>,
    ) -> Option<ExtractedContent> {
        let fetch = self.extractor.fetch(link, ENRICH_PARAGRAPHS, ENRICH_HEADINGS);
        let outcome = match deadline {
            Some(at) => match tokio::time::timeout_at(at, fetch).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(%link, "Deadline reached before page was fetched");
                    return None;
                }
            },
            None => fetch.await,
        };

        match outcome {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(%link, error = %e, "Enrichment failed; keeping entry without content");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{KeywordCategory, RawApiResult};
    use serde_json::json;

    /// Answers by URL: `slow` sleeps, `pdf` is rejected, `panic` panics,
    /// `long` returns more and longer text than the bundle keeps.
    struct StubExtractor;

    impl ContentExtractor for StubExtractor {
        async fn fetch(
            &self,
            url: &str,
            _max_paragraphs: usize,
            _max_headings: usize,
        ) -> Result<ExtractedContent, PipelineError> {
            if url.contains("pdf") {
                return Err(PipelineError::UnsupportedContentType("application/pdf".into()));
            }
            if url.contains("slow") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if url.contains("panic") {
                panic!("extractor blew up");
            }
            if url.contains("long") {
                let mut paragraphs = vec!["z".repeat(700)];
                paragraphs.extend((0..6).map(|i| format!("Paragraph {i}. ") + &"Ghats line the river. ".repeat(40)));
                return Ok(ExtractedContent {
                    paragraphs,
                    headings: (1..=5).map(|i| format!("Heading {i}")).collect(),
                    meta_description: "Long page.".to_string(),
                    ..Default::default()
                });
            }
            Ok(ExtractedContent {
                paragraphs: vec!["Para one.".to_string()],
                headings: vec!["History".to_string()],
                ..Default::default()
            })
        }
    }

    fn text_results(payloads: Vec<serde_json::Value>) -> RawResultsByCategory {
        let mut raw = RawResultsByCategory::new();
        for (i, payload) in payloads.into_iter().enumerate() {
            raw.push(RawApiResult {
                keyword: format!("kw{i}"),
                category: KeywordCategory::TextSearch,
                payload,
            });
        }
        raw
    }

    fn organic(results: &FormattedBundle) -> &[OrganicResultEntry] {
        &results.results().expect("formatted bundle").organic_results
    }

    #[tokio::test]
    async fn test_varanasi_scenario() {
        let raw = text_results(vec![json!({
            "organic": [{
                "title": "Varanasi - Wikipedia",
                "link": "https://en.wikipedia.org/wiki/Varanasi",
                "snippet": "Ancient city...",
                "position": 1
            }]
        })]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;
        let entries = organic(&bundle);

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.domain, "en.wikipedia.org");
        assert_eq!(entry.source_quality, SourceQuality::High);
        assert_eq!(entry.content.key_points, vec!["History"]);
        assert_eq!(entry.content.main_content, vec!["Para one."]);
        assert_eq!(entry.position, 1);
        assert_eq!(bundle.results().unwrap().metadata.sources_used, 1);
    }

    #[tokio::test]
    async fn test_unsupported_content_keeps_entry_with_empty_content() {
        let raw = text_results(vec![json!({
            "organic": [{ "title": "Report", "link": "https://example.com/report.pdf", "position": 1 }]
        })]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;
        let entries = organic(&bundle);

        assert_eq!(entries.len(), 1);
        assert!(entries[0].content.is_empty());
        assert_eq!(bundle.results().unwrap().metadata.sources_used, 0);
    }

    #[tokio::test]
    async fn test_empty_input_gives_empty_bundle() {
        let bundle = ResultFormatter::new(StubExtractor)
            .format(&RawResultsByCategory::new())
            .await;
        let results = bundle.results().unwrap();

        assert!(results.organic_results.is_empty());
        assert!(results.image_results.is_empty());
        assert!(results.related_questions.is_empty());
        assert_eq!(results.metadata.sources_used, 0);
        assert!(results.metadata.total_content_length > 0);
    }

    #[tokio::test]
    async fn test_invalid_links_are_dropped() {
        let raw = text_results(vec![json!({
            "organic": [
                { "title": "no link" },
                { "title": "relative", "link": "/wiki/Varanasi" },
                { "title": "ftp", "link": "ftp://example.com/file" },
                { "title": "null link", "link": null },
                { "title": "good", "link": "https://example.com/good" }
            ]
        })]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;
        let entries = organic(&bundle);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "good");
        assert!(entries.iter().all(|e| e.link.starts_with("http")));
    }

    #[tokio::test]
    async fn test_sort_by_position_then_quality_then_insertion() {
        let raw = text_results(vec![
            json!({ "organic": [
                { "title": "a", "link": "https://shop-a.com/", "position": 2 },
                { "title": "b", "link": "https://shop-b.com/", "position": 1 },
                { "title": "c", "link": "https://museum.org/", "position": 2 },
                { "title": "d", "link": "https://unranked.com/" }
            ]}),
            json!({ "organic": [
                { "title": "e", "link": "https://shop-e.com/", "position": 2 },
                { "title": "f", "link": "https://shop-f.com/", "position": 1 }
            ]}),
        ]);

        let bundle = ResultFormatter::new(StubExtractor)
            .with_concurrency(3)
            .format(&raw)
            .await;
        let titles: Vec<&str> = organic(&bundle).iter().map(|e| e.title.as_str()).collect();

        assert_eq!(titles, vec!["b", "f", "c", "a", "e", "d"]);
        assert_eq!(organic(&bundle)[5].position, UNRANKED_POSITION);
    }

    #[tokio::test]
    async fn test_fields_are_truncated() {
        let long_title = "T".repeat(400);
        let long_snippet = format!("{} Second sentence runs on and on.", "Short first.");
        let long_snippet = long_snippet.repeat(20);
        let raw = text_results(vec![json!({
            "organic": [{ "title": long_title, "link": "https://example.com", "snippet": long_snippet }],
            "images": [{ "title": "ghat", "imageUrl": "https://img.example.com/1.jpg", "snippet": "x".repeat(500) }],
            "peopleAlsoAsk": [{
                "question": "Why is Varanasi holy?",
                "snippet": "y".repeat(800),
                "title": "Answer",
                "link": "https://example.com/answer"
            }]
        })]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;
        let results = bundle.results().unwrap();

        let entry = &results.organic_results[0];
        assert!(entry.title.chars().count() <= MAX_TITLE_CHARS);
        assert!(entry.snippet.chars().count() <= MAX_SNIPPET_CHARS);
        assert!(entry.snippet.ends_with('.'));

        assert_eq!(results.image_results.len(), 1);
        assert_eq!(results.image_results[0].url, "https://img.example.com/1.jpg");
        assert!(results.image_results[0].context.chars().count() <= MAX_IMAGE_CONTEXT_CHARS);

        let question = &results.related_questions[0];
        assert_eq!(question.question, "Why is Varanasi holy?");
        assert!(question.summary.chars().count() <= MAX_QUESTION_SUMMARY_CHARS);
        assert_eq!(question.sources[0].url, "https://example.com/answer");
    }

    #[tokio::test]
    async fn test_page_content_is_capped() {
        let raw = text_results(vec![json!({
            "organic": [{ "title": "Ghats", "link": "https://long.example.com/ghats", "position": 1 }]
        })]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;
        let content = &organic(&bundle)[0].content;

        assert_eq!(content.key_points, vec!["Heading 1", "Heading 2", "Heading 3"]);
        assert_eq!(content.main_content.len(), ENRICH_PARAGRAPHS);
        assert!(content
            .main_content
            .iter()
            .all(|p| p.chars().count() <= MAX_PARAGRAPH_CHARS));
        // no sentence break: hard cut plus ellipsis
        assert_eq!(content.main_content[0].chars().count(), MAX_PARAGRAPH_CHARS);
        assert!(content.main_content[0].ends_with("..."));
        assert!(content.main_content[1].starts_with("Paragraph 0."));
        assert!(content.main_content[1].ends_with('.'));
        assert!(content.main_content[4].starts_with("Paragraph 3."));
        assert_eq!(content.meta_description, "Long page.");
    }

    #[tokio::test]
    async fn test_wrong_typed_list_keeps_sibling_lists() {
        let raw = text_results(vec![json!({
            "organic": [{ "title": "Varanasi", "link": "https://example.com/varanasi", "position": 1 }],
            "images": { "unexpected": "object" },
            "peopleAlsoAsk": [{ "question": "Why is Varanasi holy?", "snippet": "Because." }]
        })]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;
        let results = bundle.results().unwrap();

        assert_eq!(results.organic_results.len(), 1);
        assert!(results.image_results.is_empty());
        assert_eq!(results.related_questions.len(), 1);
    }

    #[tokio::test]
    async fn test_float_position_keeps_entry() {
        let raw = text_results(vec![json!({
            "organic": [
                { "title": "second", "link": "https://example.com/b", "position": 2 },
                { "title": "first", "link": "https://example.com/a", "position": 1.0 },
                { "title": "odd", "link": "https://example.com/c", "position": "top" }
            ]
        })]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;
        let entries = organic(&bundle);

        let titles: Vec<&str> = entries.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["first", "second", "odd"]);
        assert_eq!(entries[0].position, 1);
        assert_eq!(entries[2].position, UNRANKED_POSITION);
    }

    #[tokio::test]
    async fn test_structural_errors_skip_only_that_entry() {
        let raw = text_results(vec![
            json!("not an object"),
            json!({ "organic": "not a list" }),
            json!({ "organic": [
                "just a string",
                { "title": 42, "link": "https://example.com/bad-title" },
                { "title": "fine", "link": "https://example.com/fine" }
            ]}),
        ]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;
        let entries = organic(&bundle);

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title, "fine");
    }

    #[tokio::test]
    async fn test_total_content_length_matches_serialized_bundle() {
        let raw = text_results(vec![json!({
            "organic": [{ "title": "Varanasi", "link": "https://example.com", "position": 1 }]
        })]);

        let bundle = ResultFormatter::new(StubExtractor)
            .with_max_content_length(10)
            .format(&raw)
            .await;
        let mut results = bundle.results().unwrap().clone();
        let reported = results.metadata.total_content_length;

        results.metadata.total_content_length = 0;
        let recomputed = serde_json::to_string(&results).unwrap().chars().count();
        assert_eq!(reported, recomputed);
        // over the limit only warns; nothing is cut
        assert_eq!(results.organic_results.len(), 1);
    }

    #[tokio::test]
    async fn test_deadline_degrades_pending_fetches() {
        let raw = text_results(vec![json!({
            "organic": [
                { "title": "fast", "link": "https://fast.example.com", "position": 1 },
                { "title": "slow", "link": "https://slow.example.com", "position": 2 }
            ]
        })]);

        let started = Instant::now();
        let bundle = ResultFormatter::new(StubExtractor)
            .with_deadline(Some(Duration::from_millis(200)))
            .format(&raw)
            .await;

        assert!(started.elapsed() < Duration::from_secs(10));
        let entries = organic(&bundle);
        assert_eq!(entries.len(), 2);
        assert!(!entries[0].content.is_empty());
        assert!(entries[1].content.is_empty());
        assert_eq!(bundle.results().unwrap().metadata.sources_used, 1);
    }

    #[tokio::test]
    async fn test_panic_becomes_error_marker() {
        let raw = text_results(vec![json!({
            "organic": [{ "title": "boom", "link": "https://panic.example.com" }]
        })]);

        let bundle = ResultFormatter::new(StubExtractor).format(&raw).await;

        assert!(bundle.is_failed());
        assert_eq!(
            serde_json::to_value(&bundle).unwrap(),
            json!({ "error": "Failed to process search results" })
        );
    }
}
