//! Page fetching and structured text extraction.
//!
//! [`ContentExtractor`] is the seam the formatter enriches organic hits
//! through. [`HtmlExtractor`] fetches over HTTP and parses with `scraper`;
//! [`CachedExtractor`] wraps any extractor with a URL-keyed in-memory cache.
//!
//! # Text cleaning
//!
//! Every extracted string goes through [`process_text`], which applies, in
//! this order:
//!
//! 1. strip markup tags
//! 2. collapse whitespace runs to single spaces and trim
//! 3. drop characters outside the allow-list (optional, on by default)
//! 4. replace non-printable characters with spaces
//! 5. lowercase (optional, off by default)

use crate::config::{CacheConfig, PipelineConfig};
use crate::error::PipelineError;
use crate::http::build_fetch_client;
use crate::models::ExtractedContent;
use moka::future::Cache;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

static HTML_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("static regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[^a-zA-Z0-9\s.,!?\-&'"]"#).expect("static regex"));
static NON_PRINTABLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\x20-\x7E]").expect("static regex"));

/// Elements whose text is never visible.
const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

/// Options for [`process_text`]. Read from the `text` section of
/// [`PipelineConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextOptions {
    pub lowercase: bool,
    pub remove_special: bool,
}

impl Default for TextOptions {
    fn default() -> Self {
        Self {
            lowercase: false,
            remove_special: true,
        }
    }
}

/// Clean and normalize a piece of text. See the module docs for the steps.
pub fn process_text(text: &str, options: TextOptions) -> String {
    let text = HTML_TAGS.replace_all(text, " ");
    let text = WHITESPACE.replace_all(&text, " ");
    let mut text = text.trim().to_string();

    if options.remove_special {
        text = DISALLOWED.replace_all(&text, "").into_owned();
    }
    text = NON_PRINTABLE.replace_all(&text, " ").into_owned();
    if options.lowercase {
        text = text.to_lowercase();
    }
    text
}

/// Extract paragraphs, headings, visible text, title, and meta description
/// from an HTML document.
pub fn extract_content(
    html: &str,
    max_paragraphs: usize,
    max_headings: usize,
    options: TextOptions,
) -> Result<ExtractedContent, PipelineError> {
    let document = Html::parse_document(html);
    let select = |css: &str| {
        Selector::parse(css).map_err(|e| PipelineError::Processing(format!("selector {css:?}: {e}")))
    };

    let paragraph_selector = select("p")?;
    let heading_selector = select("h1, h2, h3, h4, h5, h6")?;
    let title_selector = select("title")?;
    let meta_selector = select(r#"meta[name="description"]"#)?;

    let paragraphs = document
        .select(&paragraph_selector)
        .take(max_paragraphs)
        .map(|el| process_text(&el.text().collect::<String>(), options))
        .collect();

    let headings = document
        .select(&heading_selector)
        .take(max_headings)
        .map(|el| process_text(&el.text().collect::<String>(), options))
        .collect();

    let title = document
        .select(&title_selector)
        .next()
        .map(|el| process_text(&el.text().collect::<String>(), options))
        .unwrap_or_default();

    let meta_description = document
        .select(&meta_selector)
        .next()
        .and_then(|el| el.value().attr("content"))
        .map(|content| process_text(content, options))
        .unwrap_or_default();

    Ok(ExtractedContent {
        paragraphs,
        headings,
        cleaned_text: process_text(&visible_text(&document), options),
        title,
        meta_description,
    })
}

fn visible_text(document: &Html) -> String {
    document
        .root_element()
        .descendants()
        .filter_map(|node| {
            let text = node.value().as_text()?;
            let hidden = node.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .is_some_and(|el| INVISIBLE_ELEMENTS.contains(&el.name()))
            });
            (!hidden).then(|| text.to_string())
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Fetches a page and extracts structured text from it.
pub trait ContentExtractor: Send + Sync {
    /// Fetch `url` and extract at most `max_paragraphs` paragraphs and
    /// `max_headings` headings.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Processing`] if `url` is not absolute http(s)
    /// - [`PipelineError::Transport`] on network failure or non-success status
    /// - [`PipelineError::UnsupportedContentType`] if the page is not `text/html`
    fn fetch(
        &self,
        url: &str,
        max_paragraphs: usize,
        max_headings: usize,
    ) -> impl Future<Output = Result<ExtractedContent, PipelineError>> + Send;
}

/// [`ContentExtractor`] that fetches over HTTP and parses the HTML.
#[derive(Debug, Clone)]
pub struct HtmlExtractor {
    client: reqwest::Client,
    options: TextOptions,
}

impl HtmlExtractor {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        Ok(Self {
            client: build_fetch_client(config)?,
            options: config.text,
        })
    }
}

impl ContentExtractor for HtmlExtractor {
    #[instrument(level = "info", skip(self))]
    async fn fetch(
        &self,
        url: &str,
        max_paragraphs: usize,
        max_headings: usize,
    ) -> Result<ExtractedContent, PipelineError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PipelineError::Processing(format!(
                "not an absolute http(s) URL: {url}"
            )));
        }

        let t0 = Instant::now();
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Transport(format!("fetching {url}: {e}")))?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.contains("text/html") {
            return Err(PipelineError::UnsupportedContentType(content_type));
        }

        let body = response
            .text()
            .await
            .map_err(|e| PipelineError::Transport(format!("reading {url}: {e}")))?;

        let content = extract_content(&body, max_paragraphs, max_headings, self.options)?;
        info!(
            bytes = body.len(),
            paragraphs = content.paragraphs.len(),
            headings = content.headings.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Extracted page content"
        );
        Ok(content)
    }
}

/// Decorator that memoizes successful extractions by URL and limits.
///
/// Failures are not cached. Entries live for the process lifetime at most,
/// bounded by capacity and TTL; there is no consistency guarantee with the
/// live page.
#[derive(Clone)]
pub struct CachedExtractor<E> {
    inner: E,
    cache: Cache<(String, usize, usize), ExtractedContent>,
}

impl<E> CachedExtractor<E> {
    pub fn new(inner: E, config: &CacheConfig) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(config.capacity)
                .time_to_live(Duration::from_secs(config.ttl_secs))
                .build(),
        }
    }
}

impl<E: ContentExtractor> ContentExtractor for CachedExtractor<E> {
    async fn fetch(
        &self,
        url: &str,
        max_paragraphs: usize,
        max_headings: usize,
    ) -> Result<ExtractedContent, PipelineError> {
        let key = (url.to_string(), max_paragraphs, max_headings);
        if let Some(hit) = self.cache.get(&key).await {
            debug!(%url, "Extraction cache hit");
            return Ok(hit);
        }

        match self.inner.fetch(url, max_paragraphs, max_headings).await {
            Ok(content) => {
                self.cache.insert(key, content.clone()).await;
                Ok(content)
            }
            Err(e) => {
                warn!(%url, error = %e, "Extraction failed; not caching");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>Varanasi -
     Wikipedia</title>
  <meta name="description" content="Varanasi is a city on the Ganges.">
  <style>body { color: red; }</style>
  <script>var tracking = "do not show";</script>
</head>
<body>
  <h1>Varanasi</h1>
  <p>Varanasi is   one of the <b>oldest</b> continually inhabited cities.</p>
  <h2>History</h2>
  <p>Tradition dates it to the time of Shiva.</p>
  <h3>Geography</h3>
  <p>It lies on the Ganges.</p>
  <h4>Climate</h4>
  <p>Humid subtropical.</p>
</body>
</html>"#;

    #[test]
    fn test_process_text_collapses_whitespace_and_tags() {
        let out = process_text("  <b>Hello</b>\n\n\tworld  ", TextOptions::default());
        assert_eq!(out, "Hello world");
    }

    #[test]
    fn test_process_text_filters_special_characters() {
        let out = process_text("Price: $5 (approx) © 2024 — ok?", TextOptions::default());
        assert_eq!(out, "Price 5 approx  2024  ok?");
    }

    #[test]
    fn test_process_text_keeps_non_ascii_as_spaces_without_filter() {
        let options = TextOptions {
            lowercase: false,
            remove_special: false,
        };
        assert_eq!(process_text("café", options), "caf ");
    }

    #[test]
    fn test_process_text_lowercase_runs_last() {
        let options = TextOptions {
            lowercase: true,
            remove_special: true,
        };
        assert_eq!(process_text("Hello <i>WORLD</i>!", options), "hello world !");
    }

    #[test]
    fn test_extract_content_limits_and_order() {
        let content = extract_content(PAGE, 2, 3, TextOptions::default()).unwrap();
        assert_eq!(
            content.paragraphs,
            vec![
                "Varanasi is one of the oldest continually inhabited cities.",
                "Tradition dates it to the time of Shiva.",
            ]
        );
        assert_eq!(content.headings, vec!["Varanasi", "History", "Geography"]);
        assert_eq!(content.title, "Varanasi - Wikipedia");
        assert_eq!(content.meta_description, "Varanasi is a city on the Ganges.");
    }

    #[test]
    fn test_extract_content_skips_script_and_style_text() {
        let content = extract_content(PAGE, 20, 10, TextOptions::default()).unwrap();
        assert!(content.cleaned_text.contains("Humid subtropical."));
        assert!(!content.cleaned_text.contains("tracking"));
        assert!(!content.cleaned_text.contains("color"));
    }

    #[test]
    fn test_extract_content_empty_document() {
        let content = extract_content("", 5, 3, TextOptions::default()).unwrap();
        assert!(content.paragraphs.is_empty());
        assert!(content.headings.is_empty());
        assert!(content.title.is_empty());
        assert!(content.meta_description.is_empty());
    }

    #[tokio::test]
    async fn test_html_extractor_rejects_relative_url() {
        let extractor = HtmlExtractor::new(&PipelineConfig::default()).unwrap();
        let err = extractor.fetch("/wiki/Varanasi", 5, 3).await.unwrap_err();
        assert!(matches!(err, PipelineError::Processing(_)));
    }

    #[test]
    fn test_html_extractor_takes_text_options_from_config() {
        let config = PipelineConfig {
            text: TextOptions {
                lowercase: true,
                remove_special: false,
            },
            ..Default::default()
        };
        let extractor = HtmlExtractor::new(&config).unwrap();
        assert!(extractor.options.lowercase);
        assert!(!extractor.options.remove_special);

        let content = extract_content(PAGE, 1, 1, extractor.options).unwrap();
        assert_eq!(content.title, "varanasi - wikipedia");
    }

    struct CountingExtractor {
        calls: AtomicUsize,
        fail: bool,
    }

    impl ContentExtractor for CountingExtractor {
        async fn fetch(
            &self,
            url: &str,
            _max_paragraphs: usize,
            _max_headings: usize,
        ) -> Result<ExtractedContent, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PipelineError::Transport("down".into()));
            }
            Ok(ExtractedContent {
                title: url.to_string(),
                ..Default::default()
            })
        }
    }

    #[tokio::test]
    async fn test_cached_extractor_memoizes_successes() {
        let cached = CachedExtractor::new(
            CountingExtractor {
                calls: AtomicUsize::new(0),
                fail: false,
            },
            &CacheConfig::default(),
        );

        let first = cached.fetch("https://example.com", 5, 3).await.unwrap();
        let second = cached.fetch("https://example.com", 5, 3).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);

        // different limits are a different entry
        cached.fetch("https://example.com", 1, 1).await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cached_extractor_does_not_cache_failures() {
        let cached = CachedExtractor::new(
            CountingExtractor {
                calls: AtomicUsize::new(0),
                fail: true,
            },
            &CacheConfig::default(),
        );

        assert!(cached.fetch("https://example.com", 5, 3).await.is_err());
        assert!(cached.fetch("https://example.com", 5, 3).await.is_err());
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 2);
    }
}
