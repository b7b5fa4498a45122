//! Data models for keywords, raw provider payloads, and the formatted bundle.
//!
//! This module defines the core data structures used throughout the pipeline:
//! - [`KeywordCategory`] / [`CategorizedKeywords`]: upstream keyword buckets
//! - [`RawApiResult`] / [`RawResultsByCategory`]: undecoded-shape provider output
//! - [`PayloadView`] and the item views: typed, optional access into payloads
//! - [`ExtractedContent`]: text scraped from one page
//! - [`FormattedBundle`]: the ranked, truncated bundle handed downstream
//!
//! Field names on the bundle types are the wire contract with the prompt
//! builder, so they are serialized exactly as declared.

use crate::error::{PipelineError, Result};
use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Control key emitted by the keyword categorizer. Never a search category.
pub const API_NEEDED_KEY: &str = "api_needed";

/// Position assigned to organic hits that carry no upstream rank.
pub const UNRANKED_POSITION: i64 = 999;

/// The closed set of search categories the router can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeywordCategory {
    /// Plain web search; yields organic hits and related questions.
    #[serde(rename = "text_api")]
    TextSearch,
    /// Image search; yields image cards.
    #[serde(rename = "image_api")]
    ImageSearch,
}

impl KeywordCategory {
    /// The key this category uses in categorizer output and persisted artifacts.
    pub fn wire_key(&self) -> &'static str {
        match self {
            KeywordCategory::TextSearch => "text_api",
            KeywordCategory::ImageSearch => "image_api",
        }
    }
}

/// A key found in the categorizer's output, classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategoryKey {
    Known(KeywordCategory),
    /// The `api_needed` flag.
    Control,
    Unrecognized(String),
}

impl CategoryKey {
    /// Classify a raw key. `search_api` is accepted as an older spelling of
    /// `text_api`.
    pub fn parse(key: &str) -> Self {
        match key {
            "text_api" | "search_api" => CategoryKey::Known(KeywordCategory::TextSearch),
            "image_api" => CategoryKey::Known(KeywordCategory::ImageSearch),
            API_NEEDED_KEY => CategoryKey::Control,
            other => CategoryKey::Unrecognized(other.to_string()),
        }
    }
}

/// Keyword buckets as produced by the upstream categorizer, in the key order
/// of the source document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CategorizedKeywords {
    pub buckets: Vec<(CategoryKey, Vec<String>)>,
}

impl CategorizedKeywords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bucket. Used by callers that build the mapping in code.
    pub fn with(mut self, key: CategoryKey, keywords: &[&str]) -> Self {
        self.buckets
            .push((key, keywords.iter().map(|k| k.to_string()).collect()));
        self
    }

    /// Build from the categorizer's JSON object.
    ///
    /// Buckets whose value is not a list, and list items that are not
    /// strings, are logged and skipped. Only a non-object document is an
    /// error.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(PipelineError::Structural(
                "categorized keywords must be a JSON object".into(),
            ));
        };

        let mut buckets = Vec::with_capacity(object.len());
        for (raw_key, raw_keywords) in object {
            let key = CategoryKey::parse(raw_key);
            if key == CategoryKey::Control {
                debug!(key = %raw_key, "Dropping control key");
                continue;
            }
            let Some(items) = raw_keywords.as_array() else {
                warn!(key = %raw_key, "Keyword bucket is not a list; skipping");
                continue;
            };
            let keywords = items
                .iter()
                .filter_map(|item| match item.as_str() {
                    Some(s) => Some(s.to_string()),
                    None => {
                        warn!(key = %raw_key, ?item, "Non-string keyword; skipping");
                        None
                    }
                })
                .collect();
            buckets.push((key, keywords));
        }
        Ok(Self { buckets })
    }

    /// `true` when no bucket holds a keyword.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|(_, keywords)| keywords.is_empty())
    }
}

/// One provider response for one keyword.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawApiResult {
    pub keyword: String,
    pub category: KeywordCategory,
    /// The decoded provider JSON, untouched.
    pub payload: Value,
}

/// Raw provider responses grouped by category, each list in dispatch order.
///
/// Serializes as the persisted artifact: one list per category wire key,
/// each element a single-entry object mapping the keyword to its payload.
///
/// ```json
/// {"text_api": [{"history of Varanasi": {"organic": [...]}}], "image_api": [...]}
/// ```
///
/// Deserializing accepts the same shape, so artifacts from earlier runs can
/// be replayed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResultsByCategory {
    by_category: BTreeMap<KeywordCategory, Vec<RawApiResult>>,
}

impl RawResultsByCategory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: RawApiResult) {
        self.by_category
            .entry(result.category)
            .or_default()
            .push(result);
    }

    pub fn get(&self, category: KeywordCategory) -> &[RawApiResult] {
        self.by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// All results, categories in fixed order, each in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &RawApiResult> {
        self.by_category.values().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_category.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One artifact list element: `{"<keyword>": payload}`.
struct KeywordEntry<'a>(&'a RawApiResult);

impl Serialize for KeywordEntry<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.0.keyword, &self.0.payload)?;
        map.end()
    }
}

impl Serialize for RawResultsByCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.by_category.len()))?;
        for (category, results) in &self.by_category {
            let entries: Vec<KeywordEntry<'_>> = results.iter().map(KeywordEntry).collect();
            map.serialize_entry(category, &entries)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for RawResultsByCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let lists = BTreeMap::<KeywordCategory, Vec<Map<String, Value>>>::deserialize(deserializer)?;

        let mut results = RawResultsByCategory::new();
        for (category, entries) in lists {
            for (keyword, payload) in entries.into_iter().flatten() {
                results.push(RawApiResult {
                    keyword,
                    category,
                    payload,
                });
            }
        }
        Ok(results)
    }
}

/// Typed view of the lists a provider payload may carry.
///
/// Absent or `null` lists are `None`; items stay as raw values so a single
/// malformed entry can be rejected without losing its siblings.
#[derive(Debug, Default)]
pub struct PayloadView {
    pub organic: Option<Vec<Value>>,
    pub images: Option<Vec<Value>>,
    /// The provider's `peopleAlsoAsk` list.
    pub people_also_ask: Option<Vec<Value>>,
}

impl PayloadView {
    /// Pull the known lists out of a provider payload.
    ///
    /// Each list is read on its own. A list with the wrong type is logged
    /// and treated as absent; the other lists are kept.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Structural`] if the payload is not a JSON object.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        let Some(object) = payload.as_object() else {
            return Err(PipelineError::Structural("payload is not an object".into()));
        };
        Ok(Self {
            organic: payload_list(object, "organic"),
            images: payload_list(object, "images"),
            people_also_ask: payload_list(object, "peopleAlsoAsk"),
        })
    }
}

fn payload_list(object: &Map<String, Value>, key: &str) -> Option<Vec<Value>> {
    match object.get(key)? {
        Value::Array(items) => Some(items.clone()),
        Value::Null => None,
        _ => {
            warn!(list = key, "Payload list is not an array; skipping it");
            None
        }
    }
}

/// Read an upstream rank leniently: integers as is, finite floats and
/// numeric strings rounded. Anything else counts as unranked.
fn lenient_position<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    let rank = match value {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().and_then(round_rank)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().and_then(round_rank),
        _ => None,
    };
    Ok(rank)
}

fn round_rank(rank: f64) -> Option<i64> {
    rank.is_finite().then(|| rank.round() as i64)
}

/// An organic hit as the provider reports it.
#[derive(Debug, Default, Deserialize)]
pub struct OrganicItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    /// `None` when absent or not a usable number.
    #[serde(default, deserialize_with = "lenient_position")]
    pub position: Option<i64>,
}

/// An image card as the provider reports it.
#[derive(Debug, Default, Deserialize)]
pub struct ImageItem {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "imageUrl")]
    pub image_url: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
}

/// A "people also ask" card as the provider reports it.
#[derive(Debug, Default, Deserialize)]
pub struct QuestionItem {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub snippet: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

/// Structured text extracted from one fetched page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    /// Text of the first `<p>` elements, in document order.
    pub paragraphs: Vec<String>,
    /// Text of the first `h1`..`h6` elements, in document order.
    pub headings: Vec<String>,
    /// All visible text, cleaned.
    pub cleaned_text: String,
    pub title: String,
    pub meta_description: String,
}

/// Coarse trust level of an organic hit's host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceQuality {
    High,
    Medium,
}

impl SourceQuality {
    /// Secondary sort key: high sorts before medium.
    pub fn sort_rank(&self) -> u8 {
        match self {
            SourceQuality::High => 0,
            SourceQuality::Medium => 1,
        }
    }
}

/// Scraped material attached to an organic hit. Empty when enrichment failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub key_points: Vec<String>,
    pub main_content: Vec<String>,
    pub meta_description: String,
    /// Processing date, `YYYY-MM-DD`.
    pub last_updated: String,
}

impl ContentBlock {
    pub fn is_empty(&self) -> bool {
        self.key_points.is_empty() && self.main_content.is_empty() && self.meta_description.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganicResultEntry {
    pub title: String,
    pub domain: String,
    pub link: String,
    pub snippet: String,
    pub content: ContentBlock,
    pub position: i64,
    pub source_quality: SourceQuality,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResultEntry {
    pub title: String,
    pub url: String,
    pub context: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionSource {
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedQuestionEntry {
    pub question: String,
    pub summary: String,
    pub sources: Vec<QuestionSource>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    /// RFC 3339 timestamp of the formatting run.
    pub processing_date: String,
    /// Organic entries whose page was fetched and extracted.
    pub sources_used: usize,
    /// Character count of the serialized bundle.
    pub total_content_length: usize,
}

/// The successful shape of a [`FormattedBundle`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FormattedResults {
    pub metadata: BundleMetadata,
    pub organic_results: Vec<OrganicResultEntry>,
    pub image_results: Vec<ImageResultEntry>,
    pub related_questions: Vec<RelatedQuestionEntry>,
}

/// What the formatter hands downstream: either the full bundle or, when
/// something escaped per-item containment, only an error marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormattedBundle {
    Formatted(FormattedResults),
    Failed { error: String },
}

impl FormattedBundle {
    pub fn failed(message: impl Into<String>) -> Self {
        FormattedBundle::Failed {
            error: message.into(),
        }
    }

    pub fn results(&self) -> Option<&FormattedResults> {
        match self {
            FormattedBundle::Formatted(results) => Some(results),
            FormattedBundle::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FormattedBundle::Failed { .. })
    }
}
