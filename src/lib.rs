//! # serp_context
//!
//! Turns categorized search keywords into a ranked, truncated context bundle
//! for LLM prompts.
//!
//! ## Architecture
//!
//! 1. **Routing** ([`router`]): each keyword goes to the search provider
//!    through a [`gateway::SearchGateway`]; decoded payloads are grouped by
//!    category and persisted as a raw-results artifact
//! 2. **Enrichment** ([`formatter`] + [`extractor`]): every organic link is
//!    fetched and its paragraphs and headings extracted
//! 3. **Formatting** ([`formatter`]): fields are truncated on sentence
//!    boundaries, hosts are graded, and organic hits are sorted by
//!    `(position, quality)` into a [`models::FormattedBundle`]
//!
//! Failures are contained per keyword, link, or entry; the formatter always
//! returns a bundle.

pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod formatter;
pub mod gateway;
pub mod http;
pub mod models;
pub mod outputs;
pub mod router;
pub mod utils;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use extractor::{CachedExtractor, ContentExtractor, HtmlExtractor};
pub use formatter::ResultFormatter;
pub use gateway::{SearchGateway, SerperGateway};
pub use models::{CategorizedKeywords, FormattedBundle, RawResultsByCategory};
pub use router::ResultRouter;
