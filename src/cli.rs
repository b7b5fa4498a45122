//! Command-line interface definitions for serp_context.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Credentials can also be provided via environment variables.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for serp_context.
///
/// # Examples
///
/// ```sh
/// # Route categorized keywords from a file and print the bundle
/// serp_context -k keywords.json
///
/// # Read keywords from stdin, write the bundle under ./bundles
/// echo '{"text_api": ["history of Varanasi"]}' | serp_context -k - -o ./bundles
///
/// # Re-format a previously persisted raw-results artifact without searching
/// serp_context --replay keywords_result_dict.json
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Categorized keywords JSON file (`-` for stdin)
    #[arg(short, long, required_unless_present = "replay")]
    pub keywords: Option<String>,

    /// Output directory for the bundle JSON; printed to stdout when omitted
    #[arg(short, long)]
    pub output_dir: Option<String>,

    /// Optional path to a YAML pipeline config
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Serper API key
    #[arg(long, env = "SERPER_API_KEY", hide_env_values = true)]
    pub serper_api_key: Option<String>,

    /// Where to persist raw search results (overrides the config file)
    #[arg(long)]
    pub raw_results: Option<PathBuf>,

    /// Format a persisted raw-results artifact instead of searching
    #[arg(long, conflicts_with = "keywords")]
    pub replay: Option<PathBuf>,

    /// Serialized bundle size above which a warning is logged
    #[arg(long)]
    pub max_content_length: Option<usize>,

    /// Upper bound in seconds on the formatting run
    #[arg(long)]
    pub deadline_secs: Option<u64>,

    /// Cache extracted pages in memory for the run
    #[arg(long)]
    pub cache: bool,

    /// Lowercase all extracted page text
    #[arg(long)]
    pub lowercase: bool,
}
