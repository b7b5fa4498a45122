//! # serp_context
//!
//! Routes categorized keywords to the Serper search API, scrapes the organic
//! hits, and writes a ranked context bundle as JSON.
//!
//! ## Usage
//!
//! ```sh
//! serp_context -k keywords.json -o ./bundles
//! ```

use clap::Parser;
use serp_context::cli::Cli;
use serp_context::outputs::json::{read_raw_results, write_bundle};
use serp_context::utils::ensure_writable_dir;
use serp_context::{
    CachedExtractor, CategorizedKeywords, ContentExtractor, FormattedBundle, HtmlExtractor,
    PipelineConfig, RawResultsByCategory, ResultFormatter, ResultRouter, SerperGateway,
};
use std::error::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{fmt as tfmt, EnvFilter};

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("serp_context starting up");

    let args = Cli::parse();
    debug!(?args.keywords, ?args.output_dir, ?args.replay, "Parsed CLI arguments");

    let config = build_config(&args)?;

    if let Some(ref dir) = args.output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "Output directory is not writable");
            return Err(e);
        }
    }

    // ---- Route or replay ----
    let raw = match args.replay {
        Some(ref path) => read_raw_results(path).await?,
        None => route_keywords(&args, &config).await?,
    };
    info!(payloads = raw.len(), "Raw results ready");

    // ---- Format ----
    let extractor = HtmlExtractor::new(&config)?;
    let bundle = if config.cache.enabled {
        format_with(CachedExtractor::new(extractor, &config.cache), &config, &raw).await
    } else {
        format_with(extractor, &config, &raw).await
    };

    // ---- Output ----
    match args.output_dir {
        Some(ref dir) => {
            write_bundle(&bundle, dir).await?;
        }
        None => println!("{}", serde_json::to_string_pretty(&bundle)?),
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        failed = bundle.is_failed(),
        "Execution complete"
    );
    Ok(())
}

fn build_config(args: &Cli) -> Result<PipelineConfig, Box<dyn Error>> {
    let mut config = match args.config {
        Some(ref path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };
    if let Some(ref path) = args.raw_results {
        config.raw_results_path = Some(path.clone());
    }
    if let Some(max) = args.max_content_length {
        config.max_content_length = max;
    }
    if let Some(secs) = args.deadline_secs {
        config.enrichment_deadline_secs = Some(secs);
    }
    if args.cache {
        config.cache.enabled = true;
    }
    if args.lowercase {
        config.text.lowercase = true;
    }
    config.validate()?;
    Ok(config)
}

async fn route_keywords(
    args: &Cli,
    config: &PipelineConfig,
) -> Result<RawResultsByCategory, Box<dyn Error>> {
    let source = args.keywords.as_deref().unwrap_or("-");
    let text = if source == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(source).await?
    };
    let keywords = CategorizedKeywords::from_value(&serde_json::from_str(&text)?)?;
    if keywords.is_empty() {
        warn!(source, "No keywords to route");
    }

    let api_key = args
        .serper_api_key
        .clone()
        .ok_or("missing Serper API key (--serper-api-key or SERPER_API_KEY)")?;
    let router = ResultRouter::new(SerperGateway::new(api_key, config)?)
        .with_concurrency(config.keyword_concurrency)
        .with_artifact_path(config.raw_results_path.clone());

    Ok(router.route(&keywords).await)
}

async fn format_with<E: ContentExtractor>(
    extractor: E,
    config: &PipelineConfig,
    raw: &RawResultsByCategory,
) -> FormattedBundle {
    ResultFormatter::new(extractor)
        .with_max_content_length(config.max_content_length)
        .with_concurrency(config.enrichment_concurrency)
        .with_deadline(config.enrichment_deadline())
        .format(raw)
        .await
}
