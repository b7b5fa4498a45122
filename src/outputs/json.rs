//! JSON artifacts: the persisted raw-results mirror and the final bundle.
//!
//! # Output Structure
//!
//! ```text
//! keywords_result_dict.json        # raw results, rewritten on every route
//! output_dir/
//! └── 2025-05-06/
//!     ├── 08-15-02.json            # one bundle per run
//!     └── 19-40-55.json
//! ```

use crate::error::PipelineError;
use crate::models::{FormattedBundle, RawResultsByCategory};
use chrono::Local;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{error, info, instrument};

/// Write the routed raw results as pretty-printed JSON.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn write_raw_results(
    results: &RawResultsByCategory,
    path: &Path,
) -> Result<(), PipelineError> {
    let json = serde_json::to_string_pretty(results)
        .map_err(|e| PipelineError::Persistence(format!("serializing raw results: {e}")))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| PipelineError::Persistence(format!("{}: {e}", parent.display())))?;
    }

    fs::write(path, json)
        .await
        .map_err(|e| PipelineError::Persistence(format!("{}: {e}", path.display())))?;
    info!(entries = results.len(), "Wrote raw results artifact");
    Ok(())
}

/// Read a raw-results artifact back for replay.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn read_raw_results(path: &Path) -> Result<RawResultsByCategory, PipelineError> {
    let raw = fs::read_to_string(path)
        .await
        .map_err(|e| PipelineError::Persistence(format!("{}: {e}", path.display())))?;
    let results: RawResultsByCategory = serde_json::from_str(&raw)
        .map_err(|e| PipelineError::Persistence(format!("{}: {e}", path.display())))?;
    info!(entries = results.len(), "Loaded raw results artifact");
    Ok(results)
}

/// Write a bundle to `{output_dir}/{date}/{HH-MM-SS}.json` and return the path.
#[instrument(level = "info", skip_all, fields(output_dir = %output_dir))]
pub async fn write_bundle(
    bundle: &FormattedBundle,
    output_dir: &str,
) -> Result<PathBuf, PipelineError> {
    let json = serde_json::to_string_pretty(bundle)
        .map_err(|e| PipelineError::Persistence(format!("serializing bundle: {e}")))?;

    let now = Local::now();
    let dir = Path::new(output_dir).join(now.format("%Y-%m-%d").to_string());
    if let Err(e) = fs::create_dir_all(&dir).await {
        error!(dir = %dir.display(), error = %e, "Failed to create bundle dir");
        return Err(PipelineError::Persistence(format!("{}: {e}", dir.display())));
    }

    let path = dir.join(format!("{}.json", now.format("%H-%M-%S")));
    fs::write(&path, json)
        .await
        .map_err(|e| PipelineError::Persistence(format!("{}: {e}", path.display())))?;
    info!(path = %path.display(), "Wrote bundle");
    Ok(path)
}
