//! Utility functions for truncation, URL inspection, and file system checks.
//!
//! This module provides helper functions used throughout the pipeline:
//! - Sentence-aware truncation for bundle fields
//! - Link validation, domain derivation, and the source-quality heuristic
//! - Log-friendly previews of long provider bodies
//! - File system validation for output directories

use crate::models::SourceQuality;
use std::error::Error;
use std::fs as stdfs;
use tokio::fs;
use tracing::{info, instrument};
use url::Url;

/// Appended when a field is hard-cut with no sentence boundary in range.
pub const ELLIPSIS: &str = "...";

/// Host substrings that mark a source as high trust.
///
/// Matched anywhere in the host, so `gorgeous.com` counts as `org`.
const HIGH_TRUST_MARKERS: &[&str] = &["gov", "edu", "org", "wikipedia", "who.int"];

const SENTENCE_BREAKS: &[&str] = &[". ", "! ", "? "];

/// Truncate text to at most `max_chars` characters, preferring to end on a
/// sentence boundary.
///
/// Text that already fits is returned as is. Otherwise the cut lands just
/// after the last `.`, `!` or `?` that is followed by a space and lies within
/// the limit. With no such boundary the text is hard-cut so that the result,
/// [`ELLIPSIS`] included, is `max_chars` long.
///
/// The result never exceeds `max_chars + ELLIPSIS.len()` characters and
/// truncating it again at the same limit returns it unchanged.
///
/// # Arguments
///
/// * `text` - The field to shorten
/// * `max_chars` - Limit in characters, not bytes
///
/// # Returns
///
/// `text` unchanged when it fits, otherwise the sentence-bounded or
/// hard-cut prefix.
///
/// # Examples
///
/// ```
/// use serp_context::utils::truncate_text;
///
/// assert_eq!(truncate_text("One. Two three four", 10), "One.");
/// assert_eq!(truncate_text("abcdefghij", 8), "abcde...");
/// ```
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    // One extra char so a break whose space sits just past the limit still counts.
    let window_end = byte_offset_of_char(text, max_chars + 1);
    let window = &text[..window_end];
    let boundary = SENTENCE_BREAKS
        .iter()
        .filter_map(|brk| window.rfind(brk))
        .max();

    if let Some(idx) = boundary {
        // The punctuation is ASCII, so idx + 1 is a char boundary.
        return text[..idx + 1].to_string();
    }

    let keep = max_chars.saturating_sub(ELLIPSIS.len());
    format!("{}{}", &text[..byte_offset_of_char(text, keep)], ELLIPSIS)
}

fn byte_offset_of_char(text: &str, n: usize) -> usize {
    text.char_indices()
        .nth(n)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// Whether `link` is an absolute `http`/`https` URL with a host.
///
/// # Arguments
///
/// * `link` - A link as reported by the search provider
///
/// # Returns
///
/// `false` for relative links, other schemes, and unparseable text.
pub fn is_absolute_http(link: &str) -> bool {
    if !(link.starts_with("http://") || link.starts_with("https://")) {
        return false;
    }
    Url::parse(link)
        .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// Host of an absolute URL with any leading `www.` removed.
///
/// The host comes from [`Url::host_str`], so any port is dropped and
/// internationalized names come back in punycode.
///
/// # Arguments
///
/// * `link` - An absolute URL
///
/// # Returns
///
/// `None` if the link does not parse or has no host.
///
/// For example: `"https://www.example.com:8443/a"` -> `"example.com"`.
pub fn domain_of(link: &str) -> Option<String> {
    let parsed = Url::parse(link).ok()?;
    let host = parsed.host_str()?;
    Some(host.strip_prefix("www.").unwrap_or(host).to_string())
}

/// Coarse trust heuristic on the link's host.
///
/// # Returns
///
/// [`SourceQuality::High`] when the lowercased host contains any of the
/// high-trust markers, [`SourceQuality::Medium`] otherwise.
pub fn assess_source_quality(link: &str) -> SourceQuality {
    let host = Url::parse(link)
        .ok()
        .and_then(|u| u.host_str().map(str::to_lowercase))
        .unwrap_or_default();

    if HIGH_TRUST_MARKERS.iter().any(|marker| host.contains(marker)) {
        SourceQuality::High
    } else {
        SourceQuality::Medium
    }
}

/// Truncate a string for logging purposes.
///
/// Long strings are truncated to `max` characters with an ellipsis and
/// byte count indicator appended.
pub fn truncate_for_log(s: &str, max: usize) -> String {
    let cut = byte_offset_of_char(s, max);
    if cut >= s.len() {
        s.to_string()
    } else {
        format!("{}…(+{} bytes)", &s[..cut], s.len() - cut)
    }
}

/// Ensure a directory exists and is writable.
///
/// This function creates the directory if it doesn't exist, then performs
/// a write test by creating and immediately deleting a scratch file.
///
/// # Errors
///
/// Returns an error if:
/// - The directory cannot be created
/// - The directory is not writable (permission denied, read-only filesystem, etc.)
#[instrument(level = "info", skip_all, fields(path = %path))]
pub async fn ensure_writable_dir(path: &str) -> Result<(), Box<dyn Error>> {
    if let Err(e) = fs::create_dir_all(path).await {
        return Err(Box::new(e));
    }
    let scratch_path = format!("{}/..__write_check__", path.trim_end_matches('/'));
    match stdfs::File::create(&scratch_path) {
        Ok(_) => {
            let _ = stdfs::remove_file(&scratch_path);
            info!("Output directory is writable");
            Ok(())
        }
        Err(e) => Err(Box::new(e)),
    }
}
