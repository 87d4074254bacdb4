//! Spec file loading bounded to a token budget.

use std::borrow::Cow;
use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::core::truncate::{estimate_tokens, filter_for_context};

/// Read `path`, reducing it to its structural skeleton when it would use more
/// than half of `max_tokens`. Missing or empty files yield an empty string.
pub fn truncate_for_context(path: &Path, max_tokens: usize) -> Result<String> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(String::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    if content.is_empty() {
        return Ok(String::new());
    }

    let filtered = filter_for_context(&content, max_tokens);
    if matches!(filtered, Cow::Owned(_)) {
        warn!(
            path = %path.display(),
            estimated_tokens = estimate_tokens(&content),
            max_tokens,
            kept_bytes = filtered.len(),
            "spec exceeds half the context budget, keeping structure only"
        );
    } else {
        debug!(path = %path.display(), "spec fits context budget");
    }
    Ok(filtered.into_owned())
}
