//! Structural filtering of oversized spec text.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// Default token budget for a single spec document.
pub const DEFAULT_MAX_TOKENS: usize = 100_000;

static HEADING_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#+\s").expect("heading regex should be valid"));

static SCENARIO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(Feature|Scenario|Given|When|Then|And|But|Background|Rule)[:\s]")
        .expect("scenario regex should be valid")
});

/// Rough token estimate: four characters per token.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Keep `text` within half of `max_tokens`, or reduce it to its skeleton.
///
/// The skeleton is the leading `---` metadata block, headings, scenario
/// keyword lines and lines starting with `**`. Everything else is dropped.
pub fn filter_for_context(text: &str, max_tokens: usize) -> Cow<'_, str> {
    if estimate_tokens(text) <= max_tokens / 2 {
        return Cow::Borrowed(text);
    }

    let mut kept: Vec<&str> = Vec::new();
    let mut delimiters = 0usize;
    let mut in_metadata = false;

    for line in text.lines() {
        if line.trim_end() == "---" {
            delimiters += 1;
            if delimiters <= 2 {
                kept.push(line);
                in_metadata = delimiters == 1;
                continue;
            }
        }
        if in_metadata
            || HEADING_RE.is_match(line)
            || SCENARIO_RE.is_match(line)
            || line.starts_with("**")
        {
            kept.push(line);
        }
    }

    Cow::Owned(kept.join("\n"))
}
