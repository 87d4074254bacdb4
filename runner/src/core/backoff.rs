//! Rate-limit classification and retry delay arithmetic.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

static RATE_LIMIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rate.?limit|429|too many requests|overloaded|capacity")
        .expect("rate limit regex should be valid")
});

/// Whether a failed attempt's combined output looks like a transient
/// rate-limit/overload response.
pub fn is_rate_limited(exit_code: i32, output: &str) -> bool {
    exit_code != 0 && RATE_LIMIT_RE.is_match(output)
}

/// Delay before retry number `attempt` (1-based): `min(2^attempt, cap)`.
pub fn backoff_delay(attempt: u32, cap: Duration) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(cap)
}
