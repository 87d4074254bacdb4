//! Stable exit codes for `campaign-runner` commands.

/// Command succeeded, or the campaign built every pending feature.
pub const OK: i32 = 0;
/// Invalid config, roadmap, resume state, or any other error.
pub const INVALID: i32 = 1;
/// Another live process holds the build lock.
pub const LOCK_CONTENTION: i32 = 2;
/// The roadmap dependency graph contains a cycle.
pub const CIRCULAR_DEPENDENCY: i32 = 3;
/// The agent failed a feature, or one attempt overran its timeout.
pub const FEATURE_FAILED: i32 = 4;
/// The agent stayed rate limited through every retry.
pub const RATE_LIMITED: i32 = 5;
