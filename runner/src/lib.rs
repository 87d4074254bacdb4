//! Reliability layer and build-campaign driver for unattended agent builds.
//!
//! A campaign walks a markdown roadmap feature by feature, invoking a
//! code-generation agent for each one. The crate keeps that loop survivable:
//!
//! - **[`core`]**: Pure, deterministic logic (roadmap parsing, dependency
//!   graph validation and scheduling, context filtering, rate-limit
//!   classification, agent result parsing). No I/O.
//! - **[`io`]**: Side-effecting operations (build lock, resume state, process
//!   execution with backoff, git, parallel checks).
//!
//! [`campaign`] composes both to implement `campaign-runner run`.

pub mod campaign;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
