//! I/O adapters for the reliability layer and campaign driver.

pub mod backoff;
pub mod builder;
pub mod config;
pub mod context;
pub mod cost_log;
pub mod git;
pub mod lock;
pub mod parallel;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod resume_state;
pub mod roadmap;
