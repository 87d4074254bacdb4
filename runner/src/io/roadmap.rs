//! File-level entry points for roadmap validation and scheduling.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::graph::ValidatedRoadmap;
use crate::core::roadmap::Roadmap;
use crate::core::types::Feature;

/// Read and parse a roadmap. A missing file is an empty roadmap.
pub fn load_roadmap(path: &Path) -> Result<Roadmap> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "roadmap missing, treating as empty");
            return Ok(Roadmap::default());
        }
        Err(err) => return Err(err).with_context(|| format!("read roadmap {}", path.display())),
    };
    let roadmap =
        Roadmap::parse(&text).with_context(|| format!("parse roadmap {}", path.display()))?;
    debug!(path = %path.display(), rows = roadmap.rows().len(), "roadmap loaded");
    Ok(roadmap)
}

/// Load and validate in one step.
pub fn load_validated(path: &Path) -> Result<ValidatedRoadmap> {
    let roadmap = load_roadmap(path)?;
    let validated = roadmap
        .validate()
        .with_context(|| format!("validate roadmap {}", path.display()))?;
    Ok(validated)
}

/// Fail with a circular dependency error if any declared edges form a cycle.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn check_circular_deps(path: &Path) -> Result<()> {
    load_validated(path)?;
    info!("no circular dependencies");
    Ok(())
}

/// Pending features in dependency order. Validates first, so a cycle is an
/// error rather than a shortened schedule.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn emit_topo_order(path: &Path) -> Result<Vec<Feature>> {
    let order = load_validated(path)?.topo_order();
    info!(pending = order.len(), "computed build order");
    Ok(order)
}
