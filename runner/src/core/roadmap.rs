//! Roadmap table parsing.
//!
//! Rows look like `| id | name | source | tracker | complexity | deps | status |`.
//! Only lines whose first cell is a number are treated as rows; headers,
//! separators and prose are ignored.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::FeatureStatus;
use crate::error::ReliabilityError;

static ROW_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|\s*\d+\s*\|").expect("row regex should be valid"));

/// Cells produced by `str::split('|')` for a complete row, counting the empty
/// cell before the leading pipe.
const MIN_CELLS: usize = 8;

/// One parsed roadmap row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoadmapRow {
    pub id: u32,
    pub name: String,
    pub complexity: String,
    /// Declared dependency ids, deduplicated, in declaration order.
    pub dependencies: Vec<u32>,
    pub status: FeatureStatus,
}

/// All rows of a roadmap document, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roadmap {
    rows: Vec<RoadmapRow>,
}

impl Roadmap {
    pub fn new(rows: Vec<RoadmapRow>) -> Self {
        Self { rows }
    }

    /// Parse every table row of `text`.
    ///
    /// A line that starts like a row but is missing columns, or repeats an id,
    /// is rejected rather than skipped.
    pub fn parse(text: &str) -> Result<Self, ReliabilityError> {
        let mut rows = Vec::new();
        let mut seen = HashSet::new();
        for (idx, line) in text.lines().enumerate() {
            if !ROW_RE.is_match(line) {
                continue;
            }
            let row = parse_row(idx + 1, line)?;
            if !seen.insert(row.id) {
                return Err(ReliabilityError::MalformedRoadmapRow {
                    line: idx + 1,
                    reason: format!("duplicate feature id {}", row.id),
                });
            }
            rows.push(row);
        }
        Ok(Self { rows })
    }

    pub fn rows(&self) -> &[RoadmapRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn parse_row(line_no: usize, line: &str) -> Result<RoadmapRow, ReliabilityError> {
    let cells: Vec<&str> = line.split('|').map(str::trim).collect();
    if cells.len() < MIN_CELLS {
        return Err(ReliabilityError::MalformedRoadmapRow {
            line: line_no,
            reason: format!("expected 7 columns, found {}", cells.len().saturating_sub(1)),
        });
    }
    let id = cells[1]
        .parse::<u32>()
        .map_err(|err| ReliabilityError::MalformedRoadmapRow {
            line: line_no,
            reason: format!("invalid id '{}': {err}", cells[1]),
        })?;
    let dependencies = parse_dependencies(cells[6]).map_err(|reason| {
        ReliabilityError::MalformedRoadmapRow {
            line: line_no,
            reason,
        }
    })?;
    Ok(RoadmapRow {
        id,
        name: cells[2].to_string(),
        complexity: cells[5].to_string(),
        dependencies,
        status: FeatureStatus::from_cell(cells[7]),
    })
}

/// Reduce a dependency cell to ids.
///
/// `-` or empty means none. Each comma-separated entry keeps only its digits;
/// entries with no digits are dropped.
pub fn parse_dependencies(cell: &str) -> Result<Vec<u32>, String> {
    let cell = cell.trim();
    if cell.is_empty() || cell == "-" {
        return Ok(Vec::new());
    }
    let mut deps = Vec::new();
    for part in cell.split(',') {
        let digits: String = part.chars().filter(char::is_ascii_digit).collect();
        if digits.is_empty() {
            continue;
        }
        let id = digits
            .parse::<u32>()
            .map_err(|err| format!("invalid dependency '{}': {err}", part.trim()))?;
        if !deps.contains(&id) {
            deps.push(id);
        }
    }
    Ok(deps)
}
