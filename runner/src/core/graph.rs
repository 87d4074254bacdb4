//! Dependency graph validation and scheduling over a parsed roadmap.
//!
//! Cycle detection looks at every declared edge regardless of status, while
//! scheduling only orders pending rows against other pending rows. Scheduling
//! is reachable only through [`ValidatedRoadmap`], so a cycle can never turn
//! into a silently truncated schedule.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::roadmap::Roadmap;
use crate::core::types::{Feature, FeatureStatus};
use crate::error::ReliabilityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// A roadmap whose full declared dependency graph is known to be acyclic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRoadmap {
    roadmap: Roadmap,
}

impl Roadmap {
    /// Run cycle detection over every declared edge.
    pub fn validate(self) -> Result<ValidatedRoadmap, ReliabilityError> {
        if let Some(cycle) = find_cycle(&self) {
            return Err(ReliabilityError::CircularDependency {
                cycle: cycle.iter().map(u32::to_string).collect(),
            });
        }
        Ok(ValidatedRoadmap { roadmap: self })
    }
}

impl ValidatedRoadmap {
    pub fn roadmap(&self) -> &Roadmap {
        &self.roadmap
    }

    /// Pending features in dependency order (Kahn's algorithm).
    ///
    /// Edges to completed or non-pending rows are dropped before counting
    /// in-degrees. Ties keep roadmap order, and nodes become ready in the order
    /// their last pending dependency is emitted.
    pub fn topo_order(&self) -> Vec<Feature> {
        let rows = self.roadmap.rows();
        let pending: Vec<_> = rows
            .iter()
            .filter(|row| row.status == FeatureStatus::Pending)
            .collect();
        let pending_ids: HashSet<u32> = pending.iter().map(|row| row.id).collect();

        let pending_deps: HashMap<u32, Vec<u32>> = pending
            .iter()
            .map(|row| {
                let deps = row
                    .dependencies
                    .iter()
                    .copied()
                    .filter(|dep| pending_ids.contains(dep))
                    .collect();
                (row.id, deps)
            })
            .collect();
        let mut in_degree: HashMap<u32, usize> = pending_deps
            .iter()
            .map(|(id, deps)| (*id, deps.len()))
            .collect();

        let mut queue: VecDeque<u32> = pending
            .iter()
            .map(|row| row.id)
            .filter(|id| in_degree[id] == 0)
            .collect();
        let mut order = Vec::with_capacity(pending.len());

        while let Some(current) = queue.pop_front() {
            order.push(current);
            for row in &pending {
                if !pending_deps[&row.id].contains(&current) {
                    continue;
                }
                if let Some(degree) = in_degree.get_mut(&row.id) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(row.id);
                    }
                }
            }
        }

        order
            .into_iter()
            .filter_map(|id| pending.iter().find(|row| row.id == id))
            .map(|row| Feature {
                id: row.id,
                name: row.name.clone(),
                complexity: row.complexity.clone(),
            })
            .collect()
    }
}

/// Iterative three-color DFS. Returns the first cycle found as `a -> ... -> a`.
fn find_cycle(roadmap: &Roadmap) -> Option<Vec<u32>> {
    let mut adjacency: HashMap<u32, &[u32]> = HashMap::new();
    let mut nodes: Vec<u32> = Vec::new();
    let mut seen = HashSet::new();
    for row in roadmap.rows() {
        if row.dependencies.is_empty() {
            continue;
        }
        adjacency.insert(row.id, &row.dependencies);
        for id in std::iter::once(row.id).chain(row.dependencies.iter().copied()) {
            if seen.insert(id) {
                nodes.push(id);
            }
        }
    }

    let mut color: HashMap<u32, Color> = nodes.iter().map(|id| (*id, Color::White)).collect();

    for &start in &nodes {
        if color[&start] != Color::White {
            continue;
        }
        // Each frame is (node, index of the next neighbor to visit).
        let mut stack: Vec<(u32, usize)> = vec![(start, 0)];
        color.insert(start, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let (node, next) = *frame;
            let neighbors = adjacency.get(&node).copied().unwrap_or(&[]);
            if next >= neighbors.len() {
                color.insert(node, Color::Black);
                stack.pop();
                continue;
            }
            frame.1 += 1;
            let neighbor = neighbors[next];
            match color.get(&neighbor).copied().unwrap_or(Color::White) {
                Color::Gray => {
                    let from = stack
                        .iter()
                        .position(|(id, _)| *id == neighbor)
                        .unwrap_or(0);
                    let mut cycle: Vec<u32> = stack[from..].iter().map(|(id, _)| *id).collect();
                    cycle.push(neighbor);
                    return Some(cycle);
                }
                Color::White => {
                    color.insert(neighbor, Color::Gray);
                    stack.push((neighbor, 0));
                }
                Color::Black => {}
            }
        }
    }
    None
}
