//! Module Dependency Graph
//!
//! Modules are held by stable integer ids with a side map to their names,
//! so cycles cost nothing to represent and serialization stays compact.
//! Import targets that resolve to no known module are coerced onto a single
//! synthetic "external" node. Cycles are detected and annotated, never
//! traversed depth-unbounded.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Name of the synthetic sink for unknown import targets
pub const EXTERNAL_MODULE: &str = "external";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    /// id -> module name; ids are dense and stable for the graph's lifetime
    modules: Vec<String>,
    /// (from id, to id), deduplicated
    edges: BTreeSet<(usize, usize)>,
    /// Cycles found at annotation time, as module name lists
    #[serde(default)]
    cycles: Vec<Vec<String>>,
    #[serde(skip)]
    ids: HashMap<String, usize>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a module, returning its id.
    pub fn add_module(&mut self, name: &str) -> usize {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = self.modules.len();
        self.modules.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Add an edge. Unknown targets land on the synthetic external node.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let from_id = self.add_module(from);
        let to_id = match self.ids.get(to) {
            Some(id) => *id,
            None => self.add_module(EXTERNAL_MODULE),
        };
        if from_id != to_id {
            self.edges.insert((from_id, to_id));
        }
    }

    /// Add an edge only when the target is already a known module.
    pub fn add_edge_known(&mut self, from: &str, to: &str) -> bool {
        if self.ids.contains_key(to) {
            self.add_edge(from, to);
            true
        } else {
            self.add_edge(from, EXTERNAL_MODULE);
            false
        }
    }

    pub fn module_names(&self) -> &[String] {
        &self.modules
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Dependencies of a module, by name.
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        let Some(id) = self.ids.get(name) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter(|(from, _)| from == id)
            .map(|(_, to)| self.modules[*to].clone())
            .collect()
    }

    /// Modules depending on a module, by name.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let Some(id) = self.ids.get(name) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .filter(|(_, to)| to == id)
            .map(|(from, _)| self.modules[*from].clone())
            .collect()
    }

    /// Detect and store cycles. Iterative DFS with an explicit stack; each
    /// node is visited once, so arbitrarily tangled graphs stay bounded.
    pub fn annotate_cycles(&mut self) {
        let n = self.modules.len();
        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (from, to) in &self.edges {
            adjacency[*from].push(*to);
        }

        let mut color = vec![0u8; n]; // 0 white, 1 gray, 2 black
        let mut cycles: Vec<Vec<String>> = Vec::new();

        for start in 0..n {
            if color[start] != 0 {
                continue;
            }
            // Stack of (node, next child index), plus the gray path
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            let mut path: Vec<usize> = vec![start];
            color[start] = 1;

            while let Some((node, child_index)) = stack.last_mut() {
                if let Some(&next) = adjacency[*node].get(*child_index) {
                    *child_index += 1;
                    match color[next] {
                        0 => {
                            color[next] = 1;
                            stack.push((next, 0));
                            path.push(next);
                        }
                        1 => {
                            // Back edge: the path tail from `next` is a cycle
                            if let Some(pos) = path.iter().position(|&p| p == next) {
                                let cycle: Vec<String> = path[pos..]
                                    .iter()
                                    .map(|&id| self.modules[id].clone())
                                    .collect();
                                if !cycles.contains(&cycle) {
                                    cycles.push(cycle);
                                }
                            }
                        }
                        _ => {}
                    }
                } else {
                    color[*node] = 2;
                    stack.pop();
                    path.pop();
                }
            }
        }

        self.cycles = cycles;
    }

    pub fn cycles(&self) -> &[Vec<String>] {
        &self.cycles
    }

    /// Edge list as name pairs, for prompts and the report.
    pub fn edge_names(&self) -> Vec<(String, String)> {
        self.edges
            .iter()
            .map(|(from, to)| (self.modules[*from].clone(), self.modules[*to].clone()))
            .collect()
    }

    /// Rebuild the name index after deserialization.
    pub fn reindex(&mut self) {
        self.ids = self
            .modules
            .iter()
            .enumerate()
            .map(|(id, name)| (name.clone(), id))
            .collect();
    }

    /// Compact text rendering for LLM context:
    /// one `module -> dep, dep` line per module.
    pub fn to_prompt_lines(&self) -> String {
        let mut by_module: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (from, to) in &self.edges {
            by_module
                .entry(&self.modules[*from])
                .or_default()
                .push(&self.modules[*to]);
        }
        by_module
            .into_iter()
            .map(|(module, deps)| format!("{} -> {}", module, deps.join(", ")))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
