//! Dependency graph over annotation names

use std::collections::BTreeMap;

/// Predecessors of one annotation, split by where they come from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predecessors {
    /// Ingested before this run
    pub logged: Vec<String>,
    /// Produced by rules during this run
    pub new: Vec<String>,
}

impl Predecessors {
    pub fn is_empty(&self) -> bool {
        self.logged.is_empty() && self.new.is_empty()
    }

    fn add_logged(&mut self, name: &str) {
        if !self.logged.iter().any(|n| n == name) {
            self.logged.push(name.to_string());
        }
    }

    fn add_new(&mut self, name: &str) {
        if !self.new.iter().any(|n| n == name) {
            self.new.push(name.to_string());
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Open,
    Closed,
}

/// For each annotation produced in this run, which annotations gate it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Predecessors>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as a node, keeping any predecessors already recorded
    pub fn add_node(&mut self, name: &str) {
        self.nodes.entry(name.to_string()).or_default();
    }

    pub fn add_logged(&mut self, name: &str, predecessor: &str) {
        self.nodes
            .entry(name.to_string())
            .or_default()
            .add_logged(predecessor);
    }

    pub fn add_new(&mut self, name: &str, predecessor: &str) {
        self.nodes
            .entry(name.to_string())
            .or_default()
            .add_new(predecessor);
    }

    pub fn predecessors(&self, name: &str) -> Option<&Predecessors> {
        self.nodes.get(name)
    }

    /// An annotation without recorded predecessors is always eligible
    pub fn is_unconstrained(&self, name: &str) -> bool {
        self.nodes.get(name).map_or(true, Predecessors::is_empty)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Predecessors)> {
        self.nodes.iter().map(|(name, preds)| (name.as_str(), preds))
    }

    /// A chain of `new` predecessors leading back to where it started, if any
    ///
    /// The path runs from a dependent to its predecessors and repeats its first name at
    /// the end, e.g. `["a", "b", "a"]` when `a` waits for `b` and `b` for `a`.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visits = BTreeMap::new();
        let mut path = Vec::new();
        self.nodes
            .keys()
            .find_map(|name| self.visit(name, &mut visits, &mut path))
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        visits: &mut BTreeMap<&'a str, Visit>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match visits.get(name) {
            Some(Visit::Closed) => return None,
            Some(Visit::Open) => {
                let from = path.iter().position(|n| *n == name).unwrap_or(0);
                let mut cycle: Vec<String> = path[from..].iter().map(|n| n.to_string()).collect();
                cycle.push(name.to_string());
                return Some(cycle);
            }
            None => {}
        }

        visits.insert(name, Visit::Open);
        path.push(name);
        if let Some(predecessors) = self.nodes.get(name) {
            for predecessor in &predecessors.new {
                if let Some(cycle) = self.visit(predecessor, visits, path) {
                    return Some(cycle);
                }
            }
        }
        path.pop();
        visits.insert(name, Visit::Closed);
        None
    }
}
