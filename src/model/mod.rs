use std::collections::HashMap;
use std::fmt::Display;

use rate_law::RateLaw;
use snapshot::Snapshot;

use crate::{Error, Result};

pub mod assembler;
pub mod rate_law;
pub mod snapshot;

/// A directed transition between two groups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge<'g> {
    pub source: &'g str,
    pub dest: &'g str,
    pub rate_law: &'g RateLaw,
}

/// Data structure representing a compartmental model.
/// - groups
///     - the compartment names, in registration order
/// - matrix
///     - for each source group, its outgoing transitions as `(dest, rate law)`
///       in insertion order. There is at most one rate law per ordered pair.
///
/// The graph never holds a current population. Every evaluation is given a
/// [`Snapshot`] by the caller, so a built graph can be solved any number of
/// times and from several threads at once.
#[derive(Debug, Clone, Default)]
pub struct TransitionGraph {
    groups: Vec<String>,
    index: HashMap<String, usize>,
    matrix: Vec<Vec<(usize, RateLaw)>>,
}

impl TransitionGraph {
    /// Builds a graph with the given groups registered in order.
    pub fn new<I, S>(groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut graph = Self::default();
        for group in groups {
            graph.add_group(group)?;
        }
        Ok(graph)
    }

    /// Registers a new group with no transitions.
    pub fn add_group(&mut self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(Error::DuplicateGroup(name));
        }
        self.index.insert(name.clone(), self.groups.len());
        self.groups.push(name);
        self.matrix.push(Vec::new());
        Ok(())
    }

    /// Returns the registered groups in registration order.
    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn contains_group(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn index(&self) -> &HashMap<String, usize> {
        &self.index
    }

    /// Sets the transition from `source` to `dest`, replacing any existing one,
    /// and returns the replaced rate law.
    ///
    /// Both endpoints must be registered; otherwise the graph is left
    /// untouched and [`Error::UnknownGroup`] is returned.
    pub fn set_transition(&mut self, source: &str, dest: &str, rate_law: RateLaw) -> Result<Option<RateLaw>> {
        let from = self.group_index(source).ok_or_else(|| Error::UnknownGroup(source.to_string()))?;
        let to = self.group_index(dest).ok_or_else(|| Error::UnknownGroup(dest.to_string()))?;

        let row = &mut self.matrix[from];
        if let Some((_, existing)) = row.iter_mut().find(|(d, _)| *d == to) {
            return Ok(Some(std::mem::replace(existing, rate_law)));
        }
        row.push((to, rate_law));
        Ok(None)
    }

    /// Returns the transition from `source` to `dest`, if there is one.
    pub fn get_transition(&self, source: &str, dest: &str) -> Option<&RateLaw> {
        let from = self.group_index(source)?;
        let to = self.group_index(dest)?;
        self.matrix[from]
            .iter()
            .find(|(d, _)| *d == to)
            .map(|(_, law)| law)
    }

    /// Every transition ending at `group`, ordered by source group.
    pub fn inflows_of(&self, group: &str) -> Vec<&RateLaw> {
        let Some(to) = self.group_index(group) else {
            return Vec::new();
        };
        self.matrix
            .iter()
            .flat_map(|row| row.iter())
            .filter(|(d, _)| *d == to)
            .map(|(_, law)| law)
            .collect()
    }

    /// Every transition leaving `group`, in insertion order.
    pub fn outflows_of(&self, group: &str) -> Vec<&RateLaw> {
        match self.group_index(group) {
            Some(from) => self.matrix[from].iter().map(|(_, law)| law).collect(),
            None => Vec::new(),
        }
    }

    /// Net rate of change of `group` at the instant described by `snapshot`:
    /// the summed inflow rates minus the summed outflow rates.
    pub fn differential(&self, group: &str, snapshot: &Snapshot) -> Result<f64> {
        if !self.contains_group(group) {
            return Err(Error::UnknownGroup(group.to_string()));
        }

        let mut inflow = 0.0;
        for law in self.inflows_of(group) {
            inflow += law.evaluate(snapshot)?;
        }
        let mut outflow = 0.0;
        for law in self.outflows_of(group) {
            outflow += law.evaluate(snapshot)?;
        }

        Ok(inflow - outflow)
    }

    /// Iterates over every transition, by source group and then insertion order.
    pub fn edges(&self) -> impl Iterator<Item = Edge<'_>> {
        self.indexed_edges().map(move |(from, to, rate_law)| Edge {
            source: &self.groups[from],
            dest: &self.groups[to],
            rate_law,
        })
    }

    /// Same order as [`TransitionGraph::edges`], with endpoints as group indices.
    pub(crate) fn indexed_edges(&self) -> impl Iterator<Item = (usize, usize, &RateLaw)> {
        self.matrix
            .iter()
            .enumerate()
            .flat_map(|(from, row)| row.iter().map(move |(to, law)| (from, *to, law)))
    }

    pub fn edge_count(&self) -> usize {
        self.matrix.iter().map(Vec::len).sum()
    }
}

impl Display for TransitionGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines = Vec::new();
        for (from, row) in self.matrix.iter().enumerate() {
            if row.is_empty() {
                lines.push(format!("{} -> {{}}", self.groups[from]));
            }
            for (to, law) in row {
                lines.push(format!("{} -> {}: {}", self.groups[from], self.groups[*to], law));
            }
        }
        write!(f, "{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    use super::*;

    fn law(coefficient: f64, involved: &[&str], density_dependent: bool) -> RateLaw {
        RateLaw::new(coefficient, involved.iter().copied(), density_dependent).unwrap()
    }

    fn sis() -> TransitionGraph {
        let mut graph = TransitionGraph::new(["S", "I"]).unwrap();
        graph.set_transition("S", "I", law(4.0, &["S", "I"], true)).unwrap();
        graph.set_transition("I", "S", law(2.0, &["I"], false)).unwrap();
        graph
    }

    fn ring() -> TransitionGraph {
        let mut graph = TransitionGraph::new(["A", "B", "C", "D"]).unwrap();
        graph.set_transition("A", "B", RateLaw::from_factors(1.0, 2.0, Vec::<String>::new(), false).unwrap()).unwrap();
        graph.set_transition("B", "C", RateLaw::from_factors(3.0, 4.0, ["B"], false).unwrap()).unwrap();
        graph.set_transition("C", "D", RateLaw::from_factors(5.0, 6.0, ["C", "D"], false).unwrap()).unwrap();
        graph.set_transition("D", "A", RateLaw::from_factors(7.0, 8.0, ["A", "B", "C", "D"], true).unwrap()).unwrap();
        graph
    }

    #[test]
    fn registers_groups_in_order() {
        let graph = TransitionGraph::new(["A", "B", "C", "D", "E"]).unwrap();
        assert_eq!(graph.groups(), ["A", "B", "C", "D", "E"]);
        assert_eq!(graph.group_index("C"), Some(2));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn duplicate_group_is_rejected() {
        assert!(matches!(
            TransitionGraph::new(["S", "I", "S"]),
            Err(Error::DuplicateGroup(name)) if name == "S"
        ));

        let mut graph = TransitionGraph::new(["S"]).unwrap();
        assert!(matches!(graph.add_group("S"), Err(Error::DuplicateGroup(_))));
        assert_eq!(graph.groups().len(), 1);
    }

    #[test]
    fn unknown_endpoints_leave_graph_untouched() {
        let mut graph = TransitionGraph::new(["A", "B", "C"]).unwrap();
        for (source, dest) in [("A", "D"), ("E", "B"), ("E", "F")] {
            let result = graph.set_transition(source, dest, RateLaw::constant(1.0));
            assert!(matches!(result, Err(Error::UnknownGroup(_))));
        }
        assert_eq!(graph.edge_count(), 0);
        assert!(graph.outflows_of("A").is_empty());
    }

    #[test]
    fn get_transition_returns_stored_law() {
        let mut graph = TransitionGraph::new(["A", "B", "C"]).unwrap();
        graph.set_transition("A", "B", RateLaw::constant(1.0)).unwrap();
        graph.set_transition("B", "C", RateLaw::constant(3.0)).unwrap();
        graph.set_transition("C", "A", RateLaw::constant(5.0)).unwrap();

        assert_eq!(graph.get_transition("A", "B").unwrap().coefficient(), 1.0);
        assert_eq!(graph.get_transition("B", "C").unwrap().coefficient(), 3.0);
        assert_eq!(graph.get_transition("C", "A").unwrap().coefficient(), 5.0);
        assert!(graph.get_transition("B", "A").is_none());
        assert!(graph.get_transition("A", "D").is_none());
        assert!(graph.get_transition("E", "F").is_none());
    }

    #[test]
    fn set_transition_overwrites_in_place() {
        let mut graph = TransitionGraph::new(["A", "B", "C"]).unwrap();
        graph.set_transition("A", "B", RateLaw::constant(1.0)).unwrap();
        graph.set_transition("A", "C", RateLaw::constant(2.0)).unwrap();
        let previous = graph.set_transition("A", "B", RateLaw::constant(9.0)).unwrap();

        assert_eq!(previous, Some(RateLaw::constant(1.0)));
        assert_eq!(graph.edge_count(), 2);
        let outflows: Vec<f64> = graph.outflows_of("A").iter().map(|l| l.coefficient()).collect();
        assert_eq!(outflows, [9.0, 2.0]);
    }

    #[test]
    fn inflows_follow_source_order() {
        let mut graph = TransitionGraph::new(["A", "B", "C"]).unwrap();
        graph.set_transition("C", "B", RateLaw::constant(3.0)).unwrap();
        graph.set_transition("A", "B", RateLaw::constant(1.0)).unwrap();

        let inflows: Vec<f64> = graph.inflows_of("B").iter().map(|l| l.coefficient()).collect();
        assert_eq!(inflows, [1.0, 3.0]);
        assert!(graph.inflows_of("A").is_empty());
        assert!(graph.inflows_of("Z").is_empty());
    }

    #[test]
    fn self_transition_counts_both_ways() {
        let mut graph = TransitionGraph::new(["A", "B"]).unwrap();
        graph.set_transition("A", "A", RateLaw::mass_action(0.5, ["A"]).unwrap()).unwrap();
        let snapshot = Snapshot::from([("A", 10.0), ("B", 0.0)]);

        let self_loop = RateLaw::mass_action(0.5, ["A"]).unwrap();
        assert_eq!(graph.inflows_of("A"), [&self_loop]);
        assert_eq!(graph.outflows_of("A"), [&self_loop]);
        assert_eq!(graph.differential("A", &snapshot).unwrap(), 0.0);
        assert_eq!(graph.differential("B", &snapshot).unwrap(), 0.0);

        graph.set_transition("A", "B", RateLaw::constant(1.0)).unwrap();
        assert_eq!(graph.outflows_of("A").len(), 2);
        assert_eq!(graph.differential("A", &snapshot).unwrap(), -1.0);
        assert_eq!(graph.differential("B", &snapshot).unwrap(), 1.0);
    }

    #[test]
    fn sis_differential() {
        let graph = sis();
        let snapshot = Snapshot::from([("S", 990.0), ("I", 10.0)]);
        assert_relative_eq!(graph.differential("S", &snapshot).unwrap(), -19.6, max_relative = 1e-12);
        assert_relative_eq!(graph.differential("I", &snapshot).unwrap(), 19.6, max_relative = 1e-12);
    }

    #[test]
    fn ring_differential() {
        let graph = ring();
        let snapshot = Snapshot::from([("A", 10.0), ("B", 20.0), ("C", 30.0), ("D", 40.0)]);

        assert_relative_eq!(graph.differential("A", &snapshot).unwrap(), 13.44 - 2.0, max_relative = 1e-12);
        assert_relative_eq!(graph.differential("B", &snapshot).unwrap(), 2.0 - 240.0, max_relative = 1e-12);
        assert_relative_eq!(graph.differential("C", &snapshot).unwrap(), 240.0 - 36000.0, max_relative = 1e-12);
        assert_relative_eq!(graph.differential("D", &snapshot).unwrap(), 36000.0 - 13.44, max_relative = 1e-12);
    }

    #[test]
    fn closed_system_conserves_population() {
        let graph = ring();
        for snapshot in [
            Snapshot::from([("A", 10.0), ("B", 20.0), ("C", 30.0), ("D", 40.0)]),
            Snapshot::from([("A", 0.5), ("B", 7.0), ("C", 1e3), ("D", 3.0)]),
            Snapshot::from([("A", 0.0), ("B", 0.0), ("C", 0.0), ("D", 0.0)]),
        ] {
            let net: f64 = graph
                .groups()
                .iter()
                .map(|g| graph.differential(g, &snapshot).unwrap())
                .sum();
            assert_abs_diff_eq!(net, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn differential_reports_missing_population() {
        let graph = sis();
        let snapshot = Snapshot::from([("S", 990.0)]);
        assert!(matches!(graph.differential("S", &snapshot), Err(Error::UnknownGroup(name)) if name == "I"));
        assert!(matches!(graph.differential("R", &snapshot), Err(Error::UnknownGroup(name)) if name == "R"));
    }

    #[test]
    fn renders_transitions() {
        let mut graph = TransitionGraph::new(["S", "I", "R"]).unwrap();
        graph.set_transition("S", "I", RateLaw::frequency_dependent(0.35, ["S", "I"]).unwrap()).unwrap();
        graph.set_transition("I", "R", RateLaw::mass_action(0.035, ["I"]).unwrap()).unwrap();

        assert_eq!(
            graph.to_string(),
            "S -> I: 0.35 * S * I / N^1\nI -> R: 0.035 * I\nR -> {}"
        );
        let edges: Vec<(&str, &str)> = graph.edges().map(|e| (e.source, e.dest)).collect();
        assert_eq!(edges, [("S", "I"), ("I", "R")]);
    }
}
