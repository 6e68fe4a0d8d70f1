use std::collections::{btree_map, BTreeMap, HashMap};
use std::fmt::Display;

/// Read access to the population of every group at one instant.
///
/// Rate laws only ever read populations through this trait, so the same
/// [`RateLaw`](super::rate_law::RateLaw) can be evaluated against a caller
/// supplied [`Snapshot`] or against a solver's working state vector.
pub trait Populations {
    /// Returns the population of `group`, or `None` if it is not tracked.
    fn population(&self, group: &str) -> Option<f64>;

    /// Returns the summed population of every tracked group.
    fn total(&self) -> f64;
}

/// A mapping from group name to population at one instant.
///
/// Entries are kept sorted by name so that summing over a snapshot is
/// independent of the order in which it was built.
#[derive(PartialEq, Clone, Debug, Default)]
pub struct Snapshot {
    populations: BTreeMap<String, f64>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the population of a group and returns its previous value, if any.
    pub fn insert(&mut self, group: impl Into<String>, population: f64) -> Option<f64> {
        self.populations.insert(group.into(), population)
    }

    pub fn get(&self, group: &str) -> Option<f64> {
        self.populations.get(group).copied()
    }

    pub fn contains(&self, group: &str) -> bool {
        self.populations.contains_key(group)
    }

    pub fn len(&self) -> usize {
        self.populations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.populations.is_empty()
    }

    /// Iterates over `(group, population)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.populations.iter().map(|(name, pop)| (name.as_str(), *pop))
    }

    pub fn total(&self) -> f64 {
        self.populations.values().sum()
    }
}

impl Populations for Snapshot {
    fn population(&self, group: &str) -> Option<f64> {
        self.get(group)
    }

    fn total(&self) -> f64 {
        Snapshot::total(self)
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for Snapshot {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self {
            populations: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl<K: Into<String>, const N: usize> From<[(K, f64); N]> for Snapshot {
    fn from(entries: [(K, f64); N]) -> Self {
        entries.into_iter().collect()
    }
}

impl IntoIterator for Snapshot {
    type Item = (String, f64);
    type IntoIter = btree_map::IntoIter<String, f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.populations.into_iter()
    }
}

impl Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<String> = self
            .iter()
            .map(|(name, pop)| format!("{}: {}", name, pop))
            .collect();
        write!(f, "{{{}}}", entries.join(", "))
    }
}

/// A solver's working state seen through the [`Populations`] trait.
///
/// `values` is indexed by the graph's group order. Populations that the
/// caller supplied for groups outside the graph are held constant in
/// `background`.
pub(crate) struct StateView<'a> {
    index: &'a HashMap<String, usize>,
    values: &'a [f64],
    background: &'a Snapshot,
    background_total: f64,
}

impl<'a> StateView<'a> {
    pub(crate) fn new(
        index: &'a HashMap<String, usize>,
        values: &'a [f64],
        background: &'a Snapshot,
        background_total: f64,
    ) -> Self {
        Self { index, values, background, background_total }
    }
}

impl Populations for StateView<'_> {
    fn population(&self, group: &str) -> Option<f64> {
        match self.index.get(group) {
            Some(&i) => self.values.get(i).copied(),
            None => self.background.get(group),
        }
    }

    fn total(&self) -> f64 {
        self.values.iter().sum::<f64>() + self.background_total
    }
}
