use super::rate_law::RateLaw;
use super::snapshot::{Snapshot, StateView};
use super::TransitionGraph;
use crate::{Error, Result};

/// Turns a [`TransitionGraph`] into the right-hand side of its differential
/// system over an indexed state vector.
///
/// Inflow and outflow sets are resolved once, as edge indices in the same
/// order [`TransitionGraph::inflows_of`] and [`TransitionGraph::outflows_of`]
/// return them, so every evaluation only walks the edge list. Both solvers
/// share this view of the graph: the integrator through [`Self::assemble`], the
/// stochastic simulator through [`Self::rates`].
pub struct DifferentialAssembler<'g> {
    graph: &'g TransitionGraph,
    laws: Vec<&'g RateLaw>,
    inflows: Vec<Vec<usize>>,
    outflows: Vec<Vec<usize>>,
    background: Snapshot,
    background_total: f64,
}

impl<'g> DifferentialAssembler<'g> {
    pub fn new(graph: &'g TransitionGraph) -> Self {
        let mut laws = Vec::with_capacity(graph.edge_count());
        let mut inflows = vec![Vec::new(); graph.groups().len()];
        let mut outflows = vec![Vec::new(); graph.groups().len()];

        for (edge, (from, to, law)) in graph.indexed_edges().enumerate() {
            laws.push(law);
            outflows[from].push(edge);
            inflows[to].push(edge);
        }

        Self {
            graph,
            laws,
            inflows,
            outflows,
            background: Snapshot::new(),
            background_total: 0.0,
        }
    }

    /// Keeps the populations of `snapshot` that belong to no graph group as a
    /// constant background. They can appear in rate laws and count towards
    /// the total population but never change.
    pub fn with_background(mut self, snapshot: &Snapshot) -> Self {
        self.background = snapshot
            .iter()
            .filter(|(name, _)| !self.graph.contains_group(name))
            .collect();
        self.background_total = self.background.total();
        self
    }

    pub fn graph(&self) -> &'g TransitionGraph {
        self.graph
    }

    /// Number of groups, i.e. the length of every state vector.
    pub fn dimension(&self) -> usize {
        self.inflows.len()
    }

    /// Extracts the state vector, in group order, from a snapshot.
    ///
    /// Every group of the graph needs a population.
    pub fn state_from(&self, snapshot: &Snapshot) -> Result<Vec<f64>> {
        self.graph
            .groups()
            .iter()
            .map(|group| {
                snapshot
                    .get(group)
                    .ok_or_else(|| Error::UnknownGroup(group.clone()))
            })
            .collect()
    }

    /// Evaluates every edge's rate law, in edge order, into `rates`.
    pub fn rates(&self, state: &[f64], rates: &mut [f64]) -> Result<()> {
        let view = self.view(state);
        for (rate, law) in rates.iter_mut().zip(&self.laws) {
            *rate = law.evaluate(&view)?;
        }
        Ok(())
    }

    /// Net rate of change of the group at `group` given the edge rates
    /// produced by [`Self::rates`].
    pub fn differential(&self, group: usize, rates: &[f64]) -> f64 {
        let inflow: f64 = self.inflows[group].iter().map(|&e| rates[e]).sum();
        let outflow: f64 = self.outflows[group].iter().map(|&e| rates[e]).sum();
        inflow - outflow
    }

    /// Writes the full right-hand side `dy/dt` for `state` into `dydt`, using
    /// `rates` as scratch space for the per-edge rates.
    pub fn assemble(&self, state: &[f64], rates: &mut [f64], dydt: &mut [f64]) -> Result<()> {
        self.rates(state, rates)?;
        for (group, derivative) in dydt.iter_mut().enumerate() {
            *derivative = self.differential(group, rates);
        }
        Ok(())
    }

    pub fn edge_count(&self) -> usize {
        self.laws.len()
    }

    fn view<'s>(&'s self, state: &'s [f64]) -> StateView<'s> {
        StateView::new(self.graph.index(), state, &self.background, self.background_total)
    }
}
