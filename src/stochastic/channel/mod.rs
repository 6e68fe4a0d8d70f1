use std::collections::BTreeMap;
use std::fmt::Display;

use crate::model::TransitionGraph;

/// One group's stoichiometric coefficient within a reaction channel.
#[derive(Debug, Hash, Eq, PartialEq, Clone, Copy, Ord, PartialOrd)]
pub struct Term {
    group: usize,
    coefficient: u32,
}

impl Term {
    pub fn new(group: usize, coefficient: u32) -> Self {
        Term { group, coefficient }
    }

    /// Index of the group in the graph's group order.
    pub fn group(&self) -> usize {
        self.group
    }

    pub fn coefficient(&self) -> u32 {
        self.coefficient
    }
}

/// A discrete reaction built from one graph edge.
///
/// Reactants are the groups driving the rate (plus the source, if the rate
/// does not already depend on it). Products hand every reactant back except
/// one member of the source and add one member of the destination. An
/// infection `S + I -> 2 I` therefore consumes one susceptible while the
/// infected member driving the rate is not consumed, and every firing moves
/// exactly one individual from source to destination.
#[derive(Debug, Clone, PartialEq)]
pub struct ReactionChannel {
    name: String,
    edge: usize,
    reactants: Vec<Term>,
    products: Vec<Term>,
    net_change: Vec<(usize, f64)>,
}

impl ReactionChannel {
    /// `involved` lists the indices of the rate law's involved groups that
    /// belong to the graph.
    pub(crate) fn new(name: String, edge: usize, source: usize, dest: usize, involved: &[usize]) -> Self {
        let mut reactants: Vec<Term> = involved.iter().map(|&g| Term::new(g, 1)).collect();
        if !involved.contains(&source) {
            reactants.push(Term::new(source, 1));
        }

        let mut products: Vec<Term> = Vec::with_capacity(reactants.len());
        for reactant in &reactants {
            let returned = if reactant.group == source {
                reactant.coefficient - 1
            } else {
                reactant.coefficient
            };
            if returned > 0 {
                products.push(Term::new(reactant.group, returned));
            }
        }
        match products.iter_mut().find(|term| term.group == dest) {
            Some(term) => term.coefficient += 1,
            None => products.push(Term::new(dest, 1)),
        }

        let mut balance: BTreeMap<usize, i64> = BTreeMap::new();
        for term in &products {
            *balance.entry(term.group).or_default() += i64::from(term.coefficient);
        }
        for term in &reactants {
            *balance.entry(term.group).or_default() -= i64::from(term.coefficient);
        }
        let net_change = balance
            .into_iter()
            .filter(|&(_, delta)| delta != 0)
            .map(|(group, delta)| (group, delta as f64))
            .collect();

        Self { name, edge, reactants, products, net_change }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the graph edge this channel was built from, i.e. the position
    /// of its rate in [`DifferentialAssembler::rates`](crate::model::assembler::DifferentialAssembler::rates).
    pub fn edge(&self) -> usize {
        self.edge
    }

    pub fn reactants(&self) -> &[Term] {
        &self.reactants
    }

    pub fn products(&self) -> &[Term] {
        &self.products
    }

    /// Population change per group when the channel fires: products minus
    /// reactants, in group order, without the groups that cancel out.
    pub fn net_change(&self) -> &[(usize, f64)] {
        &self.net_change
    }

    /// Fires the channel once. If a population would drop below zero the
    /// state is left untouched and the offending group index is returned.
    pub(crate) fn apply(&self, state: &mut [f64]) -> Result<(), usize> {
        if let Some(&(group, _)) = self.net_change.iter().find(|(g, delta)| state[*g] + delta < 0.0) {
            return Err(group);
        }
        for &(group, delta) in &self.net_change {
            state[group] += delta;
        }
        Ok(())
    }
}

impl Display for ReactionChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Builds one reaction channel per graph edge, in edge order.
pub fn channels(graph: &TransitionGraph) -> Vec<ReactionChannel> {
    graph
        .indexed_edges()
        .enumerate()
        .map(|(edge, (source, dest, law))| {
            let involved: Vec<usize> = law
                .involved()
                .iter()
                .filter_map(|name| graph.group_index(name))
                .collect();
            let name = format!("{}->{}", graph.groups()[source], graph.groups()[dest]);
            ReactionChannel::new(name, edge, source, dest, &involved)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::rate_law::RateLaw;

    fn sir() -> TransitionGraph {
        let mut graph = TransitionGraph::new(["S", "I", "R"]).unwrap();
        graph.set_transition("S", "I", RateLaw::frequency_dependent(0.35, ["S", "I"]).unwrap()).unwrap();
        graph.set_transition("I", "R", RateLaw::mass_action(0.035, ["I"]).unwrap()).unwrap();
        graph.set_transition("R", "S", RateLaw::constant(1.0)).unwrap();
        graph
    }

    #[test]
    fn infection_is_autocatalytic() {
        let channels = channels(&sir());
        let infection = &channels[0];

        assert_eq!(infection.name(), "S->I");
        assert_eq!(infection.reactants(), [Term::new(0, 1), Term::new(1, 1)]);
        assert_eq!(infection.products(), [Term::new(1, 2)]);
        assert_eq!(infection.net_change(), [(0, -1.0), (1, 1.0)]);
    }

    #[test]
    fn decay_and_constant_channels_consume_source() {
        let channels = channels(&sir());

        let recovery = &channels[1];
        assert_eq!(recovery.reactants(), [Term::new(1, 1)]);
        assert_eq!(recovery.products(), [Term::new(2, 1)]);

        let waning = &channels[2];
        assert_eq!(waning.reactants(), [Term::new(2, 1)]);
        assert_eq!(waning.products(), [Term::new(0, 1)]);
        assert_eq!(waning.net_change(), [(0, 1.0), (2, -1.0)]);
    }

    #[test]
    fn net_change_is_products_minus_reactants() {
        let mut graph = TransitionGraph::new(["A", "B", "C"]).unwrap();
        graph.set_transition("A", "B", RateLaw::mass_action(1.0, ["A", "B", "C"]).unwrap()).unwrap();
        graph.set_transition("B", "C", RateLaw::frequency_dependent(2.0, ["A"]).unwrap()).unwrap();
        graph.set_transition("C", "A", RateLaw::constant(0.5)).unwrap();

        for channel in channels(&graph) {
            let mut expected = [0i64; 3];
            for term in channel.products() {
                expected[term.group()] += i64::from(term.coefficient());
            }
            for term in channel.reactants() {
                expected[term.group()] -= i64::from(term.coefficient());
            }

            let mut applied = [0.0; 3];
            for &(group, delta) in channel.net_change() {
                applied[group] = delta;
            }
            assert_eq!(applied, expected.map(|d| d as f64), "{}", channel);
            assert_eq!(applied.iter().sum::<f64>(), 0.0);
        }
    }

    #[test]
    fn catalyst_is_returned_unchanged() {
        let mut graph = TransitionGraph::new(["A", "B", "C"]).unwrap();
        graph.set_transition("A", "B", RateLaw::mass_action(1.0, ["A", "C"]).unwrap()).unwrap();
        let channel = &channels(&graph)[0];

        assert_eq!(channel.reactants(), [Term::new(0, 1), Term::new(2, 1)]);
        assert_eq!(channel.products(), [Term::new(2, 1), Term::new(1, 1)]);
        assert_eq!(channel.net_change(), [(0, -1.0), (1, 1.0)]);
    }

    #[test]
    fn self_loop_changes_nothing() {
        let mut graph = TransitionGraph::new(["A"]).unwrap();
        graph.set_transition("A", "A", RateLaw::mass_action(1.0, ["A"]).unwrap()).unwrap();
        let channel = &channels(&graph)[0];

        assert!(channel.net_change().is_empty());
        let mut state = [3.0];
        channel.apply(&mut state).unwrap();
        assert_eq!(state, [3.0]);
    }

    #[test]
    fn apply_refuses_negative_population() {
        let channels = channels(&sir());
        let mut state = [10.0, 5.0, 0.0];

        channels[1].apply(&mut state).unwrap();
        assert_eq!(state, [10.0, 4.0, 1.0]);

        channels[2].apply(&mut state).unwrap();
        assert_eq!(channels[2].apply(&mut state), Err(2));
        assert_eq!(state, [11.0, 4.0, 0.0]);
    }
}
