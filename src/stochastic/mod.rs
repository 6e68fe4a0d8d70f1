use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::model::{assembler::DifferentialAssembler, snapshot::Snapshot, TransitionGraph};
use crate::trajectory::{TimeGrid, Trajectory};
use crate::{Error, Result};

pub mod channel;

use channel::ReactionChannel;

/// Produces discrete sample paths with Gillespie's direct method.
///
/// Each simulator owns its random source. Two simulators seeded alike produce
/// identical trajectories for identical inputs; the random state advances with
/// every run, so consecutive runs on one simulator give independent paths.
pub struct StochasticSimulator<R = StdRng> {
    prng: R,
}

impl StochasticSimulator<StdRng> {
    /// Seeds the simulator from a single integer.
    pub fn seeded(seed: u64) -> Self {
        Self { prng: StdRng::seed_from_u64(seed) }
    }

    /// Seeds the simulator from a raw 32 byte seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self { prng: StdRng::from_seed(seed) }
    }

    pub fn from_entropy() -> Self {
        Self { prng: StdRng::from_entropy() }
    }
}

impl<R: Rng> StochasticSimulator<R> {
    /// Uses any random source.
    pub fn with_rng(prng: R) -> Self {
        Self { prng }
    }

    /// Simulates one sample path of `graph` from `initial` and samples it on
    /// `grid`, holding the most recent state at every grid point.
    ///
    /// Every population in `initial` must be a non-negative integer. The run
    /// aborts with [`Error::NegativePopulation`] if a firing would empty a
    /// group below zero.
    pub fn simulate(&mut self, graph: &TransitionGraph, initial: &Snapshot, grid: &TimeGrid) -> Result<Trajectory> {
        for (group, population) in initial.iter() {
            if !population.is_finite() || population.fract() != 0.0 {
                return Err(Error::NonIntegerPopulation { group: group.to_string(), population });
            }
            if population < 0.0 {
                return Err(Error::NegativePopulation { group: group.to_string(), time: 0.0 });
            }
        }

        let assembler = DifferentialAssembler::new(graph).with_background(initial);
        let mut state = assembler.state_from(initial)?;
        let channels = channel::channels(graph);
        let mut propensities = vec![0.0; channels.len()];

        let times = grid.times();
        let mut trajectory = Trajectory::with_capacity(graph.groups(), times.len());
        let mut next_sample = 0;
        let mut t = 0.0;
        let mut events = 0usize;

        debug!("simulating {} channels, {} samples up to t = {}", channels.len(), times.len(), grid.duration());

        loop {
            assembler.rates(&state, &mut propensities)?;
            let total = total_propensity(&channels, &propensities)?;
            if total <= 0.0 {
                debug!("absorbing state reached at t = {} after {} events", t, events);
                break;
            }

            // Exponential waiting time; 1 - u lies in (0, 1].
            let u: f64 = self.prng.gen();
            let t_next = t - (1.0 - u).ln() / total;

            while next_sample < times.len() && times[next_sample] < t_next {
                trajectory.record(times[next_sample], &state);
                next_sample += 1;
            }
            if next_sample == times.len() {
                break;
            }

            let fired = self.pick_channel(&channels, &propensities, total);
            if let Err(group) = fired.apply(&mut state) {
                return Err(Error::NegativePopulation {
                    group: graph.groups()[group].clone(),
                    time: t_next,
                });
            }
            t = t_next;
            events += 1;
        }

        while next_sample < times.len() {
            trajectory.record(times[next_sample], &state);
            next_sample += 1;
        }

        debug!("stochastic run finished after {} events", events);
        Ok(trajectory)
    }

    /// Selects a channel with probability proportional to its propensity.
    fn pick_channel<'c>(&mut self, channels: &'c [ReactionChannel], propensities: &[f64], total: f64) -> &'c ReactionChannel {
        let mut index = self.prng.gen::<f64>() * total;
        let mut chosen = None;

        for channel in channels {
            let propensity = propensities[channel.edge()];
            if propensity <= 0.0 {
                continue;
            }
            chosen = Some(channel);
            if propensity > index {
                break;
            }
            index -= propensity;
        }

        // `total > 0` guarantees at least one positive propensity; rounding can
        // only leave `index` past the end, in which case the last one is kept.
        chosen.unwrap_or(&channels[channels.len() - 1])
    }
}

fn total_propensity(channels: &[ReactionChannel], propensities: &[f64]) -> Result<f64> {
    let mut total = 0.0;
    for channel in channels {
        let propensity = propensities[channel.edge()];
        if !(propensity >= 0.0) || !propensity.is_finite() {
            return Err(Error::InvalidRateLaw(format!(
                "channel {} has propensity {}",
                channel, propensity
            )));
        }
        total += propensity;
    }
    Ok(total)
}
