//! # Description
//! Population dynamics over compartmental models. A model is a set of named groups connected
//! by directed transitions whose rates follow mass-action kinetics (optionally normalised by the
//! total population). The same model can be solved two ways:
//! - deterministically, by integrating the per-group differential equations
//! - stochastically, by simulating it as a continuous-time Markov chain (Gillespie's direct method)
//!
//! Both solvers read the model and never mutate it; every run carries its own population state.
//!
//! # Usage
//! ```
//! use popdyn_engine::{DeterministicIntegrator, RateLaw, Snapshot, TimeGrid, TransitionGraph};
//!
//! let mut sir = TransitionGraph::new(["S", "I", "R"])?;
//! sir.set_transition("S", "I", RateLaw::frequency_dependent(0.35, ["S", "I"])?)?;
//! sir.set_transition("I", "R", RateLaw::mass_action(0.035, ["I"])?)?;
//!
//! let initial = Snapshot::from([("S", 85_656.0), ("I", 344.0), ("R", 0.0)]);
//! let trajectory = DeterministicIntegrator::default()
//!     .integrate(&sir, &initial, &TimeGrid::per_unit(100.0)?)?;
//! assert_eq!(trajectory.len(), 101);
//! # Ok::<(), popdyn_engine::Error>(())
//! ```
//!
//! Many stochastic trials of one model can be run and averaged on a thread pool through
//! [`Builder`] and [`Engine`].

pub mod deterministic;
pub mod model;
pub mod parser;
pub mod stochastic;
pub mod trajectory;

use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;
use threadpool::ThreadPool;

pub use deterministic::{DeterministicIntegrator, SolverOptions};
pub use model::{rate_law::RateLaw, snapshot::Populations, snapshot::Snapshot, Edge, TransitionGraph};
pub use stochastic::StochasticSimulator;
pub use trajectory::{TimeGrid, Trajectory};

/// Error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown group \"{0}\"")]
    UnknownGroup(String),

    #[error("invalid rate law: {0}")]
    InvalidRateLaw(String),

    #[error("group \"{0}\" is already registered")]
    DuplicateGroup(String),

    #[error("population of group \"{group}\" must be a whole number, got {population}")]
    NonIntegerPopulation { group: String, population: f64 },

    #[error("population of group \"{group}\" would become negative at t = {time}")]
    NegativePopulation { group: String, time: f64 },

    #[error("invalid time grid: {0}")]
    InvalidTimeGrid(String),

    #[error("integration failed at t = {time}: {reason}")]
    IntegrationFailed { time: f64, reason: String },

    #[error("line {line}: {reason}")]
    InvalidRecord { line: u64, reason: String },

    #[error("trial worker disconnected before reporting")]
    EngineDisconnected,

    #[error("no trial completed")]
    NoCompletedTrials,

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

type TrialID = usize;

/// What a trial sends back to the engine.
struct TrialResult {
    id: TrialID,
    seed: u64,
    outcome: Result<Trajectory>,
}

/// Averaged outcome of an ensemble of stochastic trials.
#[derive(Debug, Clone)]
pub struct EnsembleSummary {
    /// Per-sample mean over every completed trial.
    pub mean: Trajectory,
    /// Number of trials that completed.
    pub completed: usize,
    /// Seed of the first trial; trial `n` was seeded with `base_seed + n`.
    pub base_seed: u64,
    /// Individual trajectories in trial order, if requested with [`Builder::keep_trajectories`].
    pub trajectories: Vec<Trajectory>,
}

/// This is a builder object containing defaults and methods for constructing an [`Engine`].
pub struct Builder {
    // set externally
    num_trials: usize,
    max_runtime: Option<u64>,
    num_threads: Option<usize>,
    base_seed: Option<u64>,
    keep_trajectories: bool,

    // model
    graph: Arc<TransitionGraph>,
    initial: Snapshot,
    grid: TimeGrid,
}

impl Builder {
    /// Starts an ensemble over `graph` with default values
    ///
    /// trials = 100
    /// runtime = unlimited
    /// threads = one per CPU
    /// seed = random
    pub fn new(graph: impl Into<Arc<TransitionGraph>>, initial: Snapshot, grid: TimeGrid) -> Self {
        Self {
            num_trials: 100,
            max_runtime: None,
            num_threads: None,
            base_seed: None,
            keep_trajectories: false,
            graph: graph.into(),
            initial,
            grid,
        }
    }

    /// Sets the number of trials to be executed
    pub fn trials(mut self, count: usize) -> Self {
        self.num_trials = count;
        self
    }

    /// Sets the maximum time in seconds to wait for trial results
    pub fn runtime(mut self, seconds: u64) -> Self {
        self.max_runtime = Some(seconds);
        self
    }

    /// Sets the number of worker threads
    pub fn threads(mut self, count: usize) -> Self {
        self.num_threads = Some(count.max(1));
        self
    }

    /// Fixes the seed of the first trial, making the ensemble reproducible
    pub fn seed(mut self, seed: u64) -> Self {
        self.base_seed = Some(seed);
        self
    }

    /// Keeps every trial's trajectory in the summary
    pub fn keep_trajectories(mut self) -> Self {
        self.keep_trajectories = true;
        self
    }

    /// Consumes builder object and outputs an engine
    pub fn build(self) -> Engine {
        let mut pool = threadpool::Builder::new().thread_name("PopdynTrialThread".to_string());
        if let Some(count) = self.num_threads {
            pool = pool.num_threads(count);
        }

        Engine {
            num_trials: self.num_trials,
            max_runtime: self.max_runtime,
            base_seed: self.base_seed.unwrap_or_else(rand::random),
            keep_trajectories: self.keep_trajectories,
            computation_threads: pool.build(),
            graph: self.graph,
            initial: self.initial,
            grid: self.grid,
        }
    }
}

/// Runs many independent stochastic trials of one model on a thread pool and
/// averages them.
pub struct Engine {
    num_trials: usize,
    max_runtime: Option<u64>,
    base_seed: u64,
    keep_trajectories: bool,
    computation_threads: ThreadPool,
    graph: Arc<TransitionGraph>,
    initial: Snapshot,
    grid: TimeGrid,
}

impl Engine {
    pub fn base_seed(&self) -> u64 {
        self.base_seed
    }

    /// Simulates every trial and returns their per-sample mean.
    ///
    /// The first failing trial aborts the run with its error. If a runtime
    /// limit is set and elapses, the trials received so far are averaged.
    pub fn run(&self) -> Result<EnsembleSummary> {
        let (sender, receiver) = sync_channel(32);

        for id in 0..self.num_trials {
            self.spawn_trial(id, sender.clone());
        }
        drop(sender);

        let slots = self.collect(receiver)?;
        let trajectories: Vec<Trajectory> = slots.into_iter().flatten().collect();
        let completed = trajectories.len();
        let mean = Trajectory::mean(&trajectories).ok_or(Error::NoCompletedTrials)?;

        info!("averaged {} of {} trials", completed, self.num_trials);
        Ok(EnsembleSummary {
            mean,
            completed,
            base_seed: self.base_seed,
            trajectories: if self.keep_trajectories { trajectories } else { Vec::new() },
        })
    }

    fn spawn_trial(&self, id: TrialID, sender: SyncSender<TrialResult>) {
        let graph = Arc::clone(&self.graph);
        let initial = self.initial.clone();
        let grid = self.grid;
        let seed = self.base_seed.wrapping_add(id as u64);

        self.computation_threads.execute(move || {
            let outcome = StochasticSimulator::seeded(seed).simulate(&graph, &initial, &grid);
            if sender.send(TrialResult { id, seed, outcome }).is_err() {
                debug!("trial {} finished after the engine stopped listening", id);
            }
        });
    }

    /// Receives trial results into slots indexed by trial id, so the mean is
    /// summed in the same order however the threads interleave.
    fn collect(&self, receiver: Receiver<TrialResult>) -> Result<Vec<Option<Trajectory>>> {
        let deadline = self.max_runtime.map(|secs| Instant::now() + Duration::from_secs(secs));
        let mut slots: Vec<Option<Trajectory>> = vec![None; self.num_trials];
        let mut trials_received = 0;

        while trials_received < self.num_trials {
            let result = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    match receiver.recv_timeout(remaining) {
                        Ok(result) => result,
                        Err(RecvTimeoutError::Timeout) => {
                            warn!(
                                "forced termination because max time was reached after {} of {} trials; results may not be accurate",
                                trials_received, self.num_trials
                            );
                            break;
                        }
                        Err(RecvTimeoutError::Disconnected) => return Err(Error::EngineDisconnected),
                    }
                }
                None => receiver.recv().map_err(|_| Error::EngineDisconnected)?,
            };

            match result.outcome {
                Ok(trajectory) => {
                    trials_received += 1;
                    debug!("trial {} (seed {}) finished", result.id, result.seed);
                    info!("received {} trials", trials_received);
                    slots[result.id] = Some(trajectory);
                }
                Err(error) => {
                    warn!("trial {} (seed {}) failed: {}", result.id, result.seed, error);
                    return Err(error);
                }
            }
        }

        Ok(slots)
    }
}
