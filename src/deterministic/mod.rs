use std::cell::RefCell;

use log::debug;
use ode_solvers::{DVector, Dopri5, System};

use crate::model::{assembler::DifferentialAssembler, snapshot::Snapshot, TransitionGraph};
use crate::trajectory::{TimeGrid, Trajectory};
use crate::{Error, Result};

type State = DVector<f64>;

/// Tolerances handed to the Dormand–Prince integrator.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOptions {
    /// Relative tolerance.
    pub rtol: f64,
    /// Absolute tolerance.
    pub atol: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self { rtol: 1e-8, atol: 1e-8 }
    }
}

impl SolverOptions {
    pub fn rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    pub fn atol(mut self, atol: f64) -> Self {
        self.atol = atol;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::IntegrationFailed { time: 0.0, reason: reason.to_string() };

        if !self.rtol.is_finite() || self.rtol <= 0.0 {
            return Err(invalid("rtol must be finite and > 0"));
        }
        if !self.atol.is_finite() || self.atol <= 0.0 {
            return Err(invalid("atol must be finite and > 0"));
        }
        Ok(())
    }
}

/// Produces continuous trajectories by integrating the graph's differential
/// system with an adaptive Dormand–Prince 5(4) scheme.
///
/// Populations are treated as non-negative reals but are not clamped: if the
/// integrator overshoots below zero the excursion shows up in the trajectory
/// as is.
#[derive(Debug, Clone, Default)]
pub struct DeterministicIntegrator {
    options: SolverOptions,
}

impl DeterministicIntegrator {
    pub fn new(options: SolverOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SolverOptions {
        &self.options
    }

    /// Integrates `graph` from `initial` and samples every group on `grid`.
    ///
    /// Every group of the graph needs a population in `initial`; populations
    /// of other names are held constant and only feed into rate laws.
    pub fn integrate(&self, graph: &TransitionGraph, initial: &Snapshot, grid: &TimeGrid) -> Result<Trajectory> {
        self.options.validate()?;

        let assembler = DifferentialAssembler::new(graph).with_background(initial);
        let y0 = assembler.state_from(initial)?;
        let times = grid.times();

        debug!(
            "integrating {} groups over {} transitions, {} samples up to t = {}",
            assembler.dimension(),
            assembler.edge_count(),
            times.len(),
            grid.duration()
        );

        let system = AssembledSystem {
            rates: RefCell::new(vec![0.0; assembler.edge_count()]),
            failure: RefCell::new(None),
            assembler,
        };
        system.check_start(&y0)?;

        let mut trajectory = Trajectory::with_capacity(graph.groups(), times.len());
        trajectory.record(times[0], &y0);
        if grid.duration() == 0.0 {
            for time in &times[1..] {
                trajectory.record(*time, &y0);
            }
            return Ok(trajectory);
        }

        // Dense output is produced every `spacing` up to the end of the run.
        // Running half a sample past the last grid point keeps that point
        // inside the output range despite rounding in the accumulated times.
        let spacing = grid.duration() / grid.steps() as f64;
        let x_end = grid.duration() + 0.5 * spacing;
        let mut stepper = Dopri5::new(
            &system,
            0.0,
            x_end,
            spacing,
            State::from_vec(y0),
            self.options.rtol,
            self.options.atol,
        );

        let outcome = stepper.integrate();
        if let Some(error) = system.failure.borrow_mut().take() {
            return Err(error);
        }
        let stats = outcome.map_err(|e| Error::IntegrationFailed {
            time: stepper.x_out().last().copied().unwrap_or(0.0),
            reason: e.to_string(),
        })?;
        debug!(
            "integration took {} evaluations, {} accepted and {} rejected steps",
            stats.num_eval, stats.accepted_steps, stats.rejected_steps
        );

        let tolerance = spacing * 1e-6;
        let mut outputs = stepper.x_out().iter().zip(stepper.y_out());
        for time in &times[1..] {
            let state = outputs
                .find(|(x, _)| **x >= *time - tolerance)
                .filter(|(x, _)| **x <= *time + tolerance)
                .map(|(_, y)| y)
                .ok_or_else(|| Error::IntegrationFailed {
                    time: *time,
                    reason: "no dense output at sample time".to_string(),
                })?;
            trajectory.record(*time, state.as_slice());
        }
        Ok(trajectory)
    }
}

/// The assembled graph as an ODE right-hand side.
///
/// `System::system` cannot fail, so an evaluation error is parked in
/// `failure`, the derivative is poisoned with NaN and the run is stopped at
/// the next output.
struct AssembledSystem<'g> {
    assembler: DifferentialAssembler<'g>,
    rates: RefCell<Vec<f64>>,
    failure: RefCell<Option<Error>>,
}

impl AssembledSystem<'_> {
    /// Evaluates the derivative once at the initial state so configuration
    /// errors surface before the integrator starts.
    fn check_start(&self, y0: &[f64]) -> Result<()> {
        let mut dydt = vec![0.0; y0.len()];
        self.assembler.assemble(y0, &mut self.rates.borrow_mut(), &mut dydt)?;
        non_finite(0.0, &dydt).map_or(Ok(()), Err)
    }
}

fn non_finite(time: f64, dydt: &[f64]) -> Option<Error> {
    dydt.iter().any(|d| !d.is_finite()).then(|| Error::IntegrationFailed {
        time,
        reason: "derivative is not finite".to_string(),
    })
}

impl System<f64, State> for &AssembledSystem<'_> {
    fn system(&self, x: f64, y: &State, dy: &mut State) {
        let evaluated = self
            .assembler
            .assemble(y.as_slice(), &mut self.rates.borrow_mut(), dy.as_mut_slice());

        let failure = match evaluated {
            Ok(()) => non_finite(x, dy.as_slice()),
            Err(error) => Some(error),
        };
        if let Some(error) = failure {
            dy.fill(f64::NAN);
            self.failure.borrow_mut().get_or_insert(error);
        }
    }

    fn solout(&mut self, _x: f64, _y: &State, _dy: &State) -> bool {
        self.failure.borrow().is_some()
    }
}
