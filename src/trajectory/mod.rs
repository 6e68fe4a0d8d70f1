use std::io;

use crate::model::snapshot::Snapshot;
use crate::{Error, Result};

/// Largest number of steps a [`TimeGrid`] may have.
pub const MAX_STEPS: usize = 10_000_000;

/// Evenly spaced sample times from `0` to `duration` inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeGrid {
    duration: f64,
    steps: usize,
}

impl TimeGrid {
    /// A grid of `steps + 1` points spanning `[0, duration]`.
    pub fn new(duration: f64, steps: usize) -> Result<Self> {
        if !duration.is_finite() || duration < 0.0 {
            return Err(Error::InvalidTimeGrid(format!(
                "duration must be finite and non-negative, got {}",
                duration
            )));
        }
        if steps == 0 {
            return Err(Error::InvalidTimeGrid("at least one step is required".to_string()));
        }
        if steps > MAX_STEPS {
            return Err(Error::InvalidTimeGrid(format!(
                "{} steps requested, at most {} are allowed",
                steps, MAX_STEPS
            )));
        }
        Ok(Self { duration, steps })
    }

    /// One sample per unit of time, i.e. `duration + 1` points. A fractional
    /// duration is rounded up to the next whole number of steps.
    pub fn per_unit(duration: f64) -> Result<Self> {
        if !duration.is_finite() || duration <= 0.0 {
            return Self::new(duration, 1);
        }
        if duration.ceil() > MAX_STEPS as f64 {
            return Err(Error::InvalidTimeGrid(format!(
                "a duration of {} needs more than {} unit steps",
                duration, MAX_STEPS
            )));
        }
        Self::new(duration, duration.ceil() as usize)
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Number of sample points.
    pub fn len(&self) -> usize {
        self.steps + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Time of the `k`th sample. The last sample lands exactly on `duration`.
    pub fn time(&self, k: usize) -> f64 {
        if k >= self.steps {
            self.duration
        } else {
            self.duration * k as f64 / self.steps as f64
        }
    }

    pub fn times(&self) -> Vec<f64> {
        (0..self.len()).map(|k| self.time(k)).collect()
    }
}

/// Per-group time series produced by a solver.
///
/// Every series has one value per entry of [`Trajectory::times`].
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    groups: Vec<String>,
    times: Vec<f64>,
    series: Vec<Vec<f64>>,
}

impl Trajectory {
    pub(crate) fn with_capacity(groups: &[String], capacity: usize) -> Self {
        Self {
            groups: groups.to_vec(),
            times: Vec::with_capacity(capacity),
            series: vec![Vec::with_capacity(capacity); groups.len()],
        }
    }

    /// Appends one sample; `state` is in group order.
    pub(crate) fn record(&mut self, time: f64, state: &[f64]) {
        self.times.push(time);
        for (series, value) in self.series.iter_mut().zip(state) {
            series.push(*value);
        }
    }

    /// Per-sample arithmetic mean of trajectories sharing groups and time axis.
    /// Returns `None` for an empty slice.
    pub(crate) fn mean(trajectories: &[Trajectory]) -> Option<Trajectory> {
        let first = trajectories.first()?;
        let count = trajectories.len() as f64;

        let mut mean = first.clone();
        for other in &trajectories[1..] {
            for (sum, series) in mean.series.iter_mut().zip(&other.series) {
                for (total, value) in sum.iter_mut().zip(series) {
                    *total += value;
                }
            }
        }
        for series in &mut mean.series {
            for total in series.iter_mut() {
                *total /= count;
            }
        }
        Some(mean)
    }

    pub fn groups(&self) -> &[String] {
        &self.groups
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// The samples of one group, if it is part of this trajectory.
    pub fn series(&self, group: &str) -> Option<&[f64]> {
        let index = self.groups.iter().position(|g| g == group)?;
        Some(&self.series[index])
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Populations at the `k`th sample.
    pub fn at(&self, k: usize) -> Option<Snapshot> {
        if k >= self.len() {
            return None;
        }
        Some(
            self.groups
                .iter()
                .zip(&self.series)
                .map(|(group, series)| (group.clone(), series[k]))
                .collect(),
        )
    }

    /// Populations at the last sample.
    pub fn final_state(&self) -> Snapshot {
        self.len()
            .checked_sub(1)
            .and_then(|last| self.at(last))
            .unwrap_or_default()
    }

    /// Writes the trajectory as CSV: a `time,<group>...` header followed by
    /// one record per sample.
    pub fn write_csv<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        let mut header = vec!["time"];
        header.extend(self.groups.iter().map(String::as_str));
        csv_writer.write_record(&header)?;

        for (k, time) in self.times.iter().enumerate() {
            let mut record = Vec::with_capacity(self.groups.len() + 1);
            record.push(time.to_string());
            record.extend(self.series.iter().map(|series| series[k].to_string()));
            csv_writer.write_record(&record)?;
        }

        csv_writer.flush()?;
        Ok(())
    }
}
