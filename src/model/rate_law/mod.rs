use std::fmt::Display;

use super::snapshot::Populations;
use crate::{Error, Result};

/// The instantaneous rate of a single transition under mass-action kinetics.
///
/// The rate is `coefficient * ∏ population(v)` over the involved groups. A
/// density dependent law is further divided by `N^(k - 1)`, where `N` is the
/// total population and `k` the number of involved groups, which turns the
/// product into a frequency dependent term (e.g. `β * S * I / N`).
#[derive(Debug, Clone, PartialEq)]
pub struct RateLaw {
    coefficient: f64,
    involved: Vec<String>,
    density_dependent: bool,
}

impl RateLaw {
    /// Builds a rate law.
    ///
    /// Fails with [`Error::InvalidRateLaw`] if `density_dependent` is set with
    /// no involved groups, or if a group is listed twice.
    pub fn new<I, S>(coefficient: f64, involved: I, density_dependent: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let involved: Vec<String> = involved.into_iter().map(Into::into).collect();

        if density_dependent && involved.is_empty() {
            return Err(Error::InvalidRateLaw(
                "density dependence requires at least one involved group".to_string(),
            ));
        }
        for (i, name) in involved.iter().enumerate() {
            if involved[..i].contains(name) {
                return Err(Error::InvalidRateLaw(format!(
                    "group \"{}\" is involved more than once",
                    name
                )));
            }
        }

        Ok(Self { coefficient, involved, density_dependent })
    }

    /// A transition that fires at a fixed rate regardless of population.
    pub fn constant(coefficient: f64) -> Self {
        Self { coefficient, involved: Vec::new(), density_dependent: false }
    }

    /// `coefficient * ∏ involved`.
    pub fn mass_action<I, S>(coefficient: f64, involved: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(coefficient, involved, false)
    }

    /// `coefficient * ∏ involved / N^(k - 1)`.
    pub fn frequency_dependent<I, S>(coefficient: f64, involved: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(coefficient, involved, true)
    }

    /// Builds a rate law from separately authored scale and rate factors,
    /// which are collapsed into a single coefficient.
    pub fn from_factors<I, S>(alpha: f64, beta: f64, involved: I, density_dependent: bool) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(alpha * beta, involved, density_dependent)
    }

    pub fn coefficient(&self) -> f64 {
        self.coefficient
    }

    pub fn involved(&self) -> &[String] {
        &self.involved
    }

    pub fn is_density_dependent(&self) -> bool {
        self.density_dependent
    }

    /// Whether `group` multiplies into the rate.
    pub fn involves(&self, group: &str) -> bool {
        self.involved.iter().any(|name| name == group)
    }

    /// Evaluates the rate against a population snapshot.
    ///
    /// Fails with [`Error::UnknownGroup`] if an involved group has no
    /// population. A density dependent law over an empty population (total
    /// of zero) evaluates to zero.
    pub fn evaluate<P: Populations + ?Sized>(&self, populations: &P) -> Result<f64> {
        let mut product = 1.0;
        for name in &self.involved {
            let population = populations
                .population(name)
                .ok_or_else(|| Error::UnknownGroup(name.clone()))?;
            product *= population;
        }

        let exponent = self.involved.len().saturating_sub(1);
        if !self.density_dependent || exponent == 0 {
            return Ok(self.coefficient * product);
        }

        let total = populations.total();
        if total == 0.0 {
            return Ok(0.0);
        }
        Ok(self.coefficient * product / total.powi(exponent as i32))
    }
}

impl Display for RateLaw {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.coefficient)?;
        if !self.involved.is_empty() {
            write!(f, " * {}", self.involved.join(" * "))?;
            if self.density_dependent {
                write!(f, " / N^{}", self.involved.len() - 1)?;
            }
        }
        Ok(())
    }
}
