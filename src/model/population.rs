//! Demographic functions consumed by the coalescent prior.

use color_eyre::eyre::{eyre, Report, Result};
use std::fmt::Debug;

/// An effective population size trajectory through time.
///
/// Time runs backwards from the most recent sample, matching node heights.
pub trait PopulationFunction: Debug + Send + Sync {
    /// Returns the effective population size at `time` before the present.
    fn pop_size(&self, time: f64) -> f64;

    /// Returns the coalescent intensity accumulated over `[from, to]`: the
    /// integral of `1 / pop_size(t)`.
    fn intensity(&self, from: f64, to: f64) -> f64;
}

/// A constant effective population size.
///
/// ## Examples
///
/// ```rust
/// use acg::{ConstantPopulation, PopulationFunction};
/// let population = ConstantPopulation::new(2.0)?;
/// assert_eq!(population.pop_size(1.5), 2.0);
/// assert_eq!(population.intensity(1.0, 4.0), 1.5);
/// assert!(ConstantPopulation::new(0.0).is_err());
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConstantPopulation {
    size: f64,
}

impl ConstantPopulation {
    /// Returns a new constant population of the given positive size.
    pub fn new(size: f64) -> Result<Self, Report> {
        if !size.is_finite() || size <= 0.0 {
            Err(eyre!("Population size must be positive and finite, not {size}."))?
        }
        Ok(ConstantPopulation { size })
    }
}

impl PopulationFunction for ConstantPopulation {
    fn pop_size(&self, _time: f64) -> f64 {
        self.size
    }

    fn intensity(&self, from: f64, to: f64) -> f64 {
        (to - from) / self.size
    }
}
