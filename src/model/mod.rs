//! Probabilistic models over conversion graphs: priors, likelihoods, simulation.

pub mod coalescent;
pub mod likelihood;
pub mod population;
pub mod simulate;
pub mod substitution;

#[doc(inline)]
pub use coalescent::GcCoalescent;
#[doc(inline)]
pub use likelihood::{Alignment, DnaAlignment, LikelihoodEngine};
#[doc(inline)]
pub use population::{ConstantPopulation, PopulationFunction};
#[doc(inline)]
pub use simulate::ArgSimulator;
#[doc(inline)]
pub use substitution::{JukesCantor, SubstitutionModel};
