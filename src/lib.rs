#![doc = include_str!("../README.md")]

pub mod error;
pub mod graph;
pub mod model;

#[doc(inline)]
pub use error::AcgError;
#[doc(inline)]
pub use graph::{
    Conversion, ConversionGraph, ConversionId, Locus, LocusId, MarginalTreeBuilder, Region,
};
#[doc(inline)]
pub use model::{
    Alignment, ArgSimulator, ConstantPopulation, DnaAlignment, GcCoalescent, JukesCantor,
    LikelihoodEngine, PopulationFunction, SubstitutionModel,
};
#[doc(inline)]
pub use model::substitution::{encode_base, STATE_COUNT};

#[cfg(test)]
mod tests;
