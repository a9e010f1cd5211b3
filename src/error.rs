//! Typed failure modes of the ARG engine.
//!
//! Most fallible APIs return [`color_eyre::Report`]; the variants below are the
//! structured kinds a driver needs to tell apart, and can be recovered from a
//! [`Report`](color_eyre::Report) by downcasting.

use thiserror::Error;

/// A structural or numerical failure while editing or evaluating an ARG.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum AcgError {
    /// A proposed conversion is structurally impossible: bad heights, an
    /// out-of-range site interval, or attachment points that do not lie on a
    /// clonal-frame edge. Surfaced as a failed edit, never a crash.
    #[error("invalid conversion: {0}")]
    InvalidConversion(String),

    /// Region or marginal-tree reconstruction could not resolve a consistent
    /// topology. Fatal for the current evaluation; the driver should treat the
    /// proposal as rejected.
    #[error("partition inconsistency: {0}")]
    PartitionInconsistency(String),

    /// An intermediate probability was non-positive where the model requires it
    /// to be positive. A modeling-invariant violation, propagated as fatal.
    /// Legitimate zero-probability boundary cases yield `-inf` instead.
    #[error("numeric domain error: {0}")]
    NumericDomainError(String),
}

#[cfg(test)]
mod tests {
    use super::AcgError;
    use color_eyre::eyre::Report;

    #[test]
    fn recoverable_by_downcast() {
        let report = Report::from(AcgError::InvalidConversion("heights out of order".into()));
        let kind = report.downcast_ref::<AcgError>();
        assert!(matches!(kind, Some(AcgError::InvalidConversion(_))));
    }
}
