use crate::graph::locus::LocusId;

use petgraph::graph::NodeIndex;
use serde::{Deserialize, Serialize};

/// Identifies a [`Conversion`] inside one [`ConversionGraph`](crate::ConversionGraph).
///
/// Ids come from an insertion counter and are never reused, which gives every
/// sort order over conversions a deterministic tie-break.
pub type ConversionId = usize;

/// One gene-conversion edge: a recombinant lineage that departs the clonal frame,
/// coalesces back onto it, and transplants the ancestry of a contiguous site tract.
///
/// The departure point `(departure_node, departure_height)` and arrival point
/// `(arrival_node, arrival_height)` are coordinates on clonal-frame edges: the
/// height lies on the branch above the named node. Arrival may also lie on the
/// ancestral lineage above the root. `departure_height < arrival_height` always.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Conversion {
    /// Locus whose sites this conversion affects.
    pub locus: LocusId,
    /// First affected site (inclusive).
    pub start_site: usize,
    /// Last affected site (inclusive).
    pub end_site: usize,
    /// Clonal-frame node below the departure point.
    pub departure_node: NodeIndex,
    /// Height at which the recombinant lineage leaves the clonal frame.
    pub departure_height: f64,
    /// Clonal-frame node below the arrival point.
    pub arrival_node: NodeIndex,
    /// Height at which the recombinant lineage coalesces back.
    pub arrival_height: f64,
}

impl Conversion {
    /// Returns the number of sites in the affected tract.
    pub fn site_count(&self) -> usize {
        self.end_site - self.start_site + 1
    }

    /// Returns true if the tract contains the half-open site interval `[start, end)`.
    pub fn covers(&self, start: usize, end: usize) -> bool {
        self.start_site <= start && end <= self.end_site + 1
    }
}
