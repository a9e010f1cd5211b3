//! The ancestral conversion graph (ACG): a clonal-frame tree plus conversion edges.

pub mod conversion;
pub mod locus;
pub mod marginal;
pub mod newick;
pub mod region;

#[doc(inline)]
pub use conversion::{Conversion, ConversionId};
#[doc(inline)]
pub use locus::{Locus, LocusId};
#[doc(inline)]
pub use marginal::MarginalTreeBuilder;
#[doc(inline)]
pub use region::Region;

use crate::error::AcgError;

use acg_phylo::{Event, TimeTree};
use color_eyre::eyre::{eyre, Report, Result};
use itertools::Itertools;
use log::debug;
use std::collections::BTreeMap;

/// A reversible edit applied to a [`ConversionGraph`], recorded so that a
/// rejected MCMC proposal can be rolled back without rebuilding the graph.
#[derive(Clone, Debug)]
enum Edit {
    Added(ConversionId),
    Removed(ConversionId, Conversion),
    Replaced(ConversionId, Conversion),
}

/// An ancestral recombination graph for bacteria: the clonal-frame phylogeny,
/// the loci it explains, and the gene conversions overlaid on it.
///
/// The graph is the single source of truth for the ARG. Region partitions,
/// marginal trees, and probability densities are all derived views, recomputed
/// on demand; mutations bump [`revision`](ConversionGraph::revision) so that
/// consumers know when their caches went stale.
///
/// ## Examples
///
/// ```rust
/// use acg::{Conversion, ConversionGraph, Locus};
/// use acg_phylo::{FromNewick, TimeTree};
///
/// let frame = TimeTree::from_newick("((t1:1.0,t2:1.0)anc:0.5,t3:1.5)root;")?;
/// let mut acg = ConversionGraph::new(frame, vec![Locus::new("l1", 500)?])?;
///
/// let conv = Conversion {
///     locus: 0,
///     start_site: 100,
///     end_site: 199,
///     departure_node: acg.frame().find("t1")?,
///     departure_height: 0.5,
///     arrival_node: acg.frame().find("anc")?,
///     arrival_height: 1.25,
/// };
/// let id = acg.add_conversion(conv)?;
/// assert_eq!(acg.conversion_count(), 1);
/// acg.commit();
///
/// acg.remove_conversion(id)?;
/// acg.rollback(); // restores the conversion: the whole proposal is undone
/// assert_eq!(acg.conversion_count(), 1);
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug)]
pub struct ConversionGraph {
    frame: TimeTree,
    loci: Vec<Locus>,
    conversions: BTreeMap<ConversionId, Conversion>,
    next_id: ConversionId,
    revision: u64,
    journal: Vec<Edit>,
}

impl ConversionGraph {
    /// Returns a new graph over the given clonal frame and loci.
    ///
    /// The clonal frame must be strictly binary and the locus names unique.
    pub fn new(frame: TimeTree, loci: Vec<Locus>) -> Result<Self, Report> {
        if !frame.is_binary() {
            Err(eyre!("The clonal frame must be a strictly binary tree."))?
        }
        if !loci.iter().map(Locus::name).all_unique() {
            Err(eyre!("Locus names must be unique."))?
        }
        Ok(ConversionGraph {
            frame,
            loci,
            conversions: BTreeMap::new(),
            next_id: 0,
            revision: 0,
            journal: Vec::new(),
        })
    }

    /// Returns the clonal-frame tree.
    pub fn frame(&self) -> &TimeTree {
        &self.frame
    }

    /// Returns the loci, in genome order.
    pub fn loci(&self) -> &[Locus] {
        &self.loci
    }

    /// Returns the [`Locus`] with the given id.
    pub fn locus(&self, locus: LocusId) -> Result<&Locus, Report> {
        self.loci.get(locus).ok_or_else(|| eyre!("Unknown locus id: {locus}"))
    }

    /// Returns the [`LocusId`] of the locus with the given name.
    pub fn locus_id(&self, name: &str) -> Result<LocusId, Report> {
        self.loci
            .iter()
            .position(|l| l.name() == name)
            .ok_or_else(|| eyre!("Unknown locus name: {name}"))
    }

    /// Returns the sum of all locus site counts.
    pub fn total_sequence_length(&self) -> usize {
        self.loci.iter().map(Locus::site_count).sum()
    }

    /// Returns the total branch length of the clonal frame.
    pub fn clonal_frame_length(&self) -> f64 {
        self.frame.length()
    }

    /// Returns the clonal frame's sample and coalescence events sorted by height.
    pub fn clonal_frame_events(&self) -> Vec<Event> {
        self.frame.events()
    }

    // ------------------------------------------------------------------------
    // Conversions
    // ------------------------------------------------------------------------

    /// Returns the [`Conversion`] with the given id.
    pub fn conversion(&self, id: ConversionId) -> Result<&Conversion, Report> {
        self.conversions.get(&id).ok_or_else(|| eyre!("Unknown conversion id: {id}"))
    }

    /// Returns all conversions, in ascending id (insertion) order.
    pub fn conversions(&self) -> impl Iterator<Item = (ConversionId, &Conversion)> {
        self.conversions.iter().map(|(id, c)| (*id, c))
    }

    /// Returns the number of conversions in the graph.
    pub fn conversion_count(&self) -> usize {
        self.conversions.len()
    }

    /// Returns the conversions affecting one locus, in ascending id order.
    pub fn conversions_on(&self, locus: LocusId) -> Vec<(ConversionId, &Conversion)> {
        self.conversions().filter(|(_, c)| c.locus == locus).collect()
    }

    /// Returns the conversions on a locus sorted by start site, ties by id.
    pub fn conversions_by_site(&self, locus: LocusId) -> Vec<(ConversionId, &Conversion)> {
        let mut conversions = self.conversions_on(locus);
        conversions.sort_by_key(|(id, c)| (c.start_site, *id));
        conversions
    }

    /// Returns the conversions on a locus sorted by departure height, ties by id.
    pub fn conversions_by_height(&self, locus: LocusId) -> Vec<(ConversionId, &Conversion)> {
        let mut conversions = self.conversions_on(locus);
        conversions.sort_by(|(id_a, a), (id_b, b)| {
            a.departure_height.total_cmp(&b.departure_height).then(id_a.cmp(id_b))
        });
        conversions
    }

    /// Adds a conversion and returns its id.
    ///
    /// Fails with [`AcgError::InvalidConversion`] if the heights are out of
    /// order, the site interval leaves its locus, or either attachment point
    /// does not lie on a clonal-frame edge at that height.
    pub fn add_conversion(&mut self, conversion: Conversion) -> Result<ConversionId, Report> {
        self.validate_conversion(&conversion)?;
        let id = self.next_id;
        self.next_id += 1;
        debug!("Adding conversion {id}: {conversion:?}");
        self.conversions.insert(id, conversion);
        self.journal.push(Edit::Added(id));
        self.revision += 1;
        Ok(id)
    }

    /// Removes a conversion, returning it for driver-side bookkeeping.
    pub fn remove_conversion(&mut self, id: ConversionId) -> Result<Conversion, Report> {
        let conversion =
            self.conversions.remove(&id).ok_or_else(|| eyre!("Unknown conversion id: {id}"))?;
        debug!("Removing conversion {id}");
        self.journal.push(Edit::Removed(id, conversion.clone()));
        self.revision += 1;
        Ok(conversion)
    }

    /// Replaces a conversion in place, keeping its id; used by height- and
    /// tract-mutating proposal operators.
    pub fn replace_conversion(
        &mut self,
        id: ConversionId,
        conversion: Conversion,
    ) -> Result<(), Report> {
        self.validate_conversion(&conversion)?;
        let slot =
            self.conversions.get_mut(&id).ok_or_else(|| eyre!("Unknown conversion id: {id}"))?;
        let old = std::mem::replace(slot, conversion);
        debug!("Replacing conversion {id}");
        self.journal.push(Edit::Replaced(id, old));
        self.revision += 1;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Proposal lifecycle
    // ------------------------------------------------------------------------

    /// Accepts the current proposal: forgets the recorded inverse edits.
    pub fn commit(&mut self) {
        self.journal.clear();
    }

    /// Rejects the current proposal: reapplies the recorded inverse edits,
    /// restoring the graph to its last committed state.
    pub fn rollback(&mut self) {
        while let Some(edit) = self.journal.pop() {
            match edit {
                Edit::Added(id) => {
                    self.conversions.remove(&id);
                }
                Edit::Removed(id, conversion) | Edit::Replaced(id, conversion) => {
                    self.conversions.insert(id, conversion);
                }
            }
        }
        self.revision += 1;
    }

    /// Returns the number of uncommitted edits.
    pub fn pending_edits(&self) -> usize {
        self.journal.len()
    }

    /// Returns a counter bumped by every mutation.
    ///
    /// This realizes the graph's structural dirty flag: a consumer stores the
    /// revision it last evaluated and recomputes its derived state whenever the
    /// value changes.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    // ------------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------------

    /// Checks that a conversion is structurally possible on the current clonal frame.
    pub fn validate_conversion(&self, conversion: &Conversion) -> Result<(), Report> {
        let invalid = |msg: String| AcgError::InvalidConversion(msg);

        let locus = self
            .loci
            .get(conversion.locus)
            .ok_or_else(|| invalid(format!("unknown locus id {}", conversion.locus)))?;
        if conversion.start_site > conversion.end_site || conversion.end_site >= locus.site_count()
        {
            Err(invalid(format!(
                "site interval [{}, {}] leaves locus {locus} bounds",
                conversion.start_site, conversion.end_site
            )))?
        }

        let (h1, h2) = (conversion.departure_height, conversion.arrival_height);
        if !h1.is_finite() || !h2.is_finite() || h1 >= h2 {
            Err(invalid(format!("departure height {h1} must lie below arrival height {h2}")))?
        }

        // departure must lie on a real clonal-frame edge
        let departure = conversion.departure_node;
        let dep_height = self
            .frame
            .height(departure)
            .map_err(|_| invalid(format!("unknown departure node {departure:?}")))?;
        let dep_parent = self
            .frame
            .parent(departure)
            .ok_or_else(|| invalid("departure point lies above the root".to_string()))?;
        let dep_parent_height = self.frame.height(dep_parent)?;
        if h1 < dep_height || h1 >= dep_parent_height {
            Err(invalid(format!(
                "departure height {h1} is outside the edge spanning [{dep_height}, {dep_parent_height})"
            )))?
        }

        // arrival may lie on an edge or on the ancestral lineage above the root
        let arrival = conversion.arrival_node;
        let arr_height = self
            .frame
            .height(arrival)
            .map_err(|_| invalid(format!("unknown arrival node {arrival:?}")))?;
        match self.frame.parent(arrival) {
            Some(parent) => {
                let parent_height = self.frame.height(parent)?;
                if h2 < arr_height || h2 >= parent_height {
                    Err(invalid(format!(
                        "arrival height {h2} is outside the edge spanning [{arr_height}, {parent_height})"
                    )))?
                }
            }
            None => {
                if h2 < arr_height {
                    Err(invalid(format!(
                        "arrival height {h2} lies below the root (height {arr_height})"
                    )))?
                }
            }
        }

        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use acg_phylo::FromNewick;

    fn four_taxon_graph() -> ConversionGraph {
        let frame = TimeTree::from_newick(
            "(((t1:1.0,t2:1.0)n1:1.0,t3:2.0)n2:1.0,t4:3.0)n3;",
        )
        .expect("newick");
        ConversionGraph::new(frame, vec![Locus::new("l1", 500).expect("locus")])
            .expect("graph")
    }

    fn conversion(acg: &ConversionGraph, start: usize, end: usize, h1: f64, h2: f64) -> Conversion {
        Conversion {
            locus: 0,
            start_site: start,
            end_site: end,
            departure_node: acg.frame().find("t1").expect("t1"),
            departure_height: h1,
            arrival_node: acg.frame().find("n1").expect("n1"),
            arrival_height: h2,
        }
    }

    #[test]
    fn add_validates_structure() {
        let mut acg = four_taxon_graph();

        // heights out of order
        assert!(acg.add_conversion(conversion(&acg, 0, 10, 1.5, 0.5)).is_err());
        // sites out of bounds
        assert!(acg.add_conversion(conversion(&acg, 490, 500, 0.5, 1.5)).is_err());
        // departure height off its edge (t1 spans [0, 1))
        assert!(acg.add_conversion(conversion(&acg, 0, 10, 1.5, 1.8)).is_err());

        assert!(acg.add_conversion(conversion(&acg, 0, 10, 0.5, 1.5)).is_ok());
        assert_eq!(acg.conversion_count(), 1);
    }

    #[test]
    fn arrival_may_lie_above_the_root() {
        let mut acg = four_taxon_graph();
        let root = acg.frame().root();
        let c = Conversion {
            arrival_node: root,
            arrival_height: 10.0,
            ..conversion(&acg, 0, 10, 0.5, 10.0)
        };
        assert!(acg.add_conversion(c).is_ok());
    }

    #[test]
    fn rollback_restores_committed_state() {
        let mut acg = four_taxon_graph();
        let id = acg.add_conversion(conversion(&acg, 0, 10, 0.5, 1.5)).expect("add");
        acg.commit();

        let rev = acg.revision();
        acg.remove_conversion(id).expect("remove");
        let replacement = conversion(&acg, 20, 30, 0.25, 1.25);
        acg.add_conversion(replacement).expect("add");
        acg.rollback();

        assert_eq!(acg.conversion_count(), 1);
        assert_eq!(acg.conversion(id).expect("conversion").start_site, 0);
        assert!(acg.revision() > rev);
    }

    #[test]
    fn rollback_undoes_a_replacement() {
        let mut acg = four_taxon_graph();
        let id = acg.add_conversion(conversion(&acg, 0, 10, 0.5, 1.5)).expect("add");
        acg.commit();

        acg.replace_conversion(id, conversion(&acg, 20, 30, 0.25, 1.25)).expect("replace");
        assert_eq!(acg.conversion(id).expect("conversion").start_site, 20);
        acg.rollback();

        assert_eq!(acg.conversion_count(), 1);
        let restored = acg.conversion(id).expect("conversion");
        assert_eq!((restored.start_site, restored.end_site), (0, 10));
        assert_eq!(restored.departure_height, 0.5);

        // replacing an unknown id is rejected without touching the graph
        assert!(acg.replace_conversion(id + 1, conversion(&acg, 0, 10, 0.5, 1.5)).is_err());
        assert_eq!(acg.conversion_count(), 1);
        assert_eq!(acg.pending_edits(), 0);
    }

    #[test]
    fn sorted_accessors_break_ties_by_id() {
        let mut acg = four_taxon_graph();
        let a = acg.add_conversion(conversion(&acg, 100, 200, 0.5, 1.5)).expect("a");
        let b = acg.add_conversion(conversion(&acg, 100, 150, 0.5, 1.5)).expect("b");

        let by_site: Vec<_> = acg.conversions_by_site(0).iter().map(|(id, _)| *id).collect();
        assert_eq!(by_site, vec![a, b]);
        let by_height: Vec<_> = acg.conversions_by_height(0).iter().map(|(id, _)| *id).collect();
        assert_eq!(by_height, vec![a, b]);
    }
}
