//! Partitioning of a locus into regions sharing one marginal genealogy.

use crate::graph::conversion::ConversionId;
use crate::graph::locus::LocusId;
use crate::graph::ConversionGraph;

use color_eyre::eyre::{Report, Result};
use itertools::Itertools;
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A maximal run of contiguous sites within one locus that share a marginal tree.
///
/// Regions are derived views: they are recomputed from the graph on demand and
/// never survive a structural mutation.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Region {
    /// Locus the region belongs to.
    pub locus: LocusId,
    /// First site of the region (inclusive).
    pub start: usize,
    /// One past the last site of the region.
    pub end: usize,
    /// Ids of the conversions whose tract covers every site of the region,
    /// in ascending id order.
    pub conversions: Vec<ConversionId>,
}

impl Region {
    /// Returns the number of sites in the region.
    pub fn site_count(&self) -> usize {
        self.end - self.start
    }

    /// Returns true if no conversion affects the region, so its marginal tree
    /// is the clonal frame itself.
    pub fn is_clonal_frame(&self) -> bool {
        self.conversions.is_empty()
    }
}

impl ConversionGraph {
    /// Partitions one locus into its minimal ordered set of regions.
    ///
    /// Every conversion tract contributes its two boundaries as breakpoints;
    /// the regions are the intervals between consecutive breakpoints. A locus
    /// with no conversions yields exactly one clonal-frame region, and a locus
    /// with `c` conversions yields at most `2c + 1` regions.
    ///
    /// ## Examples
    ///
    /// ```rust
    /// use acg::{Conversion, ConversionGraph, Locus};
    /// use acg_phylo::{FromNewick, TimeTree};
    ///
    /// let frame = TimeTree::from_newick("((t1:1.0,t2:1.0)anc:0.5,t3:1.5)root;")?;
    /// let mut acg = ConversionGraph::new(frame, vec![Locus::new("l1", 500)?])?;
    /// assert_eq!(acg.regions(0)?.len(), 1);
    ///
    /// acg.add_conversion(Conversion {
    ///     locus: 0,
    ///     start_site: 100,
    ///     end_site: 199,
    ///     departure_node: acg.frame().find("t1")?,
    ///     departure_height: 0.5,
    ///     arrival_node: acg.frame().find("anc")?,
    ///     arrival_height: 1.25,
    /// })?;
    ///
    /// let regions = acg.regions(0)?;
    /// let spans: Vec<(usize, usize)> = regions.iter().map(|r| (r.start, r.end)).collect();
    /// assert_eq!(spans, vec![(0, 100), (100, 200), (200, 500)]);
    /// assert!(regions[1].conversions.len() == 1 && regions[0].is_clonal_frame());
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn regions(&self, locus: LocusId) -> Result<Vec<Region>, Report> {
        let site_count = self.locus(locus)?.site_count();
        let conversions = self.conversions_on(locus);

        let mut breakpoints = BTreeSet::from([0, site_count]);
        for (_, c) in &conversions {
            breakpoints.insert(c.start_site);
            breakpoints.insert(c.end_site + 1);
        }

        let regions = breakpoints
            .into_iter()
            .tuple_windows()
            .map(|(start, end)| Region {
                locus,
                start,
                end,
                conversions: conversions
                    .iter()
                    .filter(|(_, c)| c.covers(start, end))
                    .map(|(id, _)| *id)
                    .collect(),
            })
            .collect_vec();
        trace!("Locus {locus} partitioned into {} regions", regions.len());

        Ok(regions)
    }

    /// Partitions every locus, in ascending locus then ascending start order.
    pub fn all_regions(&self) -> Result<Vec<Region>, Report> {
        (0..self.loci().len()).map(|locus| self.regions(locus)).flatten_ok().collect()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{Conversion, ConversionGraph, Locus};
    use acg_phylo::{FromNewick, TimeTree};

    fn graph_with_loci(loci: Vec<Locus>) -> ConversionGraph {
        let frame = TimeTree::from_newick("((t1:1.0,t2:1.0)n1:0.5,t3:1.5)n2;").expect("newick");
        ConversionGraph::new(frame, loci).expect("graph")
    }

    fn tract(acg: &ConversionGraph, locus: usize, start: usize, end: usize) -> Conversion {
        Conversion {
            locus,
            start_site: start,
            end_site: end,
            departure_node: acg.frame().find("t1").expect("t1"),
            departure_height: 0.5,
            arrival_node: acg.frame().find("n1").expect("n1"),
            arrival_height: 1.25,
        }
    }

    #[test]
    fn region_count_is_bounded() {
        let mut acg = graph_with_loci(vec![Locus::new("l1", 1000).expect("locus")]);
        let tracts = [(10, 700), (20, 300), (250, 500), (999, 999)];
        for (i, (start, end)) in tracts.into_iter().enumerate() {
            let c = tract(&acg, 0, start, end);
            acg.add_conversion(c).expect("add");
            let regions = acg.regions(0).expect("regions");
            assert!(regions.len() <= 2 * (i + 1) + 1);

            // regions are contiguous and cover the locus
            assert_eq!(regions[0].start, 0);
            assert_eq!(regions.last().expect("last").end, 1000);
            for (a, b) in regions.iter().zip(regions.iter().skip(1)) {
                assert_eq!(a.end, b.start);
            }
        }
    }

    #[test]
    fn single_site_conversion_is_isolated_to_its_locus() {
        let loci =
            vec![Locus::new("l1", 100).expect("locus"), Locus::new("l2", 200).expect("locus")];
        let mut acg = graph_with_loci(loci);
        let before = acg.regions(1).expect("regions l2");

        // single-site tract at the very start of locus 0
        let c = tract(&acg, 0, 0, 0);
        acg.add_conversion(c).expect("add");

        assert_eq!(acg.regions(0).expect("regions l0").len(), 2);
        assert_eq!(acg.regions(1).expect("regions l2"), before);
    }

    #[test]
    fn affecting_sets_follow_tract_overlap() {
        let mut acg = graph_with_loci(vec![Locus::new("l1", 100).expect("locus")]);
        let a = acg.add_conversion(tract(&acg, 0, 10, 59)).expect("a");
        let b = acg.add_conversion(tract(&acg, 0, 40, 79)).expect("b");

        let regions = acg.regions(0).expect("regions");
        let spans: Vec<(usize, usize)> =
            regions.iter().map(|r| (r.start, r.end)).collect();
        assert_eq!(spans, vec![(0, 10), (10, 40), (40, 60), (60, 80), (80, 100)]);
        assert_eq!(regions[1].conversions, vec![a]);
        assert_eq!(regions[2].conversions, vec![a, b]);
        assert_eq!(regions[3].conversions, vec![b]);
    }
}
