//! Felsenstein pruning over marginal trees, with region-level caching.

use crate::graph::{ConversionGraph, LocusId, Region};
use crate::model::substitution::{encode_base, SubstitutionModel, STATE_COUNT};

use acg_phylo::TimeTree;
use color_eyre::eyre::{eyre, Report, Result};
use log::debug;
use petgraph::graph::NodeIndex;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Debug;
use std::ops::Range;

/// Per-taxon nucleotide data, one encoded sequence per locus.
///
/// Implementors expose sequences as state indices (see
/// [`encode_base`](crate::encode_base)), with [`None`] marking missing data.
pub trait Alignment: Debug + Send + Sync {
    /// Returns the taxon names present in the alignment.
    fn taxa(&self) -> Vec<&str>;

    /// Returns one taxon's encoded sequence for one locus.
    fn states(&self, taxon: &str, locus: LocusId) -> Option<&[Option<u8>]>;
}

/// An in-memory DNA alignment keyed by taxon name.
///
/// ## Examples
///
/// ```rust
/// use acg::{Alignment, DnaAlignment, Locus};
/// let loci = vec![Locus::new("l1", 4)?];
/// let mut alignment = DnaAlignment::new(&loci);
/// alignment.add_sequence("t1", 0, "ACGT")?;
/// alignment.add_sequence("t2", 0, "AC-T")?;
/// assert_eq!(alignment.states("t2", 0).unwrap()[2], None);
/// assert!(alignment.add_sequence("t3", 0, "ACG").is_err());
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct DnaAlignment {
    site_counts: Vec<usize>,
    sequences: BTreeMap<String, Vec<Vec<Option<u8>>>>,
}

impl DnaAlignment {
    /// Returns an empty alignment over the given loci.
    pub fn new(loci: &[crate::Locus]) -> Self {
        DnaAlignment {
            site_counts: loci.iter().map(crate::Locus::site_count).collect(),
            sequences: BTreeMap::new(),
        }
    }

    /// Adds one taxon's sequence for one locus.
    ///
    /// The sequence length must match the locus; unadded loci stay fully missing.
    pub fn add_sequence<N>(&mut self, taxon: N, locus: LocusId, sequence: &str) -> Result<(), Report>
    where
        N: Into<String>,
    {
        let taxon = taxon.into();
        let site_count = *self
            .site_counts
            .get(locus)
            .ok_or_else(|| eyre!("Unknown locus id: {locus}"))?;
        if sequence.len() != site_count {
            Err(eyre!(
                "Sequence for {taxon} has {} sites where locus {locus} has {site_count}.",
                sequence.len()
            ))?
        }

        let template: Vec<Vec<Option<u8>>> =
            self.site_counts.iter().map(|n| vec![None; *n]).collect();
        let rows = self.sequences.entry(taxon).or_insert_with(move || template);
        rows[locus] = sequence.bytes().map(encode_base).collect();
        Ok(())
    }
}

impl Alignment for DnaAlignment {
    fn taxa(&self) -> Vec<&str> {
        self.sequences.keys().map(String::as_str).collect()
    }

    fn states(&self, taxon: &str, locus: LocusId) -> Option<&[Option<u8>]> {
        self.sequences.get(taxon)?.get(locus).map(Vec::as_slice)
    }
}

/// Identifies a cached region likelihood by content rather than by position in
/// the current graph: the site window plus the exact attachment geometry of the
/// conversions affecting it. A rolled-back or re-proposed region with identical
/// geometry rehits its cache entry even though ids and revisions moved on.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct RegionKey {
    locus: LocusId,
    start: usize,
    end: usize,
    geometry: Vec<(usize, u64, usize, u64)>,
}

impl RegionKey {
    fn new(acg: &ConversionGraph, region: &Region) -> Result<Self, Report> {
        let mut conversions = region
            .conversions
            .iter()
            .map(|id| Ok((*id, acg.conversion(*id)?)))
            .collect::<Result<Vec<_>, Report>>()?;
        // same application order as the marginal tree builder
        conversions.sort_by(|(id_a, a), (id_b, b)| {
            a.departure_height.total_cmp(&b.departure_height).then(id_a.cmp(id_b))
        });
        let geometry = conversions
            .into_iter()
            .map(|(_, c)| {
                (
                    c.departure_node.index(),
                    c.departure_height.to_bits(),
                    c.arrival_node.index(),
                    c.arrival_height.to_bits(),
                )
            })
            .collect();
        Ok(RegionKey { locus: region.locus, start: region.start, end: region.end, geometry })
    }
}

/// Computes the log likelihood of an alignment given a [`ConversionGraph`].
///
/// The genome likelihood is the product over regions of the likelihood of the
/// region's sites under its marginal tree. Region values are cached by content,
/// so an MCMC move only pays for the regions it disturbed; uncached regions are
/// evaluated in parallel and the final sum always runs in ascending locus and
/// site order, making repeated evaluations of equal graphs bit-identical.
///
/// Each evaluation evicts cache entries untouched by it or by the evaluation
/// before it, so the cache stays bounded by two graphs' worth of regions while
/// a rejected proposal can still rehit the regions it rolled back to.
///
/// ## Examples
///
/// ```rust
/// use acg::{ConversionGraph, DnaAlignment, JukesCantor, LikelihoodEngine, Locus};
/// use acg_phylo::{FromNewick, TimeTree};
///
/// let loci = vec![Locus::new("l1", 4)?];
/// let frame = TimeTree::from_newick("((t1:1.0,t2:1.0)anc:0.5,t3:1.5)root;")?;
/// let acg = ConversionGraph::new(frame, loci.clone())?;
///
/// let mut alignment = DnaAlignment::new(&loci);
/// alignment.add_sequence("t1", 0, "ACGT")?;
/// alignment.add_sequence("t2", 0, "ACGT")?;
/// alignment.add_sequence("t3", 0, "ACGA")?;
///
/// let mut engine = LikelihoodEngine::new(alignment, JukesCantor);
/// assert!(engine.log_likelihood(&acg)?.is_finite());
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug)]
pub struct LikelihoodEngine<A, S>
where
    A: Alignment,
    S: SubstitutionModel,
{
    alignment: A,
    model: S,
    mutation_rate: f64,
    cache: HashMap<RegionKey, f64>,
    // keys used by the previous evaluation; they survive one more eviction
    recent: HashSet<RegionKey>,
    last: Option<(u64, f64)>,
}

impl<A, S> LikelihoodEngine<A, S>
where
    A: Alignment,
    S: SubstitutionModel,
{
    /// Returns a new engine with an empty cache and unit mutation rate.
    pub fn new(alignment: A, model: S) -> Self {
        LikelihoodEngine {
            alignment,
            model,
            mutation_rate: 1.0,
            cache: HashMap::new(),
            recent: HashSet::new(),
            last: None,
        }
    }

    /// Sets the mutation rate converting branch time into expected substitutions.
    pub fn with_mutation_rate(mut self, rate: f64) -> Result<Self, Report> {
        if !rate.is_finite() || rate <= 0.0 {
            Err(eyre!("Mutation rate must be positive and finite, not {rate}."))?
        }
        self.mutation_rate = rate;
        Ok(self)
    }

    /// Returns the number of cached region likelihoods.
    pub fn cached_regions(&self) -> usize {
        self.cache.len()
    }

    /// Drops all cached region likelihoods.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
        self.recent.clear();
        self.last = None;
    }

    /// Returns the log likelihood of the alignment given the graph.
    ///
    /// Re-evaluating an unmutated graph returns the previous value without
    /// touching the regions at all.
    pub fn log_likelihood(&mut self, acg: &ConversionGraph) -> Result<f64, Report> {
        if let Some((revision, value)) = self.last {
            if revision == acg.revision() {
                return Ok(value);
            }
        }

        let regions = acg.all_regions()?;
        let keyed = regions
            .into_iter()
            .map(|region| Ok((RegionKey::new(acg, &region)?, region)))
            .collect::<Result<Vec<_>, Report>>()?;

        let missing: Vec<(RegionKey, Region)> = keyed
            .iter()
            .filter(|(key, _)| !self.cache.contains_key(key))
            .cloned()
            .collect();
        debug!("Evaluating {} regions ({} cached)", missing.len(), keyed.len() - missing.len());

        let engine = &*self;
        let computed = missing
            .into_par_iter()
            .map(|(key, region)| {
                let tree = acg.marginal_tree(&region)?;
                let value =
                    engine.tree_log_likelihood(&tree, region.locus, region.start..region.end)?;
                Ok((key, value))
            })
            .collect::<Result<Vec<(RegionKey, f64)>, Report>>()?;
        for (key, value) in computed {
            self.cache.insert(key, value);
        }

        // fixed summation order: ascending locus, then ascending region start
        let mut total = 0.0;
        for (key, _) in &keyed {
            total += self
                .cache
                .get(key)
                .ok_or_else(|| eyre!("Region is missing from the likelihood cache."))?;
        }

        // evict entries no evaluation has touched since the one before this;
        // keeping the previous graph's keys lets a rejected proposal rehit them
        let current: HashSet<RegionKey> = keyed.iter().map(|(key, _)| key.clone()).collect();
        let recent = &self.recent;
        self.cache.retain(|key, _| current.contains(key) || recent.contains(key));
        self.recent = current;

        self.last = Some((acg.revision(), total));
        Ok(total)
    }

    /// Returns the log likelihood of a site window under one tree, without any
    /// caching. This is the slow path the cached evaluation is checked against.
    ///
    /// Site columns are compressed into patterns before pruning, and partial
    /// likelihoods are rescaled per node so long trees do not underflow.
    pub fn tree_log_likelihood(
        &self,
        tree: &TimeTree,
        locus: LocusId,
        sites: Range<usize>,
    ) -> Result<f64, Report> {
        let leaves = tree.leaves();
        let positions: HashMap<NodeIndex, usize> =
            leaves.iter().enumerate().map(|(position, leaf)| (*leaf, position)).collect();

        // compress identical site columns
        let mut patterns: BTreeMap<Vec<Option<u8>>, usize> = BTreeMap::new();
        for site in sites {
            let column = leaves
                .iter()
                .map(|leaf| {
                    let label = &tree.node(*leaf)?.label;
                    let states = self
                        .alignment
                        .states(label, locus)
                        .ok_or_else(|| eyre!("No sequence for taxon {label} on locus {locus}."))?;
                    let state = states
                        .get(site)
                        .ok_or_else(|| eyre!("Site {site} leaves the sequence of {label}."))?;
                    Ok(*state)
                })
                .collect::<Result<Vec<Option<u8>>, Report>>()?;
            *patterns.entry(column).or_insert(0) += 1;
        }

        let frequencies = self.model.frequencies();
        let postorder = tree.postorder();
        let mut log_likelihood = 0.0;

        for (pattern, count) in patterns {
            let mut partials: HashMap<NodeIndex, [f64; STATE_COUNT]> = HashMap::new();
            let mut log_scale = 0.0;

            for node in &postorder {
                let mut partial = match tree.is_leaf(*node) {
                    true => {
                        let position = positions
                            .get(node)
                            .ok_or_else(|| eyre!("Leaf {node:?} has no alignment column."))?;
                        match pattern[*position] {
                            Some(state) => {
                                let mut partial = [0.0; STATE_COUNT];
                                partial[state as usize] = 1.0;
                                partial
                            }
                            // missing data is uninformative
                            None => [1.0; STATE_COUNT],
                        }
                    }
                    false => {
                        let mut partial = [1.0; STATE_COUNT];
                        for child in tree.children(*node) {
                            let branch = tree.branch_length(child)? * self.mutation_rate;
                            let matrix = self.model.transition_probabilities(branch);
                            let child_partial = partials
                                .get(&child)
                                .ok_or_else(|| eyre!("Child visited after its parent."))?;
                            for (state, value) in partial.iter_mut().enumerate() {
                                let propagated: f64 = (0..STATE_COUNT)
                                    .map(|to| matrix[state][to] * child_partial[to])
                                    .sum();
                                *value *= propagated;
                            }
                        }
                        partial
                    }
                };

                let max = partial.iter().cloned().fold(0.0, f64::max);
                if max <= 0.0 {
                    return Ok(f64::NEG_INFINITY);
                }
                for value in &mut partial {
                    *value /= max;
                }
                log_scale += max.ln();
                partials.insert(*node, partial);
            }

            let root_partial = partials
                .get(&tree.root())
                .ok_or_else(|| eyre!("Root has no partial likelihood."))?;
            let site_likelihood: f64 =
                frequencies.iter().zip(root_partial).map(|(f, p)| f * p).sum();
            log_likelihood += count as f64 * (site_likelihood.ln() + log_scale);
        }

        Ok(log_likelihood)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
