//! Simulation of ARGs from the coalescent with gene conversion.

use crate::graph::{Conversion, ConversionGraph, Locus, LocusId};

use acg_phylo::TimeTree;
use color_eyre::eyre::{eyre, Report, Result};
use log::debug;
use petgraph::graph::NodeIndex;
use rand::Rng;

/// Draws a Poisson count by multiplying uniforms until they undershoot
/// `exp(-mean)` (Knuth's method).
fn sample_poisson<R: Rng>(rng: &mut R, mean: f64) -> usize {
    let threshold = (-mean).exp();
    let mut count = 0;
    let mut product: f64 = rng.gen();
    while product > threshold {
        count += 1;
        product *= rng.gen::<f64>();
    }
    count
}

/// Draws the number of geometric tract extensions for mean tract length `delta`.
fn sample_extension<R: Rng>(rng: &mut R, delta: f64) -> usize {
    if delta <= 1.0 {
        return 0;
    }
    // gen() lands in [0, 1); flipping it keeps the draw in (0, 1] so the log
    // stays finite
    let u: f64 = 1.0 - rng.gen::<f64>();
    (u.ln() / (1.0 - 1.0 / delta).ln()).floor() as usize
}

/// Samples [`ConversionGraph`]s from the coalescent with gene conversion under
/// a constant population size.
///
/// The clonal frame is a standard coalescent tree; the conversion count is
/// Poisson with mean `0.5 * rho * clonal_frame_length`, each departure point is
/// uniform on the frame, the recombinant lineage re-coalesces at rate
/// `lineages / population_size`, and tracts follow the clonal-origin draw that
/// gives weight `delta` to whole-locus starts.
///
/// ## Examples
///
/// ```rust
/// use acg::{ArgSimulator, Locus};
/// use rand::{rngs::StdRng, SeedableRng};
///
/// let simulator = ArgSimulator::new(1.0, 2.0, 10.0)?;
/// let loci = vec![Locus::new("l1", 1000)?];
/// let mut rng = StdRng::seed_from_u64(23);
/// let acg = simulator.simulate(&["t1", "t2", "t3", "t4"], loci, &mut rng)?;
/// assert_eq!(acg.frame().leaves().len(), 4);
/// assert!(acg.frame().is_binary());
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ArgSimulator {
    population_size: f64,
    rho: f64,
    delta: f64,
}

impl ArgSimulator {
    /// Returns a new simulator with the given population size, conversion rate,
    /// and mean tract length.
    pub fn new(population_size: f64, rho: f64, delta: f64) -> Result<Self, Report> {
        if !population_size.is_finite() || population_size <= 0.0 {
            Err(eyre!("Population size must be positive and finite, not {population_size}."))?
        }
        if !rho.is_finite() || rho < 0.0 {
            Err(eyre!("Conversion rate rho must be non-negative and finite, not {rho}."))?
        }
        if !delta.is_finite() || delta < 1.0 {
            Err(eyre!("Mean tract length delta must be at least one, not {delta}."))?
        }
        Ok(ArgSimulator { population_size, rho, delta })
    }

    /// Simulates one graph over the given taxa and loci.
    ///
    /// The result validates like any hand-built graph and comes back with an
    /// empty journal; equal seeds give equal graphs.
    pub fn simulate<R>(
        &self,
        taxa: &[&str],
        loci: Vec<Locus>,
        rng: &mut R,
    ) -> Result<ConversionGraph, Report>
    where
        R: Rng,
    {
        if taxa.len() < 2 {
            Err(eyre!("A clonal frame needs at least two taxa."))?
        }

        let frame = self.simulate_clonal_frame(taxa, rng)?;
        let mut acg = ConversionGraph::new(frame, loci)?;

        let count = sample_poisson(rng, 0.5 * self.rho * acg.clonal_frame_length());
        debug!("Simulating {count} conversions over {} taxa", taxa.len());
        for _ in 0..count {
            let conversion = self.simulate_conversion(&acg, rng)?;
            acg.add_conversion(conversion)?;
        }
        acg.commit();

        Ok(acg)
    }

    /// Simulates a coalescent clonal frame with all taxa sampled at height zero.
    fn simulate_clonal_frame<R>(&self, taxa: &[&str], rng: &mut R) -> Result<TimeTree, Report>
    where
        R: Rng,
    {
        let mut builder = TimeTree::builder();
        let mut active: Vec<NodeIndex> =
            taxa.iter().map(|taxon| builder.sample(*taxon, 0.0)).collect();

        let mut height = 0.0;
        while active.len() > 1 {
            let k = active.len() as f64;
            let rate = k * (k - 1.0) / (2.0 * self.population_size);
            height += -(1.0 - rng.gen::<f64>()).ln() / rate;

            let left = active.swap_remove(rng.gen_range(0..active.len()));
            let right = active.swap_remove(rng.gen_range(0..active.len()));
            active.push(builder.coalesce("", height, left, right)?);
        }
        builder.build()
    }

    /// Simulates one conversion: departure point, arrival point, then tract.
    fn simulate_conversion<R>(
        &self,
        acg: &ConversionGraph,
        rng: &mut R,
    ) -> Result<Conversion, Report>
    where
        R: Rng,
    {
        let (departure_node, departure_height) =
            self.draw_departure(acg, rng.gen::<f64>() * acg.clonal_frame_length())?;
        let (arrival_node, arrival_height) = self.draw_arrival(acg, departure_height, rng)?;
        let (locus, start_site, end_site) = self.draw_tract(acg.loci(), rng)?;

        Ok(Conversion {
            locus,
            start_site,
            end_site,
            departure_node,
            departure_height,
            arrival_node,
            arrival_height,
        })
    }

    /// Maps a uniform offset along the total branch length to an edge point.
    fn draw_departure(
        &self,
        acg: &ConversionGraph,
        mut offset: f64,
    ) -> Result<(NodeIndex, f64), Report> {
        let frame = acg.frame();
        for node in frame.graph.node_indices() {
            if node == frame.root() {
                continue;
            }
            let length = frame.branch_length(node)?;
            if offset < length {
                return Ok((node, frame.height(node)? + offset));
            }
            offset -= length;
        }
        // rounding pushed the offset past the last edge
        Err(eyre!("Departure offset leaves the clonal frame."))
    }

    /// Runs the recombinant lineage upwards from the departure height until it
    /// re-coalesces with one of the contemporaneous clonal lineages.
    fn draw_arrival<R>(
        &self,
        acg: &ConversionGraph,
        departure_height: f64,
        rng: &mut R,
    ) -> Result<(NodeIndex, f64), Report>
    where
        R: Rng,
    {
        let frame = acg.frame();
        let events = acg.clonal_frame_events();

        let mut height = departure_height;
        let mut arrival_height = None;
        for (i, event) in events.iter().enumerate() {
            let next_height = events.get(i + 1).map(|e| e.height).unwrap_or(f64::INFINITY);
            if next_height <= height {
                continue;
            }
            let rate = event.lineages as f64 / self.population_size;
            let wait = -(1.0 - rng.gen::<f64>()).ln() / rate;
            match height + wait < next_height {
                true => {
                    arrival_height = Some(height + wait);
                    break;
                }
                false => height = next_height,
            }
        }
        // the interval above the root is unbounded, so the walk always lands
        let arrival_height =
            arrival_height.ok_or_else(|| eyre!("Recombinant lineage failed to re-coalesce."))?;

        // choose uniformly among the lineages crossing the arrival height
        let mut lineages = Vec::new();
        for node in frame.graph.node_indices() {
            let bottom = frame.height(node)?;
            let top = match frame.parent(node) {
                Some(parent) => frame.height(parent)?,
                None => f64::INFINITY,
            };
            if bottom <= arrival_height && arrival_height < top {
                lineages.push(node);
            }
        }
        match lineages.is_empty() {
            true => Err(eyre!("No clonal lineage crosses height {arrival_height}."))?,
            false => Ok((lineages[rng.gen_range(0..lineages.len())], arrival_height)),
        }
    }

    /// Draws a tract with the clonal-origin start weighting and a geometric length.
    fn draw_tract<R>(
        &self,
        loci: &[Locus],
        rng: &mut R,
    ) -> Result<(LocusId, usize, usize), Report>
    where
        R: Rng,
    {
        let total: usize = loci.iter().map(Locus::site_count).sum();
        let alpha = total as f64 + loci.len() as f64 * (self.delta - 1.0);
        let mut u = rng.gen::<f64>() * alpha;

        for (locus, sites) in loci.iter().map(Locus::site_count).enumerate() {
            let start = if u < self.delta {
                0
            } else {
                u -= self.delta;
                if u >= (sites - 1) as f64 {
                    u -= (sites - 1) as f64;
                    continue;
                }
                u as usize + 1
            };
            let end = start.saturating_add(sample_extension(rng, self.delta)).min(sites - 1);
            return Ok((locus, start, end));
        }
        Err(eyre!("Tract start leaves the genome."))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::{sample_extension, ArgSimulator};
    use crate::{ConstantPopulation, GcCoalescent, Locus};
    use rand::rngs::StdRng;
    use rand::{RngCore, SeedableRng};

    fn loci() -> Vec<Locus> {
        vec![Locus::new("l1", 800).expect("locus"), Locus::new("l2", 200).expect("locus")]
    }

    #[test]
    fn simulated_graphs_are_structurally_valid() {
        let simulator = ArgSimulator::new(1.0, 4.0, 10.0).expect("simulator");
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let acg =
                simulator.simulate(&["t1", "t2", "t3", "t4", "t5"], loci(), &mut rng).expect("simulate");

            assert!(acg.frame().is_binary());
            assert_eq!(acg.frame().leaves().len(), 5);
            assert_eq!(acg.pending_edits(), 0);
            for (_, conversion) in acg.conversions() {
                acg.validate_conversion(conversion).expect("valid conversion");
            }
        }
    }

    #[test]
    fn prior_is_defined_on_simulated_graphs() {
        let simulator = ArgSimulator::new(1.0, 4.0, 10.0).expect("simulator");
        let prior = GcCoalescent::new(
            Box::new(ConstantPopulation::new(1.0).expect("population")),
            4.0,
            10.0,
        )
        .expect("prior");

        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            let acg = simulator.simulate(&["t1", "t2", "t3", "t4"], loci(), &mut rng).expect("simulate");
            // overlapping tracts are legitimately -inf, but never NaN
            let log_p = prior.log_prior(&acg).expect("prior");
            assert!(!log_p.is_nan());
        }
    }

    #[test]
    fn equal_seeds_give_equal_graphs() {
        let simulator = ArgSimulator::new(1.0, 4.0, 10.0).expect("simulator");
        let simulate = || {
            let mut rng = StdRng::seed_from_u64(7);
            simulator.simulate(&["t1", "t2", "t3", "t4"], loci(), &mut rng).expect("simulate")
        };
        let first = simulate().to_extended_newick().expect("newick");
        let second = simulate().to_extended_newick().expect("newick");
        assert_eq!(first, second);
    }

    #[test]
    fn degenerate_uniform_draws_keep_tracts_in_bounds() {
        // an RNG stuck on zero bits produces the lowest uniform draw the
        // generator can emit; the geometric draw must stay finite on it
        struct ZeroRng;
        impl RngCore for ZeroRng {
            fn next_u32(&mut self) -> u32 {
                0
            }
            fn next_u64(&mut self) -> u64 {
                0
            }
            fn fill_bytes(&mut self, dest: &mut [u8]) {
                dest.fill(0)
            }
            fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
                dest.fill(0);
                Ok(())
            }
        }

        assert_eq!(sample_extension(&mut ZeroRng, 10.0), 0);

        let simulator = ArgSimulator::new(1.0, 4.0, 10.0).expect("simulator");
        let (locus, start, end) = simulator.draw_tract(&loci(), &mut ZeroRng).expect("tract");
        assert_eq!((locus, start), (0, 0));
        assert!(end < 800);
    }

    #[test]
    fn zero_rate_means_no_conversions() {
        let simulator = ArgSimulator::new(1.0, 0.0, 10.0).expect("simulator");
        let mut rng = StdRng::seed_from_u64(11);
        let acg = simulator.simulate(&["t1", "t2", "t3"], loci(), &mut rng).expect("simulate");
        assert_eq!(acg.conversion_count(), 0);
    }
}
