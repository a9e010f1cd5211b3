//! The coalescent with gene conversion: the prior density of a [`ConversionGraph`].

use crate::error::AcgError;
use crate::graph::{Conversion, ConversionGraph};
use crate::model::population::PopulationFunction;

use acg_phylo::EventKind;
use color_eyre::eyre::{Report, Result};
use itertools::Itertools;

/// Returns `count * ln(probability)`, with an exact zero for empty runs.
///
/// Guarding the zero count keeps boundary parameter values (`delta = 1`,
/// `rho = 0`) from producing `0 * -inf = NaN`.
fn log_pow(probability: f64, count: usize) -> f64 {
    match count {
        0 => 0.0,
        _ => count as f64 * probability.ln(),
    }
}

/// The approximate coalescent-with-gene-conversion prior over ARGs.
///
/// The log density decomposes into three terms:
///
/// 1. the clonal frame term: every inter-event interval contributes
///    `-k(k-1)/2` times the coalescent intensity of the
///    [`PopulationFunction`], and every coalescence adds `ln N(t)` at its
///    height;
/// 2. for each conversion, the density of its attachment points: a uniform
///    departure point on the clonal frame, survival of the recombinant lineage
///    against coalescence with the contemporaneous clonal lineages, and
///    re-coalescence at the arrival height;
/// 3. the footprint of the conversion tracts along the genome: a site walk in
///    which each site starts a conversion with probability
///    `0.5 * rho * clonal_frame_length / total_sites` and tracts extend
///    geometrically with mean `delta`.
///
/// Overlapping or abutting tracts on one locus have zero support and yield
/// `-inf` rather than an error; a parameter combination that breaks the site
/// walk itself (a per-site probability at or above one, or a non-positive
/// population size) is a [`NumericDomainError`](AcgError::NumericDomainError).
///
/// ## Examples
///
/// ```rust
/// use acg::{ConstantPopulation, ConversionGraph, GcCoalescent, Locus};
/// use acg_phylo::{FromNewick, TimeTree};
///
/// let frame = TimeTree::from_newick("((t1:1.0,t2:1.0)anc:0.5,t3:1.5)root;")?;
/// let acg = ConversionGraph::new(frame, vec![Locus::new("l1", 1000)?])?;
/// let prior = GcCoalescent::new(Box::new(ConstantPopulation::new(2.0)?), 0.1, 10.0)?;
/// assert!(prior.log_prior(&acg)?.is_finite());
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Debug)]
pub struct GcCoalescent {
    population: Box<dyn PopulationFunction>,
    rho: f64,
    delta: f64,
    allow_same_edge_coalescence: bool,
}

impl GcCoalescent {
    /// Returns a new prior with conversion rate `rho` and mean tract length `delta`.
    pub fn new(
        population: Box<dyn PopulationFunction>,
        rho: f64,
        delta: f64,
    ) -> Result<Self, Report> {
        if !rho.is_finite() || rho < 0.0 {
            Err(AcgError::NumericDomainError(format!(
                "conversion rate rho must be non-negative and finite, not {rho}"
            )))?
        }
        if !delta.is_finite() || delta < 1.0 {
            Err(AcgError::NumericDomainError(format!(
                "mean tract length delta must be at least one, not {delta}"
            )))?
        }
        Ok(GcCoalescent { population, rho, delta, allow_same_edge_coalescence: true })
    }

    /// Sets whether a recombinant lineage may re-coalesce with the clonal edge
    /// it departed from, below its original coalescence.
    pub fn with_same_edge_coalescence(mut self, allow: bool) -> Self {
        self.allow_same_edge_coalescence = allow;
        self
    }

    /// Returns the conversion rate.
    pub fn rho(&self) -> f64 {
        self.rho
    }

    /// Returns the mean tract length.
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Returns the log prior density of the whole graph.
    ///
    /// The result is deterministic: equal graphs and parameters give
    /// bit-identical values.
    pub fn log_prior(&self, acg: &ConversionGraph) -> Result<f64, Report> {
        let mut log_p = self.clonal_frame_log_prior(acg)?;
        for (_, conversion) in acg.conversions() {
            log_p += self.conversion_log_prior(acg, conversion)?;
        }
        log_p += self.footprint_log_prior(acg)?;
        Ok(log_p)
    }

    /// Returns the coalescent log density of the clonal frame alone.
    pub fn clonal_frame_log_prior(&self, acg: &ConversionGraph) -> Result<f64, Report> {
        let events = acg.clonal_frame_events();
        let mut log_p = 0.0;
        for (event, next) in events.iter().tuple_windows() {
            let k = event.lineages as f64;
            log_p -= 0.5 * k * (k - 1.0) * self.population.intensity(event.height, next.height);
        }
        for event in &events {
            if event.kind == EventKind::Coalescence {
                log_p += self.checked_pop_size(event.height)?.ln();
            }
        }
        Ok(log_p)
    }

    /// Returns the log density of one conversion's attachment points.
    ///
    /// The departing lineage must survive coalescence with every clonal lineage
    /// it travels alongside; when same-edge coalescence is disallowed, its own
    /// clonal edge is excluded below its original coalescence height.
    pub fn conversion_log_prior(
        &self,
        acg: &ConversionGraph,
        conversion: &Conversion,
    ) -> Result<f64, Report> {
        acg.validate_conversion(conversion)?;
        let frame = acg.frame();
        let (h1, h2) = (conversion.departure_height, conversion.arrival_height);

        // departure point is uniform over the clonal frame
        let mut log_p = -acg.clonal_frame_length().ln();

        let old_coalescence_height = match frame.parent(conversion.departure_node) {
            Some(parent) => frame.height(parent)?,
            // unreachable after validation
            None => h1,
        };

        let events = acg.clonal_frame_events();
        for (i, event) in events.iter().enumerate() {
            if event.height >= h2 {
                break;
            }
            let next_height = events.get(i + 1).map(|e| e.height).unwrap_or(f64::INFINITY);
            if next_height <= h1 {
                continue;
            }
            let from = event.height.max(h1);
            let to = h2.min(next_height);
            let mut lineages = event.lineages as f64;
            if !self.allow_same_edge_coalescence && event.height < old_coalescence_height {
                lineages -= 1.0;
            }
            log_p -= lineages * self.population.intensity(from, to);
        }

        log_p -= self.checked_pop_size(h2)?.ln();
        Ok(log_p)
    }

    /// Returns the log density of the conversion footprint along the genome.
    ///
    /// Each locus is walked site by site; the gap between consecutive tracts
    /// must contain at least one clonal site, so overlapping or abutting tracts
    /// return `-inf`.
    pub fn footprint_log_prior(&self, acg: &ConversionGraph) -> Result<f64, Report> {
        let total = acg.total_sequence_length() as f64;
        let p_rec = 0.5 * self.rho * acg.clonal_frame_length() / total;
        if !(0.0..1.0).contains(&p_rec) {
            Err(AcgError::NumericDomainError(format!(
                "per-site conversion probability {p_rec} leaves [0, 1)"
            )))?
        }
        let p_tract_end = 1.0 / self.delta;
        let p_start_clonal = 1.0 / (p_rec / p_tract_end + 1.0);

        let mut log_p = 0.0;
        for (locus_id, locus) in acg.loci().iter().enumerate() {
            let sites = locus.site_count();
            let conversions = acg.conversions_by_site(locus_id);

            let (_, first) = match conversions.first() {
                Some(first) => *first,
                None => {
                    log_p += p_start_clonal.ln() + log_pow(1.0 - p_rec, sites - 1);
                    continue;
                }
            };

            // leading clonal segment
            match first.start_site > 0 {
                true => {
                    log_p += p_start_clonal.ln()
                        + log_pow(1.0 - p_rec, first.start_site - 1)
                        + p_rec.ln();
                }
                false => log_p += (1.0 - p_start_clonal).ln(),
            }

            // tracts and the clonal gaps between them
            for (i, (_, conversion)) in conversions.iter().enumerate() {
                log_p += log_pow(1.0 - p_tract_end, conversion.end_site - conversion.start_site);
                if let Some((_, next)) = conversions.get(i + 1) {
                    log_p += p_tract_end.ln();
                    let gap = next.start_site as i64 - conversion.end_site as i64 - 2;
                    if gap < 0 {
                        return Ok(f64::NEG_INFINITY);
                    }
                    log_p += log_pow(1.0 - p_rec, gap as usize) + p_rec.ln();
                }
            }

            // trailing clonal segment
            let (_, last) = conversions[conversions.len() - 1];
            if last.end_site < sites - 1 {
                log_p += p_tract_end.ln() + log_pow(1.0 - p_rec, sites - 1 - last.end_site - 1);
            }
        }
        Ok(log_p)
    }

    /// Returns the log density of one conversion's tract under the proposal
    /// distribution that favours whole-locus (clonal-origin style) tracts.
    ///
    /// A tract starting at site zero carries weight `delta` against weight one
    /// for every interior start, and a tract running to the end of its locus
    /// omits the geometric stop term.
    pub fn tract_log_density(
        &self,
        acg: &ConversionGraph,
        conversion: &Conversion,
    ) -> Result<f64, Report> {
        let locus = acg.locus(conversion.locus)?;
        let alpha =
            acg.total_sequence_length() as f64 + acg.loci().len() as f64 * (self.delta - 1.0);

        let mut log_p = match conversion.start_site == 0 {
            true => (self.delta / alpha).ln(),
            false => -alpha.ln(),
        };
        let p_tract_end = 1.0 / self.delta;
        log_p += log_pow(1.0 - p_tract_end, conversion.end_site - conversion.start_site);
        if conversion.end_site < locus.site_count() - 1 {
            log_p += p_tract_end.ln();
        }
        Ok(log_p)
    }

    /// Returns the population size at `time`, rejecting non-positive values.
    fn checked_pop_size(&self, time: f64) -> Result<f64, Report> {
        let size = self.population.pop_size(time);
        if size <= 0.0 {
            Err(AcgError::NumericDomainError(format!(
                "population size {size} at time {time} must be positive"
            )))?
        }
        Ok(size)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
