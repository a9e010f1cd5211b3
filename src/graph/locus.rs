use color_eyre::eyre::{eyre, Report, Result};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Identifies a [`Locus`] by its position in the graph's locus table.
pub type LocusId = usize;

/// An immutable genomic segment with its own site coordinate space.
///
/// Loci are fixed for the lifetime of an analysis: conversions reference them by
/// [`LocusId`], and site coordinates are always local to one locus.
///
/// ## Examples
///
/// ```rust
/// use acg::Locus;
/// let locus = Locus::new("chromosome", 10_000)?;
/// assert_eq!(locus.site_count(), 10_000);
/// assert_eq!(locus.to_string(), "chromosome:10000");
/// assert!(Locus::new("empty", 0).is_err());
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Locus {
    name: String,
    site_count: usize,
}

impl Locus {
    /// Returns a new [`Locus`] with the given name and a positive site count.
    pub fn new<N>(name: N, site_count: usize) -> Result<Self, Report>
    where
        N: Into<String>,
    {
        let name = name.into();
        if site_count == 0 {
            Err(eyre!("Locus {name} must contain at least one site."))?
        }
        Ok(Locus { name, site_count })
    }

    /// Returns the locus name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of sites in this locus.
    pub fn site_count(&self) -> usize {
        self.site_count
    }
}

impl Display for Locus {
    /// Formats as `name:site_count`, the form used in ARG log preambles.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.site_count)
    }
}
