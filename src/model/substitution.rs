//! Nucleotide substitution models for the sequence likelihood.

use std::fmt::Debug;

/// The number of nucleotide states.
pub const STATE_COUNT: usize = 4;

/// Encodes an IUPAC base as a state index (`A=0, C=1, G=2, T=3`).
///
/// Gaps and ambiguity codes return [`None`] and are treated as missing data.
///
/// ## Examples
///
/// ```rust
/// use acg::encode_base;
/// assert_eq!(encode_base(b'a'), Some(0));
/// assert_eq!(encode_base(b'T'), Some(3));
/// assert_eq!(encode_base(b'-'), None);
/// assert_eq!(encode_base(b'N'), None);
/// ```
pub fn encode_base(base: u8) -> Option<u8> {
    match base.to_ascii_uppercase() {
        b'A' => Some(0),
        b'C' => Some(1),
        b'G' => Some(2),
        b'T' => Some(3),
        _ => None,
    }
}

/// A reversible nucleotide substitution process.
pub trait SubstitutionModel: Debug + Send + Sync {
    /// Returns the stationary state frequencies.
    fn frequencies(&self) -> [f64; STATE_COUNT];

    /// Returns the matrix of transition probabilities along a branch:
    /// `matrix[from][to]` is the probability that state `from` ends as state
    /// `to` after `branch_length` expected substitutions per site.
    fn transition_probabilities(&self, branch_length: f64) -> [[f64; STATE_COUNT]; STATE_COUNT];
}

/// The Jukes-Cantor (1969) model: equal frequencies and a single exchange rate.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct JukesCantor;

impl SubstitutionModel for JukesCantor {
    fn frequencies(&self) -> [f64; STATE_COUNT] {
        [0.25; STATE_COUNT]
    }

    fn transition_probabilities(&self, branch_length: f64) -> [[f64; STATE_COUNT]; STATE_COUNT] {
        let decay = (-4.0 * branch_length / 3.0).exp();
        let same = 0.25 + 0.75 * decay;
        let different = 0.25 - 0.25 * decay;

        let mut matrix = [[different; STATE_COUNT]; STATE_COUNT];
        for (state, row) in matrix.iter_mut().enumerate() {
            row[state] = same;
        }
        matrix
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
