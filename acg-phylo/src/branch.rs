use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A [`Branch`] in a [`TimeTree`](crate::TimeTree).
///
/// The length of a branch is always the height difference between its parent and child
/// nodes; [`TimeTree`](crate::TimeTree) keeps the two representations consistent.
#[derive(Copy, Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Branch {
    /// [`Branch`] length in units of time (ex. 1.0).
    pub length: f64,
}

#[rustfmt::skip]
impl AsPrimitive<f64> for Branch { fn as_(self) -> f64 { self.length } }
#[rustfmt::skip]
impl Default for Branch { fn default() -> Self { Branch { length: 0.0 } } }
#[rustfmt::skip]
impl Display for Branch { fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.length) } }
#[rustfmt::skip]
impl Branch { pub fn new(length: f64) -> Self { Branch { length } } }
