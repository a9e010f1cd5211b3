use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A [`Node`] in a [`TimeTree`](crate::TimeTree): a label plus an age above the most recent sample.
///
/// Heights increase from the tips (most recent sample at height `0.0`) towards the root,
/// the convention used by time-calibrated coalescent trees.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Node {
    /// [`Node`] label for display and lookup (ex. a taxon name).
    pub label: String,
    /// Age of the node, measured backwards from the most recent sample.
    pub height: f64,
}

impl Node {
    /// Returns a new [`Node`] with the given label and height.
    ///
    /// ## Examples
    ///
    /// ```rust
    /// use acg_phylo::Node;
    /// let node = Node::new("t1", 0.0);
    /// assert_eq!(node.label, "t1");
    /// ```
    pub fn new<L>(label: L, height: f64) -> Self
    where
        L: Into<String>,
    {
        Node { label: label.into(), height }
    }
}

#[rustfmt::skip]
impl Display for Node { fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.label) } }
