use crate::{newick, Branch, FromNewick, Node, ToNewick};

use color_eyre::eyre::{eyre, Report, Result};
use itertools::Itertools;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

// ----------------------------------------------------------------------------
// Events
// ----------------------------------------------------------------------------

/// The kind of demographic event a [`TimeTree`] node represents.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub enum EventKind {
    /// A sampled taxon (a leaf).
    Sample,
    /// Two or more lineages merging into their common ancestor (an internal node).
    Coalescence,
}

/// A sample or coalescence event on a [`TimeTree`], as consumed by coalescent models.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
pub struct Event {
    /// Height of the event above the most recent sample.
    pub height: f64,
    /// Whether the event adds a lineage ([`EventKind::Sample`]) or merges lineages.
    pub kind: EventKind,
    /// Number of lineages active in the interval immediately above this event.
    pub lineages: usize,
}

// ----------------------------------------------------------------------------
// TimeTree
// ----------------------------------------------------------------------------

/// A rooted, time-calibrated tree of [`Node`]s and [`Branch`]es.
///
/// - Every node carries a height above the most recent sample; branch lengths are
///   the height differences between parent and child.
/// - Construct a tree programmatically with a [`TimeTreeBuilder`], or parse one from
///   a Newick string.
///
/// ## Examples
///
/// ```rust
/// use acg_phylo::{FromNewick, TimeTree};
/// let tree = TimeTree::from_newick("((t1:1.0,t2:1.0):0.5,t3:1.5);")?;
/// assert_eq!(tree.leaves().len(), 3);
/// assert!((tree.length() - 5.0).abs() < 1e-12);
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TimeTree {
    /// Directed graph of parents and children; edges point from parent to child.
    pub graph: Graph<Node, Branch>,
    root: NodeIndex,
}

impl TimeTree {
    /// Wraps a parent-to-child graph into a validated [`TimeTree`].
    ///
    /// - The graph must contain exactly one root (a node with no incoming edge).
    /// - Children must not be higher than their parents.
    /// - Unlabelled nodes receive generated `NODE_{i}` labels; labels must be unique.
    /// - Branch lengths are recomputed from node heights.
    pub fn from_graph(mut graph: Graph<Node, Branch>) -> Result<Self, Report> {
        let roots = graph
            .node_indices()
            .filter(|i| graph.neighbors_directed(*i, Direction::Incoming).count() == 0)
            .collect_vec();
        let root = match roots.len() {
            1 => roots[0],
            n => Err(eyre!("Failed to locate a unique root: found {n} parentless nodes."))?,
        };

        // generate labels for unlabelled nodes, then check uniqueness
        for i in graph.node_indices().collect_vec() {
            if graph[i].label.is_empty() {
                graph[i].label = format!("NODE_{}", i.index());
            }
        }
        let mut seen = HashSet::new();
        for i in graph.node_indices() {
            if !seen.insert(graph[i].label.clone()) {
                Err(eyre!("Duplicate node label: {}", graph[i].label))?
            }
        }

        // branch lengths follow from heights
        for edge in graph.edge_indices().collect_vec() {
            let (parent, child) = graph.edge_endpoints(edge).expect("edge endpoints");
            let length = graph[parent].height - graph[child].height;
            if length < 0.0 {
                Err(eyre!(
                    "Node {} (height {}) is higher than its parent {} (height {}).",
                    graph[child].label,
                    graph[child].height,
                    graph[parent].label,
                    graph[parent].height,
                ))?
            }
            graph[edge] = Branch::new(length);
        }

        Ok(TimeTree { graph, root })
    }

    /// Returns the [`NodeIndex`] of the root.
    pub fn root(&self) -> NodeIndex {
        self.root
    }

    /// Returns the [`Node`] that corresponds to the [`NodeIndex`].
    pub fn node(&self, node_index: NodeIndex) -> Result<&Node, Report> {
        self.graph
            .node_weight(node_index)
            .ok_or_else(|| eyre!("Failed to get node data for node index {node_index:?}"))
    }

    /// Returns the height of a node.
    pub fn height(&self, node_index: NodeIndex) -> Result<f64, Report> {
        Ok(self.node(node_index)?.height)
    }

    /// Returns the [`NodeIndex`] of a node's parent, or [`None`] for the root.
    pub fn parent(&self, node_index: NodeIndex) -> Option<NodeIndex> {
        self.graph.neighbors_directed(node_index, Direction::Incoming).next()
    }

    /// Returns the immediate children of a node, in insertion order.
    pub fn children(&self, node_index: NodeIndex) -> Vec<NodeIndex> {
        // neighbors iterates last added to first added, reverse this
        let mut children =
            self.graph.neighbors_directed(node_index, Direction::Outgoing).collect_vec();
        children.reverse();
        children
    }

    /// Returns true if the node has no children.
    pub fn is_leaf(&self, node_index: NodeIndex) -> bool {
        self.graph.neighbors_directed(node_index, Direction::Outgoing).count() == 0
    }

    /// Returns all leaves, in ascending index order.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        self.graph.node_indices().filter(|i| self.is_leaf(*i)).collect_vec()
    }

    /// Returns the [`NodeIndex`] whose node carries the requested label.
    pub fn find(&self, label: &str) -> Result<NodeIndex, Report> {
        self.graph
            .node_indices()
            .find(|i| self.graph[*i].label == label)
            .ok_or_else(|| eyre!("Failed to find a node labelled {label}"))
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns true if every internal node has exactly two children.
    pub fn is_binary(&self) -> bool {
        self.graph
            .node_indices()
            .all(|i| matches!(self.children(i).len(), 0 | 2))
    }

    /// Returns the total branch length: the sum of all parent-child height differences.
    pub fn length(&self) -> f64 {
        self.graph.edge_weights().map(|branch| branch.length).sum()
    }

    /// Returns the length of the branch above a node; the root has no branch.
    pub fn branch_length(&self, node_index: NodeIndex) -> Result<f64, Report> {
        let parent = self
            .parent(node_index)
            .ok_or_else(|| eyre!("Node {node_index:?} is the root and has no branch."))?;
        Ok(self.height(parent)? - self.height(node_index)?)
    }

    /// Returns all nodes in post-order: children strictly before their parents.
    ///
    /// The order is deterministic: children are visited in insertion order.
    pub fn postorder(&self) -> Vec<NodeIndex> {
        let mut ordered = Vec::with_capacity(self.node_count());
        let mut stack = vec![(self.root, false)];
        while let Some((node, expanded)) = stack.pop() {
            match expanded {
                true => ordered.push(node),
                false => {
                    stack.push((node, true));
                    // reversed so that the first child is processed first
                    for child in self.children(node).into_iter().rev() {
                        stack.push((child, false));
                    }
                }
            }
        }
        ordered
    }

    /// Returns sample and coalescence [`Event`]s sorted by height.
    ///
    /// Ties are broken by placing samples before coalescences and then by node index,
    /// so the event sequence is a total order.
    ///
    /// ## Examples
    ///
    /// ```rust
    /// use acg_phylo::{EventKind, FromNewick, TimeTree};
    /// let tree = TimeTree::from_newick("((t1:1.0,t2:1.0):0.5,t3:1.5);")?;
    /// let events = tree.events();
    /// assert_eq!(events.len(), 5);
    /// assert_eq!(events[0].kind, EventKind::Sample);
    /// assert_eq!(events[0].lineages, 1);
    /// assert_eq!(events.last().unwrap().lineages, 1);
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn events(&self) -> Vec<Event> {
        let mut nodes = self
            .graph
            .node_indices()
            .map(|i| {
                let kind = match self.is_leaf(i) {
                    true => EventKind::Sample,
                    false => EventKind::Coalescence,
                };
                (self.graph[i].height, kind, i)
            })
            .collect_vec();
        nodes.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

        let mut lineages: usize = 0;
        nodes
            .into_iter()
            .map(|(height, kind, i)| {
                match kind {
                    EventKind::Sample => lineages += 1,
                    // a multifurcation of c children merges c lineages into one
                    EventKind::Coalescence => lineages -= self.children(i).len() - 1,
                }
                Event { height, kind, lineages }
            })
            .collect()
    }
}

impl FromNewick for TimeTree {
    /// Returns a [`TimeTree`] created from a [Newick](https://en.wikipedia.org/wiki/Newick_format) string.
    ///
    /// Node heights are recovered from the branch lengths, placing the most
    /// distant tip at height `0.0`.
    ///
    /// ## Examples
    ///
    /// ```rust
    /// use acg_phylo::{FromNewick, TimeTree};
    /// let tree = TimeTree::from_newick("((t1:1.0,t2:1.0)anc:0.5,t3:1.5)root;")?;
    /// let anc = tree.find("anc")?;
    /// assert!((tree.height(anc)? - 1.0).abs() < 1e-12);
    /// assert!((tree.height(tree.root())? - 1.5).abs() < 1e-12);
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    fn from_newick(newick: &str) -> Result<Self, Report> {
        newick::parse(newick)
    }
}

impl ToNewick for TimeTree {
    /// Returns a Newick string with node labels and branch lengths.
    ///
    /// ## Examples
    ///
    /// ```rust
    /// use acg_phylo::{FromNewick, TimeTree, ToNewick};
    /// let tree = TimeTree::from_newick("((t1:1.0,t2:1.0)anc:0.5,t3:1.5)root;")?;
    /// assert_eq!(tree.to_newick()?, "((t1:1,t2:1)anc:0.5,t3:1.5)root;");
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    fn to_newick(&self) -> Result<String, Report> {
        newick::write(self)
    }
}

// ----------------------------------------------------------------------------
// TimeTreeBuilder
// ----------------------------------------------------------------------------

/// Constructs a [`TimeTree`] bottom-up from samples and coalescences.
///
/// ## Examples
///
/// ```rust
/// use acg_phylo::TimeTree;
/// let mut builder = TimeTree::builder();
/// let t1 = builder.sample("t1", 0.0);
/// let t2 = builder.sample("t2", 0.0);
/// let t3 = builder.sample("t3", 0.0);
/// let anc = builder.coalesce("", 1.0, t1, t2)?;
/// builder.coalesce("", 1.5, anc, t3)?;
/// let tree = builder.build()?;
/// assert!(tree.is_binary());
/// assert!((tree.length() - 4.5).abs() < 1e-12);
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct TimeTreeBuilder {
    graph: Graph<Node, Branch>,
}

impl TimeTree {
    /// Returns a new empty [`TimeTreeBuilder`].
    pub fn builder() -> TimeTreeBuilder {
        TimeTreeBuilder { graph: Graph::new() }
    }
}

impl TimeTreeBuilder {
    /// Adds a sampled taxon at the given height and returns its [`NodeIndex`].
    pub fn sample<L>(&mut self, label: L, height: f64) -> NodeIndex
    where
        L: Into<String>,
    {
        self.graph.add_node(Node::new(label, height))
    }

    /// Merges two existing lineages into a new parent node at the given height.
    ///
    /// Fails if either child already has a parent or is not below the new node.
    pub fn coalesce<L>(
        &mut self,
        label: L,
        height: f64,
        left: NodeIndex,
        right: NodeIndex,
    ) -> Result<NodeIndex, Report>
    where
        L: Into<String>,
    {
        let parent = self.graph.add_node(Node::new(label, height));
        for child in [left, right] {
            if self.graph.neighbors_directed(child, Direction::Incoming).count() > 0 {
                Err(eyre!("Node {child:?} already has a parent."))?
            }
            let child_height = self
                .graph
                .node_weight(child)
                .ok_or_else(|| eyre!("Unknown child node {child:?}"))?
                .height;
            if child_height > height {
                Err(eyre!("Child {child:?} (height {child_height}) lies above its parent (height {height})."))?
            }
            self.graph.add_edge(parent, child, Branch::new(height - child_height));
        }
        Ok(parent)
    }

    /// Validates the accumulated topology and returns the finished [`TimeTree`].
    pub fn build(self) -> Result<TimeTree, Report> {
        TimeTree::from_graph(self.graph)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
