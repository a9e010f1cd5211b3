//! Reconstruction of the marginal genealogy of a region.

use crate::error::AcgError;
use crate::graph::{ConversionGraph, Region};

use acg_phylo::{Branch, Node, TimeTree};
use color_eyre::eyre::{eyre, Report, Result};
use itertools::Itertools;
use log::trace;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, HashSet};

/// Returns the parent of a node in a parent-to-child scratch graph.
fn parent_of(graph: &Graph<Node, Branch>, node: NodeIndex) -> Option<NodeIndex> {
    graph.neighbors_directed(node, Direction::Incoming).next()
}

/// Ascends from `node` to the last ancestor whose height does not exceed `height`.
///
/// The result is the node below the point `(lineage, height)`: its parent, if it
/// has one, lies strictly above `height`.
fn climb(graph: &Graph<Node, Branch>, mut node: NodeIndex, height: f64) -> NodeIndex {
    while let Some(parent) = parent_of(graph, node) {
        match graph[parent].height <= height {
            true => node = parent,
            false => break,
        }
    }
    node
}

/// Builds the marginal tree of a [`Region`] by replaying its conversions on a
/// scratch copy of the clonal frame.
///
/// Each conversion is applied as a prune-regraft: the lineage below the departure
/// point is detached, its old attachment node dissolves, and the lineage
/// re-coalesces at the arrival point. Conversions are applied in ascending
/// departure-height order (ties by id), so the reconstruction is deterministic.
///
/// A conversion that departs and re-coalesces on the same marginal lineage leaves
/// the topology unchanged. Such conversions are skipped by default; configure the
/// builder with [`with_same_edge_coalescence(false)`](MarginalTreeBuilder::with_same_edge_coalescence)
/// to treat them as a [`PartitionInconsistency`](AcgError::PartitionInconsistency)
/// instead.
///
/// ## Examples
///
/// ```rust
/// use acg::{Conversion, ConversionGraph, Locus};
/// use acg_phylo::{FromNewick, TimeTree};
///
/// let frame = TimeTree::from_newick("((t1:1.0,t2:1.0)anc:0.5,t3:1.5)root;")?;
/// let mut acg = ConversionGraph::new(frame, vec![Locus::new("l1", 500)?])?;
/// acg.add_conversion(Conversion {
///     locus: 0,
///     start_site: 100,
///     end_site: 199,
///     departure_node: acg.frame().find("t1")?,
///     departure_height: 0.5,
///     arrival_node: acg.frame().find("t3")?,
///     arrival_height: 1.2,
/// })?;
///
/// // inside the tract, t1 now coalesces with t3 at the arrival height
/// let region = acg.regions(0)?.remove(1);
/// let marginal = acg.marginal_tree(&region)?;
/// let (t1, t3) = (marginal.find("t1")?, marginal.find("t3")?);
/// assert_eq!(marginal.parent(t1), marginal.parent(t3));
/// let junction = marginal.parent(t1).unwrap();
/// assert!((marginal.height(junction)? - 1.2).abs() < 1e-12);
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
#[derive(Clone, Debug)]
pub struct MarginalTreeBuilder<'a> {
    acg: &'a ConversionGraph,
    allow_same_edge_coalescence: bool,
}

impl<'a> MarginalTreeBuilder<'a> {
    /// Returns a new builder over the given graph.
    pub fn new(acg: &'a ConversionGraph) -> Self {
        MarginalTreeBuilder { acg, allow_same_edge_coalescence: true }
    }

    /// Sets whether a conversion may re-coalesce with the lineage it departed from.
    pub fn with_same_edge_coalescence(mut self, allow: bool) -> Self {
        self.allow_same_edge_coalescence = allow;
        self
    }

    /// Returns the marginal [`TimeTree`] of one region.
    pub fn marginal_tree(&self, region: &Region) -> Result<TimeTree, Report> {
        let frame = self.acg.frame();
        let mut graph = frame.graph.clone();

        // image maps each clonal-frame node to the scratch node currently
        // carrying its lineage
        let mut image: HashMap<NodeIndex, NodeIndex> =
            graph.node_indices().map(|i| (i, i)).collect();
        let mut retired: HashSet<NodeIndex> = HashSet::new();

        let mut conversions = region
            .conversions
            .iter()
            .map(|id| Ok((*id, self.acg.conversion(*id)?.clone())))
            .collect::<Result<Vec<_>, Report>>()?;
        conversions.sort_by(|(id_a, a), (id_b, b)| {
            a.departure_height.total_cmp(&b.departure_height).then(id_a.cmp(id_b))
        });

        for (id, conversion) in conversions {
            let lineage_of = |image: &HashMap<NodeIndex, NodeIndex>, node: NodeIndex| {
                image
                    .get(&node)
                    .copied()
                    .ok_or_else(|| eyre!("Conversion {id} references unknown node {node:?}"))
            };
            let departed = climb(
                &graph,
                lineage_of(&image, conversion.departure_node)?,
                conversion.departure_height,
            );
            let mut attach = climb(
                &graph,
                lineage_of(&image, conversion.arrival_node)?,
                conversion.arrival_height,
            );

            if attach == departed {
                match self.allow_same_edge_coalescence {
                    true => {
                        trace!("Conversion {id} re-coalesces on its own lineage, skipping");
                        continue;
                    }
                    false => Err(AcgError::PartitionInconsistency(format!(
                        "conversion {id} departs and re-coalesces on the same lineage"
                    )))?,
                }
            }

            // detach the departing lineage and dissolve its attachment node
            let parent = parent_of(&graph, departed)
                .ok_or_else(|| eyre!("Conversion {id} departs above the marginal root."))?;
            let sibling = graph
                .neighbors_directed(parent, Direction::Outgoing)
                .find(|child| *child != departed)
                .ok_or_else(|| eyre!("Conversion {id} departs below a non-binary node."))?;
            for child in [departed, sibling] {
                let edge = graph
                    .find_edge(parent, child)
                    .ok_or_else(|| eyre!("Missing edge to child {child:?}"))?;
                graph.remove_edge(edge);
            }
            if let Some(grandparent) = parent_of(&graph, parent) {
                let edge = graph
                    .find_edge(grandparent, parent)
                    .ok_or_else(|| eyre!("Missing edge to parent {parent:?}"))?;
                graph.remove_edge(edge);
                let length = graph[grandparent].height - graph[sibling].height;
                graph.add_edge(grandparent, sibling, Branch::new(length));
            }
            retired.insert(parent);
            for target in image.values_mut() {
                if *target == parent {
                    *target = sibling;
                }
            }
            if attach == parent {
                attach = sibling;
            }

            // re-coalesce at the arrival point
            let junction = graph.add_node(Node::new("", conversion.arrival_height));
            if let Some(above) = parent_of(&graph, attach) {
                let edge = graph
                    .find_edge(above, attach)
                    .ok_or_else(|| eyre!("Missing edge to attachment {attach:?}"))?;
                graph.remove_edge(edge);
                let length = graph[above].height - conversion.arrival_height;
                graph.add_edge(above, junction, Branch::new(length));
            }
            for child in [attach, departed] {
                let length = conversion.arrival_height - graph[child].height;
                graph.add_edge(junction, child, Branch::new(length));
            }
        }

        // name the junction nodes without clashing with clonal-frame labels
        let mut labels: HashSet<String> = graph
            .node_indices()
            .filter(|i| !retired.contains(i))
            .map(|i| graph[i].label.clone())
            .collect();
        let mut next = 0;
        for i in graph.node_indices().collect_vec() {
            if graph[i].label.is_empty() && !retired.contains(&i) {
                let mut label = format!("NODE_{next}");
                while labels.contains(&label) {
                    next += 1;
                    label = format!("NODE_{next}");
                }
                labels.insert(label.clone());
                graph[i].label = label;
            }
        }

        // retired nodes are edgeless by construction; compact them away
        let mut compact: Graph<Node, Branch> = Graph::new();
        let live: HashMap<NodeIndex, NodeIndex> = graph
            .node_indices()
            .filter(|i| !retired.contains(i))
            .map(|i| (i, compact.add_node(graph[i].clone())))
            .collect();
        for edge in graph.edge_indices() {
            let (parent, child) =
                graph.edge_endpoints(edge).ok_or_else(|| eyre!("Missing edge endpoints"))?;
            let branch =
                graph.edge_weight(edge).ok_or_else(|| eyre!("Missing edge weight"))?.clone();
            let (parent, child) = (
                live.get(&parent).ok_or_else(|| eyre!("Edge from a retired node"))?,
                live.get(&child).ok_or_else(|| eyre!("Edge to a retired node"))?,
            );
            compact.add_edge(*parent, *child, branch);
        }

        TimeTree::from_graph(compact)
    }
}

impl ConversionGraph {
    /// Returns the marginal tree of a region with the default builder settings.
    pub fn marginal_tree(&self, region: &Region) -> Result<TimeTree, Report> {
        MarginalTreeBuilder::new(self).marginal_tree(region)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
