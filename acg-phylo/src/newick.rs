//! Parsing and writing of [Newick](https://en.wikipedia.org/wiki/Newick_format) strings.

use crate::{Branch, Node, TimeTree};

use color_eyre::eyre::{eyre, Report, Result, WrapErr};
use petgraph::graph::{Graph, NodeIndex};

/// Returns a [`TimeTree`] parsed from a Newick string.
///
/// Supports tip labels, internal labels, and branch lengths. Heights are
/// recovered from branch lengths, with the most distant tip at height `0.0`.
///
/// ## Examples
///
/// ```rust
/// use acg_phylo::newick;
/// let tree = newick::parse("((t1:1.0,t2:1.0):0.5,t3:1.5);")?;
/// assert_eq!(tree.leaves().len(), 3);
/// # Ok::<(), color_eyre::eyre::Report>(())
/// ```
pub fn parse(newick: &str) -> Result<TimeTree, Report> {
    let text: String = newick.chars().filter(|c| !c.is_whitespace()).collect();
    let text = text.strip_suffix(';').unwrap_or(&text);
    if text.is_empty() {
        Err(eyre!("Failed to parse an empty Newick string."))?
    }

    let mut graph = Graph::new();
    let (root, _root_length) = parse_clade(text, &mut graph)?;

    assign_heights(&mut graph, root);
    TimeTree::from_graph(graph)
}

/// Returns the Newick string for a [`TimeTree`]; used by [`ToNewick`](crate::ToNewick).
pub fn write(tree: &TimeTree) -> Result<String, Report> {
    let mut out = String::new();
    write_clade(tree, tree.root(), true, &mut out)?;
    out.push(';');
    Ok(out)
}

// recursive descent over one clade: "(<clade>,<clade>,...)label:length"
fn parse_clade(
    text: &str,
    graph: &mut Graph<Node, Branch>,
) -> Result<(NodeIndex, f64), Report> {
    let (inner, tail) = match text.starts_with('(') {
        true => {
            let close = matching_close(text)?;
            (&text[1..close], &text[close + 1..])
        }
        false => ("", text),
    };

    // the tail is "label", "label:length", ":length", or empty
    let (label, length) = match tail.split_once(':') {
        Some((label, length)) => {
            let length: f64 = length
                .parse()
                .wrap_err_with(|| eyre!("Failed to parse branch length from: {tail}"))?;
            (label, length)
        }
        None => (tail, 0.0),
    };
    if label.contains(['(', ')', ',']) {
        Err(eyre!("Unexpected punctuation in node label: {label}"))?
    }

    let node = graph.add_node(Node::new(label, 0.0));
    for part in split_top_level(inner) {
        let (child, child_length) = parse_clade(part, graph)?;
        graph.add_edge(node, child, Branch::new(child_length));
    }

    Ok((node, length))
}

/// Index of the ')' matching the leading '(' of `text`.
fn matching_close(text: &str) -> Result<usize, Report> {
    let mut depth = 0usize;
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok(i);
                }
            }
            _ => (),
        }
    }
    Err(eyre!("Failed to find matching parentheses in Newick string: {text}"))
}

/// Splits on commas at nesting depth zero.
fn split_top_level(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let (mut depth, mut start) = (0usize, 0usize);
    for (i, c) in text.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&text[start..i]);
                start = i + 1;
            }
            _ => (),
        }
    }
    if !text.is_empty() {
        parts.push(&text[start..]);
    }
    parts
}

/// Converts root-to-node path lengths into heights above the most distant tip.
fn assign_heights(graph: &mut Graph<Node, Branch>, root: NodeIndex) {
    let mut depth = vec![0.0; graph.node_count()];
    let mut stack = vec![root];
    let mut max_depth: f64 = 0.0;
    while let Some(node) = stack.pop() {
        let mut edges = graph
            .neighbors_directed(node, petgraph::Direction::Outgoing)
            .detach();
        while let Some((edge, child)) = edges.next(graph) {
            depth[child.index()] = depth[node.index()] + graph[edge].length;
            max_depth = max_depth.max(depth[child.index()]);
            stack.push(child);
        }
    }
    for node in graph.node_indices() {
        graph[node].height = max_depth - depth[node.index()];
    }
}

fn write_clade(
    tree: &TimeTree,
    node: NodeIndex,
    is_root: bool,
    out: &mut String,
) -> Result<(), Report> {
    let children = tree.children(node);
    if !children.is_empty() {
        out.push('(');
        for (i, child) in children.into_iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            write_clade(tree, child, false, out)?;
        }
        out.push(')');
    }
    out.push_str(&tree.node(node)?.label);
    if !is_root {
        out.push_str(&format!(":{}", tree.branch_length(node)?));
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{newick, ToNewick};

    #[test]
    fn round_trip_preserves_topology_and_heights() {
        let text = "(((t1:1,t2:1)a:0.5,t3:1.5)b:2,t4:3.5)c;";
        let tree = newick::parse(text).expect("parse");
        assert_eq!(tree.to_newick().expect("write"), text);
    }

    #[test]
    fn heights_follow_longest_tip_path() {
        // t2 is sampled 0.5 time units before t1 and t3
        let tree = newick::parse("((t1:1.0,t2:0.5)a:1.0,t3:2.0)b;").expect("parse");
        let t2 = tree.find("t2").expect("t2");
        assert!((tree.height(t2).expect("height") - 0.5).abs() < 1e-12);
        assert!((tree.height(tree.root()).expect("height") - 2.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_malformed_strings() {
        assert!(newick::parse("((t1:1,t2:1;").is_err());
        assert!(newick::parse("").is_err());
        assert!(newick::parse("(t1:x,t2:1);").is_err());
    }
}
