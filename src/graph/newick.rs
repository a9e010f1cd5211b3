//! Extended Newick serialization of a [`ConversionGraph`].
//!
//! The clonal frame is written as plain Newick; each conversion follows as a
//! bracketed annotation before the final `;`, naming its locus, tract, and
//! attachment points by node label. Floats are written with enough digits to
//! round-trip; parsing reconstructs an equivalent graph, though frame heights
//! are recovered by summing branch lengths and can drift by an ulp.

use crate::graph::{Conversion, ConversionGraph, Locus};

use acg_phylo::{FromNewick, TimeTree, ToNewick};
use color_eyre::eyre::{eyre, Report, Result};
use std::collections::HashMap;

const ANNOTATION_OPEN: &str = "[&conversion={";
const ANNOTATION_CLOSE: &str = "}]";

impl ConversionGraph {
    /// Returns the graph as an extended Newick string.
    ///
    /// Conversions are written in ascending id order, so equal graphs always
    /// serialize to equal strings.
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
    ///     arrival_node: acg.frame().find("anc")?,
    ///     arrival_height: 1.25,
    /// })?;
    ///
    /// assert_eq!(
    ///     acg.to_extended_newick()?,
    ///     "((t1:1,t2:1)anc:0.5,t3:1.5)root\
    ///      [&conversion={locus=l1,start=100,end=199,node1=t1,height1=0.5,node2=anc,height2=1.25}];",
    /// );
    /// # Ok::<(), color_eyre::eyre::Report>(())
    /// ```
    pub fn to_extended_newick(&self) -> Result<String, Report> {
        let tree = self.frame().to_newick()?;
        let mut newick = tree
            .strip_suffix(';')
            .ok_or_else(|| eyre!("Clonal frame Newick is missing its terminator: {tree}"))?
            .to_string();

        for (_, conversion) in self.conversions() {
            let locus = self.locus(conversion.locus)?;
            let node1 = &self.frame().node(conversion.departure_node)?.label;
            let node2 = &self.frame().node(conversion.arrival_node)?.label;
            newick += &format!(
                "{ANNOTATION_OPEN}locus={},start={},end={},node1={node1},height1={},node2={node2},height2={}{ANNOTATION_CLOSE}",
                locus.name(),
                conversion.start_site,
                conversion.end_site,
                conversion.departure_height,
                conversion.arrival_height,
            );
        }
        newick.push(';');

        Ok(newick)
    }

    /// Returns a [`ConversionGraph`] parsed from an extended Newick string.
    ///
    /// The locus table is not part of the serialization and must be supplied;
    /// annotations name loci and nodes that are resolved against it and the
    /// parsed frame. Every restored conversion passes the same validation as
    /// [`add_conversion`](ConversionGraph::add_conversion), and the graph comes
    /// back with an empty journal.
    pub fn from_extended_newick(text: &str, loci: Vec<Locus>) -> Result<Self, Report> {
        let mut tree = String::with_capacity(text.len());
        let mut annotations = Vec::new();
        let mut rest = text;
        while let Some(open) = rest.find(ANNOTATION_OPEN) {
            tree += &rest[..open];
            let close = rest[open..]
                .find(ANNOTATION_CLOSE)
                .map(|i| open + i)
                .ok_or_else(|| eyre!("Unterminated conversion annotation: {}", &rest[open..]))?;
            annotations.push(&rest[open + ANNOTATION_OPEN.len()..close]);
            rest = &rest[close + ANNOTATION_CLOSE.len()..];
        }
        tree += rest;

        let frame = TimeTree::from_newick(&tree)?;
        let mut acg = ConversionGraph::new(frame, loci)?;
        for annotation in annotations {
            let conversion = parse_conversion(annotation, &acg)?;
            acg.add_conversion(conversion)?;
        }
        acg.commit();

        Ok(acg)
    }
}

/// Parses the body of one conversion annotation against the graph it belongs to.
fn parse_conversion(annotation: &str, acg: &ConversionGraph) -> Result<Conversion, Report> {
    let mut fields: HashMap<&str, &str> = HashMap::new();
    for pair in annotation.split(',') {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| eyre!("Malformed conversion field: {pair}"))?;
        fields.insert(key.trim(), value.trim());
    }
    let field = |key: &str| {
        fields
            .get(key)
            .copied()
            .ok_or_else(|| eyre!("Conversion annotation is missing the {key} field."))
    };

    Ok(Conversion {
        locus: acg.locus_id(field("locus")?)?,
        start_site: field("start")?.parse()?,
        end_site: field("end")?.parse()?,
        departure_node: acg.frame().find(field("node1")?)?,
        departure_height: field("height1")?.parse()?,
        arrival_node: acg.frame().find(field("node2")?)?,
        arrival_height: field("height2")?.parse()?,
    })
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::{Conversion, ConversionGraph, Locus};
    use acg_phylo::{FromNewick, TimeTree, ToNewick};

    fn loci() -> Vec<Locus> {
        vec![Locus::new("l1", 500).expect("locus"), Locus::new("l2", 300).expect("locus")]
    }

    fn four_taxon_graph() -> ConversionGraph {
        let frame =
            TimeTree::from_newick("(((t1:1.0,t2:1.0)n1:1.0,t3:2.0)n2:1.0,t4:3.0)n3;")
                .expect("newick");
        ConversionGraph::new(frame, loci()).expect("graph")
    }

    #[test]
    fn zero_conversion_graph_writes_plain_newick() {
        let acg = four_taxon_graph();
        assert_eq!(
            acg.to_extended_newick().expect("newick"),
            acg.frame().to_newick().expect("newick")
        );
    }

    #[test]
    fn round_trip_is_the_identity() {
        let mut acg = four_taxon_graph();
        let conversions = [
            Conversion {
                locus: 0,
                start_site: 100,
                end_site: 199,
                departure_node: acg.frame().find("t1").expect("t1"),
                departure_height: 0.5,
                arrival_node: acg.frame().find("n1").expect("n1"),
                arrival_height: 1.25,
            },
            Conversion {
                locus: 1,
                start_site: 0,
                end_site: 299,
                departure_node: acg.frame().find("t4").expect("t4"),
                departure_height: 0.75,
                arrival_node: acg.frame().find("n2").expect("n2"),
                arrival_height: 2.5,
            },
        ];
        for conversion in conversions {
            acg.add_conversion(conversion).expect("add");
        }

        let newick = acg.to_extended_newick().expect("write");
        let restored = ConversionGraph::from_extended_newick(&newick, loci()).expect("parse");

        assert_eq!(restored.conversion_count(), 2);
        assert_eq!(restored.pending_edits(), 0);
        assert_eq!(restored.to_extended_newick().expect("rewrite"), newick);

        let (_, restored_first) = restored.conversions().next().expect("first");
        assert_eq!(restored_first.start_site, 100);
        assert_eq!(restored_first.departure_height, 0.5);
    }

    #[test]
    fn parse_rejects_bad_annotations() {
        let plain = "(((t1:1,t2:1)n1:1,t3:2)n2:1,t4:3)n3";

        // unterminated annotation
        let text = format!("{plain}[&conversion={{locus=l1,start=0;");
        assert!(ConversionGraph::from_extended_newick(&text, loci()).is_err());

        // unknown locus name
        let text = format!(
            "{plain}[&conversion={{locus=l9,start=0,end=9,node1=t1,height1=0.5,node2=n1,height2=1.5}}];"
        );
        assert!(ConversionGraph::from_extended_newick(&text, loci()).is_err());

        // structurally invalid heights fail conversion validation
        let text = format!(
            "{plain}[&conversion={{locus=l1,start=0,end=9,node1=t1,height1=1.5,node2=n1,height2=0.5}}];"
        );
        assert!(ConversionGraph::from_extended_newick(&text, loci()).is_err());
    }
}
