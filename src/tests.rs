use crate::{
    ArgSimulator, ConstantPopulation, Conversion, ConversionGraph, DnaAlignment, GcCoalescent,
    JukesCantor, LikelihoodEngine, Locus,
};

use acg_phylo::{FromNewick, TimeTree};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn loci() -> Vec<Locus> {
    vec![Locus::new("core", 600).expect("locus"), Locus::new("accessory", 150).expect("locus")]
}

fn random_alignment(taxa: &[&str], rng: &mut StdRng) -> DnaAlignment {
    let loci = loci();
    let mut alignment = DnaAlignment::new(&loci);
    for taxon in taxa {
        for (locus, l) in loci.iter().enumerate() {
            let sequence: String = (0..l.site_count())
                .map(|_| ['A', 'C', 'G', 'T'][rng.gen_range(0..4)])
                .collect();
            alignment.add_sequence(*taxon, locus, &sequence).expect("sequence");
        }
    }
    alignment
}

#[test]
fn simulated_graphs_survive_the_full_pipeline() {
    let _ = env_logger::builder().is_test(true).try_init();
    let taxa = ["t1", "t2", "t3", "t4", "t5"];
    let simulator = ArgSimulator::new(1.0, 3.0, 8.0).expect("simulator");
    let prior = GcCoalescent::new(
        Box::new(ConstantPopulation::new(1.0).expect("population")),
        3.0,
        8.0,
    )
    .expect("prior");

    let mut rng = StdRng::seed_from_u64(97);
    let acg = simulator.simulate(&taxa, loci(), &mut rng).expect("simulate");

    // the round trip reconstructs the graph; frame heights are recovered by
    // summing branch lengths, so they agree to tolerance rather than by bit
    let newick = acg.to_extended_newick().expect("write");
    let restored = ConversionGraph::from_extended_newick(&newick, loci()).expect("parse");
    assert_eq!(restored.conversion_count(), acg.conversion_count());
    for index in acg.frame().graph.node_indices() {
        let label = &acg.frame().node(index).expect("node").label;
        let twin = restored.frame().find(label).expect("twin");
        let height = acg.frame().height(index).expect("height");
        let restored_height = restored.frame().height(twin).expect("height");
        assert!((height - restored_height).abs() < 1e-9);
    }
    for ((_, before), (_, after)) in acg.conversions().zip(restored.conversions()) {
        assert_eq!(
            (before.locus, before.start_site, before.end_site),
            (after.locus, after.start_site, after.end_site)
        );
        assert!((before.departure_height - after.departure_height).abs() < 1e-9);
        assert!((before.arrival_height - after.arrival_height).abs() < 1e-9);
    }

    // the prior sees the restored graph as the same graph
    let direct = prior.log_prior(&acg).expect("prior");
    let parsed = prior.log_prior(&restored).expect("prior");
    assert!(!direct.is_nan());
    assert!((direct - parsed).abs() < 1e-9);

    // the likelihood agrees across the round trip
    let alignment = random_alignment(&taxa, &mut rng);
    let mut engine = LikelihoodEngine::new(alignment.clone(), JukesCantor);
    let mut fresh = LikelihoodEngine::new(alignment, JukesCantor);
    let first = engine.log_likelihood(&acg).expect("likelihood");
    let second = fresh.log_likelihood(&restored).expect("likelihood");
    assert!(first.is_finite());
    assert!((first - second).abs() < 1e-9);
}

#[test]
fn zero_conversions_reduce_to_the_frame_likelihood() {
    let taxa = ["t1", "t2", "t3", "t4"];
    let frame = TimeTree::from_newick("(((t1:1.0,t2:1.0)n1:1.0,t3:2.0)n2:1.0,t4:3.0)n3;")
        .expect("newick");
    let acg = ConversionGraph::new(frame, loci()).expect("graph");

    let mut rng = StdRng::seed_from_u64(17);
    let alignment = random_alignment(&taxa, &mut rng);
    let mut engine = LikelihoodEngine::new(alignment, JukesCantor);
    let total = engine.log_likelihood(&acg).expect("likelihood");

    let mut frame_only = 0.0;
    for (locus, l) in loci().iter().enumerate() {
        frame_only += engine
            .tree_log_likelihood(acg.frame(), locus, 0..l.site_count())
            .expect("frame likelihood");
    }
    assert_eq!(total.to_bits(), frame_only.to_bits());
}

#[test]
fn disjoint_conversions_factor_into_region_likelihoods() {
    let loci = vec![Locus::new("l1", 500).expect("locus")];
    let frame = TimeTree::from_newick("(((t1:1.0,t2:1.0)n1:1.0,t3:2.0)n2:1.0,t4:3.0)n3;")
        .expect("newick");
    let mut acg = ConversionGraph::new(frame, loci.clone()).expect("graph");

    let tract = |acg: &ConversionGraph, start, end, dep: &str, h1, arr: &str, h2| Conversion {
        locus: 0,
        start_site: start,
        end_site: end,
        departure_node: acg.frame().find(dep).expect("departure"),
        departure_height: h1,
        arrival_node: acg.frame().find(arr).expect("arrival"),
        arrival_height: h2,
    };
    acg.add_conversion(tract(&acg, 100, 199, "t1", 0.5, "t3", 1.5)).expect("add");
    acg.add_conversion(tract(&acg, 250, 299, "t2", 0.25, "t4", 2.5)).expect("add");
    assert_eq!(acg.regions(0).expect("regions").len(), 5);

    let mut rng = StdRng::seed_from_u64(5);
    let mut alignment = DnaAlignment::new(&loci);
    for taxon in ["t1", "t2", "t3", "t4"] {
        let sequence: String =
            (0..500).map(|_| ['A', 'C', 'G', 'T'][rng.gen_range(0..4)]).collect();
        alignment.add_sequence(taxon, 0, &sequence).expect("sequence");
    }

    let mut engine = LikelihoodEngine::new(alignment, JukesCantor);
    let total = engine.log_likelihood(&acg).expect("likelihood");

    let mut factored = 0.0;
    for region in acg.all_regions().expect("regions") {
        let tree = acg.marginal_tree(&region).expect("marginal");
        factored += engine
            .tree_log_likelihood(&tree, region.locus, region.start..region.end)
            .expect("region likelihood");
    }
    assert!((total - factored).abs() <= 1e-14 * factored.abs());
}

#[test]
fn regions_round_trip_through_json() {
    let simulator = ArgSimulator::new(1.0, 3.0, 8.0).expect("simulator");
    let mut rng = StdRng::seed_from_u64(41);
    let acg = simulator.simulate(&["t1", "t2", "t3", "t4"], loci(), &mut rng).expect("simulate");

    let regions = acg.all_regions().expect("regions");
    let json = serde_json::to_string(&regions).expect("serialize");
    let restored: Vec<crate::Region> = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(restored, regions);
}

#[test]
fn proposal_cycle_is_reversible_end_to_end() {
    let taxa = ["t1", "t2", "t3", "t4"];
    let simulator = ArgSimulator::new(1.0, 3.0, 8.0).expect("simulator");
    let mut rng = StdRng::seed_from_u64(3);
    let mut acg = simulator.simulate(&taxa, loci(), &mut rng).expect("simulate");

    let alignment = random_alignment(&taxa, &mut rng);
    let mut engine = LikelihoodEngine::new(alignment, JukesCantor);
    let before = engine.log_likelihood(&acg).expect("likelihood");
    let newick = acg.to_extended_newick().expect("write");

    // propose: drop every conversion, then reject the proposal
    let ids: Vec<_> = acg.conversions().map(|(id, _)| id).collect();
    for id in ids {
        acg.remove_conversion(id).expect("remove");
    }
    engine.log_likelihood(&acg).expect("likelihood");
    acg.rollback();

    assert_eq!(acg.to_extended_newick().expect("rewrite"), newick);
    let after = engine.log_likelihood(&acg).expect("likelihood");
    assert_eq!(before.to_bits(), after.to_bits());
}
