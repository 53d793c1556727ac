//! End-to-end properties over whole simulated networks: bootstrap health,
//! store/lookup agreement with the omniscient oracle, snapshot round trips,
//! and seed-for-seed reproducibility.

use std::collections::HashSet;

use xorsim::{KadConf, KadId, Network, Routable, Snapshot};

fn build_network(conf: KadConf, seed: u64, n_initial_conn: usize) -> Network {
    let mut net = Network::new(conf, seed).expect("valid id space");
    net.initialize_nodes(n_initial_conn);
    net
}

/// A dense topology: with `k` at least the population minus one, no bucket
/// can ever overflow, so every contact a node hears about stays resident and
/// decentralized lookups have no excuse to miss ground truth.
fn dense_conf() -> KadConf {
    KadConf {
        n_bits: 16,
        k: 9,
        alpha: 3,
        n_nodes: 10,
        bootstrap: Vec::new(),
    }
}

fn assert_table_invariants(net: &Network) {
    for node in net.nodes() {
        for bucket in node.table().buckets() {
            assert!(
                bucket.len() <= net.conf().k,
                "bucket exceeds k on node {}",
                node.id()
            );
            let distinct: HashSet<KadId> = bucket.iter().copied().collect();
            assert_eq!(distinct.len(), bucket.len(), "duplicate contact in bucket");
            assert!(!distinct.contains(&node.id()), "node bucketed itself");
        }
        for contact in node.table().contacts() {
            assert!(
                net.lookup_cheat(contact).is_some(),
                "dangling contact {contact} on node {}",
                node.id()
            );
        }
    }
}

#[test]
fn fifty_node_bootstrap_populates_every_table() {
    let conf = KadConf {
        n_bits: 16,
        k: 4,
        alpha: 2,
        n_nodes: 50,
        bootstrap: Vec::new(),
    };
    let net = build_network(conf, 11, 4);
    assert_eq!(net.nodes().len(), 50);
    for node in net.nodes() {
        assert!(
            !node.table().is_empty(),
            "node {} joined with an empty table",
            node.id()
        );
    }
    assert_table_invariants(&net);
}

#[test]
fn store_agrees_with_the_omniscient_scan() {
    let mut net = build_network(dense_conf(), 21, 9);
    net.initialize_files(8);

    let expectations: Vec<(KadId, Vec<KadId>)> = net
        .files()
        .iter()
        .map(|f| (f.id(), net.find_nearest_cheat(f)))
        .collect();

    for (file_id, expected) in &expectations {
        let holders: Vec<KadId> = net
            .nodes()
            .iter()
            .filter(|n| n.holds(*file_id))
            .map(|n| n.id())
            .collect();
        let holder_set: HashSet<KadId> = holders.iter().copied().collect();
        let expected_set: HashSet<KadId> = expected.iter().copied().collect();
        assert_eq!(
            holder_set, expected_set,
            "replica set of file {file_id} diverged from ground truth"
        );
    }
}

#[test]
fn lookups_from_every_node_converge_into_the_store_set() {
    let mut net = build_network(dense_conf(), 31, 9);
    net.initialize_files(4);

    let files: Vec<KadId> = net.files().iter().map(|f| f.id()).collect();
    let entries: Vec<KadId> = net.nodes().iter().map(|n| n.id()).collect();

    for file_id in files {
        let store_set: HashSet<KadId> = net
            .nodes()
            .iter()
            .filter(|n| n.holds(file_id))
            .map(|n| n.id())
            .collect();
        for entry in &entries {
            let found = net.lookup(*entry, file_id);
            assert!(!found.is_empty());
            for id in &found {
                assert!(
                    store_set.contains(id),
                    "lookup from {entry} reported {id}, which holds no replica of {file_id}"
                );
            }
        }
    }
}

#[test]
fn check_files_reports_zero_discrepancies_on_a_fresh_network() {
    let mut net = build_network(dense_conf(), 41, 9);
    net.initialize_files(10);
    let reports = net.check_files();
    assert!(
        reports.is_empty(),
        "fresh churn-free network reported {} mismatches",
        reports.len()
    );
}

#[test]
fn snapshot_survives_a_file_round_trip() {
    let mut net = build_network(dense_conf(), 51, 9);
    net.initialize_files(5);
    let snap = net.snapshot();

    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("run.json");
    snap.save(&path).expect("save snapshot");
    let restored = Snapshot::load(&path).expect("load snapshot");

    assert_eq!(snap, restored);
    // Bucket membership mapping specifically: identical node ids mapping to
    // identical contact sets.
    for (before, after) in snap.nodes.iter().zip(&restored.nodes) {
        assert_eq!(before.id, after.id);
        let lhs: Vec<HashSet<KadId>> = before
            .buckets
            .iter()
            .map(|b| b.iter().copied().collect())
            .collect();
        let rhs: Vec<HashSet<KadId>> = after
            .buckets
            .iter()
            .map(|b| b.iter().copied().collect())
            .collect();
        assert_eq!(lhs, rhs);
    }
}

#[test]
fn ascending_identifier_scenario_grows_the_last_joiner() {
    let conf = KadConf {
        n_bits: 8,
        k: 2,
        alpha: 1,
        n_nodes: 0,
        bootstrap: Vec::new(),
    };
    let mut net = Network::new(conf, 1).expect("valid id space");
    for raw in [1u128, 2, 4, 8, 16] {
        let id = KadId::new(raw, 8).expect("valid 8-bit id");
        net.add_node(id, 2).expect("join succeeds");
    }

    let sixteen = net
        .lookup_cheat(KadId::new(16, 8).unwrap())
        .expect("node 16 exists");
    // The only initially reachable contact is the first node...
    assert!(sixteen.table().contains(KadId::new(1, 8).unwrap()));
    // ...and the join lookup discovered further peers beyond it.
    assert!(sixteen.table().len() > 1);
    assert_table_invariants(&net);
}

#[test]
fn identical_seeds_reproduce_identical_runs() {
    let run = |seed: u64| {
        let mut net = build_network(dense_conf(), seed, 9);
        net.initialize_files(6);
        net.check_files();
        net.snapshot()
    };
    assert_eq!(run(77), run(77));
    assert_ne!(run(77), run(78));
}
