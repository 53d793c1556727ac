//! The simulated network: arena ownership, bootstrap, the iterative
//! convergent lookup, file placement, and the consistency oracle.
//!
//! The network is the single owner of every node and file for the run's
//! lifetime. All cross-node traffic is a direct synchronous call: contacting
//! a peer inside a lookup reads that peer's local table immediately, with no
//! latency, timeout, or failure mode. `alpha` is a logical fan-out bound per
//! convergence round, not a parallelism knob.
//!
//! Every random draw goes through one explicitly seeded generator owned by
//! the network, so an entire run is reproducible from a single seed.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::id::{IdError, IdSpace, KadId};
use crate::node::Node;
use crate::routable::{KadFile, Routable, RoutableId, RoutableKind};

/// Shortlist capacity during an iterative lookup, as a multiple of the
/// larger of `k` and the requested amount. Generous enough that pruning
/// never discards a candidate that could still improve the result.
const SHORTLIST_FACTOR: usize = 4;

/// Construction parameters for a simulation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KadConf {
    /// Identifier width in bits.
    pub n_bits: u32,
    /// Bucket capacity and replication factor.
    pub k: usize,
    /// Fan-out bound per lookup round.
    pub alpha: usize,
    /// Number of nodes created by `initialize_nodes`.
    pub n_nodes: usize,
    /// Addresses assigned to the first created nodes; joiners connect to
    /// these. When empty, the first created node seeds everyone.
    #[serde(default)]
    pub bootstrap: Vec<String>,
}

impl Default for KadConf {
    fn default() -> Self {
        Self {
            n_bits: 64,
            k: 20,
            alpha: 3,
            n_nodes: 100,
            bootstrap: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error(transparent)]
    Id(#[from] IdError),
    #[error("node {0} already exists in the network")]
    DuplicateNode(KadId),
}

/// One file whose decentralized lookup disagreed with the omniscient scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConsistencyMismatch {
    pub file: KadId,
    /// The node the decentralized lookup started from.
    pub entry: KadId,
    /// Ground truth: the true k nearest nodes to the file.
    pub expected: Vec<KadId>,
    /// What the decentralized lookup returned.
    pub actual: Vec<KadId>,
}

/// Owner and orchestrator of the whole simulated population.
pub struct Network {
    conf: KadConf,
    space: IdSpace,
    rng: StdRng,
    nodes: Vec<Node>,
    index: HashMap<KadId, usize>,
    files: Vec<KadFile>,
}

impl Network {
    /// Build an empty network from construction parameters and a seed.
    pub fn new(conf: KadConf, seed: u64) -> Result<Self, IdError> {
        let space = IdSpace::new(conf.n_bits)?;
        Ok(Self {
            conf,
            space,
            rng: StdRng::seed_from_u64(seed),
            nodes: Vec::new(),
            index: HashMap::new(),
            files: Vec::new(),
        })
    }

    pub fn conf(&self) -> &KadConf {
        &self.conf
    }

    pub fn space(&self) -> IdSpace {
        self.space
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn files(&self) -> &[KadFile] {
        &self.files
    }

    // ------------------------------------------------------------------
    // Topology construction
    // ------------------------------------------------------------------

    /// Create `n_nodes` nodes with distinct random identifiers and join
    /// them strictly in creation order, so later joiners always see an
    /// already-bootstrapped network.
    ///
    /// The first `bootstrap.len()` nodes take the configured addresses and
    /// act as the seed set; with no configured addresses the first node
    /// seeds everyone.
    pub fn initialize_nodes(&mut self, n_initial_conn: usize) {
        for i in 0..self.conf.n_nodes {
            let id = self.draw_node_id();
            let address = self.conf.bootstrap.get(i).cloned().unwrap_or_default();
            self.insert_and_join(id, address, n_initial_conn);
        }
        info!(nodes = self.nodes.len(), "network initialized");
    }

    /// Create one extra node with a caller-chosen identifier and run the
    /// standard join procedure against the live network.
    pub fn add_node(&mut self, id: KadId, n_initial_conn: usize) -> Result<(), NetworkError> {
        self.space.validate(id)?;
        if self.index.contains_key(&id) {
            return Err(NetworkError::DuplicateNode(id));
        }
        self.insert_and_join(id, String::new(), n_initial_conn);
        Ok(())
    }

    fn draw_node_id(&mut self) -> KadId {
        loop {
            let id = self.space.random(&mut self.rng);
            if !self.index.contains_key(&id) {
                return id;
            }
        }
    }

    fn insert_and_join(&mut self, id: KadId, address: String, n_initial_conn: usize) {
        let node = Node::new(self.space, id, self.conf.k, address);
        self.index.insert(id, self.nodes.len());
        self.nodes.push(node);

        // Standard join: connect to the seed set, then look up our own
        // identifier to populate the table with plausible peers.
        let seeds = self.seed_set(id);
        let slot = self.index[&id];
        for seed in &seeds {
            self.nodes[slot].add_conn(*seed, false);
        }
        let discovered = self.find_nearest_nodes(id, id, n_initial_conn);
        debug!(
            node = %id,
            seeds = seeds.len(),
            discovered = discovered.len(),
            "node joined"
        );
    }

    /// Bootstrap contacts for a joining node: every address-bearing node,
    /// or the first created node when no addresses were configured.
    fn seed_set(&self, joining: KadId) -> Vec<KadId> {
        let mut seeds: Vec<KadId> = self
            .nodes
            .iter()
            .filter(|n| !n.address().is_empty() && n.id() != joining)
            .map(|n| n.id())
            .collect();
        if seeds.is_empty() {
            if let Some(first) = self.nodes.first() {
                if first.id() != joining {
                    seeds.push(first.id());
                }
            }
        }
        seeds
    }

    /// Create `n_files` files with random identifiers, each referenced by a
    /// uniformly random existing node, and disseminate replicas via `store`.
    pub fn initialize_files(&mut self, n_files: usize) {
        if self.nodes.is_empty() {
            warn!("cannot initialize files on an empty network");
            return;
        }
        for _ in 0..n_files {
            let id = self.draw_file_id();
            let referencer = self.nodes[self.rng.gen_range(0..self.nodes.len())].id();
            self.files.push(KadFile::new(id, referencer));
            self.store(id);
        }
        info!(files = self.files.len(), "files initialized");
    }

    fn draw_file_id(&mut self) -> KadId {
        loop {
            let id = self.space.random(&mut self.rng);
            if !self.files.iter().any(|f| f.id() == id) {
                return id;
            }
        }
    }

    // ------------------------------------------------------------------
    // The iterative convergent lookup
    // ------------------------------------------------------------------

    /// Iterative Kademlia lookup starting from `origin`'s local table.
    ///
    /// Each round contacts up to `alpha` unvisited candidates closest to
    /// `target`; every contacted peer answers with its own local nearest
    /// set and admits the origin into its table, while the origin keeps
    /// whatever it learned and refreshes the responder as its
    /// most-recently-seen contact. The round loop terminates when a round
    /// no longer improves the best-`amount` known set and every member of
    /// that set has been contacted, or when no unvisited candidate remains.
    /// Termination is guaranteed: the visited set only grows and the
    /// candidate universe is finite.
    ///
    /// The origin itself competes for the returned set like any other
    /// contact, so a lookup started on a node that is itself among the
    /// nearest can report it.
    pub fn find_nearest_nodes(&mut self, origin: KadId, target: KadId, amount: usize) -> Vec<KadId> {
        if amount == 0 {
            return Vec::new();
        }
        let Some(&origin_slot) = self.index.get(&origin) else {
            return Vec::new();
        };
        let space = self.space;
        let alpha = self.conf.alpha.max(1);
        let cap = self.conf.k.max(amount) * SHORTLIST_FACTOR;

        let mut shortlist = self.nodes[origin_slot].find_nearest_nodes_local(target, amount);
        let mut seen: HashSet<KadId> = shortlist.iter().copied().collect();
        if seen.insert(origin) {
            shortlist.push(origin);
        }
        let mut visited: HashSet<KadId> = HashSet::new();
        visited.insert(origin);

        shortlist.sort_by(|a, b| space.cmp_distance(target, *a, *b));
        let mut best: Vec<KadId> = shortlist.iter().take(amount).copied().collect();
        let mut rounds = 0usize;

        loop {
            let candidates: Vec<KadId> = shortlist
                .iter()
                .filter(|c| !visited.contains(c))
                .take(alpha)
                .copied()
                .collect();
            if candidates.is_empty() {
                break;
            }
            rounds += 1;

            for peer in candidates {
                visited.insert(peer);
                let Some(&peer_slot) = self.index.get(&peer) else {
                    continue;
                };
                // Simulated contact: a direct synchronous query that always
                // succeeds. The peer learns about the origin in return.
                let learned = self.nodes[peer_slot].find_nearest_nodes_local(target, amount);
                self.nodes[peer_slot].add_conn(origin, true);
                for contact in learned {
                    if seen.insert(contact) {
                        shortlist.push(contact);
                        self.nodes[origin_slot].add_conn(contact, false);
                    }
                }
                // The direct reply is fresher evidence than the hearsay
                // merged above, so the responder is refreshed last.
                self.nodes[origin_slot].add_conn(peer, false);
            }

            shortlist.sort_by(|a, b| space.cmp_distance(target, *a, *b));
            shortlist.truncate(cap);

            let head: Vec<KadId> = shortlist.iter().take(amount).copied().collect();
            let improved = head != best;
            best = head;
            // Converged only once the best set stopped moving and all of its
            // members have answered a query themselves.
            if !improved && best.iter().all(|id| visited.contains(id)) {
                break;
            }
        }

        debug!(
            origin = %origin,
            target = %target,
            amount,
            rounds,
            visited = visited.len(),
            found = best.len(),
            "iterative lookup converged"
        );
        best
    }

    /// Resolve the `k` nearest nodes to an arbitrary identifier — used
    /// uniformly for node discovery and for locating a file's replicas.
    pub fn lookup(&mut self, origin: KadId, target: KadId) -> Vec<KadId> {
        let k = self.conf.k;
        self.find_nearest_nodes(origin, target, k)
    }

    /// Place replicas of a file on the `k` nodes its referencer finds
    /// nearest to the file identifier. The sole replication mechanism.
    /// Returns the chosen replica set.
    pub fn store(&mut self, file_id: KadId) -> Vec<KadId> {
        let Some(file) = self.files.iter().find(|f| f.id() == file_id) else {
            warn!(file = %file_id, "store requested for an unknown file");
            return Vec::new();
        };
        let referencer = file.referencer();
        let holders = self.lookup(referencer, file_id);
        for holder in &holders {
            if let Some(&slot) = self.index.get(holder) {
                self.nodes[slot].store_replica(file_id);
            }
        }
        debug!(file = %file_id, referencer = %referencer, replicas = holders.len(), "file stored");
        holders
    }

    // ------------------------------------------------------------------
    // Random sampling for external drivers
    // ------------------------------------------------------------------

    /// Invoke `f` with a uniformly random node of the live network.
    pub fn rand_node(&mut self, f: impl FnOnce(&mut Network, KadId)) {
        if self.nodes.is_empty() {
            return;
        }
        let id = self.nodes[self.rng.gen_range(0..self.nodes.len())].id();
        f(self, id);
    }

    /// Invoke `f` with a uniformly random routable (node or file).
    pub fn rand_routable(&mut self, f: impl FnOnce(&mut Network, RoutableId)) {
        let total = self.nodes.len() + self.files.len();
        if total == 0 {
            return;
        }
        let i = self.rng.gen_range(0..total);
        let pick = if i < self.nodes.len() {
            RoutableId {
                kind: RoutableKind::Node,
                id: self.nodes[i].id(),
            }
        } else {
            RoutableId {
                kind: RoutableKind::File,
                id: self.files[i - self.nodes.len()].id(),
            }
        };
        f(self, pick);
    }

    // ------------------------------------------------------------------
    // Omniscient queries and the consistency oracle
    // ------------------------------------------------------------------

    /// Omniscient registry lookup, ignoring every routing table. Ground
    /// truth only; never used by the simulated protocol.
    pub fn lookup_cheat(&self, id: KadId) -> Option<&Node> {
        self.index.get(&id).map(|&slot| &self.nodes[slot])
    }

    /// Omniscient nearest-node scan over the whole population: the true
    /// `k` closest nodes to the given routable.
    pub fn find_nearest_cheat(&self, target: &dyn Routable) -> Vec<KadId> {
        self.nearest_scan(target.id())
    }

    fn nearest_scan(&self, target: KadId) -> Vec<KadId> {
        let mut ids: Vec<KadId> = self.nodes.iter().map(|n| n.id()).collect();
        ids.sort_by(|a, b| self.space.cmp_distance(target, *a, *b));
        ids.truncate(self.conf.k);
        ids
    }

    /// Validate the decentralized protocol against ground truth: for every
    /// file, run a real `lookup` from a random entry node and compare the
    /// result set against the omniscient scan. Exhaustive — one report per
    /// mismatching file, never aborting early.
    pub fn check_files(&mut self) -> Vec<ConsistencyMismatch> {
        let mut reports = Vec::new();
        if self.nodes.is_empty() {
            return reports;
        }
        for i in 0..self.files.len() {
            let file_id = self.files[i].id();
            let expected = self.nearest_scan(file_id);
            let entry = self.nodes[self.rng.gen_range(0..self.nodes.len())].id();
            let actual = self.lookup(entry, file_id);

            let expected_set: HashSet<KadId> = expected.iter().copied().collect();
            let actual_set: HashSet<KadId> = actual.iter().copied().collect();
            if expected_set != actual_set {
                warn!(file = %file_id, entry = %entry, "consistency mismatch");
                reports.push(ConsistencyMismatch {
                    file: file_id,
                    entry,
                    expected,
                    actual,
                });
            }
        }
        info!(
            files = self.files.len(),
            mismatches = reports.len(),
            "consistency check complete"
        );
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf8(k: usize, alpha: usize) -> KadConf {
        KadConf {
            n_bits: 8,
            k,
            alpha,
            n_nodes: 0,
            bootstrap: Vec::new(),
        }
    }

    fn id8(raw: u128) -> KadId {
        KadId::new(raw, 8).unwrap()
    }

    /// The hand-built five-node scenario: ascending identifiers, all
    /// bootstrapped against the first node.
    fn five_node_net() -> Network {
        let mut net = Network::new(conf8(2, 1), 1).unwrap();
        for raw in [1u128, 2, 4, 8, 16] {
            net.add_node(id8(raw), 2).unwrap();
        }
        net
    }

    #[test]
    fn join_seeds_from_the_first_node_and_discovers_closer_peers() {
        let net = five_node_net();
        let sixteen = net.lookup_cheat(id8(16)).unwrap();
        // The bootstrap contact is retained...
        assert!(sixteen.table().contains(id8(1)));
        // ...and the join lookup grew the table beyond it.
        assert!(sixteen.table().len() > 1);
        assert!(sixteen.table().contains(id8(2)) || sixteen.table().contains(id8(4)));
    }

    #[test]
    fn no_table_contains_its_owner_or_a_dangling_id() {
        let net = five_node_net();
        for node in net.nodes() {
            assert!(!node.table().contains(node.id()));
            for contact in node.table().contacts() {
                assert!(net.lookup_cheat(contact).is_some());
            }
        }
    }

    #[test]
    fn duplicate_and_foreign_width_nodes_are_rejected() {
        let mut net = five_node_net();
        assert!(matches!(
            net.add_node(id8(1), 2),
            Err(NetworkError::DuplicateNode(_))
        ));
        let wide = KadId::new(1, 16).unwrap();
        assert!(matches!(net.add_node(wide, 2), Err(NetworkError::Id(_))));
    }

    #[test]
    fn lookup_on_a_single_node_network_is_degenerate_but_defined() {
        let mut net = Network::new(conf8(2, 1), 1).unwrap();
        net.add_node(id8(7), 2).unwrap();
        // Only the origin itself is known.
        assert_eq!(net.lookup(id8(7), id8(3)), vec![id8(7)]);
        assert!(net.find_nearest_nodes(id8(7), id8(3), 0).is_empty());
        // Unknown origins cannot start a lookup.
        assert!(net.lookup(id8(9), id8(3)).is_empty());
    }

    #[test]
    fn find_nearest_cheat_scans_the_whole_registry() {
        let net = five_node_net();
        let file = KadFile::new(id8(3), id8(1));
        // True distances to 3: 1 -> 2, 2 -> 1, 4 -> 7, 8 -> 11, 16 -> 19.
        assert_eq!(net.find_nearest_cheat(&file), vec![id8(2), id8(1)]);
    }

    #[test]
    fn store_places_replicas_on_the_lookup_winners() {
        let mut net = five_node_net();
        let referencer = id8(4);
        net.files.push(KadFile::new(id8(3), referencer));
        let holders = net.store(id8(3));
        assert!(!holders.is_empty());
        assert!(holders.len() <= net.conf().k);
        for holder in &holders {
            assert!(net.lookup_cheat(*holder).unwrap().holds(id8(3)));
        }
    }

    #[test]
    fn store_on_an_unknown_file_is_a_no_op() {
        let mut net = five_node_net();
        assert!(net.store(id8(0x7f)).is_empty());
    }

    #[test]
    fn rand_callbacks_observe_live_entities() {
        let mut net = five_node_net();
        net.initialize_files(3);
        let mut seen_node = None;
        net.rand_node(|inner, id| {
            assert!(inner.lookup_cheat(id).is_some());
            seen_node = Some(id);
        });
        assert!(seen_node.is_some());

        let mut seen_routable = None;
        net.rand_routable(|inner, r| {
            match r.kind {
                RoutableKind::Node => assert!(inner.lookup_cheat(r.id).is_some()),
                RoutableKind::File => assert!(inner.files().iter().any(|f| f.id() == r.id)),
            }
            seen_routable = Some(r);
        });
        assert!(seen_routable.is_some());
    }

    #[test]
    fn check_files_reports_nothing_on_an_empty_file_set() {
        let mut net = five_node_net();
        assert!(net.check_files().is_empty());
    }
}
