//! Per-node state: the k-bucket routing table and the replica set.
//!
//! Bucket `i` holds contacts whose XOR distance to the owning node has its
//! highest set bit at position `i`, at most `k` of them, ordered from
//! least- to most-recently-seen. The owning node is never bucketed and no
//! bucket contains duplicates.
//!
//! Bucket entries are identifier keys into the network arena, never
//! references — a contact cannot dangle because the network owns every node
//! for the whole run and releases them together.
//!
//! Overflow policy: unconditional LRU replacement. The simulation has no
//! liveness model, so the classic probe-the-oldest-entry ping has nothing to
//! probe; evicting the least-recently-seen contact is the one deterministic
//! policy that needs no failure oracle.

use std::collections::{BTreeSet, VecDeque};

use tracing::trace;

use crate::id::{IdSpace, KadId};
use crate::routable::{Routable, RoutableKind};

/// A capacity-bounded contact table indexed by XOR distance.
#[derive(Clone, Debug)]
pub struct RoutingTable {
    space: IdSpace,
    self_id: KadId,
    k: usize,
    buckets: Vec<VecDeque<KadId>>,
}

impl RoutingTable {
    pub fn new(space: IdSpace, self_id: KadId, k: usize) -> Self {
        Self {
            space,
            self_id,
            k,
            buckets: vec![VecDeque::new(); space.bits() as usize],
        }
    }

    /// Admit a contact, refreshing recency if it is already known and
    /// evicting the least-recently-seen entry when the bucket is full.
    /// Self-contacts are rejected.
    pub fn add(&mut self, other: KadId) -> bool {
        if self.k == 0 {
            return false;
        }
        let Ok(idx) = self.space.bucket_index(self.self_id, other) else {
            // Widths are fixed at construction, so the only failure left is
            // a self-contact.
            return false;
        };
        let bucket = &mut self.buckets[idx];
        if let Some(pos) = bucket.iter().position(|c| *c == other) {
            bucket.remove(pos);
            bucket.push_back(other);
            return true;
        }
        if bucket.len() >= self.k {
            let evicted = bucket.pop_front();
            trace!(node = %self.self_id, bucket = idx, ?evicted, "bucket full, evicting least-recently-seen");
        }
        bucket.push_back(other);
        true
    }

    /// All bucketed contacts, in bucket order.
    pub fn contacts(&self) -> impl Iterator<Item = KadId> + '_ {
        self.buckets.iter().flatten().copied()
    }

    pub fn contains(&self, id: KadId) -> bool {
        self.contacts().any(|c| c == id)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.is_empty())
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    pub fn buckets(&self) -> &[VecDeque<KadId>] {
        &self.buckets
    }

    /// The known contacts closest to `target`, at most `amount` of them,
    /// in ascending distance order.
    pub fn nearest(&self, target: KadId, amount: usize) -> Vec<KadId> {
        if amount == 0 {
            return Vec::new();
        }
        let mut all: Vec<KadId> = self.contacts().collect();
        all.sort_by(|a, b| self.space.cmp_distance(target, *a, *b));
        all.truncate(amount);
        all
    }
}

/// A simulated node: identifier, locality marker, routing table, and the
/// set of file identifiers it has been asked to hold.
#[derive(Clone, Debug)]
pub struct Node {
    id: KadId,
    address: String,
    table: RoutingTable,
    replicas: BTreeSet<KadId>,
}

impl Node {
    pub fn new(space: IdSpace, id: KadId, k: usize, address: String) -> Self {
        Self {
            id,
            address,
            table: RoutingTable::new(space, id, k),
            replicas: BTreeSet::new(),
        }
    }

    /// Admit `other` into the routing table. `contacted_us` records whether
    /// the admission was triggered by the peer reaching out, as opposed to
    /// this node learning about it from a lookup result; it does not change
    /// the admission policy.
    pub fn add_conn(&mut self, other: KadId, contacted_us: bool) -> bool {
        if other == self.id {
            return false;
        }
        let admitted = self.table.add(other);
        trace!(node = %self.id, peer = %other, contacted_us, admitted, "contact admission");
        admitted
    }

    /// Sort every bucketed contact by distance to `target` and return the
    /// first `amount`. Never fails: an empty table or `amount == 0` yields
    /// an empty sequence.
    pub fn find_nearest_nodes_local(&self, target: KadId, amount: usize) -> Vec<KadId> {
        self.table.nearest(target, amount)
    }

    pub fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// File identifiers this node currently holds a replica of.
    pub fn replicas(&self) -> &BTreeSet<KadId> {
        &self.replicas
    }

    /// Record a replica of `file`. Returns false if it was already held.
    pub fn store_replica(&mut self, file: KadId) -> bool {
        self.replicas.insert(file)
    }

    pub fn holds(&self, file: KadId) -> bool {
        self.replicas.contains(&file)
    }
}

impl Routable for Node {
    fn id(&self) -> KadId {
        self.id
    }

    fn kind(&self) -> RoutableKind {
        RoutableKind::Node
    }

    fn address(&self) -> &str {
        &self.address
    }
}
