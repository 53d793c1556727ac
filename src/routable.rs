//! The routable capability surface shared by nodes and files.
//!
//! Both entity kinds carry an identifier and a locality marker. An empty
//! address means simulated-local; a non-empty address marks the entity as
//! conceptually remote. Addresses never participate in routing — they are
//! preserved for diagnostics only.

use serde::{Deserialize, Serialize};

use crate::id::KadId;

/// Tag distinguishing the two routable entity kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoutableKind {
    Node,
    File,
}

/// What every routable entity can answer: its identity, its kind, and its
/// XOR distance to any other identifier.
pub trait Routable {
    fn id(&self) -> KadId;
    fn kind(&self) -> RoutableKind;

    /// Locality marker. Empty for simulated-local entities.
    fn address(&self) -> &str;

    /// XOR distance from this entity to an arbitrary identifier.
    fn distance_to(&self, other: KadId) -> u128 {
        self.id().distance(other)
    }
}

/// Lightweight copyable reference to a routable entity, handed to sampling
/// callbacks instead of a borrow into the network arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoutableId {
    pub kind: RoutableKind,
    pub id: KadId,
}

/// A simulated file.
///
/// The `referencer` is the node that created the file and is fixed for the
/// file's lifetime; the nodes actually holding a replica are recorded in
/// their own replica sets and are established solely by `store`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KadFile {
    id: KadId,
    address: String,
    referencer: KadId,
}

impl KadFile {
    pub fn new(id: KadId, referencer: KadId) -> Self {
        Self {
            id,
            address: String::new(),
            referencer,
        }
    }

    #[inline]
    pub fn referencer(&self) -> KadId {
        self.referencer
    }
}

impl Routable for KadFile {
    fn id(&self) -> KadId {
        self.id
    }

    fn kind(&self) -> RoutableKind {
        RoutableKind::File
    }

    fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id8(raw: u128) -> KadId {
        KadId::new(raw, 8).unwrap()
    }

    #[test]
    fn file_keeps_its_referencer_and_kind() {
        let file = KadFile::new(id8(0x42), id8(0x17));
        assert_eq!(file.id(), id8(0x42));
        assert_eq!(file.referencer(), id8(0x17));
        assert_eq!(file.kind(), RoutableKind::File);
        assert!(file.address().is_empty());
    }

    #[test]
    fn distance_to_goes_through_the_capability_surface() {
        let file = KadFile::new(id8(0x0f), id8(0x01));
        assert_eq!(file.distance_to(id8(0xf0)), 0xff);
        assert_eq!(file.distance_to(file.id()), 0);
    }
}
