//! # Xorsim - Kademlia-style DHT Simulator
//!
//! Xorsim simulates a population of Kademlia nodes with bounded routing
//! tables over a fixed-width XOR identifier space, and validates the
//! decentralized lookup protocol against an omniscient ground-truth oracle.
//!
//! ## Model
//!
//! - Execution is single-threaded and fully synchronous: contacting a node
//!   inside a lookup is a direct call into its local table. No latency,
//!   timeouts, or failures are modeled.
//! - The [`network::Network`] is the sole owner of every node and file;
//!   routing tables and replica sets reference entities by identifier, so
//!   nothing can dangle and teardown is atomic.
//! - Every random draw flows through one explicitly seeded generator, making
//!   a whole run reproducible from a single seed.
//!
//! ## Module Overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `id` | Fixed-width identifiers, XOR metric, bucket index math |
//! | `routable` | The Node/File capability surface and file entities |
//! | `node` | Per-node k-bucket routing table and replica set |
//! | `network` | Arena ownership, bootstrap, iterative lookup, oracle |
//! | `snapshot` | Lossless JSON snapshots and Graphviz topology export |
//!
//! ## Key Operations
//!
//! | Operation | Description |
//! |-----------|-------------|
//! | `Network::initialize_nodes` | Create and bootstrap the population |
//! | `Network::initialize_files` | Create files and disseminate replicas |
//! | `Network::find_nearest_nodes` | Iterative convergent lookup |
//! | `Network::store` | Replicate a file on its k nearest nodes |
//! | `Network::check_files` | Decentralized-vs-omniscient consistency check |

pub mod id;
pub mod network;
pub mod node;
pub mod routable;
pub mod snapshot;

pub use id::{IdError, IdSpace, KadId};
pub use network::{ConsistencyMismatch, KadConf, Network, NetworkError};
pub use node::{Node, RoutingTable};
pub use routable::{KadFile, Routable, RoutableId, RoutableKind};
pub use snapshot::Snapshot;
