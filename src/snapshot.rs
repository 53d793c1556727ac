//! Read-only observers over a live network: lossless snapshots and a
//! Graphviz export of the routing topology.
//!
//! Both outputs are pure observations. A snapshot serializes to JSON and
//! parses back into an equivalent in-memory snapshot, so two runs can be
//! compared structurally and a run can be archived for diagnostics.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::id::KadId;
use crate::network::{KadConf, Network};
use crate::routable::Routable;

/// One node's observable state: identifier, locality marker, per-bucket
/// contact lists (in recency order), and held replicas.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: KadId,
    pub address: String,
    pub buckets: Vec<Vec<KadId>>,
    pub replicas: Vec<KadId>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub id: KadId,
    pub address: String,
    pub referencer: KadId,
}

/// A complete, re-parseable picture of a simulation run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub conf: KadConf,
    pub nodes: Vec<NodeSnapshot>,
    pub files: Vec<FileSnapshot>,
}

impl Snapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = self.to_json().context("serializing snapshot")?;
        fs::write(path, text).with_context(|| format!("writing snapshot to {}", path.display()))?;
        info!(path = %path.display(), "snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading snapshot from {}", path.display()))?;
        Self::from_json(&text).context("parsing snapshot")
    }
}

impl Network {
    /// Observe the whole network without mutating it.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            conf: self.conf().clone(),
            nodes: self
                .nodes()
                .iter()
                .map(|node| NodeSnapshot {
                    id: node.id(),
                    address: node.address().to_owned(),
                    buckets: node
                        .table()
                        .buckets()
                        .iter()
                        .map(|bucket| bucket.iter().copied().collect())
                        .collect(),
                    replicas: node.replicas().iter().copied().collect(),
                })
                .collect(),
            files: self
                .files()
                .iter()
                .map(|file| FileSnapshot {
                    id: file.id(),
                    address: file.address().to_owned(),
                    referencer: file.referencer(),
                })
                .collect(),
        }
    }

    /// Emit the routing topology as a Graphviz digraph: one vertex per
    /// node, one edge per bucket entry, labelled with the bucket index.
    pub fn export_dot<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "digraph routing {{")?;
        for node in self.nodes() {
            writeln!(out, "    \"{}\";", node.id())?;
            for (i, bucket) in node.table().buckets().iter().enumerate() {
                for contact in bucket {
                    writeln!(
                        out,
                        "    \"{}\" -> \"{}\" [label=\"{}\"];",
                        node.id(),
                        contact,
                        i
                    )?;
                }
            }
        }
        writeln!(out, "}}")
    }
}
