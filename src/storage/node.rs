// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use serde::{Deserialize, Serialize};

/// Sentinel parent hash carried by source nodes.
pub const ROOT_PARENT: &str = "root";

/// The kind of a tree node.
///
/// The integer tags are on the wire and must not change.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum NodeKind {
    /// Root of a source tree, owned by exactly one identity.
    Source,
    /// A whole file; its children are its chunks in byte order.
    File,
    /// A container; its children are directories or files.
    Directory,
    /// A slice of raw file bytes, the only kind persisted to disk.
    Chunk,
}

impl From<NodeKind> for u8 {
    fn from(kind: NodeKind) -> u8 {
        match kind {
            NodeKind::Source => 0,
            NodeKind::File => 1,
            NodeKind::Directory => 2,
            NodeKind::Chunk => 3,
        }
    }
}

impl TryFrom<u8> for NodeKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeKind::Source),
            1 => Ok(NodeKind::File),
            2 => Ok(NodeKind::Directory),
            3 => Ok(NodeKind::Chunk),
            other => Err(format!("unknown node kind {other}")),
        }
    }
}

/// Metadata of a single node in the content index.
///
/// Doubles as the wire record exchanged with peers; the JSON field names
/// (`type`, `time_stamp` and friends) are part of the replication protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexNode {
    /// Content identifier of this node.
    pub hash: String,
    /// Human readable label; not part of the identity.
    pub name: String,
    /// Creation time, seconds since the epoch.
    pub time_stamp: u64,
    /// Byte length of associated raw data; 0 for tree nodes.
    pub size: u64,
    /// Hash of the containing node, [`ROOT_PARENT`] for sources.
    pub parent: String,
    /// Child hashes in insertion order.
    pub children: Vec<String>,
    /// What this node is.
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Whether the raw data below this node is all present locally.
    /// Derived from disk state, never taken from a peer.
    pub is_stored: bool,
}

impl IndexNode {
    pub(crate) fn new(
        hash: String,
        name: &str,
        time_stamp: u64,
        size: u64,
        parent: String,
        kind: NodeKind,
        is_stored: bool,
    ) -> Self {
        Self {
            hash,
            name: name.to_owned(),
            time_stamp,
            size,
            parent,
            children: Vec::new(),
            kind,
            is_stored,
        }
    }

    /// Whether external callers may mint children below this node.
    pub(crate) fn accepts_children(&self) -> bool {
        matches!(self.kind, NodeKind::Source | NodeKind::Directory)
    }
}
