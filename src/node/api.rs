// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::{MeshNode, Result};
use crate::replication::Broadcast;

use bytes::Bytes;
use serde::Serialize;

/// Status snapshot served by the admin surface.
#[derive(Clone, Debug, Serialize)]
pub struct NodeStatus {
    /// Our source hash; the tree we own.
    pub source_hash: String,
    /// Human name of our source tree.
    pub source_name: String,
    /// Nodes in the index, all sources included.
    pub nodes: usize,
    /// Chunks whose payload is on disk.
    pub stored_chunks: usize,
    /// Hashes currently wanted from the network.
    pub desired: Vec<String>,
    /// Hashes with an outstanding link request.
    pub inflight: Vec<String>,
    /// Whether a link is active right now.
    pub linked: bool,
}

impl MeshNode {
    /// JSON node information for `hash`; `None` means the source listing.
    /// Always a JSON document, `{}` when there is nothing to show. For a
    /// chunk hash this is the raw verified payload instead.
    pub async fn get_node_info(&self, hash: Option<&str>) -> Bytes {
        let hash = hash.unwrap_or("");
        match self.index.write().await.get_node(hash) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => Bytes::from_static(b"{}"),
            Err(err) => {
                warn!("Serving node info for {hash} failed: {err}");
                Bytes::from_static(b"{}")
            }
        }
    }

    /// Reassembled file bytes plus the node's name, for download. `None`
    /// when the hash is not a fully stored file.
    pub async fn get_file(&self, hash: &str) -> Option<(String, Bytes)> {
        let mut index = self.index.write().await;
        let name = index.get_node_obj(hash)?.name.clone();
        match index.get_file_data(hash) {
            Ok(Some(bytes)) => Some((name, bytes)),
            Ok(None) => None,
            Err(err) => {
                warn!("Reassembling file {hash} failed: {err}");
                None
            }
        }
    }

    /// Our own source hash: the tree peers can mirror from us and the
    /// only tree we accept writes below.
    pub async fn source_hash(&self) -> String {
        self.index.read().await.source_hash().to_owned()
    }

    /// Adds a file below `parent` (our source when `None`) and announces
    /// the new node to the mesh. Returns the file hash.
    pub async fn upload_file(&self, name: &str, parent: Option<&str>, data: &[u8]) -> Result<String> {
        let hash = self.index.write().await.add_file(name, parent, data)?;
        self.announce_new_hash(&hash).await;
        Ok(hash)
    }

    /// Adds a directory below `parent` (our source when `None`) and
    /// announces the new node to the mesh. Returns the directory hash.
    pub async fn make_dir(&self, name: &str, parent: Option<&str>) -> Result<String> {
        let hash = self.index.write().await.add_dir(name, parent)?;
        self.announce_new_hash(&hash).await;
        Ok(hash)
    }

    async fn announce_new_hash(&self, hash: &str) {
        let frame = Broadcast::NewHash {
            source: self.overlay.local_identity().hexhash().to_owned(),
            hash: hash.to_owned(),
        }
        .encode();
        if let Err(err) = self.overlay.broadcast(frame).await {
            warn!("Failed to broadcast new hash {hash}: {err}");
        }
    }

    /// Removes a node and whatever the removal orphans.
    pub async fn delete_node(&self, hash: &str) -> Result<()> {
        Ok(self.index.write().await.remove_hash(hash)?)
    }

    /// Cancels interest in `hash`, tearing down a matching in-flight
    /// fetch. Returns whether anything was cancelled.
    pub async fn cancel_request(&self, hash: &str) -> bool {
        self.engine.cancel(hash).await
    }

    /// Engine and store summary for `getStatus`.
    pub async fn status(&self) -> NodeStatus {
        let engine = self.engine.status().await;
        let index = self.index.read().await;
        NodeStatus {
            source_hash: index.source_hash().to_owned(),
            source_name: index.source_name().to_owned(),
            nodes: index.node_count(),
            stored_chunks: index.stored_chunk_count(),
            desired: engine.desired,
            inflight: engine.inflight,
            linked: engine.linked,
        }
    }
}
