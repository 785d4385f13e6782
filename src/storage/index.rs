// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::chunk_store::ChunkStore;
use super::error::{Error, Result};
use super::node::{IndexNode, NodeKind, ROOT_PARENT};
use crate::hashing;

use bytes::Bytes;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;

/// Size of the raw data slice addressed by a single chunk node.
pub const CHUNK_SIZE: usize = 10_240;

const INDEX_FILE: &str = "index.bin";
const INDEX_FORMAT_VERSION: u32 = 1;

/// The whole index as persisted to disk.
#[derive(Serialize, Deserialize)]
struct IndexSnapshot {
    version: u32,
    source_hash: String,
    source_name: String,
    nodes: BTreeMap<String, IndexNode>,
}

/// The content index: a forest of source trees backed by the chunk store.
///
/// Exactly one of the trees is ours (rooted at `source_hash`); only that
/// tree accepts local writes. Everything else is mirrored from peers.
#[derive(Debug)]
pub struct ContentIndex {
    store_path: PathBuf,
    source_hash: String,
    source_name: String,
    nodes: BTreeMap<String, IndexNode>,
    chunk_store: ChunkStore,
    notifier: Option<UnboundedSender<String>>,
}

impl ContentIndex {
    /// Opens the index at `store_path`, minting a fresh source node for
    /// `source_hash` when no snapshot exists. Chunk files not referenced
    /// by the index are swept on the way up.
    pub fn open<P: AsRef<Path>>(store_path: P, source_hash: &str, source_name: &str) -> Result<Self> {
        let store_path = store_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&store_path)?;
        let chunk_store = ChunkStore::new(&store_path)?;

        let mut nodes = BTreeMap::new();
        let index_file = store_path.join(INDEX_FILE);
        if index_file.is_file() {
            let snapshot: IndexSnapshot = bincode::deserialize(&std::fs::read(&index_file)?)?;
            if snapshot.version != INDEX_FORMAT_VERSION {
                return Err(Error::UnsupportedVersion(snapshot.version));
            }
            nodes = snapshot.nodes;
        }

        let mut index = Self {
            store_path,
            source_hash: source_hash.to_owned(),
            source_name: source_name.to_owned(),
            nodes,
            chunk_store,
            notifier: None,
        };
        if !index.nodes.contains_key(source_hash) {
            info!("Minting fresh source node {source_hash} ({source_name})");
            let node = IndexNode::new(
                source_hash.to_owned(),
                source_name,
                timestamp_now(),
                0,
                ROOT_PARENT.to_owned(),
                NodeKind::Source,
                false,
            );
            index.nodes.insert(source_hash.to_owned(), node);
            index.save()?;
        }
        index.clear_store()?;
        Ok(index)
    }

    /// Registers the channel that receives every hash newly learned from
    /// a peer.
    pub fn set_update_notifier(&mut self, notifier: UnboundedSender<String>) {
        self.notifier = Some(notifier);
    }

    pub fn source_hash(&self) -> &str {
        &self.source_hash
    }

    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Chunks currently marked as present on disk.
    pub fn stored_chunk_count(&self) -> usize {
        self.nodes
            .values()
            .filter(|node| node.kind == NodeKind::Chunk && node.is_stored)
            .count()
    }

    /// Removes every chunk file whose basename is not a chunk node of the
    /// index.
    pub fn clear_store(&self) -> Result<()> {
        let valid: BTreeSet<String> = self
            .nodes
            .values()
            .filter(|node| node.kind == NodeKind::Chunk)
            .map(|node| node.hash.clone())
            .collect();
        self.chunk_store.sweep(&valid)
    }

    /// Persists the whole index as a versioned snapshot.
    pub fn save(&self) -> Result<()> {
        let snapshot = IndexSnapshot {
            version: INDEX_FORMAT_VERSION,
            source_hash: self.source_hash.clone(),
            source_name: self.source_name.clone(),
            nodes: self.nodes.clone(),
        };
        std::fs::write(self.store_path.join(INDEX_FILE), bincode::serialize(&snapshot)?)?;
        Ok(())
    }

    // ---------------------- hashing ----------------------

    /// Content hash of `bytes` under `parent`.
    ///
    /// With `include_source` the parent's ancestor chain is resolved and
    /// the bytes are salted with the resulting position hash; this mints
    /// data nodes at a tree position. Without it the parent hash itself is
    /// the salt, which lets a received chunk be verified without knowing
    /// its ancestor chain.
    pub fn data_hash(&self, parent: &str, bytes: &[u8], include_source: bool) -> String {
        if include_source {
            hashing::salted_hash(&self.position_hash(parent), bytes)
        } else {
            hashing::salted_hash(parent, bytes)
        }
    }

    /// Path hash of a child position below `parent`.
    fn position_hash(&self, parent: &str) -> String {
        let mut chain = self.get_parent_hashes(parent);
        chain.push(parent.to_owned());
        hashing::path_hash(&chain)
    }

    // ---------------------- navigation ----------------------

    pub fn get_node_obj(&self, hash: &str) -> Option<&IndexNode> {
        self.nodes.get(hash)
    }

    /// Direct children of `hash`, optionally with chunk nodes included.
    pub fn get_children(&self, hash: &str, include_chunks: bool) -> Vec<&IndexNode> {
        let Some(node) = self.nodes.get(hash) else {
            return Vec::new();
        };
        node.children
            .iter()
            .filter_map(|child| self.nodes.get(child))
            .filter(|child| include_chunks || child.kind != NodeKind::Chunk)
            .collect()
    }

    /// Ancestor hashes of `hash`, source first, immediate parent last.
    ///
    /// An unknown hash or a chain that leaves the index yields what could
    /// be walked, which for authorisation purposes never passes as rooted.
    pub fn get_parent_hashes(&self, hash: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = match self.nodes.get(hash) {
            Some(node) => node,
            None => {
                warn!("Could not walk parents of {hash}: not in index");
                return chain;
            }
        };
        while current.kind != NodeKind::Source {
            if !seen.insert(current.parent.clone()) {
                warn!("Parent chain of {hash} contains a cycle");
                break;
            }
            chain.push(current.parent.clone());
            match self.nodes.get(&current.parent) {
                Some(parent) => current = parent,
                None => {
                    warn!("Parent chain of {hash} leaves the index at {}", current.parent);
                    break;
                }
            }
        }
        chain.reverse();
        chain
    }

    /// Checks that `parent` may carry a locally minted child: it must
    /// exist, accept children and be rooted in our own source tree.
    fn check_write_parent(&self, parent: &str) -> Result<()> {
        let node = self
            .nodes
            .get(parent)
            .ok_or_else(|| Error::UnknownParent(parent.to_owned()))?;
        if !node.accepts_children() {
            return Err(Error::InvalidParent(parent.to_owned()));
        }
        let root = if node.kind == NodeKind::Source {
            parent.to_owned()
        } else {
            self.get_parent_hashes(parent).first().cloned().unwrap_or_default()
        };
        if root != self.source_hash {
            return Err(Error::NotAuthorized(parent.to_owned()));
        }
        Ok(())
    }

    // ---------------------- local writes ----------------------

    /// Mints a file below `parent` (our own source when `None`), splitting
    /// the data into chunk children and persisting their payloads. Returns
    /// the new file hash.
    pub fn add_file(&mut self, name: &str, parent: Option<&str>, data: &[u8]) -> Result<String> {
        let parent = parent.unwrap_or(&self.source_hash).to_owned();
        self.check_write_parent(&parent)?;

        let file_hash = self.data_hash(&parent, data, true);
        if self.nodes.contains_key(&file_hash) {
            return Err(Error::AlreadyExists(file_hash));
        }

        let time_stamp = timestamp_now();
        let mut file_node = IndexNode::new(
            file_hash.clone(),
            name,
            time_stamp,
            data.len() as u64,
            parent.clone(),
            NodeKind::File,
            !data.is_empty(),
        );
        for (i, slice) in data.chunks(CHUNK_SIZE).enumerate() {
            let chunk_hash = self.data_hash(&file_hash, slice, false);
            self.chunk_store.put(&chunk_hash, slice)?;
            let chunk_node = IndexNode::new(
                chunk_hash.clone(),
                &format!("{name}.chunk_{i}"),
                time_stamp,
                slice.len() as u64,
                file_hash.clone(),
                NodeKind::Chunk,
                true,
            );
            self.nodes.insert(chunk_hash.clone(), chunk_node);
            file_node.children.push(chunk_hash);
        }
        self.nodes.insert(file_hash.clone(), file_node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(file_hash.clone());
        }
        self.save()?;
        info!("Added file {name} as {file_hash} below {parent}");
        Ok(file_hash)
    }

    /// Mints an empty directory below `parent` (our own source when
    /// `None`). Returns the new directory hash.
    pub fn add_dir(&mut self, name: &str, parent: Option<&str>) -> Result<String> {
        let parent = parent.unwrap_or(&self.source_hash).to_owned();
        self.check_write_parent(&parent)?;

        let dir_hash = self.position_hash(&parent);
        if self.nodes.contains_key(&dir_hash) {
            return Err(Error::AlreadyExists(dir_hash));
        }

        let node = IndexNode::new(
            dir_hash.clone(),
            name,
            timestamp_now(),
            0,
            parent.clone(),
            NodeKind::Directory,
            false,
        );
        self.nodes.insert(dir_hash.clone(), node);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.push(dir_hash.clone());
        }
        self.save()?;
        info!("Added directory {name} as {dir_hash} below {parent}");
        Ok(dir_hash)
    }

    // ---------------------- ingestion ----------------------

    /// Ingests bytes fetched from a peer: payloads of known chunks are
    /// verified and persisted, everything else is parsed as a node
    /// dictionary. Returns the hashes of any newly learned nodes.
    pub fn add_data(&mut self, hash: &str, bytes: &[u8]) -> Result<Vec<String>> {
        let chunk_parent = match self.nodes.get(hash) {
            Some(node) if node.kind == NodeKind::Chunk => Some(node.parent.clone()),
            _ => None,
        };
        if let Some(parent) = chunk_parent {
            let actual = self.data_hash(&parent, bytes, false);
            if actual != hash {
                return Err(Error::HashMismatch {
                    hash: hash.to_owned(),
                    actual,
                });
            }
            self.chunk_store.put(hash, bytes)?;
            if let Some(node) = self.nodes.get_mut(hash) {
                node.is_stored = true;
            }
            self.save()?;
            return Ok(Vec::new());
        }

        let dict: BTreeMap<String, serde_json::Value> =
            serde_json::from_slice(bytes).map_err(|err| Error::Malformed(err.to_string()))?;
        self.add_node_dict(dict)
    }

    /// Merges a peer's subtree metadata into the index.
    ///
    /// First write wins: existing hashes are never replaced, though a
    /// known parent gains the child link. Records are inserted in passes
    /// until a fixpoint, so the incoming key order does not matter;
    /// records that never find a parent (and are not sources) are
    /// dropped. Every newly inserted hash fires the update notifier.
    pub fn add_node_dict(&mut self, dict: BTreeMap<String, serde_json::Value>) -> Result<Vec<String>> {
        let mut remaining = Vec::new();
        for (key, value) in dict {
            match serde_json::from_value::<IndexNode>(value) {
                Ok(node) if node.hash == key => remaining.push(node),
                Ok(node) => {
                    warn!("Node dictionary key {key} does not match record hash {}", node.hash);
                }
                Err(err) => warn!("Skipping malformed node record {key}: {err}"),
            }
        }

        let mut inserted = Vec::new();
        loop {
            let mut deferred = Vec::new();
            let mut progressed = false;
            for mut node in remaining {
                if self.nodes.contains_key(&node.hash) {
                    continue;
                }
                if node.kind != NodeKind::Source && !self.nodes.contains_key(&node.parent) {
                    deferred.push(node);
                    continue;
                }
                if node.kind == NodeKind::Chunk {
                    // presence on our disk is decided here, not by the sender
                    node.is_stored = false;
                }
                let hash = node.hash.clone();
                if let Some(parent) = self.nodes.get_mut(&node.parent) {
                    if !parent.children.contains(&hash) {
                        parent.children.push(hash.clone());
                    }
                }
                self.nodes.insert(hash.clone(), node);
                inserted.push(hash);
                progressed = true;
            }
            if deferred.is_empty() {
                break;
            }
            if !progressed {
                for node in &deferred {
                    warn!("Dropping node {} that could not be traced to a source", node.hash);
                }
                break;
            }
            remaining = deferred;
        }

        if !inserted.is_empty() {
            self.save()?;
            if let Some(notifier) = &self.notifier {
                for hash in &inserted {
                    let _ = notifier.send(hash.clone());
                }
            }
        }
        Ok(inserted)
    }

    // ---------------------- serving ----------------------

    /// Serialises what a peer asked for: the source listing for an empty
    /// hash, verified raw bytes for a chunk, node records for everything
    /// else. `None` when we have nothing to serve.
    pub fn get_node(&mut self, hash: &str) -> Result<Option<Bytes>> {
        if hash.is_empty() {
            let sources: BTreeMap<&str, &IndexNode> = self
                .nodes
                .values()
                .filter(|node| node.kind == NodeKind::Source)
                .map(|node| (node.hash.as_str(), node))
                .collect();
            return Ok(Some(Bytes::from(serde_json::to_vec(&sources)?)));
        }
        let kind = match self.nodes.get(hash) {
            Some(node) => node.kind,
            None => return Ok(None),
        };
        if kind == NodeKind::Chunk {
            return self.read_verified_chunk(hash);
        }
        let records = self.get_node_information(hash);
        Ok(Some(Bytes::from(serde_json::to_vec(&records)?)))
    }

    /// Node records for the subtree below `hash`.
    ///
    /// Files are cut off one level deep (the file plus its chunk records)
    /// while directories and sources recurse, without descending through
    /// nested files. Peers rebuild trees incrementally from these slices.
    pub fn get_node_information(&self, hash: &str) -> BTreeMap<String, IndexNode> {
        let mut records = BTreeMap::new();
        self.collect_node_information(hash, true, &mut records);
        records
    }

    fn collect_node_information(
        &self,
        hash: &str,
        initial: bool,
        records: &mut BTreeMap<String, IndexNode>,
    ) {
        if records.contains_key(hash) {
            return;
        }
        let Some(node) = self.nodes.get(hash) else {
            return;
        };
        records.insert(hash.to_owned(), node.clone());
        if node.kind != NodeKind::File || initial {
            for child in &node.children {
                self.collect_node_information(child, false, records);
            }
        }
    }

    /// Reads a chunk payload and checks it still matches its identity.
    /// A missing or corrupt file flips the node to not-stored.
    fn read_verified_chunk(&mut self, hash: &str) -> Result<Option<Bytes>> {
        let parent = match self.nodes.get(hash) {
            Some(node) => node.parent.clone(),
            None => return Ok(None),
        };
        match self.chunk_store.get(hash)? {
            Some(bytes) if hashing::salted_hash(&parent, &bytes) == hash => Ok(Some(bytes)),
            Some(_) => {
                warn!("Data stored for {hash} did not match its hash");
                self.mark_not_stored(hash);
                Ok(None)
            }
            None => {
                self.mark_not_stored(hash);
                Ok(None)
            }
        }
    }

    fn mark_not_stored(&mut self, hash: &str) {
        if let Some(node) = self.nodes.get_mut(hash) {
            node.is_stored = false;
        }
    }

    /// Reassembles a file's bytes from its verified chunks, in child
    /// order. `None` when the hash is not a fully stored file.
    pub fn get_file_data(&mut self, hash: &str) -> Result<Option<Bytes>> {
        let (size, children) = match self.nodes.get(hash) {
            Some(node) if node.kind == NodeKind::File => (node.size, node.children.clone()),
            _ => return Ok(None),
        };
        let mut data = Vec::with_capacity(size as usize);
        for chunk in &children {
            match self.read_verified_chunk(chunk)? {
                Some(bytes) => data.extend_from_slice(&bytes),
                None => return Ok(None),
            }
        }
        Ok(Some(Bytes::from(data)))
    }

    // ---------------------- storage state ----------------------

    /// Recomputes whether `hash` is fully backed by local chunk data,
    /// memoising the result on every node visited.
    pub fn check_is_stored(&mut self, hash: &str) -> bool {
        let mut seen = BTreeSet::new();
        self.recompute_stored(hash, &mut seen)
    }

    fn recompute_stored(&mut self, hash: &str, seen: &mut BTreeSet<String>) -> bool {
        let (kind, parent, children, flag) = match self.nodes.get(hash) {
            Some(node) => (
                node.kind,
                node.parent.clone(),
                node.children.clone(),
                node.is_stored,
            ),
            None => return false,
        };
        if !seen.insert(hash.to_owned()) {
            // repeated child or a peer-delivered cycle; the memoised flag
            // keeps the walk finite
            return flag;
        }
        let stored = match kind {
            NodeKind::Chunk => match self.chunk_store.get(hash) {
                Ok(Some(bytes)) => hashing::salted_hash(&parent, &bytes) == hash,
                _ => false,
            },
            NodeKind::File => {
                !children.is_empty()
                    && children.iter().all(|child| self.recompute_stored(child, seen))
            }
            NodeKind::Directory | NodeKind::Source => children
                .iter()
                .all(|child| self.recompute_stored(child, seen)),
        };
        if let Some(node) = self.nodes.get_mut(hash) {
            node.is_stored = stored;
        }
        stored
    }

    /// Anti-entropy summary of a source tree: the digest over the sorted
    /// hashes of every non-chunk strict descendant. Unknown sources give
    /// the empty-input digest, which a non-trivial peer tree never
    /// matches.
    pub fn get_source_checksum(&self, source_hash: &str) -> String {
        let mut descendants = BTreeSet::new();
        self.collect_descendants(source_hash, &mut descendants);
        descendants.remove(source_hash);
        let joined: String = descendants.iter().join("");
        hashing::salted_hash("", joined.as_bytes())
    }

    fn collect_descendants(&self, hash: &str, acc: &mut BTreeSet<String>) {
        let Some(node) = self.nodes.get(hash) else {
            return;
        };
        if !acc.insert(hash.to_owned()) {
            return;
        }
        for child in &node.children {
            if let Some(child_node) = self.nodes.get(child) {
                if child_node.kind != NodeKind::Chunk {
                    self.collect_descendants(child, acc);
                }
            }
        }
    }

    // ---------------------- removal ----------------------

    /// Removes a non-source node, then sweeps everything the removal
    /// orphaned. Chunk payload files go with their nodes.
    pub fn remove_hash(&mut self, hash: &str) -> Result<()> {
        let node = self
            .nodes
            .get(hash)
            .ok_or_else(|| Error::NotFound(hash.to_owned()))?;
        if node.kind == NodeKind::Source {
            return Err(Error::CannotRemoveSource(hash.to_owned()));
        }
        let parent = node.parent.clone();
        let kind = node.kind;
        self.nodes.remove(hash);
        if let Some(parent_node) = self.nodes.get_mut(&parent) {
            parent_node.children.retain(|child| child != hash);
        }
        if kind == NodeKind::Chunk {
            self.chunk_store.delete(hash)?;
        }
        self.clean_data()?;
        self.save()?;
        info!("Removed {hash} and its orphans");
        Ok(())
    }

    /// Sweeps nodes whose parent has left the index, cascading until the
    /// forest is consistent again.
    fn clean_data(&mut self) -> Result<()> {
        loop {
            let orphans: Vec<String> = self
                .nodes
                .values()
                .filter(|node| {
                    node.kind != NodeKind::Source && !self.nodes.contains_key(&node.parent)
                })
                .map(|node| node.hash.clone())
                .collect();
            if orphans.is_empty() {
                return Ok(());
            }
            for hash in orphans {
                if let Some(node) = self.nodes.remove(&hash) {
                    debug!("Sweeping orphan {hash}");
                    if node.kind == NodeKind::Chunk {
                        self.chunk_store.delete(&hash)?;
                    }
                }
            }
        }
    }
}

fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    const SRC: &str = "aa11bb22cc33dd44ee";

    fn open_index(root: &Path) -> ContentIndex {
        ContentIndex::open(root, SRC, "testsource").expect("Failed to open index")
    }

    fn init_index() -> (tempfile::TempDir, ContentIndex) {
        let root = tempdir().expect("Failed to create temporary directory for index");
        let index = open_index(root.path());
        (root, index)
    }

    #[test]
    fn fresh_index_has_a_source_node() {
        let (_root, index) = init_index();
        let src = index.get_node_obj(SRC).expect("source node");
        assert_eq!(src.kind, NodeKind::Source);
        assert_eq!(src.parent, ROOT_PARENT);
        assert_eq!(index.node_count(), 1);
    }

    #[test]
    fn add_file_splits_into_chunks_and_round_trips() {
        let (_root, mut index) = init_index();
        let file_hash = index.add_file("hello.txt", None, b"hello\n").expect("add_file");

        // source, file, one chunk
        assert_eq!(index.node_count(), 3);
        let file = index.get_node_obj(&file_hash).expect("file node");
        assert_eq!(file.kind, NodeKind::File);
        assert_eq!(file.size, 6);
        assert_eq!(file.children.len(), 1);

        // the file hash is the position-salted content hash
        assert_eq!(index.data_hash(SRC, b"hello\n", true), file_hash);

        let data = index.get_file_data(&file_hash).expect("read").expect("stored");
        assert_eq!(&data[..], b"hello\n");
    }

    #[test]
    fn chunking_splits_on_the_exact_boundary() {
        let (_root, mut index) = init_index();
        let data = vec![7u8; CHUNK_SIZE * 2 + 1];
        let file_hash = index.add_file("big.bin", None, &data).expect("add_file");

        let sizes: Vec<u64> = index
            .get_children(&file_hash, true)
            .iter()
            .map(|chunk| chunk.size)
            .collect();
        assert_eq!(sizes, vec![CHUNK_SIZE as u64, CHUNK_SIZE as u64, 1]);

        let round_trip = index.get_file_data(&file_hash).expect("read").expect("stored");
        assert_eq!(round_trip.len(), data.len());
        assert_eq!(&round_trip[..], &data[..]);
    }

    #[test]
    fn chunk_bytes_verify_against_their_parent_salt() {
        let (_root, mut index) = init_index();
        let file_hash = index.add_file("f", None, b"payload").expect("add_file");
        let chunk_hash = index.get_node_obj(&file_hash).expect("file").children[0].clone();
        assert_eq!(index.data_hash(&file_hash, b"payload", false), chunk_hash);
    }

    #[test]
    fn identical_bytes_under_distinct_parents_get_distinct_chunks() {
        let (_root, mut index) = init_index();
        let dir_hash = index.add_dir("sub", None).expect("add_dir");
        let file_a = index.add_file("a", None, b"same bytes").expect("add_file");
        let file_b = index
            .add_file("a", Some(&dir_hash), b"same bytes")
            .expect("add_file");

        let chunk_a = index.get_node_obj(&file_a).expect("a").children[0].clone();
        let chunk_b = index.get_node_obj(&file_b).expect("b").children[0].clone();
        assert_ne!(file_a, file_b);
        assert_ne!(chunk_a, chunk_b);
    }

    #[test]
    fn parents_must_accept_children_and_be_ours() {
        let (_root, mut index) = init_index();
        let file_hash = index.add_file("f", None, b"x").expect("add_file");
        let chunk_hash = index.get_node_obj(&file_hash).expect("file").children[0].clone();

        assert_matches!(
            index.add_file("g", Some(&file_hash), b"y"),
            Err(Error::InvalidParent(_))
        );
        assert_matches!(
            index.add_dir("g", Some(&chunk_hash)),
            Err(Error::InvalidParent(_))
        );
        assert_matches!(
            index.add_file("g", Some("ffffffffffffffffff"), b"y"),
            Err(Error::UnknownParent(_))
        );

        // a mirrored foreign source is not ours to write below
        let foreign = "99889988998899889988";
        let record = serde_json::json!({
            "hash": foreign, "name": "peer", "time_stamp": 1, "size": 0,
            "parent": "root", "children": [], "type": 0, "is_stored": false,
        });
        index
            .add_node_dict(BTreeMap::from([(foreign.to_owned(), record)]))
            .expect("ingest");
        assert_matches!(
            index.add_file("g", Some(foreign), b"y"),
            Err(Error::NotAuthorized(_))
        );
    }

    #[test]
    fn sibling_directories_collide_on_position() {
        let (_root, mut index) = init_index();
        let first = index.add_dir("one", None).expect("add_dir");
        let second = index.add_dir("two", None);
        assert_matches!(second, Err(Error::AlreadyExists(hash)) if hash == first);
    }

    #[test]
    fn get_node_depth_is_one_level_for_files_and_recursive_for_dirs() {
        let (_root, mut index) = init_index();
        let dir_hash = index.add_dir("docs", None).expect("add_dir");
        let file_hash = index
            .add_file("readme", Some(&dir_hash), b"words")
            .expect("add_file");
        let chunk_hash = index.get_node_obj(&file_hash).expect("file").children[0].clone();

        // file: itself plus its chunk records
        let file_records = index.get_node_information(&file_hash);
        assert_eq!(
            file_records.keys().cloned().collect::<Vec<_>>(),
            {
                let mut expected = vec![file_hash.clone(), chunk_hash.clone()];
                expected.sort();
                expected
            }
        );

        // directory: recursive, but chunks of nested files stay out
        let dir_records = index.get_node_information(&dir_hash);
        assert!(dir_records.contains_key(&dir_hash));
        assert!(dir_records.contains_key(&file_hash));
        assert!(!dir_records.contains_key(&chunk_hash));

        // source: the same rule from the top
        let src_records = index.get_node_information(SRC);
        assert!(src_records.contains_key(SRC));
        assert!(src_records.contains_key(&dir_hash));
        assert!(src_records.contains_key(&file_hash));
        assert!(!src_records.contains_key(&chunk_hash));
    }

    #[test]
    fn get_node_serves_sources_chunks_and_subtrees() {
        let (_root, mut index) = init_index();
        let file_hash = index.add_file("f", None, b"chunky").expect("add_file");
        let chunk_hash = index.get_node_obj(&file_hash).expect("file").children[0].clone();

        // empty hash: the source listing as JSON
        let listing = index.get_node("").expect("ok").expect("some");
        let parsed: BTreeMap<String, IndexNode> =
            serde_json::from_slice(&listing).expect("source listing parses");
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains_key(SRC));

        // chunk hash: the raw verified bytes
        let bytes = index.get_node(&chunk_hash).expect("ok").expect("some");
        assert_eq!(&bytes[..], b"chunky");

        // unknown hash: nothing
        assert_matches!(index.get_node("eeff00112233445566"), Ok(None));
    }

    #[test]
    fn corrupt_chunk_files_are_not_served() {
        let (root, mut index) = init_index();
        let file_hash = index.add_file("f", None, b"pristine").expect("add_file");
        let chunk_hash = index.get_node_obj(&file_hash).expect("file").children[0].clone();

        std::fs::write(root.path().join("store").join(&chunk_hash), b"tampered")
            .expect("overwrite chunk file");

        assert_matches!(index.get_node(&chunk_hash), Ok(None));
        assert!(!index.get_node_obj(&chunk_hash).expect("chunk").is_stored);
        assert!(!index.check_is_stored(&file_hash));
    }

    #[test]
    fn storage_closure_follows_the_chunk_files() {
        let (root, mut index) = init_index();
        let file_hash = index.add_file("f", None, b"present").expect("add_file");
        let chunk_hash = index.get_node_obj(&file_hash).expect("file").children[0].clone();

        assert!(index.check_is_stored(&file_hash));
        assert!(index.check_is_stored(SRC));

        std::fs::remove_file(root.path().join("store").join(&chunk_hash)).expect("drop chunk");
        assert!(!index.check_is_stored(&file_hash));
        assert!(!index.check_is_stored(SRC));
        assert!(!index.get_node_obj(&chunk_hash).expect("chunk").is_stored);
    }

    #[test]
    fn empty_files_are_never_stored() {
        let (_root, mut index) = init_index();
        let file_hash = index.add_file("empty", None, b"").expect("add_file");
        assert!(index.get_node_obj(&file_hash).expect("file").children.is_empty());
        assert!(!index.check_is_stored(&file_hash));
    }

    #[test]
    fn ingesting_a_chunk_verifies_the_parent_salt() {
        let (_root, mut index) = init_index();
        let file_hash = index.add_file("f", None, b"original").expect("add_file");
        let chunk_hash = index.get_node_obj(&file_hash).expect("file").children[0].clone();
        index.chunk_store.delete(&chunk_hash).expect("drop payload");
        assert!(!index.check_is_stored(&chunk_hash));

        // corrupted delivery is refused and nothing is persisted
        assert_matches!(
            index.add_data(&chunk_hash, b"originaX"),
            Err(Error::HashMismatch { .. })
        );
        assert!(!index.chunk_store.exists(&chunk_hash));
        assert!(!index.check_is_stored(&chunk_hash));

        // the pristine payload lands
        index.add_data(&chunk_hash, b"original").expect("ingest");
        assert!(index.check_is_stored(&chunk_hash));
        assert!(index.check_is_stored(&file_hash));
    }

    fn peer_tree() -> BTreeMap<String, serde_json::Value> {
        let src = "1212121212121212aa";
        let file = "f0f0".repeat(14);
        let chunk = "c4c4".repeat(14);
        BTreeMap::from([
            (
                src.to_owned(),
                serde_json::json!({
                    "hash": src, "name": "peer", "time_stamp": 5, "size": 0,
                    "parent": "root", "children": [file], "type": 0, "is_stored": false,
                }),
            ),
            (
                file.clone(),
                serde_json::json!({
                    "hash": file, "name": "file", "time_stamp": 5, "size": 4,
                    "parent": src, "children": [chunk], "type": 1, "is_stored": true,
                }),
            ),
            (
                chunk.clone(),
                serde_json::json!({
                    "hash": chunk, "name": "file.chunk_0", "time_stamp": 5, "size": 4,
                    "parent": file, "children": [], "type": 3, "is_stored": true,
                }),
            ),
        ])
    }

    #[test]
    fn ingestion_reaches_a_fixpoint_regardless_of_order() {
        let (_root, mut index) = init_index();
        let (update_tx, mut update_rx) = tokio::sync::mpsc::unbounded_channel();
        index.set_update_notifier(update_tx);

        // BTreeMap orders the chunk record before its file and the file
        // before its source, the worst case for a single pass
        let inserted = index.add_node_dict(peer_tree()).expect("ingest");
        assert_eq!(inserted.len(), 3);
        assert_eq!(index.node_count(), 4);

        let mut notified = Vec::new();
        while let Ok(hash) = update_rx.try_recv() {
            notified.push(hash);
        }
        assert_eq!(notified, inserted);

        // the sender said stored; locally nothing is
        let chunk = "c4c4".repeat(14);
        assert!(!index.get_node_obj(&chunk).expect("chunk").is_stored);
    }

    #[test]
    fn ingestion_never_replaces_and_drops_unrooted_records() {
        let (_root, mut index) = init_index();
        index.add_node_dict(peer_tree()).expect("ingest");

        // replay with a different name: first write wins
        let mut replay = peer_tree();
        let file = "f0f0".repeat(14);
        replay.get_mut(&file).expect("file record")["name"] = "renamed".into();
        let inserted = index.add_node_dict(replay).expect("ingest");
        assert!(inserted.is_empty());
        assert_eq!(index.get_node_obj(&file).expect("file").name, "file");

        // a record with an unknown parent never lands
        let stray = "5757".repeat(14);
        let dict = BTreeMap::from([(
            stray.clone(),
            serde_json::json!({
                "hash": stray, "name": "stray", "time_stamp": 5, "size": 0,
                "parent": "0000".repeat(14), "children": [], "type": 2, "is_stored": false,
            }),
        )]);
        let inserted = index.add_node_dict(dict).expect("ingest");
        assert!(inserted.is_empty());
        assert!(index.get_node_obj(&stray).is_none());
    }

    #[test]
    fn a_known_parent_gains_the_child_link_on_ingest() {
        let (_root, mut index) = init_index();
        index.add_node_dict(peer_tree()).expect("ingest");

        // the peer adds a second file under its unchanged source record
        let src = "1212121212121212aa";
        let file2 = "abab".repeat(14);
        let dict = BTreeMap::from([(
            file2.clone(),
            serde_json::json!({
                "hash": file2, "name": "late", "time_stamp": 6, "size": 1,
                "parent": src, "children": [], "type": 1, "is_stored": false,
            }),
        )]);
        index.add_node_dict(dict).expect("ingest");
        assert!(index
            .get_node_obj(src)
            .expect("source")
            .children
            .contains(&file2));
    }

    #[test]
    fn malformed_records_are_skipped_not_fatal() {
        let (_root, mut index) = init_index();
        let mut dict = peer_tree();
        dict.insert("broken".into(), serde_json::json!({ "hash": "broken" }));
        let inserted = index.add_node_dict(dict).expect("ingest");
        assert_eq!(inserted.len(), 3);

        assert_matches!(index.add_data("nothashed", b"not a dict"), Err(Error::Malformed(_)));
    }

    #[test]
    fn checksum_covers_sorted_non_chunk_descendants() {
        let (_root, mut index) = init_index();
        let before = index.get_source_checksum(SRC);
        assert_eq!(before, hashing::salted_hash("", b""));

        let dir_hash = index.add_dir("d", None).expect("add_dir");
        let file_hash = index.add_file("f", Some(&dir_hash), b"xyz").expect("add_file");

        let mut hashes = vec![dir_hash, file_hash];
        hashes.sort();
        let expected = hashing::salted_hash("", hashes.join("").as_bytes());
        assert_eq!(index.get_source_checksum(SRC), expected);
    }

    #[test]
    fn mirrored_trees_agree_on_the_checksum() {
        let (_root_a, mut a) = init_index();
        a.add_dir("d", None).expect("add_dir");
        a.add_file("f", None, b"mirror me").expect("add_file");

        let root_b = tempdir().expect("tempdir");
        let mut b = ContentIndex::open(root_b.path(), "fefefefefefefefefe", "other")
            .expect("open");
        let records = a.get_node_information(SRC);
        let dict = records
            .into_iter()
            .map(|(hash, node)| (hash, serde_json::to_value(node).expect("record")))
            .collect();
        b.add_node_dict(dict).expect("ingest");

        assert_eq!(a.get_source_checksum(SRC), b.get_source_checksum(SRC));
    }

    #[test]
    fn removal_cascades_and_empties_the_store() {
        let (root, mut index) = init_index();
        let dir_hash = index.add_dir("d", None).expect("add_dir");
        let file_hash = index.add_file("f", Some(&dir_hash), b"bye").expect("add_file");
        let chunk_hash = index.get_node_obj(&file_hash).expect("file").children[0].clone();

        index.remove_hash(&dir_hash).expect("remove");

        assert_eq!(index.node_count(), 1);
        assert!(index.get_node_obj(SRC).is_some());
        assert!(!index.chunk_store.exists(&chunk_hash));
        let store_entries = std::fs::read_dir(root.path().join("store"))
            .expect("read store dir")
            .count();
        assert_eq!(store_entries, 0);
    }

    #[test]
    fn sources_cannot_be_removed() {
        let (_root, mut index) = init_index();
        assert_matches!(index.remove_hash(SRC), Err(Error::CannotRemoveSource(_)));
        assert_matches!(index.remove_hash("not-there"), Err(Error::NotFound(_)));
    }

    #[test]
    fn snapshot_round_trips_and_sweeps_strays() {
        let root = tempdir().expect("tempdir");
        let file_hash;
        {
            let mut index = open_index(root.path());
            file_hash = index.add_file("f", None, b"durable").expect("add_file");
            std::fs::write(root.path().join("store").join("stranger"), b"stray")
                .expect("plant stray");
        }
        let mut reopened = open_index(root.path());
        assert_eq!(reopened.node_count(), 3);
        assert!(!root.path().join("store").join("stranger").exists());
        let data = reopened.get_file_data(&file_hash).expect("read").expect("stored");
        assert_eq!(&data[..], b"durable");
    }

    #[test]
    fn unknown_snapshot_versions_are_rejected() {
        let root = tempdir().expect("tempdir");
        let snapshot = IndexSnapshot {
            version: 99,
            source_hash: SRC.to_owned(),
            source_name: "future".to_owned(),
            nodes: BTreeMap::new(),
        };
        std::fs::write(
            root.path().join(INDEX_FILE),
            bincode::serialize(&snapshot).expect("encode"),
        )
        .expect("write snapshot");

        let result = ContentIndex::open(root.path(), SRC, "testsource");
        assert_matches!(result, Err(Error::UnsupportedVersion(99)));
    }
}
