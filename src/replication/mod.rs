// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! The replication engine.
//!
//! Fetching a hash runs in three stages over the overlay:
//!
//! 1. A desire broadcast (`RH`) asks who can provide the hash.
//! 2. Holders answer with a delayed node-present broadcast (`NP`); the
//!    delay gives closer or owning replicas the first word and dampens
//!    response storms.
//! 3. The scheduler links to one provider at a time and requests the hash
//!    over the link; the payload lands in the content index, which may in
//!    turn surface new hashes to desire.
//!
//! Freshly minted nodes are announced with `NH` broadcasts, and a periodic
//! identity announce carries a source checksum (`CS`) so that diverged
//! mirrors notice and start desiring the source.

mod codec;
mod desired;
mod error;

pub use self::{
    codec::{decode_checksum, encode_checksum, Broadcast, CHECKSUM, NEW_HASH, NODE_PRESENT, REQUEST_HASH},
    error::{Error, Result},
};

use self::desired::{Action, DesiredQueue};
use crate::storage::{ContentIndex, NodeKind};
use crate::transport::{Identity, IncomingLink, LinkHandle, LinkRequest, Overlay};

use bytes::Bytes;
use rand::Rng;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Shared handle on the content index.
pub type SharedIndex = Arc<RwLock<ContentIndex>>;

/// Tunable timings and policy of the engine. The defaults are the
/// deployment values; tests compress them.
#[derive(Clone, Debug)]
pub struct ReplicationConfig {
    /// Serve and fetch from any peer on the mesh.
    pub allow_all: bool,
    /// Peer hex-hashes always allowed, regardless of `allow_all`.
    pub allowed_peers: BTreeSet<String>,
    /// Desire entries are dropped once their attempts exceed this.
    pub max_attempts: u32,
    /// Scheduler cadence; at most one action leaves per tick.
    pub tick_interval: Duration,
    /// Per-entry backoff between attempts on the same hash.
    pub retry_delay: Duration,
    /// Window for the randomised node-present response delay.
    pub respond_delay_min: Duration,
    /// Upper edge of the response delay window (exclusive).
    pub respond_delay_max: Duration,
    /// Response delay when the requested node sits in our own source.
    pub owner_respond_delay: Duration,
    /// How long to wait for a link to come up.
    pub link_timeout: Duration,
    /// Cadence of the checksum-carrying identity announce.
    pub announce_interval: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            allow_all: false,
            allowed_peers: BTreeSet::new(),
            max_attempts: 5,
            tick_interval: Duration::from_secs(1),
            retry_delay: Duration::from_secs(60),
            respond_delay_min: Duration::from_secs(30),
            respond_delay_max: Duration::from_secs(60),
            owner_respond_delay: Duration::from_secs(5),
            link_timeout: Duration::from_secs(10),
            announce_interval: Duration::from_secs(120),
        }
    }
}

struct ActiveFetch {
    hash: String,
    task: JoinHandle<()>,
}

/// Status snapshot for the admin surface.
#[derive(Clone, Debug, Serialize)]
pub struct EngineStatus {
    /// Hashes currently wanted from the network.
    pub desired: Vec<String>,
    /// Hashes with an outstanding link request.
    pub inflight: Vec<String>,
    /// Whether a link is active right now.
    pub linked: bool,
}

/// Drives the desired-hash table against the overlay.
pub struct ReplicationEngine {
    index: SharedIndex,
    overlay: Arc<dyn Overlay>,
    config: ReplicationConfig,
    desired: Mutex<DesiredQueue>,
    inflight: Mutex<HashMap<u64, String>>,
    link_permit: Arc<Semaphore>,
    active_fetch: Mutex<Option<ActiveFetch>>,
    next_request_id: AtomicU64,
}

impl ReplicationEngine {
    pub fn new(index: SharedIndex, overlay: Arc<dyn Overlay>, config: ReplicationConfig) -> Arc<Self> {
        let desired = DesiredQueue::new(config.max_attempts, config.retry_delay);
        Arc::new(Self {
            index,
            overlay,
            config,
            desired: Mutex::new(desired),
            inflight: Mutex::new(HashMap::new()),
            link_permit: Arc::new(Semaphore::new(1)),
            active_fetch: Mutex::new(None),
            next_request_id: AtomicU64::new(1),
        })
    }

    fn peer_permitted(&self, hexhash: &str) -> bool {
        self.config.allow_all || self.config.allowed_peers.contains(hexhash)
    }

    fn our_hexhash(&self) -> &str {
        self.overlay.local_identity().hexhash()
    }

    /// Engine summary for `getStatus`.
    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            desired: self.desired.lock().await.hashes(),
            inflight: self.inflight.lock().await.values().cloned().collect(),
            linked: self.link_permit.available_permits() == 0,
        }
    }

    // ---------------------- incoming events ----------------------

    /// Handles one decoded broadcast frame.
    pub async fn handle_broadcast(&self, frame: Broadcast) {
        if frame.source() == self.our_hexhash() {
            // our own frame echoed back by the overlay
            return;
        }
        match frame {
            Broadcast::RequestHash { source, hash } => self.handle_hash_request(&source, &hash).await,
            Broadcast::NodePresent { source, hash } => self.handle_node_present(&source, &hash).await,
            Broadcast::NewHash { source, hash } => self.handle_new_hash(&source, &hash).await,
        }
    }

    /// A peer asked the network for `hash`. If we can serve it, schedule
    /// a node-present broadcast after a damping delay.
    async fn handle_hash_request(&self, source: &str, hash: &str) {
        if !self.peer_permitted(source) {
            return;
        }
        let ours = {
            let mut index = self.index.write().await;
            let kind = match index.get_node_obj(hash) {
                Some(node) => node.kind,
                None => return,
            };
            if kind == NodeKind::Chunk && !index.check_is_stored(hash) {
                return;
            }
            let root = if kind == NodeKind::Source {
                hash.to_owned()
            } else {
                index.get_parent_hashes(hash).first().cloned().unwrap_or_default()
            };
            root == index.source_hash()
        };
        let delay = if ours {
            self.config.owner_respond_delay
        } else {
            let min = self.config.respond_delay_min.as_millis() as u64;
            let max = self.config.respond_delay_max.as_millis() as u64;
            Duration::from_millis(rand::thread_rng().gen_range(min..max.max(min + 1)))
        };
        debug!("Peer {source} wants {hash}; responding in {delay:?}");
        let frame = Broadcast::NodePresent {
            source: self.our_hexhash().to_owned(),
            hash: hash.to_owned(),
        }
        .encode();
        let overlay = Arc::clone(&self.overlay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(err) = overlay.broadcast(frame).await {
                warn!("Failed to send node-present broadcast: {err}");
            }
        });
    }

    /// A peer advertised that it holds `hash`. Record it as a provider if
    /// we want the hash and can resolve the peer.
    async fn handle_node_present(&self, source: &str, hash: &str) {
        if !self.peer_permitted(source) {
            return;
        }
        let mut desired = self.desired.lock().await;
        if !desired.contains(hash) {
            return;
        }
        match self.overlay.recall(source) {
            Some(provider) => {
                debug!("Recorded {source} as a provider of {hash}");
                desired.add_provider(hash, provider);
            }
            None => debug!("Cannot recall identity {source}; provider ignored"),
        }
    }

    /// A peer announced a freshly minted node.
    async fn handle_new_hash(&self, source: &str, hash: &str) {
        if !self.peer_permitted(source) {
            return;
        }
        self.desire(hash).await;
    }

    /// A peer's identity announce arrived. A checksum in the app-data
    /// that does not match our view of the peer's source tree (or a tree
    /// we have never heard of) starts replication of that source.
    pub async fn handle_announce(&self, from: &Identity, app_data: &[u8]) {
        if from.hexhash() == self.our_hexhash() || !self.peer_permitted(from.hexhash()) {
            return;
        }
        let Some(theirs) = codec::decode_checksum(app_data) else {
            return;
        };
        let ours = self.index.read().await.get_source_checksum(from.hexhash());
        if ours != theirs {
            debug!("Source checksum of {from} differs from our view; requesting its tree");
            self.desire(from.hexhash()).await;
        }
    }

    // ---------------------- desires & scheduling ----------------------

    /// Marks `hash` as wanted and asks the network who can provide it.
    /// Desiring an already wanted hash re-broadcasts but changes nothing.
    pub async fn desire(&self, hash: &str) {
        let frame = Broadcast::RequestHash {
            source: self.our_hexhash().to_owned(),
            hash: hash.to_owned(),
        }
        .encode();
        if let Err(err) = self.overlay.broadcast(frame).await {
            warn!("Failed to send desire broadcast for {hash}: {err}");
        }
        if self.desired.lock().await.insert(hash, Instant::now()) {
            info!("Requesting presence of {hash} on the network");
        } else {
            trace!("Already requested {hash} on the network");
        }
    }

    /// Stops wanting `hash`: drops the desire entry and aborts an
    /// in-flight fetch of it, tearing the link down.
    pub async fn cancel(&self, hash: &str) -> bool {
        let removed = self.desired.lock().await.remove(hash);
        let mut active = self.active_fetch.lock().await;
        if active.as_ref().map(|fetch| fetch.hash == hash).unwrap_or(false) {
            if let Some(fetch) = active.take() {
                info!("Cancelling in-flight fetch of {hash}");
                fetch.task.abort();
            }
            self.inflight.lock().await.retain(|_, inflight| inflight != hash);
            return true;
        }
        removed
    }

    /// Drives the desired table at the configured cadence: one action per
    /// tick, and nothing while a link is up.
    pub async fn run_scheduler(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.config.tick_interval).await;
            if self.link_permit.available_permits() == 0 {
                continue;
            }
            let action = self.desired.lock().await.next_action(Instant::now());
            match action {
                Some(Action::Fetch { hash, target }) => {
                    Arc::clone(&self).start_fetch(hash, target).await;
                }
                Some(Action::Rebroadcast { hash }) => {
                    trace!("No providers for {hash} yet; asking again");
                    let frame = Broadcast::RequestHash {
                        source: self.our_hexhash().to_owned(),
                        hash,
                    }
                    .encode();
                    if let Err(err) = self.overlay.broadcast(frame).await {
                        warn!("Failed to re-send desire broadcast: {err}");
                    }
                }
                None => {}
            }
        }
    }

    async fn start_fetch(self: Arc<Self>, hash: String, target: Identity) {
        let Ok(permit) = Arc::clone(&self.link_permit).try_acquire_owned() else {
            return;
        };
        let engine = Arc::clone(&self);
        let fetch_hash = hash.clone();
        let task = tokio::spawn(async move {
            let _permit = permit;
            match engine.fetch(&fetch_hash, &target).await {
                Ok(()) => info!("Obtained {fetch_hash} from {target}"),
                Err(err) => warn!("Fetch of {fetch_hash} from {target} failed: {err}"),
            }
            engine.active_fetch.lock().await.take();
        });
        *self.active_fetch.lock().await = Some(ActiveFetch { hash, task });
    }

    /// One point-to-point fetch: link, request, ingest, unlink. On any
    /// failure the desire entry stays put; the attempt was already
    /// counted when the scheduler picked it.
    async fn fetch(&self, hash: &str, target: &Identity) -> Result<()> {
        debug!("Fetching {hash} from {target}");
        let link = match tokio::time::timeout(self.config.link_timeout, self.overlay.link(target)).await
        {
            Ok(Ok(link)) => link,
            Ok(Err(err)) => return Err(err.into()),
            Err(_) => {
                return Err(crate::transport::Error::LinkFailed(target.hexhash().to_owned()).into())
            }
        };
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.inflight.lock().await.insert(request_id, hash.to_owned());
        let outcome = self.request_and_ingest(&link, hash).await;
        self.inflight.lock().await.remove(&request_id);
        if outcome.is_ok() {
            self.desired.lock().await.remove(hash);
        }
        outcome
    }

    async fn request_and_ingest(&self, link: &LinkHandle, hash: &str) -> Result<()> {
        let response = link.request(codec::REQUEST_HASH, Bytes::from(hash.to_owned())).await?;
        let Some(bytes) = response else {
            return Err(Error::EmptyResponse {
                peer: link.peer().hexhash().to_owned(),
                hash: hash.to_owned(),
            });
        };
        let inserted = self.index.write().await.add_data(hash, &bytes)?;
        if !inserted.is_empty() {
            debug!("Ingested {} node records below {hash}", inserted.len());
        }
        Ok(())
    }

    // ---------------------- serving peers ----------------------

    /// Serves a link a peer established towards us, answering its hash
    /// requests until it closes. At most one link is active node-wide;
    /// a second incoming link is torn down on the spot.
    pub async fn serve_incoming_link(self: Arc<Self>, link: IncomingLink) {
        if !self.peer_permitted(link.peer.hexhash()) {
            debug!("Refusing link from unauthorised peer {}", link.peer);
            return;
        }
        let Ok(permit) = Arc::clone(&self.link_permit).try_acquire_owned() else {
            debug!("Already linked; tearing down incoming link from {}", link.peer);
            return;
        };
        let engine = Arc::clone(&self);
        tokio::spawn(async move {
            let _permit = permit;
            let IncomingLink { peer, mut requests } = link;
            while let Some(request) = requests.recv().await {
                engine.serve_request(&peer, request).await;
            }
            trace!("Link from {peer} closed");
        });
    }

    async fn serve_request(&self, peer: &Identity, request: LinkRequest) {
        let LinkRequest { method, data, reply } = request;
        if method != codec::REQUEST_HASH {
            debug!("Unknown request method {method} from {peer}");
            let _ = reply.send(None);
            return;
        }
        let hash = String::from_utf8_lossy(&data).into_owned();
        debug!("Processing request from {peer} for {hash}");
        let response = match self.index.write().await.get_node(&hash) {
            Ok(response) => response,
            Err(err) => {
                warn!("Failed to serve {hash} to {peer}: {err}");
                None
            }
        };
        let _ = reply.send(response);
    }

    // ---------------------- announcing ----------------------

    /// Announces our identity with the current source checksum, forever.
    pub async fn run_announcer(self: Arc<Self>) {
        loop {
            self.announce_checksum().await;
            tokio::time::sleep(self.config.announce_interval).await;
        }
    }

    /// One checksum-carrying identity announce.
    pub async fn announce_checksum(&self) {
        let checksum = {
            let index = self.index.read().await;
            index.get_source_checksum(index.source_hash())
        };
        if let Err(err) = self.overlay.announce(codec::encode_checksum(&checksum)).await {
            warn!("Failed to announce source checksum: {err}");
        }
    }
}
