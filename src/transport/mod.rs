// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Abstraction over the mesh overlay.
//!
//! The replication core needs exactly three primitives from whatever
//! overlay carries it: a best-effort identity announce, a best-effort
//! plain broadcast, and point-to-point links speaking single
//! request/response exchanges. Implementations push everything they
//! receive into one event channel handed out at construction.

mod error;
pub mod lan;
pub mod mem;

pub use self::{
    error::{Error, Result},
    lan::LanOverlay,
    mem::{MemoryMesh, MemoryOverlay},
};

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Raw length of a transport identity in bytes.
pub const IDENTITY_LEN: usize = 9;
/// Length of an identity hex-hash as carried in broadcast frames.
pub const IDENTITY_HEX_LEN: usize = IDENTITY_LEN * 2;

/// Timeout for a single request/response exchange over a link.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A peer on the overlay, addressed by its identity hex-hash.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Identity {
    hexhash: String,
}

impl Identity {
    /// Wraps raw identity bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            hexhash: hex::encode(bytes),
        }
    }

    /// Wraps an identity already in hex-hash form.
    pub fn from_hexhash(hexhash: impl Into<String>) -> Self {
        Self {
            hexhash: hexhash.into().to_lowercase(),
        }
    }

    /// Mints a random identity.
    pub fn random() -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes[..]);
        Self::from_bytes(&bytes)
    }

    pub fn hexhash(&self) -> &str {
        &self.hexhash
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{}", self.hexhash)
    }
}

/// A single request travelling over an established link.
#[derive(Debug)]
pub struct LinkRequest {
    /// Method tag, `"RH"` for hash requests.
    pub method: String,
    /// Request body.
    pub data: Bytes,
    /// Where the answer goes; `None` means nothing to serve.
    pub reply: oneshot::Sender<Option<Bytes>>,
}

/// Caller side of a point-to-point link. Dropping the handle tears the
/// link down.
#[derive(Debug)]
pub struct LinkHandle {
    peer: Identity,
    requests: mpsc::Sender<LinkRequest>,
}

impl LinkHandle {
    pub(crate) fn new(peer: Identity, requests: mpsc::Sender<LinkRequest>) -> Self {
        Self { peer, requests }
    }

    pub fn peer(&self) -> &Identity {
        &self.peer
    }

    /// Sends one request and awaits the peer's answer. `Ok(None)` means
    /// the peer had nothing to serve for it.
    pub async fn request(&self, method: &str, data: Bytes) -> Result<Option<Bytes>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(LinkRequest {
                method: method.to_owned(),
                data,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Error::LinkClosed)?;
        match tokio::time::timeout(REQUEST_TIMEOUT, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::LinkClosed),
            Err(_) => Err(Error::RequestTimeout),
        }
    }
}

/// Serving side of a link accepted from a peer. Dropping the receiver
/// tears the link down.
#[derive(Debug)]
pub struct IncomingLink {
    /// Who linked to us.
    pub peer: Identity,
    /// The requests the peer sends while the link is up.
    pub requests: mpsc::Receiver<LinkRequest>,
}

/// Everything an overlay delivers to its node.
#[derive(Debug)]
pub enum OverlayEvent {
    /// A peer's identity announce with its application data.
    Announce {
        /// The announcing identity.
        from: Identity,
        /// Application data riding on the announce.
        app_data: Bytes,
    },
    /// A plain broadcast packet.
    Broadcast {
        /// The raw frame.
        data: Bytes,
    },
    /// A peer established a link towards us.
    IncomingLink(IncomingLink),
}

/// The overlay primitives the replication core relies on.
///
/// Broadcasts and announces are unreliable and unordered; duplicates are
/// the receiver's problem.
#[async_trait]
pub trait Overlay: Send + Sync {
    /// Our own identity on the overlay.
    fn local_identity(&self) -> &Identity;

    /// Resolves a hex-hash to a peer we know how to reach.
    fn recall(&self, hexhash: &str) -> Option<Identity>;

    /// Best-effort identity announce carrying `app_data`.
    async fn announce(&self, app_data: Bytes) -> Result<()>;

    /// Best-effort plain broadcast.
    async fn broadcast(&self, data: Bytes) -> Result<()>;

    /// Opens a point-to-point link; resolves once the link is up.
    async fn link(&self, target: &Identity) -> Result<LinkHandle>;
}
