// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! In-process overlay: any number of nodes wired through one hub.
//!
//! Broadcasts and announces reach every other registered node, links are
//! channel pairs. This is the overlay the test suite and multi-node
//! simulations run on.

use super::error::{Error, Result};
use super::{Identity, IncomingLink, LinkHandle, Overlay, OverlayEvent};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

const LINK_CHANNEL_SIZE: usize = 16;

/// The hub connecting every registered [`MemoryOverlay`].
#[derive(Clone, Default)]
pub struct MemoryMesh {
    nodes: Arc<DashMap<String, mpsc::UnboundedSender<OverlayEvent>>>,
}

impl MemoryMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a node on the mesh, returning its overlay handle and the
    /// event stream the hub will feed.
    pub fn register(&self, identity: Identity) -> (MemoryOverlay, mpsc::UnboundedReceiver<OverlayEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.nodes.insert(identity.hexhash().to_owned(), event_tx);
        (
            MemoryOverlay {
                identity,
                mesh: self.clone(),
            },
            event_rx,
        )
    }

    fn deliver_to_all_but(&self, sender: &str, make_event: impl Fn() -> OverlayEvent) {
        for entry in self.nodes.iter() {
            if entry.key() != sender {
                let _ = entry.value().send(make_event());
            }
        }
    }
}

/// One node's handle onto a [`MemoryMesh`].
#[derive(Clone)]
pub struct MemoryOverlay {
    identity: Identity,
    mesh: MemoryMesh,
}

#[async_trait]
impl Overlay for MemoryOverlay {
    fn local_identity(&self) -> &Identity {
        &self.identity
    }

    fn recall(&self, hexhash: &str) -> Option<Identity> {
        self.mesh
            .nodes
            .contains_key(hexhash)
            .then(|| Identity::from_hexhash(hexhash))
    }

    async fn announce(&self, app_data: Bytes) -> Result<()> {
        self.mesh
            .deliver_to_all_but(self.identity.hexhash(), || OverlayEvent::Announce {
                from: self.identity.clone(),
                app_data: app_data.clone(),
            });
        Ok(())
    }

    async fn broadcast(&self, data: Bytes) -> Result<()> {
        self.mesh
            .deliver_to_all_but(self.identity.hexhash(), || OverlayEvent::Broadcast {
                data: data.clone(),
            });
        Ok(())
    }

    async fn link(&self, target: &Identity) -> Result<LinkHandle> {
        let peer = self
            .mesh
            .nodes
            .get(target.hexhash())
            .ok_or_else(|| Error::UnknownPeer(target.hexhash().to_owned()))?;
        let (request_tx, request_rx) = mpsc::channel(LINK_CHANNEL_SIZE);
        peer.value()
            .send(OverlayEvent::IncomingLink(IncomingLink {
                peer: self.identity.clone(),
                requests: request_rx,
            }))
            .map_err(|_| Error::LinkFailed(target.hexhash().to_owned()))?;
        Ok(LinkHandle::new(target.clone(), request_tx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LinkRequest;

    #[tokio::test]
    async fn broadcasts_reach_everyone_but_the_sender() {
        let mesh = MemoryMesh::new();
        let (a, mut events_a) = mesh.register(Identity::random());
        let (_b, mut events_b) = mesh.register(Identity::random());
        let (_c, mut events_c) = mesh.register(Identity::random());

        a.broadcast(Bytes::from_static(b"frame")).await.expect("broadcast");

        for events in [&mut events_b, &mut events_c] {
            match events.recv().await.expect("event") {
                OverlayEvent::Broadcast { data } => assert_eq!(&data[..], b"frame"),
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert!(events_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn links_carry_requests_and_replies() {
        let mesh = MemoryMesh::new();
        let (a, _events_a) = mesh.register(Identity::random());
        let (b, mut events_b) = mesh.register(Identity::random());

        let echo = tokio::spawn(async move {
            let Some(OverlayEvent::IncomingLink(mut link)) = events_b.recv().await else {
                panic!("expected incoming link");
            };
            while let Some(LinkRequest { data, reply, .. }) = link.requests.recv().await {
                let _ = reply.send(Some(data));
            }
        });

        let recalled = a.recall(b.local_identity().hexhash()).expect("recall");
        let link = a.link(&recalled).await.expect("link");
        let answer = link
            .request("RH", Bytes::from_static(b"ping"))
            .await
            .expect("request");
        assert_eq!(answer.as_deref(), Some(b"ping".as_ref()));

        drop(link);
        echo.await.expect("echo task");
    }

    #[tokio::test]
    async fn a_dropped_incoming_link_fails_the_requester() {
        let mesh = MemoryMesh::new();
        let (a, _events_a) = mesh.register(Identity::random());
        let (b, mut events_b) = mesh.register(Identity::random());

        let link = a.link(b.local_identity()).await.expect("link");
        match events_b.recv().await.expect("event") {
            OverlayEvent::IncomingLink(incoming) => drop(incoming),
            other => panic!("unexpected event {other:?}"),
        }

        let outcome = link.request("RH", Bytes::from_static(b"x")).await;
        assert!(matches!(outcome, Err(Error::LinkClosed)));
    }
}
