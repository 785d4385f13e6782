// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! LAN overlay: UDP broadcast datagrams plus TCP links.
//!
//! Every node binds one UDP socket on the shared mesh port; announces and
//! broadcast frames go to the broadcast address as bincode datagrams that
//! also carry the sender's identity and TCP link port, so receiving any
//! datagram teaches us how to reach its sender. Links are plain TCP
//! connections speaking length-prefixed request/response messages.

use super::error::{Error, Result};
use super::{Identity, IncomingLink, LinkHandle, LinkRequest, Overlay, OverlayEvent};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{mpsc, oneshot};

/// The UDP port every node of a mesh shares.
pub const DEFAULT_MESH_PORT: u16 = 47474;

const LINK_CHANNEL_SIZE: usize = 16;
const DATAGRAM_BUFFER: usize = 65_536;
const MAX_LINK_MSG: u32 = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize)]
enum Datagram {
    Announce {
        id: String,
        link_port: u16,
        app_data: Vec<u8>,
    },
    Broadcast {
        id: String,
        link_port: u16,
        data: Vec<u8>,
    },
}

#[derive(Serialize, Deserialize)]
enum LinkMsg {
    Hello { id: String },
    Request { rid: u64, method: String, data: Vec<u8> },
    Response { rid: u64, data: Option<Vec<u8>> },
}

/// Overlay implementation for one broadcast domain.
#[derive(Clone)]
pub struct LanOverlay {
    identity: Identity,
    udp: Arc<UdpSocket>,
    mesh_port: u16,
    link_port: u16,
    peers: Arc<DashMap<String, SocketAddr>>,
}

impl LanOverlay {
    /// Binds the UDP mesh socket and the TCP link listener and starts
    /// their receive tasks.
    pub async fn bind(
        identity: Identity,
        mesh_port: u16,
    ) -> Result<(Self, mpsc::UnboundedReceiver<OverlayEvent>)> {
        let udp = Arc::new(UdpSocket::bind((Ipv4Addr::UNSPECIFIED, mesh_port)).await?);
        udp.set_broadcast(true)?;
        let mesh_port = udp.local_addr()?.port();

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let link_port = listener.local_addr()?.port();

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let overlay = Self {
            identity,
            udp,
            mesh_port,
            link_port,
            peers: Arc::new(DashMap::new()),
        };

        tokio::spawn(overlay.clone().recv_datagrams(event_tx.clone()));
        tokio::spawn(accept_links(listener, event_tx));

        info!(
            "LAN overlay up as {} (mesh port {mesh_port}, link port {link_port})",
            overlay.identity
        );
        Ok((overlay, event_rx))
    }

    async fn recv_datagrams(self, events: mpsc::UnboundedSender<OverlayEvent>) {
        let mut buf = vec![0u8; DATAGRAM_BUFFER];
        loop {
            let (len, from) = match self.udp.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(err) => {
                    warn!("Mesh socket receive failed: {err}");
                    continue;
                }
            };
            let datagram = match bincode::deserialize::<Datagram>(&buf[..len]) {
                Ok(datagram) => datagram,
                Err(err) => {
                    trace!("Dropping undecodable datagram from {from}: {err}");
                    continue;
                }
            };
            let event = match datagram {
                Datagram::Announce { id, link_port, app_data } => {
                    if id == self.identity.hexhash() {
                        continue;
                    }
                    self.learn_peer(&id, from, link_port);
                    OverlayEvent::Announce {
                        from: Identity::from_hexhash(id),
                        app_data: Bytes::from(app_data),
                    }
                }
                Datagram::Broadcast { id, link_port, data } => {
                    if id == self.identity.hexhash() {
                        continue;
                    }
                    self.learn_peer(&id, from, link_port);
                    OverlayEvent::Broadcast {
                        data: Bytes::from(data),
                    }
                }
            };
            if events.send(event).is_err() {
                return;
            }
        }
    }

    fn learn_peer(&self, id: &str, from: SocketAddr, link_port: u16) {
        self.peers
            .insert(id.to_owned(), SocketAddr::new(from.ip(), link_port));
    }

    async fn send_datagram(&self, datagram: &Datagram, target: SocketAddr) -> Result<()> {
        let bytes = bincode::serialize(datagram)?;
        self.udp.send_to(&bytes, target).await?;
        Ok(())
    }

    fn broadcast_target(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::BROADCAST, self.mesh_port))
    }
}

#[async_trait]
impl Overlay for LanOverlay {
    fn local_identity(&self) -> &Identity {
        &self.identity
    }

    fn recall(&self, hexhash: &str) -> Option<Identity> {
        self.peers
            .contains_key(hexhash)
            .then(|| Identity::from_hexhash(hexhash))
    }

    async fn announce(&self, app_data: Bytes) -> Result<()> {
        let datagram = Datagram::Announce {
            id: self.identity.hexhash().to_owned(),
            link_port: self.link_port,
            app_data: app_data.to_vec(),
        };
        self.send_datagram(&datagram, self.broadcast_target()).await
    }

    async fn broadcast(&self, data: Bytes) -> Result<()> {
        let datagram = Datagram::Broadcast {
            id: self.identity.hexhash().to_owned(),
            link_port: self.link_port,
            data: data.to_vec(),
        };
        self.send_datagram(&datagram, self.broadcast_target()).await
    }

    async fn link(&self, target: &Identity) -> Result<LinkHandle> {
        let addr = self
            .peers
            .get(target.hexhash())
            .map(|entry| *entry.value())
            .ok_or_else(|| Error::UnknownPeer(target.hexhash().to_owned()))?;
        let stream = TcpStream::connect(addr).await?;
        let (request_tx, request_rx) = mpsc::channel(LINK_CHANNEL_SIZE);
        tokio::spawn(drive_outgoing_link(
            stream,
            self.identity.hexhash().to_owned(),
            request_rx,
        ));
        Ok(LinkHandle::new(target.clone(), request_tx))
    }
}

/// Accepts link connections and surfaces them as events.
async fn accept_links(listener: TcpListener, events: mpsc::UnboundedSender<OverlayEvent>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                trace!("Link connection from {addr}");
                tokio::spawn(serve_incoming_conn(stream, events.clone()));
            }
            Err(err) => warn!("Link accept failed: {err}"),
        }
    }
}

async fn serve_incoming_conn(mut stream: TcpStream, events: mpsc::UnboundedSender<OverlayEvent>) {
    let peer = match read_msg(&mut stream).await {
        Ok(LinkMsg::Hello { id }) => Identity::from_hexhash(id),
        _ => return,
    };
    let (request_tx, request_rx) = mpsc::channel(LINK_CHANNEL_SIZE);
    let incoming = IncomingLink {
        peer: peer.clone(),
        requests: request_rx,
    };
    if events.send(OverlayEvent::IncomingLink(incoming)).is_err() {
        return;
    }
    loop {
        match read_msg(&mut stream).await {
            Ok(LinkMsg::Request { rid, method, data }) => {
                let (reply_tx, reply_rx) = oneshot::channel();
                let request = LinkRequest {
                    method,
                    data: Bytes::from(data),
                    reply: reply_tx,
                };
                if request_tx.send(request).await.is_err() {
                    // the node refused the link or closed it
                    trace!("Tearing down link from {peer}");
                    return;
                }
                let response = LinkMsg::Response {
                    rid,
                    data: reply_rx.await.unwrap_or(None).map(|bytes| bytes.to_vec()),
                };
                if write_msg(&mut stream, &response).await.is_err() {
                    return;
                }
            }
            Ok(_) => continue,
            Err(_) => return,
        }
    }
}

async fn drive_outgoing_link(
    mut stream: TcpStream,
    local_id: String,
    mut requests: mpsc::Receiver<LinkRequest>,
) {
    if write_msg(&mut stream, &LinkMsg::Hello { id: local_id }).await.is_err() {
        return;
    }
    let mut next_rid = 0u64;
    while let Some(LinkRequest { method, data, reply }) = requests.recv().await {
        next_rid += 1;
        let request = LinkMsg::Request {
            rid: next_rid,
            method,
            data: data.to_vec(),
        };
        if write_msg(&mut stream, &request).await.is_err() {
            return;
        }
        loop {
            match read_msg(&mut stream).await {
                Ok(LinkMsg::Response { rid, data }) if rid == next_rid => {
                    let _ = reply.send(data.map(Bytes::from));
                    break;
                }
                Ok(_) => continue,
                Err(_) => return,
            }
        }
    }
}

async fn write_msg(stream: &mut TcpStream, msg: &LinkMsg) -> Result<()> {
    let bytes = bincode::serialize(msg)?;
    stream.write_u32(bytes.len() as u32).await?;
    stream.write_all(&bytes).await?;
    Ok(())
}

async fn read_msg(stream: &mut TcpStream) -> Result<LinkMsg> {
    let len = stream.read_u32().await?;
    if len > MAX_LINK_MSG {
        return Err(Error::Io(io::Error::new(
            io::ErrorKind::InvalidData,
            "oversized link message",
        )));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn bind_overlay() -> (LanOverlay, mpsc::UnboundedReceiver<OverlayEvent>) {
        LanOverlay::bind(Identity::random(), 0)
            .await
            .expect("Failed to bind LAN overlay")
    }

    #[tokio::test]
    async fn datagrams_teach_peer_addresses() {
        let (a, _events_a) = bind_overlay().await;
        let (b, mut events_b) = bind_overlay().await;

        let b_port = b.udp.local_addr().expect("addr").port();
        let b_addr = SocketAddr::from(([127, 0, 0, 1], b_port));
        let datagram = Datagram::Broadcast {
            id: a.identity.hexhash().to_owned(),
            link_port: a.link_port,
            data: b"hello mesh".to_vec(),
        };
        a.send_datagram(&datagram, b_addr).await.expect("send");

        match events_b.recv().await.expect("event") {
            OverlayEvent::Broadcast { data } => assert_eq!(&data[..], b"hello mesh"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(b.recall(a.identity.hexhash()).is_some());
        assert!(b.recall("0000000000000000ff").is_none());
    }

    #[tokio::test]
    async fn own_datagrams_are_ignored() {
        let (a, mut events_a) = bind_overlay().await;
        let a_port = a.udp.local_addr().expect("addr").port();
        let a_addr = SocketAddr::from(([127, 0, 0, 1], a_port));
        let datagram = Datagram::Announce {
            id: a.identity.hexhash().to_owned(),
            link_port: a.link_port,
            app_data: b"CSxx".to_vec(),
        };
        a.send_datagram(&datagram, a_addr).await.expect("send");

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(events_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn links_round_trip_requests() {
        let (a, _events_a) = bind_overlay().await;
        let (b, mut events_b) = bind_overlay().await;

        // teach a where b's listener lives
        a.peers.insert(
            b.identity.hexhash().to_owned(),
            SocketAddr::from(([127, 0, 0, 1], b.link_port)),
        );

        tokio::spawn(async move {
            while let Some(event) = events_b.recv().await {
                if let OverlayEvent::IncomingLink(mut link) = event {
                    while let Some(request) = link.requests.recv().await {
                        let mut answer = request.data.to_vec();
                        answer.extend_from_slice(b"!");
                        let _ = request.reply.send(Some(Bytes::from(answer)));
                    }
                }
            }
        });

        let target = a.recall(b.identity.hexhash()).expect("recall");
        let link = a.link(&target).await.expect("link");
        assert_eq!(link.peer().hexhash(), b.identity.hexhash());

        let answer = link
            .request("RH", Bytes::from_static(b"abc"))
            .await
            .expect("request");
        assert_eq!(answer.as_deref(), Some(b"abc!".as_ref()));
    }

    #[tokio::test]
    async fn linking_an_unknown_peer_fails() {
        let (a, _events) = bind_overlay().await;
        let stranger = Identity::random();
        assert!(matches!(
            a.link(&stranger).await,
            Err(Error::UnknownPeer(_))
        ));
    }
}
