// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

mod api;
mod config;
mod error;

pub use self::{
    api::NodeStatus,
    config::NodeConfig,
    error::{Error, Result},
};

use crate::replication::{Broadcast, ReplicationEngine, SharedIndex};
use crate::storage::{ContentIndex, NodeKind};
use crate::transport::{Overlay, OverlayEvent};

use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::spawn;

/// A running mesh node: the content index, the replication engine and the
/// tasks connecting them to the overlay.
#[derive(Clone)]
pub struct MeshNode {
    index: SharedIndex,
    engine: Arc<ReplicationEngine>,
    overlay: Arc<dyn Overlay>,
    config: NodeConfig,
}

impl MeshNode {
    /// Opens the store below `config.store_path` and spawns the node
    /// tasks: overlay event dispatch, the fetch scheduler, the announce
    /// loop and the auto-fetch policy.
    pub async fn run(
        config: NodeConfig,
        overlay: Arc<dyn Overlay>,
        mut events: mpsc::UnboundedReceiver<OverlayEvent>,
    ) -> Result<Self> {
        let source_hash = overlay.local_identity().hexhash().to_owned();
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let mut index = ContentIndex::open(&config.store_path, &source_hash, &config.name)?;
        index.set_update_notifier(update_tx);
        let index = Arc::new(RwLock::new(index));

        let engine = ReplicationEngine::new(
            Arc::clone(&index),
            Arc::clone(&overlay),
            config.replication.clone(),
        );
        let node = Self {
            index,
            engine: Arc::clone(&engine),
            overlay,
            config,
        };

        let _handle = spawn(Arc::clone(&engine).run_scheduler());
        let _handle = spawn(Arc::clone(&engine).run_announcer());

        let event_engine = engine;
        let _handle = spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    OverlayEvent::Broadcast { data } => {
                        if let Some(frame) = Broadcast::decode(&data) {
                            event_engine.handle_broadcast(frame).await;
                        }
                    }
                    OverlayEvent::Announce { from, app_data } => {
                        event_engine.handle_announce(&from, &app_data).await;
                    }
                    OverlayEvent::IncomingLink(link) => {
                        Arc::clone(&event_engine).serve_incoming_link(link).await;
                    }
                }
            }
            debug!("Overlay event channel closed; node event loop ends");
        });

        let fetch_node = node.clone();
        let _handle = spawn(async move { fetch_node.run_auto_fetch(update_rx).await });

        Ok(node)
    }

    /// Shared handle on the content index, for embedding and tests.
    pub fn index(&self) -> SharedIndex {
        Arc::clone(&self.index)
    }

    /// Newly learned file and chunk nodes within the size policy are
    /// fetched without being asked for.
    async fn run_auto_fetch(&self, mut updates: mpsc::UnboundedReceiver<String>) {
        while let Some(hash) = updates.recv().await {
            let wanted = {
                let mut index = self.index.write().await;
                match index.get_node_obj(&hash) {
                    Some(node) if matches!(node.kind, NodeKind::File | NodeKind::Chunk) => {
                        let within = self
                            .config
                            .max_file_size
                            .map(|limit| node.size < limit)
                            .unwrap_or(true);
                        within && !index.check_is_stored(&hash)
                    }
                    _ => false,
                }
            };
            if wanted {
                debug!("Automatically requesting {hash}");
                self.engine.desire(&hash).await;
            }
        }
    }
}
