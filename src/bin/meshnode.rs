// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Mesh file server node.

use clap::Parser;
use eyre::{Result, WrapErr};
use meshnode::{
    admin,
    log::init_node_logging,
    node::{MeshNode, NodeConfig},
    replication::ReplicationConfig,
    transport::{lan::DEFAULT_MESH_PORT, Identity, LanOverlay, IDENTITY_LEN},
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[macro_use]
extern crate tracing;

const IDENTITY_FILE: &str = "mesh_identity.id";

#[derive(Parser, Debug)]
#[clap(name = "meshnode", version)]
struct Opt {
    /// Name of the source tree served by this node.
    #[clap(default_value = "meshnode")]
    name: String,

    /// Path to the storage directory.
    #[clap(long, short, default_value = "store")]
    path: PathBuf,

    /// Largest file size fetched automatically, in bytes; -1 for no limit.
    #[clap(long = "max_file_size", default_value_t = -1)]
    max_file_size: i64,

    /// Optional JSON file with mesh transport settings.
    #[clap(long = "config_path")]
    config_path: Option<PathBuf>,

    /// Admin API port.
    #[clap(long, default_value_t = 4000)]
    port: u16,

    /// Admin API bind address.
    #[clap(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Serve and fetch from any peer on the mesh.
    #[clap(long = "allowAll")]
    allow_all: bool,

    /// Comma separated peer hex-hashes always allowed.
    #[clap(long = "allowedPeers", value_delimiter = ',')]
    allowed_peers: Vec<String>,

    /// Log to <path>/logs instead of stdout.
    #[clap(long)]
    log_to_file: bool,
}

/// Mesh transport settings read from `--config_path`.
#[derive(Debug, Default, Deserialize)]
struct MeshSettings {
    mesh_port: Option<u16>,
}

fn load_or_create_identity(store_path: &Path) -> Result<Identity> {
    let path = store_path.join(IDENTITY_FILE);
    if path.is_file() {
        let bytes = fs::read(&path)?;
        if bytes.len() == IDENTITY_LEN {
            return Ok(Identity::from_bytes(&bytes));
        }
        warn!("Identity file {path:?} is malformed; minting a new identity");
    }
    info!("No valid saved identity found, creating new...");
    let identity = Identity::random();
    fs::write(&path, hex::decode(identity.hexhash()).expect("own hex-hash decodes"))?;
    Ok(identity)
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();
    fs::create_dir_all(&opt.path).wrap_err("creating the storage directory")?;

    let log_dir = opt.log_to_file.then(|| opt.path.join("logs"));
    let _log_appender_guard = init_node_logging(&log_dir)?;

    let identity = load_or_create_identity(&opt.path)?;
    info!("Starting node using identity {identity}");

    let settings = match &opt.config_path {
        Some(path) => {
            let raw = fs::read_to_string(path).wrap_err("reading the mesh config file")?;
            serde_json::from_str(&raw).wrap_err("parsing the mesh config file")?
        }
        None => MeshSettings::default(),
    };
    let mesh_port = settings.mesh_port.unwrap_or(DEFAULT_MESH_PORT);

    let (overlay, events) = LanOverlay::bind(identity, mesh_port)
        .await
        .wrap_err("binding the mesh overlay")?;

    let config = NodeConfig {
        name: opt.name,
        store_path: opt.path,
        max_file_size: u64::try_from(opt.max_file_size).ok(),
        replication: ReplicationConfig {
            allow_all: opt.allow_all,
            allowed_peers: opt.allowed_peers.into_iter().collect(),
            ..Default::default()
        },
    };
    let node = MeshNode::run(config, Arc::new(overlay), events)
        .await
        .wrap_err("starting the node")?;

    admin::serve(node, &opt.hostname, opt.port)
        .await
        .wrap_err("running the admin API")?;
    Ok(())
}
