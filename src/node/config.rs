// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::replication::ReplicationConfig;

use std::path::PathBuf;

/// Runtime configuration of a mesh node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// Human name of the source tree served by this node.
    pub name: String,
    /// Directory holding the index snapshot, the chunk store, the
    /// identity file and the logs.
    pub store_path: PathBuf,
    /// Upper bound on the size of files fetched without being asked for;
    /// unlimited when unset.
    pub max_file_size: Option<u64>,
    /// Replication engine knobs.
    pub replication: ReplicationConfig,
}
