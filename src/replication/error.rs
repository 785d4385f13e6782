// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use thiserror::Error;

/// Specialisation of `std::Result` for the replication mod.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Replication error variants. All of these are recovered locally; the
/// protocol retries until the desire entry runs out of attempts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The overlay failed underneath us.
    #[error("Transport failure: {0}")]
    Transport(#[from] crate::transport::Error),
    /// Ingesting fetched data failed.
    #[error("Storage failure: {0}")]
    Storage(#[from] crate::storage::Error),
    /// The peer answered but had nothing to serve.
    #[error("Peer {peer} had nothing to serve for {hash}")]
    EmptyResponse {
        /// Who we asked.
        peer: String,
        /// What we asked for.
        hash: String,
    },
}
