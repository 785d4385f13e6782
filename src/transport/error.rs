// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use thiserror::Error;

/// Specialisation of `std::Result` for the transport mod.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Transport failure variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The hex-hash does not resolve to a known peer.
    #[error("Unknown peer identity {0}")]
    UnknownPeer(String),
    /// No link could be brought up towards the peer.
    #[error("Link to {0} could not be established")]
    LinkFailed(String),
    /// The peer closed the link.
    #[error("Link closed by remote")]
    LinkClosed,
    /// No response arrived in time.
    #[error("Request timed out")]
    RequestTimeout,
    /// Wire encoding error.
    #[error("Wire encoding error: {0}")]
    Encoding(#[from] bincode::Error),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
