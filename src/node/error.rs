// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use thiserror::Error;

/// Specialisation of `std::Result` for the node mod.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Node error variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::Error),
    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] crate::transport::Error),
}
