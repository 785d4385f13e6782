// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::io;
use thiserror::Error;

/// Specialisation of `std::Result` for the storage mod.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Storage error variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Hash not present in the index.
    #[error("Node not found: {0}")]
    NotFound(String),
    /// The parent exists but file and chunk nodes cannot carry children.
    #[error("Node {0} cannot carry child nodes")]
    InvalidParent(String),
    /// The named parent is not in the index.
    #[error("Unknown parent: {0}")]
    UnknownParent(String),
    /// The write target is not rooted in our own source tree.
    #[error("Not authorised to write below {0}")]
    NotAuthorized(String),
    /// Source nodes cannot be removed.
    #[error("Refusing to remove source node {0}")]
    CannotRemoveSource(String),
    /// A node with this identity is already in the index.
    #[error("Node already exists: {0}")]
    AlreadyExists(String),
    /// Delivered bytes do not re-hash to their declared identity.
    #[error("Data for {hash} re-hashed to {actual}")]
    HashMismatch {
        /// The declared identity.
        hash: String,
        /// What the bytes actually hash to.
        actual: String,
    },
    /// An ingested node dictionary could not be understood.
    #[error("Malformed node dictionary: {0}")]
    Malformed(String),
    /// The index snapshot carries a version this build does not know.
    #[error("Unsupported index format version {0}")]
    UnsupportedVersion(u32),
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// Snapshot encoding error.
    #[error("Snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),
    /// Wire encoding error.
    #[error("Wire encoding error: {0}")]
    Json(#[from] serde_json::Error),
}
