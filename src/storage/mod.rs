// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Content-addressed storage: the node index and the chunk store behind it.

mod chunk_store;
mod error;
mod index;
mod node;

pub use self::{
    chunk_store::ChunkStore,
    error::{Error, Result},
    index::{ContentIndex, CHUNK_SIZE},
    node::{IndexNode, NodeKind, ROOT_PARENT},
};
