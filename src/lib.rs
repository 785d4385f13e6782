// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! A content-addressed file sharing node for broadcast mesh networks.
//!
//! Each node owns one source tree of directories, files and fixed-size
//! chunks, all addressed by hash, and mirrors the trees of its peers.
//! Discovery runs over unreliable broadcasts (`RH` asks who holds a hash,
//! `NP` advertises possession, `NH` announces fresh nodes), periodic
//! identity announces carry a source checksum (`CS`) for anti-entropy,
//! and the actual bytes travel over one point-to-point link at a time.
//!
//! The [`storage`] module owns the index and the chunk files, the
//! [`replication`] module drives the protocol, [`transport`] abstracts
//! the overlay underneath, and [`node`] ties them into a runnable
//! [`node::MeshNode`] fronted by the [`admin`] HTTP surface.

#[macro_use]
extern crate tracing;

pub mod admin;
pub mod hashing;
pub mod log;
pub mod node;
pub mod replication;
pub mod storage;
pub mod transport;
