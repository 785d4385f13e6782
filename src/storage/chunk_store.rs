// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use super::error::Result;

use bytes::Bytes;
use std::collections::BTreeSet;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const STORE_DIR: &str = "store";

/// A flat disk store for chunk payloads, one file per chunk hash.
///
/// The store never interprets bytes; verifying that a file still matches
/// its hash is the content index's job.
#[derive(Clone, Debug)]
pub struct ChunkStore {
    store_path: PathBuf,
}

impl ChunkStore {
    /// Creates or reopens the store below `root/store`.
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let store_path = root.as_ref().join(STORE_DIR);
        std::fs::create_dir_all(&store_path)?;
        Ok(Self { store_path })
    }

    fn chunk_path(&self, hash: &str) -> PathBuf {
        self.store_path.join(hash)
    }

    /// Writes a chunk payload, with a best-effort fsync.
    pub fn put(&self, hash: &str, bytes: &[u8]) -> Result<()> {
        trace!("Storing chunk {hash} ({} bytes)", bytes.len());
        let mut file = std::fs::File::create(self.chunk_path(hash))?;
        file.write_all(bytes)?;
        let _ = file.sync_all();
        Ok(())
    }

    /// Reads a chunk payload back, `None` when it is not on disk.
    pub fn get(&self, hash: &str) -> Result<Option<Bytes>> {
        match std::fs::read(self.chunk_path(hash)) {
            Ok(bytes) => Ok(Some(Bytes::from(bytes))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.chunk_path(hash).is_file()
    }

    /// Removes a chunk payload; missing files are not an error.
    pub fn delete(&self, hash: &str) -> Result<()> {
        match std::fs::remove_file(self.chunk_path(hash)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes every file whose basename is not in `valid`.
    pub fn sweep(&self, valid: &BTreeSet<String>) -> Result<()> {
        for entry in WalkDir::new(&self.store_path).min_depth(1) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Failed to process a store entry: {err}");
                    continue;
                }
            };
            let keep = entry.file_type().is_file()
                && entry
                    .file_name()
                    .to_str()
                    .map(|name| valid.contains(name))
                    .unwrap_or(false);
            if !keep {
                debug!("Sweeping stray store entry {:?}", entry.path());
                if entry.file_type().is_dir() {
                    let _ = std::fs::remove_dir_all(entry.path());
                } else {
                    std::fs::remove_file(entry.path())?;
                }
            }
        }
        Ok(())
    }
}
