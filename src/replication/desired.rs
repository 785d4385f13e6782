// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use crate::transport::Identity;

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

/// Bookkeeping for one hash we want from the network.
#[derive(Debug)]
struct DesiredEntry {
    /// Identities that advertised the hash, in arrival order. Duplicates
    /// are fine; rotation keeps the load spread.
    providers: VecDeque<Identity>,
    attempts: u32,
    next_attempt_at: Instant,
}

/// What the scheduler decided to do on a tick.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) enum Action {
    /// Fetch `hash` from `target` over a fresh link.
    Fetch { hash: String, target: Identity },
    /// Nobody has answered yet; ask the network again.
    Rebroadcast { hash: String },
}

/// The table of hashes we want, with provider rotation and retry
/// bookkeeping. Iteration order is deterministic; fairness across entries
/// comes from the per-entry backoff after every action.
#[derive(Debug)]
pub(crate) struct DesiredQueue {
    entries: BTreeMap<String, DesiredEntry>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl DesiredQueue {
    pub(crate) fn new(max_attempts: u32, retry_delay: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_attempts,
            retry_delay,
        }
    }

    /// Tracks `hash` unless it already is. Returns whether it was new.
    /// The first scheduler attempt is one backoff away; the desire
    /// broadcast that accompanies the insert covers the time in between.
    pub(crate) fn insert(&mut self, hash: &str, now: Instant) -> bool {
        if self.entries.contains_key(hash) {
            return false;
        }
        self.entries.insert(
            hash.to_owned(),
            DesiredEntry {
                providers: VecDeque::new(),
                attempts: 0,
                next_attempt_at: now + self.retry_delay,
            },
        );
        true
    }

    pub(crate) fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    pub(crate) fn remove(&mut self, hash: &str) -> bool {
        self.entries.remove(hash).is_some()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn hashes(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    #[cfg(test)]
    pub(crate) fn attempts(&self, hash: &str) -> Option<u32> {
        self.entries.get(hash).map(|entry| entry.attempts)
    }

    /// Records that `provider` advertised `hash`. Ignored for hashes we
    /// do not want.
    pub(crate) fn add_provider(&mut self, hash: &str, provider: Identity) -> bool {
        match self.entries.get_mut(hash) {
            Some(entry) => {
                entry.providers.push_back(provider);
                true
            }
            None => false,
        }
    }

    /// Picks at most one action: the first entry past its backoff gets a
    /// provider fetch (rotating that provider to the back of the line) or
    /// a rebroadcast when no provider has answered. Entries over the
    /// attempt limit are dropped during the scan.
    pub(crate) fn next_action(&mut self, now: Instant) -> Option<Action> {
        let mut expired = Vec::new();
        let mut action = None;
        for (hash, entry) in &mut self.entries {
            if entry.attempts > self.max_attempts {
                expired.push(hash.clone());
                continue;
            }
            if action.is_some() || now < entry.next_attempt_at {
                continue;
            }
            entry.attempts += 1;
            entry.next_attempt_at = now + self.retry_delay;
            action = Some(match entry.providers.pop_front() {
                Some(target) => {
                    entry.providers.push_back(target.clone());
                    Action::Fetch {
                        hash: hash.clone(),
                        target,
                    }
                }
                None => Action::Rebroadcast { hash: hash.clone() },
            });
        }
        for hash in expired {
            debug!("Giving up on {hash} after too many attempts");
            self.entries.remove(&hash);
        }
        action
    }
}
