// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Replication broadcast frames.
//!
//! A frame is a single textual packet `<prefix><source_hexhash><hash>`
//! with a two character prefix and a fixed-width source field. Checksums
//! do not get their own frames; they ride the transport's identity
//! announce as `"CS"` prefixed app-data.

use crate::transport::IDENTITY_HEX_LEN;

use bytes::Bytes;

/// Request method tag for hash fetches over a link, and frame prefix for
/// asking the network who can provide a hash.
pub const REQUEST_HASH: &str = "RH";
/// Frame prefix advertising that we can serve a hash.
pub const NODE_PRESENT: &str = "NP";
/// Frame prefix announcing a freshly minted node.
pub const NEW_HASH: &str = "NH";
/// Announce app-data prefix carrying a source checksum.
pub const CHECKSUM: &str = "CS";

const PREFIX_LEN: usize = 2;

/// A parsed replication broadcast.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Broadcast {
    /// `source` wants `hash` and asks who can provide it.
    RequestHash { source: String, hash: String },
    /// `source` holds `hash` and is willing to serve it.
    NodePresent { source: String, hash: String },
    /// `source` minted a new node `hash`.
    NewHash { source: String, hash: String },
}

impl Broadcast {
    /// The identity hex-hash of whoever sent the frame.
    pub fn source(&self) -> &str {
        match self {
            Broadcast::RequestHash { source, .. }
            | Broadcast::NodePresent { source, .. }
            | Broadcast::NewHash { source, .. } => source,
        }
    }

    /// Encodes to the single-packet wire form.
    pub fn encode(&self) -> Bytes {
        let (prefix, source, hash) = match self {
            Broadcast::RequestHash { source, hash } => (REQUEST_HASH, source, hash),
            Broadcast::NodePresent { source, hash } => (NODE_PRESENT, source, hash),
            Broadcast::NewHash { source, hash } => (NEW_HASH, source, hash),
        };
        Bytes::from(format!("{prefix}{source}{hash}"))
    }

    /// Splits a frame by prefix and source width. Frames too short to
    /// carry a hash, non-UTF-8 frames and unknown prefixes decode to
    /// `None` and are dropped silently.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < PREFIX_LEN + IDENTITY_HEX_LEN + 1 {
            return None;
        }
        let text = std::str::from_utf8(data).ok()?;
        let prefix = text.get(..PREFIX_LEN)?;
        let source = text.get(PREFIX_LEN..PREFIX_LEN + IDENTITY_HEX_LEN)?.to_owned();
        let hash = text.get(PREFIX_LEN + IDENTITY_HEX_LEN..)?.to_owned();
        match prefix {
            REQUEST_HASH => Some(Broadcast::RequestHash { source, hash }),
            NODE_PRESENT => Some(Broadcast::NodePresent { source, hash }),
            NEW_HASH => Some(Broadcast::NewHash { source, hash }),
            _ => None,
        }
    }
}

/// Encodes announce app-data carrying a source checksum.
pub fn encode_checksum(checksum: &str) -> Bytes {
    Bytes::from(format!("{CHECKSUM}{checksum}"))
}

/// Extracts the checksum from announce app-data, if it carries one.
pub fn decode_checksum(app_data: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(app_data).ok()?;
    text.strip_prefix(CHECKSUM)
        .filter(|checksum| !checksum.is_empty())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = "a1b2c3d4e5f6a7b8c9"; // 18 hex chars

    #[test]
    fn frames_round_trip() {
        for frame in [
            Broadcast::RequestHash {
                source: SOURCE.to_owned(),
                hash: "ff00".repeat(14),
            },
            Broadcast::NodePresent {
                source: SOURCE.to_owned(),
                hash: "aa".to_owned(),
            },
            Broadcast::NewHash {
                source: SOURCE.to_owned(),
                hash: "bb".repeat(28),
            },
        ] {
            let decoded = Broadcast::decode(&frame.encode()).expect("decodes");
            assert_eq!(decoded, frame);
            assert_eq!(decoded.source(), SOURCE);
        }
    }

    #[test]
    fn short_frames_are_dropped() {
        assert_eq!(Broadcast::decode(b""), None);
        assert_eq!(Broadcast::decode(b"RH"), None);
        // prefix plus source but no hash at all
        let exact = format!("RH{SOURCE}");
        assert_eq!(Broadcast::decode(exact.as_bytes()), None);
        // one hash character is enough
        let minimal = format!("RH{SOURCE}f");
        assert!(Broadcast::decode(minimal.as_bytes()).is_some());
    }

    #[test]
    fn unknown_prefixes_and_junk_are_dropped() {
        let unknown = format!("ZZ{SOURCE}ffff");
        assert_eq!(Broadcast::decode(unknown.as_bytes()), None);
        assert_eq!(Broadcast::decode(&[0xff; 40]), None);
    }

    #[test]
    fn checksum_app_data_round_trips() {
        let app_data = encode_checksum("cafe");
        assert_eq!(&app_data[..], b"CScafe");
        assert_eq!(decode_checksum(&app_data).as_deref(), Some("cafe"));
        assert_eq!(decode_checksum(b"CS"), None);
        assert_eq!(decode_checksum(b"other"), None);
    }
}
