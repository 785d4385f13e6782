// Copyright 2023 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Node identity hashing.
//!
//! Every node in a source tree is addressed by a lowercase hex SHA-224
//! digest. Tree nodes hash their position (the chain of ancestor hashes),
//! data nodes hash their bytes salted with a parent hash, so identical
//! bytes under different parents get distinct identities.

use sha2::{Digest, Sha224};

/// Hash of an ancestor chain, source first.
///
/// The input is the UTF-8 concatenation of the given hashes with no
/// delimiter. A node's position in a named tree is its identity; names and
/// contents do not participate.
pub fn path_hash<I, S>(ancestors: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut hasher = Sha224::new();
    for ancestor in ancestors {
        hasher.update(ancestor.as_ref().as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Hash of `bytes` prefixed with the UTF-8 bytes of `salt`.
///
/// An empty salt hashes the bytes alone.
pub fn salted_hash(salt: &str, bytes: &[u8]) -> String {
    let mut hasher = Sha224::new();
    hasher.update(salt.as_bytes());
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_input_is_the_sha224_empty_digest() {
        assert_eq!(
            salted_hash("", b""),
            "d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f"
        );
        assert_eq!(
            path_hash(Vec::<String>::new()),
            "d14a028c2a3a2bc9476102bb288234c415a2b01f828ea62ac5b3e42f"
        );
    }

    #[test]
    fn path_hash_equals_salted_hash_over_the_joined_chain() {
        let chain = ["aa11", "bb22", "cc33"];
        assert_eq!(path_hash(chain), salted_hash("", b"aa11bb22cc33"));
    }

    #[test]
    fn path_hash_is_order_sensitive() {
        assert_ne!(path_hash(["aa", "bb"]), path_hash(["bb", "aa"]));
    }

    proptest! {
        #[test]
        fn distinct_salts_give_distinct_hashes(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            prop_assert_ne!(salted_hash("aa", &data), salted_hash("bb", &data));
        }

        #[test]
        fn salting_is_not_plain_concat_reordering(
            a in "[0-9a-f]{8}",
            b in "[0-9a-f]{8}",
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(salted_hash(&a, b.as_bytes()), salted_hash(&b, a.as_bytes()));
        }
    }
}
