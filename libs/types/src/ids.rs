//! Fixed-width identifier types
//!
//! Assets, transactions, outputs and blocks are all identified by 32-byte
//! digests. Both types display as lowercase hex and serialize as raw bytes.

use crate::errors::TypesError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Width of every identifier in bytes.
pub const ID_LEN: usize = 32;

macro_rules! fixed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name([u8; ID_LEN]);

        impl $name {
            pub const fn new(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            /// Parse from a 64 character hex string.
            pub fn from_hex(s: &str) -> Result<Self, TypesError> {
                let raw = hex::decode(s).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
                let bytes: [u8; ID_LEN] = raw
                    .try_into()
                    .map_err(|v: Vec<u8>| TypesError::InvalidLength { expected: ID_LEN, got: v.len() })?;
                Ok(Self(bytes))
            }

            pub fn from_slice(s: &[u8]) -> Result<Self, TypesError> {
                let bytes: [u8; ID_LEN] = s
                    .try_into()
                    .map_err(|_| TypesError::InvalidLength { expected: ID_LEN, got: s.len() })?;
                Ok(Self(bytes))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl From<[u8; ID_LEN]> for $name {
            fn from(bytes: [u8; ID_LEN]) -> Self {
                Self(bytes)
            }
        }
    };
}

fixed_id!(
    /// Asset identifier
    AssetId
);

fixed_id!(
    /// SHA-256 digest: transaction ids, output ids, block hashes
    Hash
);

impl Hash {
    /// SHA-256 of the given bytes.
    pub fn digest(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }
}

/// Incremental hasher with length-prefixed field framing, so adjacent
/// variable-length fields cannot alias each other.
pub(crate) struct FieldHasher(Sha256);

impl FieldHasher {
    pub(crate) fn new(domain: &str) -> Self {
        let mut h = Sha256::new();
        h.update(domain.as_bytes());
        Self(h)
    }

    pub(crate) fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.0.update((data.len() as u64).to_be_bytes());
        self.0.update(data);
        self
    }

    pub(crate) fn u64(&mut self, v: u64) -> &mut Self {
        self.0.update(v.to_be_bytes());
        self
    }

    pub(crate) fn finish(&mut self) -> Hash {
        Hash(std::mem::take(&mut self.0).finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let id = AssetId::new([0xab; 32]);
        let parsed = AssetId::from_hex(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_from_hex_rejects_short_input() {
        let err = Hash::from_hex("abcd").unwrap_err();
        assert!(matches!(err, TypesError::InvalidLength { expected: 32, got: 2 }));
    }

    #[test]
    fn test_from_hex_rejects_non_hex() {
        assert!(matches!(AssetId::from_hex("zz"), Err(TypesError::InvalidHex(_))));
    }

    #[test]
    fn test_field_hasher_framing() {
        let a = FieldHasher::new("t").bytes(b"ab").bytes(b"c").finish();
        let b = FieldHasher::new("t").bytes(b"a").bytes(b"bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let lo = AssetId::new([0u8; 32]);
        let mut hi_bytes = [0u8; 32];
        hi_bytes[0] = 1;
        assert!(lo < AssetId::new(hi_bytes));
    }
}
