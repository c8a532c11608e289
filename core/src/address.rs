//! Human address encoding for ledger actor ids.
//!
//! An [`Address`] is the network-prefixed, checksummed rendering of a 32-byte
//! [`ActorId`]: `base58(version ‖ key ‖ checksum)` where `checksum` is the
//! first four bytes of `SHA-256("stagepass-addr" ‖ version ‖ key)`. The
//! conversion round-trips exactly; decoding validates length, version and
//! checksum so a stored address string is always convertible back to the
//! actor id it came from.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::ledger::ActorId;

/// Network version byte prefixed to every encoded address.
pub const NETWORK_VERSION: u8 = 0x35;

/// Domain separator mixed into the checksum hash.
const CHECKSUM_CONTEXT: &[u8] = b"stagepass-addr";

/// Errors from parsing a human address string.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum AddressError {
    /// Not valid base58.
    #[error("address is not valid base58: {0}")]
    Base58(String),
    /// Decoded payload has the wrong length.
    #[error("address payload has length {0}, expected 37")]
    Length(usize),
    /// Version byte does not match this network.
    #[error("address version {0:#04x} does not match network {NETWORK_VERSION:#04x}")]
    Version(u8),
    /// Checksum mismatch (corrupted or foreign address).
    #[error("address checksum mismatch")]
    Checksum,
}

/// A validated, network-prefixed human address.
///
/// Stores the decoded key so conversion back to [`ActorId`] is infallible;
/// `Display` re-encodes on demand.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    version: u8,
    key: [u8; 32],
}

impl Address {
    /// Encode an actor id under the default network version.
    #[must_use]
    pub const fn from_actor(actor: &ActorId) -> Self {
        Self {
            version: NETWORK_VERSION,
            key: *actor.as_bytes(),
        }
    }

    /// The actor id this address encodes.
    #[must_use]
    pub const fn actor_id(&self) -> ActorId {
        ActorId::new(self.key)
    }

    /// The network version byte.
    #[must_use]
    pub const fn version(&self) -> u8 {
        self.version
    }
}

fn checksum(version: u8, key: &[u8; 32]) -> [u8; 4] {
    let mut hasher = Sha256::new();
    hasher.update(CHECKSUM_CONTEXT);
    hasher.update([version]);
    hasher.update(key);
    let digest = hasher.finalize();
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut payload = [0u8; 37];
        payload[0] = self.version;
        payload[1..33].copy_from_slice(&self.key);
        payload[33..].copy_from_slice(&checksum(self.version, &self.key));
        f.write_str(&bs58::encode(payload).into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let payload = bs58::decode(s)
            .into_vec()
            .map_err(|e| AddressError::Base58(e.to_string()))?;
        if payload.len() != 37 {
            return Err(AddressError::Length(payload.len()));
        }
        let version = payload[0];
        if version != NETWORK_VERSION {
            return Err(AddressError::Version(version));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&payload[1..33]);
        if payload[33..] != checksum(version, &key) {
            return Err(AddressError::Checksum);
        }
        Ok(Self { version, key })
    }
}

impl From<ActorId> for Address {
    fn from(actor: ActorId) -> Self {
        Self::from_actor(&actor)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AddressVisitor;

        impl Visitor<'_> for AddressVisitor {
            type Value = Address;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a base58 network address string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Address, E> {
                Address::from_str(value).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(AddressVisitor)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn round_trips_an_actor_id() {
        let actor = ActorId::new([7u8; 32]);
        let address = Address::from_actor(&actor);
        let text = address.to_string();
        let parsed: Address = text.parse().unwrap();
        assert_eq!(parsed, address);
        assert_eq!(parsed.actor_id(), actor);
    }

    #[test]
    fn rejects_corrupted_text() {
        let address = Address::from_actor(&ActorId::new([1u8; 32]));
        let mut text = address.to_string();
        // Flip the last character to another base58 character.
        let last = text.pop().unwrap();
        text.push(if last == '2' { '3' } else { '2' });
        let err = text.parse::<Address>().unwrap_err();
        assert!(matches!(
            err,
            AddressError::Checksum | AddressError::Length(_) | AddressError::Version(_)
        ));
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            "3yZe7d".parse::<Address>(),
            Err(AddressError::Length(_))
        ));
    }

    proptest! {
        #[test]
        fn encode_decode_is_identity(bytes in prop::array::uniform32(any::<u8>())) {
            let actor = ActorId::new(bytes);
            let text = Address::from_actor(&actor).to_string();
            let parsed: Address = text.parse().unwrap();
            prop_assert_eq!(parsed.actor_id(), actor);
        }
    }
}
