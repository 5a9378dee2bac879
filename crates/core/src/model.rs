use std::fmt::Display;

use pallas::crypto::hash::{Hash, Hasher};
use serde::{Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as, Bytes, IfIsHumanReadable};

/// A blake2b-256 digest used for entity and secret hashes
pub type Hash256 = Hash<32>;

pub fn zero_hash() -> Hash256 {
    Hash::new([0u8; 32])
}

pub fn blake2b_256(data: &[u8]) -> Hash256 {
    let mut hasher = Hasher::<256>::new();
    hasher.input(data);
    hasher.finalize()
}

macro_rules! base_value {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

base_value!(
    /// The height of a block in the chain (nemesis block is height 1)
    Height
);

base_value!(
    /// Milliseconds since the network epoch
    Timestamp
);

base_value!(
    /// An amount of the network currency in atomic units
    Amount
);

base_value!(Difficulty);

base_value!(Importance);

base_value!(
    /// A number of blocks
    BlockDuration
);

impl Height {
    pub fn next(self) -> Height {
        Height(self.0 + 1)
    }

    pub fn saturating_sub(self, blocks: u64) -> Height {
        Height(self.0.saturating_sub(blocks))
    }
}

impl Amount {
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }
}

impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Amount(iter.map(|x| x.0).sum())
    }
}

/// Identifies the network an entity or address belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NetworkIdentifier(pub u8);

impl NetworkIdentifier {
    pub const MAINNET: Self = Self(0x68);
    pub const TESTNET: Self = Self(0x98);
}

/// A 32-byte ed25519 public key
#[serde_as]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(#[serde_as(as = "IfIsHumanReadable<Hex, Bytes>")] pub [u8; 32]);

impl Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature(#[serde_as(as = "IfIsHumanReadable<Hex, Bytes>")] pub [u8; 64]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

pub const ADDRESS_SIZE: usize = 25;
const ADDRESS_DIGEST_SIZE: usize = 20;
const ADDRESS_CHECKSUM_SIZE: usize = 4;

/// A network-bound account address
///
/// Layout: one network byte, the first 20 bytes of the blake2b-256 digest of
/// the owner's public key, and a 4-byte checksum over the preceding 21 bytes.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(#[serde_as(as = "IfIsHumanReadable<Hex, Bytes>")] pub [u8; ADDRESS_SIZE]);

impl Address {
    pub fn from_public_key(key: &Key, network: NetworkIdentifier) -> Self {
        let digest = blake2b_256(&key.0);

        let mut bytes = [0u8; ADDRESS_SIZE];
        bytes[0] = network.0;
        bytes[1..=ADDRESS_DIGEST_SIZE].copy_from_slice(&digest[..ADDRESS_DIGEST_SIZE]);

        let checksum = blake2b_256(&bytes[..=ADDRESS_DIGEST_SIZE]);
        bytes[ADDRESS_SIZE - ADDRESS_CHECKSUM_SIZE..]
            .copy_from_slice(&checksum[..ADDRESS_CHECKSUM_SIZE]);

        Self(bytes)
    }

    pub fn network(&self) -> NetworkIdentifier {
        NetworkIdentifier(self.0[0])
    }

    pub fn is_valid_for(&self, network: NetworkIdentifier) -> bool {
        if self.network() != network {
            return false;
        }

        let checksum = blake2b_256(&self.0[..=ADDRESS_DIGEST_SIZE]);
        self.0[ADDRESS_SIZE - ADDRESS_CHECKSUM_SIZE..] == checksum[..ADDRESS_CHECKSUM_SIZE]
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_address_is_valid_only_for_its_network() {
        let key = Key([7u8; 32]);
        let address = Address::from_public_key(&key, NetworkIdentifier::TESTNET);

        assert_eq!(address.network(), NetworkIdentifier::TESTNET);
        assert!(address.is_valid_for(NetworkIdentifier::TESTNET));
        assert!(!address.is_valid_for(NetworkIdentifier::MAINNET));
    }

    #[test]
    fn corrupted_address_fails_checksum() {
        let key = Key([9u8; 32]);
        let mut address = Address::from_public_key(&key, NetworkIdentifier::TESTNET);
        address.0[5] ^= 0xFF;

        assert!(!address.is_valid_for(NetworkIdentifier::TESTNET));
    }

    #[test]
    fn address_derivation_is_deterministic() {
        let key = Key([1u8; 32]);

        assert_eq!(
            Address::from_public_key(&key, NetworkIdentifier::MAINNET),
            Address::from_public_key(&key, NetworkIdentifier::MAINNET)
        );
        assert_ne!(
            Address::from_public_key(&key, NetworkIdentifier::MAINNET),
            Address::from_public_key(&Key([2u8; 32]), NetworkIdentifier::MAINNET)
        );
    }
}
