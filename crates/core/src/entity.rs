use std::fmt::Display;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_with::{hex::Hex, serde_as, Bytes, IfIsHumanReadable};
use thiserror::Error;

use crate::{
    blake2b_256, Amount, Difficulty, Hash256, Height, Key, NetworkIdentifier, Signature,
    Timestamp,
};

/// Tag identifying the kind of an entity
///
/// Transaction types are open-ended: each transaction plugin claims its own
/// tag at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(pub u16);

impl EntityType {
    pub const BLOCK: Self = Self(0x8143);
}

impl Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload for entity type {0}: {1}")]
    Malformed(EntityType, String),

    #[error("no transaction plugin registered for entity type {0}")]
    UnknownType(EntityType),
}

/// Common accessors shared by every signed entity
pub trait Entity {
    fn entity_type(&self) -> EntityType;

    fn signer(&self) -> &Key;

    fn signature(&self) -> &Signature;

    fn network(&self) -> NetworkIdentifier;

    fn version(&self) -> u8;

    /// Deterministic binary encoding of the entity
    fn encode(&self) -> Vec<u8>;

    fn size(&self) -> usize {
        self.encode().len()
    }

    fn hash(&self) -> Hash256 {
        blake2b_256(&self.encode())
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub signer: Key,
    pub signature: Signature,
    pub version: u8,
    pub network: NetworkIdentifier,
    pub entity_type: EntityType,
    pub max_fee: Amount,
    pub deadline: Timestamp,

    /// Type-specific body, interpreted by the plugin that owns `entity_type`
    #[serde_as(as = "IfIsHumanReadable<Hex, Bytes>")]
    pub payload: Vec<u8>,
}

impl Transaction {
    pub fn decode_payload<T: DeserializeOwned>(&self) -> Result<T, PayloadError> {
        bincode::deserialize(&self.payload)
            .map_err(|err| PayloadError::Malformed(self.entity_type, err.to_string()))
    }
}

pub fn encode_payload<T: Serialize>(body: &T) -> Vec<u8> {
    bincode::serialize(body).expect("payload bodies are plain structs")
}

impl Entity for Transaction {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn signer(&self) -> &Key {
        &self.signer
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn network(&self) -> NetworkIdentifier {
        self.network
    }

    fn version(&self) -> u8 {
        self.version
    }

    fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("transactions are plain structs")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub signer: Key,
    pub signature: Signature,
    pub version: u8,
    pub network: NetworkIdentifier,
    pub height: Height,
    pub timestamp: Timestamp,
    pub difficulty: Difficulty,
    pub previous_block_hash: Hash256,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn total_fee(&self) -> Amount {
        self.transactions.iter().map(|tx| tx.max_fee).sum()
    }
}

impl Entity for Block {
    fn entity_type(&self) -> EntityType {
        EntityType::BLOCK
    }

    fn signer(&self) -> &Key {
        &self.signer
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn network(&self) -> NetworkIdentifier {
        self.network
    }

    fn version(&self) -> u8 {
        self.version
    }

    fn encode(&self) -> Vec<u8> {
        bincode::serialize(self).expect("blocks are plain structs")
    }
}
