use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{zero_hash, Block, Entity, Hash256, Height, Transaction};

/// An ordered batch of entities received together
///
/// Ranges are immutable once constructed: entities can be iterated but never
/// reordered or individually removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityRange<T> {
    entities: Vec<T>,
}

impl<T> Default for EntityRange<T> {
    fn default() -> Self {
        Self {
            entities: Vec::new(),
        }
    }
}

impl<T> EntityRange<T> {
    pub fn new(entities: Vec<T>) -> Self {
        Self { entities }
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.entities.iter()
    }
}

impl<T> FromIterator<T> for EntityRange<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<T> IntoIterator for EntityRange<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.entities.into_iter()
    }
}

pub type BlockRange = EntityRange<Block>;
pub type TransactionRange = EntityRange<Transaction>;

/// A transaction wrapped with its per-batch processing state
#[derive(Debug, Clone)]
pub struct TransactionElement {
    pub transaction: Arc<Transaction>,
    pub entity_hash: Hash256,

    /// Set by an earlier stage to exclude the element from later stages
    pub skip: bool,
}

impl TransactionElement {
    pub fn new(transaction: Transaction) -> Self {
        Self {
            transaction: Arc::new(transaction),
            entity_hash: zero_hash(),
            skip: false,
        }
    }
}

/// A block wrapped with its hash and the hashes of its transactions
#[derive(Debug, Clone)]
pub struct BlockElement {
    pub block: Arc<Block>,
    pub entity_hash: Hash256,
    pub transaction_hashes: Vec<Hash256>,
}

impl BlockElement {
    pub fn new(block: Block) -> Self {
        let transaction_hashes = vec![zero_hash(); block.transactions.len()];

        Self {
            block: Arc::new(block),
            entity_hash: zero_hash(),
            transaction_hashes,
        }
    }

    pub fn height(&self) -> Height {
        self.block.height
    }

    /// Pairs of (transaction, hash) in block order
    pub fn transactions(&self) -> impl Iterator<Item = (&Transaction, &Hash256)> {
        self.block
            .transactions
            .iter()
            .zip(self.transaction_hashes.iter())
    }
}

/// An owned, shareable transaction and its hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub entity: Arc<Transaction>,
    pub entity_hash: Hash256,

    /// Height of the block that confirmed the transaction, if any
    pub height: Option<Height>,
}

impl TransactionInfo {
    pub fn new(entity: Arc<Transaction>, entity_hash: Hash256) -> Self {
        Self {
            entity,
            entity_hash,
            height: None,
        }
    }

    pub fn from_transaction(transaction: Transaction) -> Self {
        let entity_hash = transaction.hash();
        Self::new(Arc::new(transaction), entity_hash)
    }
}

#[derive(Debug, Clone, Copy)]
pub enum EntityRef<'a> {
    Block(&'a Block),
    Transaction(&'a Transaction),
}

impl<'a> EntityRef<'a> {
    pub fn as_transaction(&self) -> Option<&'a Transaction> {
        match self {
            EntityRef::Transaction(x) => Some(x),
            EntityRef::Block(_) => None,
        }
    }

    pub fn as_block(&self) -> Option<&'a Block> {
        match self {
            EntityRef::Block(x) => Some(x),
            EntityRef::Transaction(_) => None,
        }
    }

    pub fn as_entity(&self) -> &'a dyn Entity {
        match self {
            EntityRef::Block(x) => *x,
            EntityRef::Transaction(x) => *x,
        }
    }
}

/// A borrowed view of an entity, its hash and the block it belongs to
#[derive(Debug, Clone, Copy)]
pub struct WeakEntityInfo<'a> {
    entity: EntityRef<'a>,
    hash: Hash256,
    block: Option<&'a Block>,
}

impl<'a> WeakEntityInfo<'a> {
    pub fn transaction(transaction: &'a Transaction, hash: Hash256) -> Self {
        Self {
            entity: EntityRef::Transaction(transaction),
            hash,
            block: None,
        }
    }

    pub fn block_transaction(transaction: &'a Transaction, hash: Hash256, block: &'a Block) -> Self {
        Self {
            entity: EntityRef::Transaction(transaction),
            hash,
            block: Some(block),
        }
    }

    pub fn block(block: &'a Block, hash: Hash256) -> Self {
        Self {
            entity: EntityRef::Block(block),
            hash,
            block: Some(block),
        }
    }

    pub fn entity(&self) -> EntityRef<'a> {
        self.entity
    }

    pub fn hash(&self) -> &Hash256 {
        &self.hash
    }

    /// The enclosing block, or the block itself for block entities
    pub fn associated_block(&self) -> Option<&'a Block> {
        self.block
    }

    pub fn is_block(&self) -> bool {
        matches!(self.entity, EntityRef::Block(_))
    }
}
