use std::collections::BTreeMap;

use crate::{
    AccountPublicKeyNotification, BalanceDebitNotification, Block, BlockNotification, Entity,
    EntityNotification, EntityRef, EntityType, FailureCode, Hash256, Key, Notifications,
    PayloadError, Signature, SignatureNotification, Transaction, TransactionNotification,
    WeakEntityInfo, CORE_FACILITY,
};

pub const FAILURE_MALFORMED_PAYLOAD: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0081, "Malformed_Payload");

pub const FAILURE_UNKNOWN_ENTITY_TYPE: FailureCode =
    FailureCode::new(CORE_FACILITY, 0x0082, "Unknown_Entity_Type");

impl From<&PayloadError> for FailureCode {
    fn from(value: &PayloadError) -> Self {
        match value {
            PayloadError::Malformed(..) => FAILURE_MALFORMED_PAYLOAD,
            PayloadError::UnknownType(_) => FAILURE_UNKNOWN_ENTITY_TYPE,
        }
    }
}

/// Type-specific behavior of one transaction kind
pub trait TransactionPlugin: Send + Sync {
    fn entity_type(&self) -> EntityType;

    fn name(&self) -> &'static str;

    /// Publishes the notifications specific to this transaction kind
    ///
    /// Called after the common transaction notifications were published.
    fn publish(
        &self,
        transaction: &Transaction,
        sink: &mut Notifications,
    ) -> Result<(), PayloadError>;
}

/// Signature verification capability
pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signer: &Key, signature: &Signature, data_hash: &Hash256) -> bool;
}

/// Verifier that accepts every signature
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _: &Key, _: &Signature, _: &Hash256) -> bool {
        true
    }
}

pub type TransactionPlugins = BTreeMap<EntityType, Box<dyn TransactionPlugin>>;

/// Decomposes entities into their ordered notification sequence
pub struct NotificationPublisher<'a> {
    plugins: &'a TransactionPlugins,
}

impl<'a> NotificationPublisher<'a> {
    pub fn new(plugins: &'a TransactionPlugins) -> Self {
        Self { plugins }
    }

    pub fn publish(
        &self,
        info: &WeakEntityInfo<'_>,
        sink: &mut Notifications,
    ) -> Result<(), PayloadError> {
        match info.entity() {
            EntityRef::Transaction(tx) => self.publish_transaction(tx, info.hash(), sink),
            EntityRef::Block(block) => {
                publish_block(block, info.hash(), sink);
                Ok(())
            }
        }
    }

    fn publish_transaction(
        &self,
        tx: &Transaction,
        hash: &Hash256,
        sink: &mut Notifications,
    ) -> Result<(), PayloadError> {
        let plugin = self
            .plugins
            .get(&tx.entity_type)
            .ok_or(PayloadError::UnknownType(tx.entity_type))?;

        publish_envelope(tx, sink);

        sink.push(TransactionNotification {
            signer: tx.signer,
            hash: *hash,
            entity_type: tx.entity_type,
            deadline: tx.deadline,
        });

        sink.push(BalanceDebitNotification {
            sender: tx.signer,
            amount: tx.max_fee,
        });

        sink.push(SignatureNotification {
            signer: tx.signer,
            signature: tx.signature,
            data_hash: *hash,
        });

        plugin.publish(tx, sink)
    }
}

fn publish_envelope(entity: &dyn Entity, sink: &mut Notifications) {
    sink.push(AccountPublicKeyNotification {
        public_key: *entity.signer(),
    });

    sink.push(EntityNotification {
        network: entity.network(),
        entity_type: entity.entity_type(),
        version: entity.version(),
    });
}

fn publish_block(block: &Block, hash: &Hash256, sink: &mut Notifications) {
    publish_envelope(block, sink);

    sink.push(BlockNotification {
        signer: block.signer,
        timestamp: block.timestamp,
        difficulty: block.difficulty,
        total_fee: block.total_fee(),
        num_transactions: block.transactions.len() as u32,
    });

    sink.push(SignatureNotification {
        signer: block.signer,
        signature: block.signature,
        data_hash: *hash,
    });
}
