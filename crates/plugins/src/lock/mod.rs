//! Secret locks: funds released to a recipient by revealing a proof.
//!
//! A lock transaction moves funds out of the owner's balance into a
//! [`SecretLockInfo`] keyed by the secret. A proof transaction revealing a
//! preimage of the secret before the lock expires credits the recipient;
//! unused locks are refunded to their owner at the expiry height.

use ledgerflow_core::{
    AccountAddressNotification, Address, Amount, BalanceDebitNotification, BlockDuration,
    DiagnosticCounter, EntityType, Hash256, Height, Key, Notification, NotificationChannel,
    NotificationType, Notifications, PayloadError, PluginError, PluginManager, SubCache,
    Transaction, TransactionPlugin,
};
use serde::{Deserialize, Serialize};

mod observers;
mod validators;

pub use observers::*;
pub use validators::*;

pub const LOCK_FACILITY: &str = "LockSecret";

pub const SECRET_LOCK_ENTITY_TYPE: EntityType = EntityType(0x4152);
pub const SECRET_PROOF_ENTITY_TYPE: EntityType = EntityType(0x4252);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LockStatus {
    Unused,
    Used,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretLockInfo {
    pub owner: Key,
    pub recipient: Address,
    pub amount: Amount,

    /// First height at which the lock can no longer be proven
    pub expiry: Height,

    pub status: LockStatus,
}

/// Lock infos indexed by secret
pub struct SecretLockInfoCache;

impl SubCache for SecretLockInfoCache {
    const NAME: &'static str = "SecretLockInfoCache";

    type Key = Hash256;
    type Value = SecretLockInfo;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretLockPayload {
    pub recipient: Address,
    pub secret: Hash256,
    pub amount: Amount,
    pub duration: BlockDuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretProofPayload {
    pub recipient: Address,
    pub secret: Hash256,
    pub proof: Vec<u8>,
}

macro_rules! lock_notification {
    ($(#[$meta:meta])* $name:ident, $code:expr, $label:expr, $channel:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: $ty),*
        }

        impl Notification for $name {
            const TYPE: NotificationType = NotificationType::new(LOCK_FACILITY, $code, $label);
            const CHANNEL: NotificationChannel = NotificationChannel::$channel;
        }
    };
}

lock_notification!(
    SecretLockDurationNotification, 0x0001, "Secret_Duration", Validator {
        duration: BlockDuration,
    }
);

lock_notification!(
    /// Funds already debited from `owner` are locked under `secret`
    SecretLockNotification, 0x0002, "Secret", All {
        owner: Key,
        recipient: Address,
        secret: Hash256,
        amount: Amount,
        duration: BlockDuration,
    }
);

lock_notification!(
    ProofSecretNotification, 0x0003, "Proof_Secret", Validator {
        secret: Hash256,
        proof: Vec<u8>,
    }
);

lock_notification!(
    ProofPublicationNotification, 0x0004, "Proof_Publication", All {
        signer: Key,
        recipient: Address,
        secret: Hash256,
    }
);

pub struct SecretLockPlugin;

impl TransactionPlugin for SecretLockPlugin {
    fn entity_type(&self) -> EntityType {
        SECRET_LOCK_ENTITY_TYPE
    }

    fn name(&self) -> &'static str {
        "SecretLock"
    }

    fn publish(&self, tx: &Transaction, sink: &mut Notifications) -> Result<(), PayloadError> {
        let payload: SecretLockPayload = tx.decode_payload()?;

        sink.push(AccountAddressNotification {
            address: payload.recipient,
        });

        sink.push(SecretLockDurationNotification {
            duration: payload.duration,
        });

        sink.push(BalanceDebitNotification {
            sender: tx.signer,
            amount: payload.amount,
        });

        sink.push(SecretLockNotification {
            owner: tx.signer,
            recipient: payload.recipient,
            secret: payload.secret,
            amount: payload.amount,
            duration: payload.duration,
        });

        Ok(())
    }
}

pub struct SecretProofPlugin;

impl TransactionPlugin for SecretProofPlugin {
    fn entity_type(&self) -> EntityType {
        SECRET_PROOF_ENTITY_TYPE
    }

    fn name(&self) -> &'static str {
        "SecretProof"
    }

    fn publish(&self, tx: &Transaction, sink: &mut Notifications) -> Result<(), PayloadError> {
        let payload: SecretProofPayload = tx.decode_payload()?;

        sink.push(ProofSecretNotification {
            secret: payload.secret,
            proof: payload.proof,
        });

        sink.push(ProofPublicationNotification {
            signer: tx.signer,
            recipient: payload.recipient,
            secret: payload.secret,
        });

        Ok(())
    }
}

pub fn register_secret_lock_plugin(manager: &mut PluginManager) -> Result<(), PluginError> {
    manager.add_cache::<SecretLockInfoCache>()?;

    manager.add_diagnostic_counter(DiagnosticCounter::new("SECRETLOCK C", |view| {
        view.sub::<SecretLockInfoCache>()
            .map(|x| x.len() as u64)
            .unwrap_or_default()
    }))?;

    manager.add_transaction_plugin(SecretLockPlugin)?;
    manager.add_transaction_plugin(SecretProofPlugin)?;

    manager.add_stateless_validator(create_secret_lock_duration_validator());
    manager.add_stateless_validator(create_proof_secret_validator());

    manager.add_stateful_validator(create_secret_lock_cache_unique_validator());
    manager.add_stateful_validator(create_proof_validator());

    manager.add_observer(create_secret_lock_observer());
    manager.add_observer(create_proof_observer());
    manager.add_observer(create_expired_secret_lock_info_observer());

    Ok(())
}
