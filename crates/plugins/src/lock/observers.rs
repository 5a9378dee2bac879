use ledgerflow_core::{Address, BlockNotification, Height, Observer, ObserverError};
use tracing::debug;

use crate::coresystem::{credit, debit, AccountStateCache};

use super::{
    LockStatus, ProofPublicationNotification, SecretLockInfo, SecretLockInfoCache,
    SecretLockNotification,
};

pub fn create_secret_lock_observer() -> Observer {
    Observer::new(
        "SecretLockObserver",
        |n: &SecretLockNotification, context| {
            let expiry = Height(context.height.get().saturating_add(n.duration.get()));
            let rollback = context.is_rollback();
            let locks = context.cache.sub_mut::<SecretLockInfoCache>()?;

            if rollback {
                locks.remove(&n.secret);
                return Ok(());
            }

            let info = SecretLockInfo {
                owner: n.owner,
                recipient: n.recipient,
                amount: n.amount,
                expiry,
                status: LockStatus::Unused,
            };

            locks.insert(n.secret, info);

            Ok(())
        },
    )
}

/// Releases a lock to its recipient
pub fn create_proof_observer() -> Observer {
    Observer::new(
        "ProofObserver",
        |n: &ProofPublicationNotification, context| {
            let rollback = context.is_rollback();

            let lock = context
                .cache
                .sub_mut::<SecretLockInfoCache>()?
                .get_mut(&n.secret)
                .ok_or_else(|| ObserverError::Inconsistent(format!("unknown secret {}", n.secret)))?;

            lock.status = match rollback {
                false => LockStatus::Used,
                true => LockStatus::Unused,
            };

            let recipient = lock.recipient;
            let amount = lock.amount;

            let accounts = context.cache.sub_mut::<AccountStateCache>()?;

            match rollback {
                false => credit(accounts, &recipient, amount),
                true => debit(accounts, &recipient, amount),
            }
        },
    )
}

/// Refunds locks that expire unused at the current height
pub fn create_expired_secret_lock_info_observer() -> Observer {
    Observer::new(
        "ExpiredSecretLockInfoObserver",
        |_: &BlockNotification, context| {
            let height = context.height;
            let network = context.config.network;
            let rollback = context.is_rollback();

            let refunds: Vec<_> = context
                .cache
                .sub::<SecretLockInfoCache>()?
                .iter()
                .filter(|(_, lock)| lock.expiry == height && lock.status == LockStatus::Unused)
                .map(|(_, lock)| (Address::from_public_key(&lock.owner, network), lock.amount))
                .collect();

            let accounts = context.cache.sub_mut::<AccountStateCache>()?;

            for (owner, amount) in refunds.iter() {
                match rollback {
                    false => credit(accounts, owner, *amount)?,
                    true => debit(accounts, owner, *amount)?,
                }
            }

            if !refunds.is_empty() {
                debug!(%height, refunds = refunds.len(), rollback, "expired secret locks");
            }

            Ok(())
        },
    )
}
