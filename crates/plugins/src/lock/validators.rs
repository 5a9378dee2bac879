use ledgerflow_core::{
    blake2b_256, check, BlockDuration, FailureCode, StatefulValidator, StatelessValidator,
    SubCacheRead,
};

use super::{
    LockStatus, ProofPublicationNotification, ProofSecretNotification, SecretLockDurationNotification,
    SecretLockInfoCache, SecretLockNotification, LOCK_FACILITY,
};

pub const FAILURE_LOCK_INVALID_DURATION: FailureCode =
    FailureCode::new(LOCK_FACILITY, 0x0001, "Invalid_Secret_Lock_Duration");

pub const FAILURE_LOCK_SECRET_MISMATCH: FailureCode =
    FailureCode::new(LOCK_FACILITY, 0x0002, "Secret_Mismatch");

pub const FAILURE_LOCK_HASH_EXISTS: FailureCode =
    FailureCode::new(LOCK_FACILITY, 0x0003, "Hash_Exists");

pub const FAILURE_LOCK_UNKNOWN_SECRET: FailureCode =
    FailureCode::new(LOCK_FACILITY, 0x0004, "Unknown_Secret");

pub const FAILURE_LOCK_INACTIVE_SECRET: FailureCode =
    FailureCode::new(LOCK_FACILITY, 0x0005, "Inactive_Secret");

pub const FAILURE_LOCK_INVALID_RECIPIENT: FailureCode =
    FailureCode::new(LOCK_FACILITY, 0x0006, "Invalid_Recipient");

pub fn create_secret_lock_duration_validator() -> StatelessValidator {
    StatelessValidator::new(
        "SecretLockDurationValidator",
        |n: &SecretLockDurationNotification, context| {
            check(
                n.duration != BlockDuration(0)
                    && n.duration <= context.config.max_secret_lock_duration,
                FAILURE_LOCK_INVALID_DURATION,
            )
        },
    )
}

/// The proof must hash to the secret
pub fn create_proof_secret_validator() -> StatelessValidator {
    StatelessValidator::new(
        "ProofSecretValidator",
        |n: &ProofSecretNotification, _| {
            check(
                !n.proof.is_empty() && blake2b_256(&n.proof) == n.secret,
                FAILURE_LOCK_SECRET_MISMATCH,
            )
        },
    )
}

pub fn create_secret_lock_cache_unique_validator() -> StatefulValidator {
    StatefulValidator::new(
        "SecretLockCacheUniqueValidator",
        |n: &SecretLockNotification, context| {
            let exists = context
                .cache
                .sub::<SecretLockInfoCache>()
                .map(|x| x.contains(&n.secret))
                .unwrap_or_default();

            check(!exists, FAILURE_LOCK_HASH_EXISTS)
        },
    )
}

/// The lock must exist, be unused, not be expired and name the recipient
pub fn create_proof_validator() -> StatefulValidator {
    StatefulValidator::new(
        "ProofValidator",
        |n: &ProofPublicationNotification, context| {
            let Ok(locks) = context.cache.sub::<SecretLockInfoCache>() else {
                return FAILURE_LOCK_UNKNOWN_SECRET.into();
            };

            let Some(lock) = locks.get(&n.secret) else {
                return FAILURE_LOCK_UNKNOWN_SECRET.into();
            };

            if lock.status != LockStatus::Unused || lock.expiry <= context.height {
                return FAILURE_LOCK_INACTIVE_SECRET.into();
            }

            check(lock.recipient == n.recipient, FAILURE_LOCK_INVALID_RECIPIENT)
        },
    )
}
