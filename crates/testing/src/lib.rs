//! Deterministic accounts, entities and chains for ledgerflow tests.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use rand::Rng;

use ledgerflow_core::*;
use ledgerflow_plugins::{
    lock::{
        SecretLockPayload, SecretProofPayload, SECRET_LOCK_ENTITY_TYPE, SECRET_PROOF_ENTITY_TYPE,
    },
    register_all,
    transfer::{TransferPayload, TRANSFER_ENTITY_TYPE},
};

pub mod blocks;
pub mod fixtures;

pub const TEST_NETWORK: NetworkIdentifier = NetworkIdentifier::TESTNET;

pub const NEMESIS_KEY: Key = Key([0xEE; 32]);

/// Milliseconds between consecutive test blocks
pub const BLOCK_INTERVAL: u64 = 15_000;

/// Timestamp of the nemesis block
pub const NEMESIS_TIME: u64 = 1_000_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TestAccount {
    Alice,
    Bob,
    Carol,
    Dave,
    Eve,
    Custom(u8),
}

impl TestAccount {
    pub fn everyone() -> Vec<Self> {
        vec![
            TestAccount::Alice,
            TestAccount::Bob,
            TestAccount::Carol,
            TestAccount::Dave,
            TestAccount::Eve,
        ]
    }

    pub fn ordinal(&self) -> u8 {
        match self {
            TestAccount::Alice => 1,
            TestAccount::Bob => 2,
            TestAccount::Carol => 3,
            TestAccount::Dave => 4,
            TestAccount::Eve => 5,
            TestAccount::Custom(x) => *x,
        }
    }

    pub fn key(&self) -> Key {
        let seed = [b"ledgerflow-test-account".as_slice(), [self.ordinal()].as_slice()].concat();
        Key(*blake2b_256(&seed))
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.key(), TEST_NETWORK)
    }
}

/// Network time under test control
#[derive(Clone, Debug)]
pub struct TestClock(Arc<AtomicU64>);

impl TestClock {
    pub fn at(millis: u64) -> Self {
        Self(Arc::new(AtomicU64::new(millis)))
    }

    pub fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::SeqCst);
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(self.0.load(Ordering::SeqCst))
    }

    pub fn supplier(&self) -> TimeSupplier {
        let clock = self.clone();
        Arc::new(move || clock.now())
    }
}

pub fn random_key() -> Key {
    Key(rand::rng().random())
}

pub fn random_hash() -> Hash256 {
    Hash256::new(rand::rng().random())
}

pub fn test_config() -> BlockChainConfiguration {
    let mut config = BlockChainConfiguration::new(TEST_NETWORK, NEMESIS_KEY);
    config.min_harvester_balance = Amount(1_000);
    config
}

/// Registry with every shipped plugin, frozen
pub fn test_registry(config: BlockChainConfiguration) -> Arc<PluginRegistry> {
    let mut manager = PluginManager::new(config);
    register_all(&mut manager).expect("shipped plugins register cleanly");
    Arc::new(manager.freeze())
}

fn transaction(
    signer: Key,
    entity_type: EntityType,
    fee: u64,
    deadline: u64,
    payload: Vec<u8>,
) -> Transaction {
    Transaction {
        signer,
        signature: Signature::default(),
        version: 1,
        network: TEST_NETWORK,
        entity_type,
        max_fee: Amount(fee),
        deadline: Timestamp(deadline),
        payload,
    }
}

pub fn transfer_tx(
    from: &TestAccount,
    to: &TestAccount,
    amount: u64,
    fee: u64,
    deadline: u64,
) -> Transaction {
    transfer_from_key(from.key(), to.address(), amount, fee, deadline)
}

pub fn transfer_from_key(
    signer: Key,
    recipient: Address,
    amount: u64,
    fee: u64,
    deadline: u64,
) -> Transaction {
    let payload = TransferPayload {
        recipient,
        amount: Amount(amount),
        message: vec![],
    };

    transaction(signer, TRANSFER_ENTITY_TYPE, fee, deadline, payload.encode())
}

pub fn secret_lock_tx(
    owner: &TestAccount,
    recipient: &TestAccount,
    proof: &[u8],
    amount: u64,
    duration: u64,
    deadline: u64,
) -> Transaction {
    let payload = SecretLockPayload {
        recipient: recipient.address(),
        secret: blake2b_256(proof),
        amount: Amount(amount),
        duration: BlockDuration(duration),
    };

    transaction(
        owner.key(),
        SECRET_LOCK_ENTITY_TYPE,
        0,
        deadline,
        encode_payload(&payload),
    )
}

pub fn secret_proof_tx(
    signer: &TestAccount,
    recipient: &TestAccount,
    proof: &[u8],
    deadline: u64,
) -> Transaction {
    let payload = SecretProofPayload {
        recipient: recipient.address(),
        secret: blake2b_256(proof),
        proof: proof.to_vec(),
    };

    transaction(
        signer.key(),
        SECRET_PROOF_ENTITY_TYPE,
        0,
        deadline,
        encode_payload(&payload),
    )
}

/// Transfers with random recipients, funded by `from`
pub fn random_transfers(from: &TestAccount, count: usize, deadline: u64) -> Vec<Transaction> {
    let mut rng = rand::rng();

    (0..count)
        .map(|_| {
            let recipient = Address::from_public_key(&random_key(), TEST_NETWORK);
            let amount = rng.random_range(1..100);
            transfer_from_key(from.key(), recipient, amount, 1, deadline)
        })
        .collect()
}
