use ledgerflow_core::{
    Address, Amount, Difficulty, Height, Importance, Key, NetworkIdentifier, ObserverError,
    SubCache, SubCacheDelta, SubCacheRead, Timestamp,
};
use serde::{Deserialize, Serialize};

/// Number of importance snapshots kept per account at or below the
/// rollback window
pub const IMPORTANCE_HISTORY_SIZE: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportanceSnapshot {
    pub height: Height,
    pub importance: Importance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub address: Address,
    pub address_height: Height,

    /// References to the address at `address_height`
    pub address_registrations: u32,

    pub public_key: Option<Key>,
    pub public_key_height: Height,
    pub public_key_registrations: u32,

    pub balance: Amount,

    /// Most recent snapshot last
    pub importances: Vec<ImportanceSnapshot>,
}

impl AccountState {
    pub fn new(address: Address, height: Height) -> Self {
        Self {
            address,
            address_height: height,
            address_registrations: 0,
            public_key: None,
            public_key_height: Height(0),
            public_key_registrations: 0,
            balance: Amount(0),
            importances: vec![],
        }
    }

    pub fn register_address(&mut self, height: Height) {
        if self.address_height == height {
            self.address_registrations += 1;
        }
    }

    /// Undoes [`Self::register_address`]; true when the account was created
    /// by the undone reference
    pub fn unregister_address(&mut self, height: Height) -> bool {
        if self.address_height != height {
            return false;
        }

        self.address_registrations = self.address_registrations.saturating_sub(1);
        self.address_registrations == 0
    }

    pub fn register_public_key(&mut self, key: Key, height: Height) {
        match self.public_key {
            None => {
                self.public_key = Some(key);
                self.public_key_height = height;
                self.public_key_registrations = 1;
            }
            Some(_) if self.public_key_height == height => self.public_key_registrations += 1,
            Some(_) => (),
        }
    }

    pub fn unregister_public_key(&mut self, height: Height) {
        if self.public_key.is_none() || self.public_key_height != height {
            return;
        }

        self.public_key_registrations = self.public_key_registrations.saturating_sub(1);

        if self.public_key_registrations == 0 {
            self.public_key = None;
            self.public_key_height = Height(0);
        }
    }

    pub fn importance(&self) -> Importance {
        self.importances
            .last()
            .map(|x| x.importance)
            .unwrap_or_default()
    }

    pub fn importance_height(&self) -> Height {
        self.importances.last().map(|x| x.height).unwrap_or_default()
    }

    /// Records the importance computed at `height`
    ///
    /// `rollback_floor` is the lowest height a rollback can return to. Every
    /// snapshot above it is kept, so popping them restores the history as it
    /// was; below it only the [`IMPORTANCE_HISTORY_SIZE`] most recent stay.
    pub fn push_importance(
        &mut self,
        height: Height,
        importance: Importance,
        rollback_floor: Height,
    ) {
        self.importances.push(ImportanceSnapshot { height, importance });

        let settled = self
            .importances
            .iter()
            .take_while(|x| x.height <= rollback_floor)
            .count();

        let excess = settled.saturating_sub(IMPORTANCE_HISTORY_SIZE);
        self.importances.drain(..excess);
    }

    /// Drops the snapshot taken at `height`, if it is the most recent one
    pub fn pop_importance(&mut self, height: Height) {
        if self.importance_height() == height {
            self.importances.pop();
        }
    }
}

/// Accounts indexed by address
pub struct AccountStateCache;

impl SubCache for AccountStateCache {
    const NAME: &'static str = "AccountStateCache";

    type Key = Address;
    type Value = AccountState;
}

pub fn find_account<'a, R>(
    accounts: &'a R,
    key: &Key,
    network: NetworkIdentifier,
) -> Option<&'a AccountState>
where
    R: SubCacheRead<AccountStateCache>,
{
    accounts.get(&Address::from_public_key(key, network))
}

pub fn balance_of<R>(accounts: &R, address: &Address) -> Amount
where
    R: SubCacheRead<AccountStateCache>,
{
    accounts
        .get(address)
        .map(|x| x.balance)
        .unwrap_or_default()
}

fn account_mut<'a>(
    accounts: &'a mut SubCacheDelta<AccountStateCache>,
    address: &Address,
) -> Result<&'a mut AccountState, ObserverError> {
    accounts
        .get_mut(address)
        .ok_or_else(|| ObserverError::Inconsistent(format!("unknown account {address}")))
}

pub fn credit(
    accounts: &mut SubCacheDelta<AccountStateCache>,
    address: &Address,
    amount: Amount,
) -> Result<(), ObserverError> {
    if amount == Amount(0) {
        return Ok(());
    }

    let account = account_mut(accounts, address)?;

    account.balance = account
        .balance
        .checked_add(amount)
        .ok_or_else(|| ObserverError::Inconsistent(format!("balance overflow for {address}")))?;

    Ok(())
}

pub fn debit(
    accounts: &mut SubCacheDelta<AccountStateCache>,
    address: &Address,
    amount: Amount,
) -> Result<(), ObserverError> {
    if amount == Amount(0) {
        return Ok(());
    }

    let account = account_mut(accounts, address)?;

    account.balance = account.balance.checked_sub(amount).ok_or_else(|| {
        ObserverError::Inconsistent(format!("insufficient balance for {address}"))
    })?;

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDifficultyInfo {
    pub height: Height,
    pub timestamp: Timestamp,
    pub difficulty: Difficulty,
}

/// Difficulty and time of recent blocks, indexed by height
pub struct BlockDifficultyCache;

impl SubCache for BlockDifficultyCache {
    const NAME: &'static str = "BlockDifficultyCache";

    type Key = Height;
    type Value = BlockDifficultyInfo;
}
