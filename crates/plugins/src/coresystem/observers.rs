use ledgerflow_core::{
    AccountAddressNotification, AccountPublicKeyNotification, Address, Amount,
    BalanceDebitNotification, BalanceTransferNotification, BlockNotification, Height, Importance,
    Key, Observer, ObserverContext, ObserverError, SubCacheRead,
};
use tracing::debug;

use super::{
    credit, debit, AccountState, AccountStateCache, BlockDifficultyCache, BlockDifficultyInfo,
};

/// Creates the account on first reference; rolling back the reference that
/// created it removes the account again
fn register_account(
    address: Address,
    public_key: Option<Key>,
    context: &mut ObserverContext<'_>,
) -> Result<(), ObserverError> {
    let height = context.height;
    let rollback = context.is_rollback();
    let accounts = context.cache.sub_mut::<AccountStateCache>()?;

    if !rollback && !accounts.contains(&address) {
        accounts.insert(address, AccountState::new(address, height));
    }

    let account = accounts
        .get_mut(&address)
        .ok_or_else(|| ObserverError::Inconsistent(format!("unknown account {address}")))?;

    if !rollback {
        account.register_address(height);

        if let Some(key) = public_key {
            account.register_public_key(key, height);
        }

        return Ok(());
    }

    if public_key.is_some() {
        account.unregister_public_key(height);
    }

    if account.unregister_address(height) {
        accounts.remove(&address);
    }

    Ok(())
}

pub fn create_account_address_observer() -> Observer {
    Observer::new(
        "AccountAddressObserver",
        |n: &AccountAddressNotification, context| register_account(n.address, None, context),
    )
}

pub fn create_account_public_key_observer() -> Observer {
    Observer::new(
        "AccountPublicKeyObserver",
        |n: &AccountPublicKeyNotification, context| {
            let address = Address::from_public_key(&n.public_key, context.config.network);
            register_account(address, Some(n.public_key), context)
        },
    )
}

fn transfer(
    from: &Address,
    to: &Address,
    amount: Amount,
    context: &mut ObserverContext<'_>,
) -> Result<(), ObserverError> {
    let (from, to) = match context.is_commit() {
        true => (from, to),
        false => (to, from),
    };

    let accounts = context.cache.sub_mut::<AccountStateCache>()?;
    debit(accounts, from, amount)?;
    credit(accounts, to, amount)
}

pub fn create_balance_observer() -> [Observer; 2] {
    let debit_observer = Observer::new(
        "BalanceObserver",
        |n: &BalanceDebitNotification, context| {
            let sender = Address::from_public_key(&n.sender, context.config.network);
            let rollback = context.is_rollback();
            let accounts = context.cache.sub_mut::<AccountStateCache>()?;

            match rollback {
                false => debit(accounts, &sender, n.amount),
                true => credit(accounts, &sender, n.amount),
            }
        },
    );

    let transfer_observer = Observer::new(
        "BalanceObserver",
        |n: &BalanceTransferNotification, context| {
            let sender = Address::from_public_key(&n.sender, context.config.network);
            transfer(&sender, &n.recipient, n.amount, context)
        },
    );

    [debit_observer, transfer_observer]
}

/// Credits the block signer with the fees of the block's transactions
pub fn create_harvest_fee_observer() -> Observer {
    Observer::new("HarvestFeeObserver", |n: &BlockNotification, context| {
        let harvester = Address::from_public_key(&n.signer, context.config.network);
        let rollback = context.is_rollback();
        let accounts = context.cache.sub_mut::<AccountStateCache>()?;

        match rollback {
            false => credit(accounts, &harvester, n.total_fee),
            true => debit(accounts, &harvester, n.total_fee),
        }
    })
}

fn is_importance_height(height: Height, grouping: u64) -> bool {
    height == Height(1) || (grouping > 0 && height.get() % grouping == 0)
}

/// Snapshots every funded account's importance at grouping boundaries
///
/// Importance is the account balance at the boundary. Rollback drops the
/// snapshot taken at the rolled back height, restoring the previous history.
/// Snapshots older than the rollback window are trimmed in commit mode.
pub fn create_recalculate_importances_observer() -> Observer {
    Observer::new(
        "RecalculateImportancesObserver",
        |_: &BlockNotification, context| {
            let height = context.height;
            if !is_importance_height(height, context.config.importance_grouping) {
                return Ok(());
            }

            let rollback = context.is_rollback();
            let rollback_floor = height.saturating_sub(context.config.max_rollback_blocks);
            let accounts = context.cache.sub_mut::<AccountStateCache>()?;

            let candidates: Vec<_> = accounts
                .iter()
                .filter(|(_, account)| {
                    account.balance.get() > 0 || account.importance_height() == height
                })
                .map(|(address, _)| *address)
                .collect();

            for address in candidates.iter() {
                let Some(account) = accounts.get_mut(address) else {
                    continue;
                };

                match rollback {
                    false => {
                        let importance = Importance(account.balance.get());
                        account.push_importance(height, importance, rollback_floor);
                    }
                    true => account.pop_importance(height),
                }
            }

            debug!(%height, accounts = candidates.len(), rollback, "importances recalculated");

            Ok(())
        },
    )
}

pub fn create_block_difficulty_observer() -> Observer {
    Observer::new(
        "BlockDifficultyObserver",
        |n: &BlockNotification, context| {
            let height = context.height;
            let rollback = context.is_rollback();
            let difficulties = context.cache.sub_mut::<BlockDifficultyCache>()?;

            if rollback {
                difficulties.remove(&height);
                return Ok(());
            }

            let info = BlockDifficultyInfo {
                height,
                timestamp: n.timestamp,
                difficulty: n.difficulty,
            };

            difficulties.insert(height, info);

            Ok(())
        },
    )
}

/// Removes difficulty infos no longer reachable by a rollback
///
/// Runs in commit mode every `block_pruning_interval` blocks and keeps
/// `max_difficulty_blocks` infos beyond the rollback window.
pub fn create_block_difficulty_pruning_observer() -> Observer {
    Observer::new(
        "BlockDifficultyPruningObserver",
        |_: &BlockNotification, context| {
            let config = context.config;
            let height = context.height;

            if context.is_rollback()
                || config.block_pruning_interval == 0
                || height.get() % config.block_pruning_interval != 0
            {
                return Ok(());
            }

            let retained = config.max_rollback_blocks + config.max_difficulty_blocks;
            let cutoff = height.saturating_sub(retained);

            let difficulties = context.cache.sub_mut::<BlockDifficultyCache>()?;
            let pruned: Vec<_> = difficulties
                .range(..cutoff)
                .map(|(height, _)| *height)
                .collect();

            for height in pruned.iter() {
                difficulties.remove(height);
            }

            debug!(%height, %cutoff, pruned = pruned.len(), "block difficulties pruned");

            Ok(())
        },
    )
}
