use ledgerflow_core::{
    extract_block_entity_infos, observe_block, Address, Amount, BalanceDebitNotification,
    BalanceTransferNotification, BlockElement, CacheError, Height, Key, Notifications,
    NotifyMode, ObserverError, PayloadError, PluginRegistry, StateCache,
};
use thiserror::Error;
use tracing::info;

use super::{AccountState, AccountStateCache};

#[derive(Debug, Error)]
pub enum NemesisError {
    #[error("nemesis block must be at height 1, found {0}")]
    WrongHeight(Height),

    #[error("nemesis block signed by {0} instead of the configured nemesis account")]
    WrongSigner(Key),

    #[error("state already past the nemesis block (height {0})")]
    AlreadyLoaded(Height),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Observer(#[from] ObserverError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Everything the nemesis account gives away in the nemesis block
fn nemesis_outflow(
    registry: &PluginRegistry,
    element: &BlockElement,
) -> Result<Amount, NemesisError> {
    let nemesis = element.block.signer;
    let mut total = Amount(0);

    for info in extract_block_entity_infos(element) {
        let mut notifications = Notifications::new();
        registry.publisher().publish(&info, &mut notifications)?;

        for notification in notifications.iter() {
            let any = notification.as_any();

            let spent = if let Some(x) = any.downcast_ref::<BalanceDebitNotification>() {
                (x.sender == nemesis).then_some(x.amount)
            } else if let Some(x) = any.downcast_ref::<BalanceTransferNotification>() {
                (x.sender == nemesis).then_some(x.amount)
            } else {
                None
            };

            if let Some(amount) = spent {
                total = total.checked_add(amount).ok_or_else(|| {
                    ObserverError::Inconsistent("nemesis outflow overflows".into())
                })?;
            }
        }
    }

    Ok(total)
}

/// Applies the nemesis block to an empty state cache
///
/// The nemesis account starts out holding exactly what the nemesis block
/// distributes, then the block is observed without validation and committed
/// at height 1. The element's hashes must already be computed.
pub fn load_nemesis_block(
    registry: &PluginRegistry,
    cache: &StateCache,
    element: &BlockElement,
) -> Result<(), NemesisError> {
    let config = registry.config();
    let block = &element.block;

    if block.height != Height(1) {
        return Err(NemesisError::WrongHeight(block.height));
    }

    if block.signer != config.nemesis_public_key {
        return Err(NemesisError::WrongSigner(block.signer));
    }

    if cache.height() != Height(0) {
        return Err(NemesisError::AlreadyLoaded(cache.height()));
    }

    let funding = nemesis_outflow(registry, element)?;
    let address = Address::from_public_key(&block.signer, config.network);

    let mut delta = cache.create_delta()?;

    let mut account = AccountState::new(address, Height(1));
    account.balance = funding;
    delta.sub_mut::<AccountStateCache>()?.insert(address, account);

    if let Err(err) = observe_block(registry, element, NotifyMode::Commit, &mut delta) {
        cache.rollback(delta);
        return Err(err.into());
    }

    cache.commit(delta, Height(1));

    info!(%funding, transactions = block.transactions.len(), "nemesis block loaded");

    Ok(())
}
