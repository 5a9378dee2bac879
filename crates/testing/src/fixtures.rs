//! Ready-made node state for tests.

use std::sync::Arc;

use ledgerflow_core::{
    block_element_of, Amount, Block, BlockChainConfiguration, BlockStorage, MemoryBlockStorage,
    PluginRegistry, StateCache, SubCacheRead,
};
use ledgerflow_plugins::coresystem::{balance_of, load_nemesis_block, AccountStateCache};

use crate::{blocks::make_nemesis_block, test_config, test_registry, TestAccount};

/// Every test account starts with this balance
pub const INITIAL_BALANCE: u64 = 1_000_000;

/// Every test account holding [`INITIAL_BALANCE`]
pub fn funded_allocations() -> Vec<(TestAccount, u64)> {
    TestAccount::everyone()
        .into_iter()
        .map(|x| (x, INITIAL_BALANCE))
        .collect()
}

pub struct Fixture {
    pub registry: Arc<PluginRegistry>,
    pub cache: StateCache,
    pub storage: Arc<MemoryBlockStorage>,
    pub nemesis: Block,
}

impl Fixture {
    /// Nemesis-loaded state where every test account holds [`INITIAL_BALANCE`]
    pub fn funded() -> Self {
        Self::with_allocations(&funded_allocations())
    }

    pub fn with_allocations(allocations: &[(TestAccount, u64)]) -> Self {
        Self::with_config(test_config(), allocations)
    }

    pub fn with_config(
        config: BlockChainConfiguration,
        allocations: &[(TestAccount, u64)],
    ) -> Self {
        let registry = test_registry(config);
        let cache = registry.create_cache();
        let storage = Arc::new(MemoryBlockStorage::new());

        let nemesis = make_nemesis_block(allocations);
        let element = block_element_of(nemesis.clone());

        load_nemesis_block(&registry, &cache, &element).expect("nemesis block loads");
        storage
            .save_blocks(std::slice::from_ref(&nemesis))
            .expect("memory storage accepts nemesis");

        Self {
            registry,
            cache,
            storage,
            nemesis,
        }
    }

    pub fn balance(&self, account: &TestAccount) -> Amount {
        let view = self.cache.create_view();

        view.sub::<AccountStateCache>()
            .map(|x| balance_of(x, &account.address()))
            .unwrap_or_default()
    }

    pub fn has_account(&self, account: &TestAccount) -> bool {
        let view = self.cache.create_view();

        view.sub::<AccountStateCache>()
            .map(|x| x.contains(&account.address()))
            .unwrap_or_default()
    }
}
