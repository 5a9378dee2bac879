use ledgerflow_core::{
    zero_hash, Amount, Block, Difficulty, Entity, Height, Signature, Timestamp, Transaction,
};

use crate::{
    transfer_from_key, TestAccount, BLOCK_INTERVAL, NEMESIS_KEY, NEMESIS_TIME, TEST_NETWORK,
};

pub const DEFAULT_DIFFICULTY: Difficulty = Difficulty(100_000);

/// Nemesis block distributing `allocations` from the nemesis account
pub fn make_nemesis_block(allocations: &[(TestAccount, u64)]) -> Block {
    let transactions = allocations
        .iter()
        .map(|(account, amount)| {
            transfer_from_key(NEMESIS_KEY, account.address(), *amount, 0, NEMESIS_TIME)
        })
        .collect();

    Block {
        signer: NEMESIS_KEY,
        signature: Signature::default(),
        version: 1,
        network: TEST_NETWORK,
        height: Height(1),
        timestamp: Timestamp(NEMESIS_TIME),
        difficulty: DEFAULT_DIFFICULTY,
        previous_block_hash: zero_hash(),
        transactions,
    }
}

pub fn block_time(height: u64) -> u64 {
    NEMESIS_TIME + (height - 1) * BLOCK_INTERVAL
}

/// Builds a chain of linked blocks on top of a nemesis block
#[derive(Clone, Debug)]
pub struct ChainBuilder {
    blocks: Vec<Block>,
}

impl ChainBuilder {
    pub fn new(nemesis: Block) -> Self {
        Self {
            blocks: vec![nemesis],
        }
    }

    pub fn tip(&self) -> &Block {
        // never empty, the nemesis block is always there
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> Height {
        self.tip().height
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Blocks above `height`, in chain order
    pub fn blocks_after(&self, height: Height) -> Vec<Block> {
        self.blocks
            .iter()
            .filter(|x| x.height > height)
            .cloned()
            .collect()
    }

    /// Appends a block and returns a copy of it
    pub fn push(&mut self, harvester: &TestAccount, transactions: Vec<Transaction>) -> Block {
        self.push_with_difficulty(harvester, transactions, DEFAULT_DIFFICULTY)
    }

    pub fn push_with_difficulty(
        &mut self,
        harvester: &TestAccount,
        transactions: Vec<Transaction>,
        difficulty: Difficulty,
    ) -> Block {
        let parent = self.tip();
        let height = parent.height.next();

        let block = Block {
            signer: harvester.key(),
            signature: Signature::default(),
            version: 1,
            network: TEST_NETWORK,
            height,
            timestamp: Timestamp(block_time(height.get())),
            difficulty,
            previous_block_hash: parent.hash(),
            transactions,
        };

        self.blocks.push(block.clone());
        block
    }

    /// Shares this chain up to `height`, so that new blocks build a fork
    pub fn fork_at(&self, height: Height) -> Self {
        let blocks = self
            .blocks
            .iter()
            .take_while(|x| x.height <= height)
            .cloned()
            .collect();

        Self { blocks }
    }

    /// Total fees paid in the chain after the nemesis block
    pub fn fees_after_nemesis(&self) -> Amount {
        self.blocks.iter().skip(1).map(|x| x.total_fee()).sum()
    }
}
