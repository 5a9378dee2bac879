use rayon::prelude::*;

use crate::{ConsumerInput, ConsumerResult, Consumer, Entity};

/// Fills in the entity hash of every block, block transaction and transaction
pub fn create_hash_calculator_consumer() -> Consumer {
    Box::new(|input: &mut ConsumerInput| {
        for element in input.blocks_mut() {
            element.entity_hash = element.block.hash();
            element.transaction_hashes = element
                .block
                .transactions
                .par_iter()
                .map(|tx| tx.hash())
                .collect();
        }

        input
            .transactions_mut()
            .par_iter_mut()
            .for_each(|element| element.entity_hash = element.transaction.hash());

        ConsumerResult::Continue
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        zero_hash, Amount, Block, Difficulty, EntityType, Height, InputSource, Key,
        NetworkIdentifier, Signature, Timestamp, Transaction,
    };

    fn transaction(deadline: u64) -> Transaction {
        Transaction {
            signer: Key([1; 32]),
            signature: Signature::default(),
            version: 1,
            network: NetworkIdentifier::TESTNET,
            entity_type: EntityType(1),
            max_fee: Amount(0),
            deadline: Timestamp(deadline),
            payload: vec![],
        }
    }

    #[test]
    fn calculates_block_and_transaction_hashes() {
        let block = Block {
            signer: Key([2; 32]),
            signature: Signature::default(),
            version: 1,
            network: NetworkIdentifier::TESTNET,
            height: Height(2),
            timestamp: Timestamp(0),
            difficulty: Difficulty(1),
            previous_block_hash: zero_hash(),
            transactions: vec![transaction(1), transaction(2)],
        };

        let expected_block = block.hash();
        let expected_txs: Vec<_> = block.transactions.iter().map(|x| x.hash()).collect();

        let mut input = ConsumerInput::from_blocks([block].into_iter().collect(), InputSource::Local);
        let mut consumer = create_hash_calculator_consumer();

        assert_eq!(consumer(&mut input), ConsumerResult::Continue);
        assert_eq!(input.blocks()[0].entity_hash, expected_block);
        assert_eq!(input.blocks()[0].transaction_hashes, expected_txs);
    }

    #[test]
    fn calculates_loose_transaction_hashes() {
        let txs = vec![transaction(1), transaction(2)];
        let expected: Vec<_> = txs.iter().map(|x| x.hash()).collect();

        let mut input = ConsumerInput::from_transactions(txs.into_iter().collect(), InputSource::Local);
        create_hash_calculator_consumer()(&mut input);

        let actual: Vec<_> = input.transactions().iter().map(|x| x.entity_hash).collect();
        assert_eq!(actual, expected);
    }
}
