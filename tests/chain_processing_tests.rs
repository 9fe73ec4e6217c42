//! End-to-end block processing: chain extension, orphans and reorganisation

mod common;

use chain_rules::*;
use common::*;

fn processor() -> BlockProcessor {
    BlockProcessor::in_memory(&test_config()).unwrap()
}

fn genesis(processor: &BlockProcessor) -> Block {
    processor.validator().consensus().genesis_block()
}

#[test]
fn test_unknown_parent_becomes_orphan() {
    let processor = processor();
    let consensus = processor.validator().consensus().clone();
    let mut block = next_block(&consensus, &genesis(&processor), [1; 20], vec![], 0);
    block.previous_block_hash = [0x77; 32];
    let block = mine(block);

    assert_eq!(
        processor.process_new_block(block.clone()).unwrap(),
        ProcessedBlockStatus::Orphan
    );
    assert!(processor.chain().is_orphan(&block.hash()));
    assert_eq!(processor.chain().main_chain_height(), 0);
    assert_eq!(
        processor.process_new_block(block).unwrap(),
        ProcessedBlockStatus::AlreadyStored
    );
}

#[test]
fn test_invalid_block_leaves_chain_untouched() {
    let processor = processor();
    let consensus = processor.validator().consensus().clone();
    let mut block = next_block(&consensus, &genesis(&processor), [1; 20], vec![], 0);
    block.block_height = 2;
    let block = mine(block);

    assert_eq!(
        processor.process_new_block(block.clone()).unwrap(),
        ProcessedBlockStatus::Invalid
    );
    assert!(!processor.storage().has_block(&block.hash()).unwrap());
    assert_eq!(processor.chain().main_chain_height(), 0);
}

#[test]
fn test_spend_matured_coinbase_across_blocks() {
    let processor = processor();
    let consensus = processor.validator().consensus().clone();
    let signer = Signer::new();
    let miner = key(1);
    let fee = consensus.minimum_transaction_fee;

    let first = next_block(&consensus, &genesis(&processor), signer.address(&miner), vec![], 0);
    let second = next_block(&consensus, &first, [2; 20], vec![], 0);
    let third = next_block(&consensus, &second, [2; 20], vec![], 0);

    // Connecting block 4 sees the chain at height 3: the reward has depth 2
    let reward = &first.transactions[0];
    let tx = spend(&signer, reward, 0, &miner, [3; 20], consensus.block_reward - fee);
    let fourth = next_block(&consensus, &third, [4; 20], vec![tx.clone()], fee);

    for block in [&first, &second, &third, &fourth] {
        assert_eq!(
            processor.process_new_block(block.clone()).unwrap(),
            ProcessedBlockStatus::Valid
        );
    }

    let utxo = processor.utxo_set();
    assert!(!utxo.is_unspent(&reward.hash(), 0).unwrap());
    assert!(utxo.is_unspent(&tx.hash(), 0).unwrap());
    assert_eq!(processor.chain().main_chain_height(), 4);
}

#[test]
fn test_immature_spend_is_marked_invalid() {
    let processor = processor();
    let consensus = processor.validator().consensus().clone();
    let signer = Signer::new();
    let miner = key(1);
    let fee = consensus.minimum_transaction_fee;

    let first = next_block(&consensus, &genesis(&processor), signer.address(&miner), vec![], 0);
    processor.process_new_block(first.clone()).unwrap();

    let tx = spend(&signer, &first.transactions[0], 0, &miner, [3; 20], consensus.block_reward - fee);
    let second = next_block(&consensus, &first, [2; 20], vec![tx], fee);
    assert_eq!(
        processor.process_new_block(second.clone()).unwrap(),
        ProcessedBlockStatus::Invalid
    );

    let info = processor.storage().find_block_info(&second.hash()).unwrap().unwrap();
    assert!(!info.valid);
    assert_eq!(processor.chain().main_chain_height(), 1);
    assert!(processor
        .utxo_set()
        .is_unspent(&first.transactions[0].hash(), 0)
        .unwrap());
}

#[test]
fn test_orphan_chain_resolves_recursively() {
    let processor = processor();
    let consensus = processor.validator().consensus().clone();
    let first = next_block(&consensus, &genesis(&processor), [1; 20], vec![], 0);
    let second = next_block(&consensus, &first, [2; 20], vec![], 0);
    let third = next_block(&consensus, &second, [3; 20], vec![], 0);

    assert_eq!(
        processor.process_new_block(third.clone()).unwrap(),
        ProcessedBlockStatus::Orphan
    );
    assert_eq!(
        processor.process_new_block(second.clone()).unwrap(),
        ProcessedBlockStatus::Orphan
    );
    assert_eq!(processor.chain().orphan_count(), 2);

    assert_eq!(
        processor.process_new_block(first).unwrap(),
        ProcessedBlockStatus::Valid
    );
    assert_eq!(processor.chain().orphan_count(), 0);
    assert_eq!(processor.chain().main_chain_height(), 3);
    assert_eq!(processor.chain().main_chain_top().hash, third.hash());
}

#[test]
fn test_reorganization_restores_spent_outputs() {
    let processor = processor();
    let consensus = processor.validator().consensus().clone();
    let signer = Signer::new();
    let miner = key(1);
    let fee = consensus.minimum_transaction_fee;

    // Main chain: genesis <- a1 <- a2 <- a3 <- a4 spending a1's reward
    let a1 = next_block(&consensus, &genesis(&processor), signer.address(&miner), vec![], 0);
    let a2 = next_block(&consensus, &a1, [2; 20], vec![], 0);
    let a3 = next_block(&consensus, &a2, [3; 20], vec![], 0);
    let tx = spend(&signer, &a1.transactions[0], 0, &miner, [3; 20], consensus.block_reward - fee);
    let a4 = next_block(&consensus, &a3, [4; 20], vec![tx.clone()], fee);
    for block in [&a1, &a2, &a3, &a4] {
        assert_eq!(
            processor.process_new_block(block.clone()).unwrap(),
            ProcessedBlockStatus::Valid
        );
    }
    assert!(processor.utxo_set().is_unspent(&tx.hash(), 0).unwrap());

    // Competing branch from a3, one block longer
    let b4 = next_block(&consensus, &a3, [5; 20], vec![], 0);
    let b5 = next_block(&consensus, &b4, [6; 20], vec![], 0);
    processor.process_new_block(b4).unwrap();
    assert_eq!(
        processor.process_new_block(b5.clone()).unwrap(),
        ProcessedBlockStatus::Valid
    );

    let chain = processor.chain();
    assert_eq!(chain.main_chain_height(), 5);
    assert_eq!(chain.main_chain_top().hash, b5.hash());
    let utxo = processor.utxo_set();
    assert!(!utxo.is_unspent(&tx.hash(), 0).unwrap());
    assert!(utxo.is_unspent(&a1.transactions[0].hash(), 0).unwrap());
    assert!(!utxo.is_unspent(&a4.transactions[0].hash(), 0).unwrap());
}

#[test]
fn test_failed_reorganization_keeps_old_chain() {
    let processor = processor();
    let consensus = processor.validator().consensus().clone();

    let a1 = next_block(&consensus, &genesis(&processor), [1; 20], vec![], 0);
    processor.process_new_block(a1.clone()).unwrap();

    // Branch whose second block overpays its coinbase
    let b1 = next_block(&consensus, &genesis(&processor), [2; 20], vec![], 0);
    let b2 = next_block(&consensus, &b1, [3; 20], vec![], 1);

    let b1_status = processor.process_new_block(b1.clone()).unwrap();
    assert_eq!(b1_status, ProcessedBlockStatus::Valid);
    let top_before = processor.chain().main_chain_top();

    assert_eq!(
        processor.process_new_block(b2.clone()).unwrap(),
        ProcessedBlockStatus::Invalid
    );
    assert_eq!(processor.chain().main_chain_top(), top_before);
    assert!(!processor.storage().find_block_info(&b2.hash()).unwrap().unwrap().valid);
}
