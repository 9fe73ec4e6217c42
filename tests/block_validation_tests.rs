//! Block validator scenarios against an in-memory store

mod common;

use std::sync::Arc;

use chain_rules::*;
use common::*;

struct Node {
    validator: BlockValidator,
    storage: Arc<MemoryBlockStore>,
    genesis: Block,
}

fn node() -> Node {
    let config = test_config();
    let genesis = config.consensus.genesis_block();
    let storage = Arc::new(MemoryBlockStore::with_genesis(&genesis).unwrap());
    let validator = BlockValidator::new(
        Arc::new(config.consensus),
        Arc::new(Signer::new()),
        config.network_id,
        storage.clone(),
    );
    Node {
        validator,
        storage,
        genesis,
    }
}

#[test]
fn test_height_one_block_on_genesis_is_valid() {
    let node = node();
    let block = next_block(node.validator.consensus(), &node.genesis, [1; 20], vec![], 0);

    let incoming = node.validator.check_incoming_block_valid(&block).unwrap();
    assert_eq!(incoming.status(), ValidationStatus::Valid);
    assert!(incoming.fail_marker().is_none());

    let connect = node
        .validator
        .check_connect_block_valid(&block, &MemoryUtxoSet::new())
        .unwrap();
    assert_eq!(connect.status(), ValidationStatus::Valid);
}

#[test]
fn test_empty_transaction_reports_nested_rule() {
    let node = node();
    let block = next_block(
        node.validator.consensus(),
        &node.genesis,
        [1; 20],
        vec![Transaction::new(vec![], vec![])],
        0,
    );

    let result = node.validator.check_incoming_block_valid(&block).unwrap();
    assert_eq!(result.status(), ValidationStatus::Invalid);
    let marker = result.fail_marker().unwrap();
    assert_eq!(marker.rule, RuleId::NonContextualTransactionCheckBlk);
    assert_eq!(marker.innermost(), RuleId::InputOutputNotEmptyTx);
    assert_eq!(
        marker.to_string(),
        "NonContextualTransactionCheckBlkRule -> InputOutputNotEmptyTxRule"
    );
}

#[test]
fn test_height_two_on_genesis_is_invalid() {
    let node = node();
    let consensus = node.validator.consensus();
    let mut block = next_block(consensus, &node.genesis, [1; 20], vec![], 0);
    block.block_height = 2;
    block.transactions[0].coinbase_height = Some(2);
    let block = reseal(consensus, block);

    let result = node.validator.check_incoming_block_valid(&block).unwrap();
    assert_eq!(result.status(), ValidationStatus::Invalid);
    assert_eq!(result.failed_rule(), Some(RuleId::ValidBlockHeightBlk));
}

#[test]
fn test_unknown_parent_is_routed_not_rejected() {
    let node = node();
    let consensus = node.validator.consensus();
    let mut block = next_block(consensus, &node.genesis, [1; 20], vec![], 0);
    block.previous_block_hash = [0x5a; 32];
    let block = mine(block);

    let result = node.validator.check_incoming_block_valid(&block).unwrap();
    assert!(result.is_unknown_parent());
    assert!(result.fault().is_none());
}

#[test]
fn test_first_failing_rule_is_reported() {
    let node = node();
    let consensus = node.validator.consensus();
    // Wrong network and wrong height: the network rule comes first
    let mut block = next_block(consensus, &node.genesis, [1; 20], vec![], 0);
    block.network_id = 1;
    block.block_height = 7;
    let block = mine(block);

    let result = node.validator.check_incoming_block_valid(&block).unwrap();
    assert_eq!(result.failed_rule(), Some(RuleId::NetworkIdBlk));
}

#[test]
fn test_validation_is_deterministic() {
    let node = node();
    let block = next_block(
        node.validator.consensus(),
        &node.genesis,
        [1; 20],
        vec![Transaction::new(vec![], vec![])],
        0,
    );
    let first = node.validator.check_incoming_block_valid(&block).unwrap();
    let second = node.validator.check_incoming_block_valid(&block).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_oversized_block() {
    let mut config = test_config();
    config.consensus.max_block_size = 64;
    let genesis = config.consensus.genesis_block();
    let storage = Arc::new(MemoryBlockStore::with_genesis(&genesis).unwrap());
    let validator = BlockValidator::new(
        Arc::new(config.consensus.clone()),
        Arc::new(Signer::new()),
        config.network_id,
        storage,
    );

    let block = next_block(&config.consensus, &genesis, [1; 20], vec![], 0);
    let result = validator.check_incoming_block_valid(&block).unwrap();
    assert_eq!(result.failed_rule(), Some(RuleId::MaxSizeBlk));
}

#[test]
fn test_connect_with_signed_spend() {
    let node = node();
    let consensus = node.validator.consensus().clone();
    let signer = Signer::new();
    let owner = key(7);

    let funding = Transaction::coinbase(
        Output {
            address: signer.address(&owner),
            amount: 10_000,
        },
        0,
    );
    let chain = MemoryUtxoSet::new();
    chain.add_transaction_outputs(&funding, 0);

    let fee = consensus.minimum_transaction_fee;
    let tx = spend(&signer, &funding, 0, &owner, [9; 20], 10_000 - fee);

    // Block 3 sees the chain at height 2, exactly the maturity depth
    let mut parent = node.genesis.clone();
    parent.block_height = 2;
    let block = next_block(&consensus, &parent, [1; 20], vec![tx.clone()], fee);
    let result = node.validator.check_connect_block_valid(&block, &chain).unwrap();
    assert!(result.is_valid(), "{:?}", result.fail_marker());

    // Block 2 sees height 1: the coinbase is one block short of mature
    parent.block_height = 1;
    let block = next_block(&consensus, &parent, [1; 20], vec![tx], fee);
    let result = node.validator.check_connect_block_valid(&block, &chain).unwrap();
    assert_eq!(
        result.fail_marker().map(FailMarker::chain),
        Some(vec![RuleId::ContextualTransactionCheckBlk, RuleId::MaturityTx])
    );
}

#[test]
fn test_chained_spend_inside_block() {
    let node = node();
    let consensus = node.validator.consensus().clone();
    let signer = Signer::new();
    let owner = key(7);
    let middle = key(8);

    let funding = Transaction::new(
        vec![Input::new([0x33; 32], 0)],
        vec![Output {
            address: signer.address(&owner),
            amount: 10_000,
        }],
    );
    let chain = MemoryUtxoSet::new();
    chain.add_transaction_outputs(&funding, 0);

    let fee = consensus.minimum_transaction_fee;
    let first = spend(&signer, &funding, 0, &owner, signer.address(&middle), 10_000 - fee);
    let second = spend(&signer, &first, 0, &middle, [9; 20], 10_000 - 2 * fee);

    let block = next_block(
        &consensus,
        &node.genesis,
        [1; 20],
        vec![first, second.clone()],
        2 * fee,
    );
    let result = node.validator.check_connect_block_valid(&block, &chain).unwrap();
    assert!(result.is_valid(), "{:?}", result.fail_marker());

    // The reverse order spends an output that does not exist yet
    let mut reversed = block.clone();
    reversed.transactions.swap(1, 2);
    let reversed = reseal(&consensus, reversed);
    let result = node.validator.check_connect_block_valid(&reversed, &chain).unwrap();
    assert_eq!(result.status(), ValidationStatus::Invalid);
    assert_eq!(
        result.fail_marker().map(FailMarker::innermost),
        Some(RuleId::ValidInputUtxoTx)
    );
}

#[test]
fn test_invalid_parent_after_marking() {
    let node = node();
    let consensus = node.validator.consensus().clone();
    let parent = next_block(&consensus, &node.genesis, [1; 20], vec![], 0);
    node.storage.store_block(&parent, true).unwrap();
    let child = next_block(&consensus, &parent, [2; 20], vec![], 0);
    assert!(node.validator.check_after_orphan_valid(&child).unwrap().is_valid());

    node.storage.set_block_invalid(&parent.hash()).unwrap();
    let result = node.validator.check_after_orphan_valid(&child).unwrap();
    assert_eq!(result.failed_rule(), Some(RuleId::ValidParentBlk));
}
