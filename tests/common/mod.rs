//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chain_rules::block::satisfies_target_value;
use chain_rules::*;
use num_bigint::BigUint;
use secp256k1::SecretKey;

/// Default configuration with an easy target and a short maturity
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.consensus.target_value = easy_target();
    config.consensus.coinbase_maturity_depth = 2;
    config.max_orphan_blocks = 10;
    config
}

/// Roughly one hash in sixteen satisfies it
pub fn easy_target() -> Hash {
    let mut target = [0xff; 32];
    target[0] = 0x0f;
    target
}

pub fn key(byte: u8) -> SecretKey {
    SecretKey::from_slice(&[byte; 32]).unwrap()
}

/// Increment the nonce until the block hash meets its declared target
pub fn mine(mut block: Block) -> Block {
    let mut nonce = 0u64;
    loop {
        block.nonce = BigUint::from(nonce);
        if satisfies_target_value(&block.hash(), &block.target_value) {
            return block;
        }
        nonce += 1;
    }
}

/// Mined child of `parent` paying `reward + fees` to `miner`
pub fn next_block(
    consensus: &Consensus,
    parent: &Block,
    miner: Address,
    transactions: Vec<Transaction>,
    fees: Amount,
) -> Block {
    let height = parent.block_height + 1;
    let coinbase = Transaction::coinbase(
        Output {
            address: miner,
            amount: consensus.block_reward + fees,
        },
        height,
    );
    let mut all = vec![coinbase];
    all.extend(transactions);
    mine(Block {
        previous_block_hash: parent.hash(),
        merkle_root: consensus.compute_merkle_root(&all),
        target_value: consensus.target_value,
        nonce: BigUint::from(0u8),
        block_height: height,
        transactions: all,
        network_id: MAIN_NETWORK_ID,
    })
}

/// Recompute the Merkle root and proof of work after editing `block`
pub fn reseal(consensus: &Consensus, mut block: Block) -> Block {
    block.merkle_root = consensus.compute_merkle_root(&block.transactions);
    mine(block)
}

/// Spend output `index` of `funding` to `to`, signed with `owner`
pub fn spend(
    signer: &Signer,
    funding: &Transaction,
    index: u32,
    owner: &SecretKey,
    to: Address,
    amount: Amount,
) -> Transaction {
    let mut tx = Transaction::new(
        vec![Input::new(funding.hash(), index)],
        vec![Output { address: to, amount }],
    );
    signer.sign_transaction(&mut tx, &[*owner]).unwrap();
    tx
}
