//! Consensus parameters
//!
//! An immutable parameter object shared by every validator. All values that
//! independent nodes must agree on live here.

use std::cmp::Ordering;

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::crypto::{hash_to_biguint, merkle_root};
use crate::error::{ConsensusError, Result};
use crate::types::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Consensus {
    /// Maximum serialized block size in bytes
    pub max_block_size: usize,
    /// Maximum nonce width in bytes
    pub max_nonce_size: usize,
    /// Depth at which coinbase outputs become spendable
    pub coinbase_maturity_depth: u64,
    pub max_money_value: i64,
    /// Fixed proof-of-work target
    pub target_value: Hash,
    pub block_reward: i64,
    pub minimum_transaction_fee: i64,
}

impl Default for Consensus {
    fn default() -> Self {
        Self {
            max_block_size: MAX_BLOCK_SIZE,
            max_nonce_size: MAX_NONCE_SIZE,
            coinbase_maturity_depth: COINBASE_MATURITY_DEPTH,
            max_money_value: MAX_MONEY,
            target_value: TARGET_VALUE,
            block_reward: BLOCK_REWARD,
            minimum_transaction_fee: MINIMUM_TRANSACTION_FEE,
        }
    }
}

impl Consensus {
    /// Reject parameter sets no chain could run with
    pub fn validate(&self) -> Result<()> {
        if self.max_nonce_size == 0 || self.max_nonce_size > 64 {
            return Err(ConsensusError::Configuration(format!(
                "max_nonce_size must be in 1..=64, got {}",
                self.max_nonce_size
            )));
        }
        if self.coinbase_maturity_depth == 0 {
            return Err(ConsensusError::Configuration(
                "coinbase_maturity_depth must be at least 1".to_string(),
            ));
        }
        if self.max_money_value <= 0 || self.block_reward <= 0 {
            return Err(ConsensusError::Configuration(
                "max_money_value and block_reward must be positive".to_string(),
            ));
        }
        if self.block_reward > self.max_money_value {
            return Err(ConsensusError::Configuration(
                "block_reward exceeds max_money_value".to_string(),
            ));
        }
        if self.minimum_transaction_fee < 0 {
            return Err(ConsensusError::Configuration(
                "minimum_transaction_fee must not be negative".to_string(),
            ));
        }
        if self.max_block_size == 0 {
            return Err(ConsensusError::Configuration(
                "max_block_size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Largest nonce representable in `max_nonce_size` bytes
    pub fn max_nonce(&self) -> BigUint {
        (BigUint::from(1u8) << (8 * self.max_nonce_size)) - 1u8
    }

    pub fn target_value_numeric(&self) -> BigUint {
        hash_to_biguint(&self.target_value)
    }

    /// The genesis block: a single coinbase to the zero address at height 0
    ///
    /// Genesis does not depend on the configured network id. It always
    /// carries `MAIN_NETWORK_ID`; it is seeded into storage directly and never
    /// passes `NetworkIdBlk`, so nodes on every network share one genesis.
    pub fn genesis_block(&self) -> Block {
        let coinbase = Transaction::coinbase(
            Output {
                address: [0u8; 20],
                amount: self.block_reward,
            },
            0,
        );
        let merkle_root = self.compute_merkle_root(std::slice::from_ref(&coinbase));
        Block {
            previous_block_hash: ZERO_HASH,
            merkle_root,
            target_value: self.target_value,
            nonce: BigUint::from(0u8),
            block_height: 0,
            transactions: vec![coinbase],
            network_id: MAIN_NETWORK_ID,
        }
    }

    pub fn genesis_indexed_block(&self) -> IndexedBlock {
        let genesis = self.genesis_block();
        IndexedBlock::new(genesis.hash(), BlockInfo::from_block(&genesis, true, 0))
    }

    /// Merkle root committing to `transactions`
    ///
    /// Interior nodes are `sha256d(left || right)`.
    pub fn compute_merkle_root(&self, transactions: &[Transaction]) -> Hash {
        let hashes: Vec<Hash> = transactions.iter().map(Transaction::hash).collect();
        merkle_root(&hashes)
    }

    /// Canonical best-block order
    ///
    /// Higher height ranks higher. At equal height the numerically smaller
    /// hash ranks higher (hashes compare in descending order). The best block
    /// of a set is its maximum under this ordering.
    pub fn best_block_ordering(&self, a: &IndexedBlock, b: &IndexedBlock) -> Ordering {
        a.height()
            .cmp(&b.height())
            .then_with(|| hash_to_biguint(&b.hash).cmp(&hash_to_biguint(&a.hash)))
    }

    /// Whether `candidate` ranks strictly above `current`
    pub fn is_better_block(&self, candidate: &IndexedBlock, current: &IndexedBlock) -> bool {
        self.best_block_ordering(candidate, current) == Ordering::Greater
    }
}
