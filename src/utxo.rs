//! Read-only UTXO set capability and its in-memory implementations

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::*;

/// Query surface over unspent outputs
///
/// Errors are infrastructure faults; a missing output is `Ok(false)` /
/// `Ok(None)`.
pub trait ReadonlyUtxoSet: Send + Sync {
    fn is_unspent(&self, transaction_hash: &Hash, output_index: u32) -> Result<bool> {
        Ok(self
            .find_unspent_output_info(transaction_hash, output_index)?
            .is_some())
    }

    fn find_unspent_output_info(
        &self,
        transaction_hash: &Hash,
        output_index: u32,
    ) -> Result<Option<UnspentOutputInfo>>;
}

/// Chain-backed UTXO set held in memory
#[derive(Debug, Default)]
pub struct MemoryUtxoSet {
    outputs: RwLock<HashMap<OutPoint, UnspentOutputInfo>>,
}

impl MemoryUtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unspent(&self, outpoint: OutPoint, info: UnspentOutputInfo) {
        self.outputs.write().insert(outpoint, info);
    }

    /// Mark spent, returning the snapshot that was removed
    pub fn set_spent(&self, outpoint: &OutPoint) -> Option<UnspentOutputInfo> {
        self.outputs.write().remove(outpoint)
    }

    /// Add every output of `tx`, created in the block at `height`
    pub fn add_transaction_outputs(&self, tx: &Transaction, height: Height) {
        let hash = tx.hash();
        let mut outputs = self.outputs.write();
        for (index, output) in tx.outputs.iter().enumerate() {
            outputs.insert(
                OutPoint {
                    hash,
                    index: index as u32,
                },
                UnspentOutputInfo {
                    coinbase: tx.is_coinbase(),
                    block_height: height,
                    amount: output.amount,
                    address: output.address,
                },
            );
        }
    }

    /// Remove every output of `tx`
    pub fn remove_transaction_outputs(&self, tx: &Transaction) {
        let hash = tx.hash();
        let mut outputs = self.outputs.write();
        for index in 0..tx.outputs.len() {
            outputs.remove(&OutPoint {
                hash,
                index: index as u32,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.outputs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.read().is_empty()
    }
}

impl ReadonlyUtxoSet for MemoryUtxoSet {
    fn find_unspent_output_info(
        &self,
        transaction_hash: &Hash,
        output_index: u32,
    ) -> Result<Option<UnspentOutputInfo>> {
        Ok(self
            .outputs
            .read()
            .get(&OutPoint {
                hash: *transaction_hash,
                index: output_index,
            })
            .copied())
    }
}

/// Chain view layered over a pool view
///
/// The chain set is consulted first, so pool-originated outputs are only
/// visible to pool-context validation.
pub struct CompositeUtxoSet<'a> {
    chain: &'a dyn ReadonlyUtxoSet,
    pool: &'a dyn ReadonlyUtxoSet,
}

impl<'a> CompositeUtxoSet<'a> {
    pub fn new(chain: &'a dyn ReadonlyUtxoSet, pool: &'a dyn ReadonlyUtxoSet) -> Self {
        Self { chain, pool }
    }
}

impl ReadonlyUtxoSet for CompositeUtxoSet<'_> {
    fn is_unspent(&self, transaction_hash: &Hash, output_index: u32) -> Result<bool> {
        Ok(self.chain.is_unspent(transaction_hash, output_index)?
            || self.pool.is_unspent(transaction_hash, output_index)?)
    }

    fn find_unspent_output_info(
        &self,
        transaction_hash: &Hash,
        output_index: u32,
    ) -> Result<Option<UnspentOutputInfo>> {
        if let Some(info) = self
            .chain
            .find_unspent_output_info(transaction_hash, output_index)?
        {
            return Ok(Some(info));
        }
        self.pool
            .find_unspent_output_info(transaction_hash, output_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(amount: Amount) -> UnspentOutputInfo {
        UnspentOutputInfo {
            coinbase: false,
            block_height: 1,
            amount,
            address: [1; 20],
        }
    }

    #[test]
    fn test_set_unspent_and_spent() {
        let set = MemoryUtxoSet::new();
        let outpoint = OutPoint { hash: [1; 32], index: 0 };
        set.set_unspent(outpoint, info(10));
        assert!(set.is_unspent(&[1; 32], 0).unwrap());
        assert_eq!(set.set_spent(&outpoint), Some(info(10)));
        assert!(!set.is_unspent(&[1; 32], 0).unwrap());
        assert!(set.is_empty());
    }

    #[test]
    fn test_add_and_remove_transaction_outputs() {
        let set = MemoryUtxoSet::new();
        let tx = Transaction::coinbase(Output { address: [2; 20], amount: 50 }, 4);
        set.add_transaction_outputs(&tx, 4);

        let found = set.find_unspent_output_info(&tx.hash(), 0).unwrap().unwrap();
        assert!(found.coinbase);
        assert_eq!(found.block_height, 4);
        assert_eq!(found.amount, 50);

        set.remove_transaction_outputs(&tx);
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_composite_prefers_chain() {
        let chain = MemoryUtxoSet::new();
        let pool = MemoryUtxoSet::new();
        let outpoint = OutPoint { hash: [3; 32], index: 1 };
        chain.set_unspent(outpoint, info(5));
        pool.set_unspent(outpoint, info(6));
        pool.set_unspent(OutPoint { hash: [4; 32], index: 0 }, info(7));

        let composite = CompositeUtxoSet::new(&chain, &pool);
        assert_eq!(
            composite.find_unspent_output_info(&[3; 32], 1).unwrap().unwrap().amount,
            5
        );
        assert!(composite.is_unspent(&[4; 32], 0).unwrap());
        assert!(!chain.is_unspent(&[4; 32], 0).unwrap());
        assert!(!composite.is_unspent(&[5; 32], 0).unwrap());
    }
}
