//! Transaction pool capability
//!
//! Validation only needs membership and iteration. `MemoryTransactionPool` is
//! the in-memory pool used by the node; it also exposes its outputs as a
//! `ReadonlyUtxoSet` so pool-dependent transactions can be validated.

use std::collections::{BTreeMap, HashSet};

use parking_lot::RwLock;

use crate::error::Result;
use crate::types::*;
use crate::utxo::ReadonlyUtxoSet;

/// Height recorded for outputs that are not in a block yet
pub const UNCONFIRMED_HEIGHT: Height = Height::MAX;

pub trait TransactionPool: Send + Sync {
    fn contains(&self, hash: &Hash) -> bool;

    /// Every pooled transaction
    fn transactions(&self) -> Vec<Transaction>;

    /// Pooled transactions with no unresolved dependency on another pooled transaction
    fn independent_transactions(&self) -> Vec<Transaction>;
}

#[derive(Debug, Default)]
struct PoolEntries {
    independent: BTreeMap<Hash, Transaction>,
    dependent: BTreeMap<Hash, Transaction>,
}

impl PoolEntries {
    fn get(&self, hash: &Hash) -> Option<&Transaction> {
        self.independent.get(hash).or_else(|| self.dependent.get(hash))
    }

    fn all(&self) -> impl Iterator<Item = (&Hash, &Transaction)> {
        self.independent.iter().chain(self.dependent.iter())
    }
}

#[derive(Debug, Default)]
pub struct MemoryTransactionPool {
    entries: RwLock<PoolEntries>,
}

impl MemoryTransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a validated transaction, classifying it by its pool dependencies
    pub fn add(&self, tx: Transaction) -> Hash {
        let hash = tx.hash();
        let mut entries = self.entries.write();
        let depends_on_pool = tx
            .inputs
            .iter()
            .any(|input| entries.get(&input.referenced_transaction).is_some());
        if depends_on_pool {
            entries.dependent.insert(hash, tx);
        } else {
            entries.independent.insert(hash, tx);
        }
        hash
    }

    pub fn remove(&self, hash: &Hash) -> Option<Transaction> {
        let mut entries = self.entries.write();
        entries
            .independent
            .remove(hash)
            .or_else(|| entries.dependent.remove(hash))
    }

    /// Move dependents whose pool parents are gone into the independent set
    pub fn promote_dependents(&self) -> usize {
        let mut entries = self.entries.write();
        let pooled: HashSet<Hash> = entries.all().map(|(hash, _)| *hash).collect();
        let ready: Vec<Hash> = entries
            .dependent
            .iter()
            .filter(|(_, tx)| {
                tx.inputs
                    .iter()
                    .all(|input| !pooled.contains(&input.referenced_transaction))
            })
            .map(|(hash, _)| *hash)
            .collect();
        for hash in &ready {
            if let Some(tx) = entries.dependent.remove(hash) {
                entries.independent.insert(*hash, tx);
            }
        }
        ready.len()
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read();
        entries.independent.len() + entries.dependent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_independent(&self, hash: &Hash) -> bool {
        self.entries.read().independent.contains_key(hash)
    }
}

impl TransactionPool for MemoryTransactionPool {
    fn contains(&self, hash: &Hash) -> bool {
        self.entries.read().get(hash).is_some()
    }

    fn transactions(&self) -> Vec<Transaction> {
        self.entries.read().all().map(|(_, tx)| tx.clone()).collect()
    }

    fn independent_transactions(&self) -> Vec<Transaction> {
        self.entries.read().independent.values().cloned().collect()
    }
}

impl ReadonlyUtxoSet for MemoryTransactionPool {
    fn find_unspent_output_info(
        &self,
        transaction_hash: &Hash,
        output_index: u32,
    ) -> Result<Option<UnspentOutputInfo>> {
        let entries = self.entries.read();
        let output = match entries
            .get(transaction_hash)
            .and_then(|tx| tx.outputs.get(output_index as usize))
        {
            Some(output) => *output,
            None => return Ok(None),
        };

        let spent_in_pool = entries.all().any(|(_, tx)| {
            tx.inputs.iter().any(|input| {
                input.referenced_transaction == *transaction_hash
                    && input.referenced_output_index == output_index
            })
        });
        if spent_in_pool {
            return Ok(None);
        }

        Ok(Some(UnspentOutputInfo {
            coinbase: false,
            block_height: UNCONFIRMED_HEIGHT,
            amount: output.amount,
            address: output.address,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spend(hash: Hash, index: u32, amount: Amount) -> Transaction {
        Transaction::new(
            vec![Input::new(hash, index)],
            vec![Output { address: [1; 20], amount }],
        )
    }

    #[test]
    fn test_add_classifies_dependencies() {
        let pool = MemoryTransactionPool::new();
        let parent = spend([9; 32], 0, 100);
        let parent_hash = pool.add(parent);
        let child_hash = pool.add(spend(parent_hash, 0, 90));

        assert!(pool.contains(&parent_hash));
        assert!(pool.is_independent(&parent_hash));
        assert!(!pool.is_independent(&child_hash));
        assert_eq!(pool.transactions().len(), 2);
        assert_eq!(pool.independent_transactions().len(), 1);
    }

    #[test]
    fn test_promote_after_parent_removed() {
        let pool = MemoryTransactionPool::new();
        let parent_hash = pool.add(spend([9; 32], 0, 100));
        let child_hash = pool.add(spend(parent_hash, 0, 90));

        assert_eq!(pool.promote_dependents(), 0);
        pool.remove(&parent_hash);
        assert_eq!(pool.promote_dependents(), 1);
        assert!(pool.is_independent(&child_hash));
    }

    #[test]
    fn test_pool_outputs_visible_until_spent() {
        let pool = MemoryTransactionPool::new();
        let parent_hash = pool.add(spend([9; 32], 0, 100));

        let info = pool.find_unspent_output_info(&parent_hash, 0).unwrap().unwrap();
        assert_eq!(info.amount, 100);
        assert_eq!(info.block_height, UNCONFIRMED_HEIGHT);
        assert!(pool.find_unspent_output_info(&parent_hash, 1).unwrap().is_none());

        pool.add(spend(parent_hash, 0, 90));
        assert!(!pool.is_unspent(&parent_hash, 0).unwrap());
    }
}
