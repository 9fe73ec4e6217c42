//! Block processing: validation results driving chain state
//!
//! The processor owns the only write path into the main chain. Validation of
//! incoming blocks may run concurrently, but storing, connecting and
//! reorganising happen under a single connect lock so two blocks can never
//! both extend the same parent.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::block::BlockValidator;
use crate::chain::Blockchain;
use crate::config::Config;
use crate::consensus::Consensus;
use crate::crypto::Signer;
use crate::error::{ConsensusError, Result};
use crate::storage::{BlockStore, MemoryBlockStore};
use crate::types::*;
use crate::utxo::MemoryUtxoSet;

/// What happened to a block handed to [`BlockProcessor::process_new_block`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedBlockStatus {
    /// Stored; on the main chain unless it sits on a weaker branch
    Valid,
    Invalid,
    /// Parent unknown, kept in the orphan index
    Orphan,
    /// Already stored or already waiting as an orphan
    AlreadyStored,
}

pub struct BlockProcessor {
    consensus: Arc<Consensus>,
    validator: BlockValidator,
    storage: Arc<dyn BlockStore>,
    chain: Arc<Blockchain>,
    utxo_set: Arc<MemoryUtxoSet>,
    max_orphan_blocks: usize,
    connect_lock: Mutex<()>,
}

impl BlockProcessor {
    pub fn new(
        config: &Config,
        signer: Arc<Signer>,
        storage: Arc<dyn BlockStore>,
        chain: Arc<Blockchain>,
        utxo_set: Arc<MemoryUtxoSet>,
    ) -> Self {
        let consensus = Arc::new(config.consensus.clone());
        let validator =
            BlockValidator::new(consensus.clone(), signer, config.network_id, storage.clone());
        Self {
            consensus,
            validator,
            storage,
            chain,
            utxo_set,
            max_orphan_blocks: config.max_orphan_blocks,
            connect_lock: Mutex::new(()),
        }
    }

    /// Processor over fresh in-memory collaborators seeded with the genesis block
    pub fn in_memory(config: &Config) -> Result<Self> {
        config.validate()?;
        let genesis = config.consensus.genesis_block();
        let storage = Arc::new(MemoryBlockStore::with_genesis(&genesis)?);
        let chain = Arc::new(Blockchain::new(config.consensus.genesis_indexed_block())?);
        Ok(Self::new(
            config,
            Arc::new(Signer::new()),
            storage,
            chain,
            Arc::new(MemoryUtxoSet::new()),
        ))
    }

    pub fn chain(&self) -> &Blockchain {
        &self.chain
    }

    pub fn utxo_set(&self) -> &MemoryUtxoSet {
        &self.utxo_set
    }

    pub fn storage(&self) -> &dyn BlockStore {
        &*self.storage
    }

    pub fn validator(&self) -> &BlockValidator {
        &self.validator
    }

    pub fn process_new_block(&self, block: Block) -> Result<ProcessedBlockStatus> {
        let hash = block.hash();
        if self.storage.has_block(&hash)? || self.chain.is_orphan(&hash) {
            return Ok(ProcessedBlockStatus::AlreadyStored);
        }

        let result = self.validator.check_incoming_block_valid(&block)?;
        if result.is_unknown_parent() {
            return self.admit_orphan(block);
        }
        if !result.is_valid() {
            debug!(
                hash = %hex::encode(hash),
                rule = ?result.failed_rule(),
                fault = ?result.fault(),
                "rejected incoming block"
            );
            return Ok(ProcessedBlockStatus::Invalid);
        }

        let status = self.accept_block(&block)?;
        self.resolve_orphans(hash)?;
        Ok(status)
    }

    fn admit_orphan(&self, block: Block) -> Result<ProcessedBlockStatus> {
        let admission = self.validator.check_orphan_admission_valid(&block)?;
        if !admission.is_valid() {
            debug!(rule = ?admission.failed_rule(), "rejected orphan block");
            return Ok(ProcessedBlockStatus::Invalid);
        }

        // Parents are stored under the same lock, so either the parent is
        // visible here or its orphan resolution runs after this insert
        let guard = self.connect_lock.lock();
        if self.storage.has_block(&block.previous_block_hash)? {
            drop(guard);
            debug!(hash = %hex::encode(block.hash()), "parent stored during validation");
            return self.accept_resolved(block);
        }
        self.chain.add_orphan(block);
        let evicted = self.chain.evict_orphans(self.max_orphan_blocks);
        if !evicted.is_empty() {
            info!(count = evicted.len(), "orphan index over capacity");
        }
        Ok(ProcessedBlockStatus::Orphan)
    }

    /// Accept a block whose parent is stored, after the parent checks it skipped
    fn accept_resolved(&self, block: Block) -> Result<ProcessedBlockStatus> {
        let result = self.validator.check_after_orphan_valid(&block)?;
        if !result.is_valid() {
            debug!(
                hash = %hex::encode(block.hash()),
                rule = ?result.failed_rule(),
                "rejected block after parent arrived"
            );
            return Ok(ProcessedBlockStatus::Invalid);
        }
        let hash = block.hash();
        let status = self.accept_block(&block)?;
        self.resolve_orphans(hash)?;
        Ok(status)
    }

    /// Re-validate orphans descending from `parent`, depth first
    fn resolve_orphans(&self, parent: Hash) -> Result<()> {
        let mut pending = vec![parent];
        while let Some(parent) = pending.pop() {
            for orphan in self.chain.remove_orphans_of_parent(&parent) {
                let result = self.validator.check_after_orphan_valid(&orphan)?;
                if !result.is_valid() {
                    debug!(
                        hash = %hex::encode(orphan.hash()),
                        rule = ?result.failed_rule(),
                        "dropped resolved orphan"
                    );
                    continue;
                }
                self.accept_block(&orphan)?;
                pending.push(orphan.hash());
            }
        }
        Ok(())
    }

    /// Store a block that passed its incoming checks and attach it to the
    /// main chain when it extends the top or wins over it
    fn accept_block(&self, block: &Block) -> Result<ProcessedBlockStatus> {
        let _guard = self.connect_lock.lock();
        if self.storage.has_block(&block.hash())? {
            return Ok(ProcessedBlockStatus::AlreadyStored);
        }
        let indexed = self.storage.store_block(block, true)?;
        let top = self.chain.main_chain_top();

        if block.previous_block_hash == top.hash {
            if self.connect_block(block, &indexed)? {
                return Ok(ProcessedBlockStatus::Valid);
            }
            self.storage.set_block_invalid(&indexed.hash)?;
            return Ok(ProcessedBlockStatus::Invalid);
        }
        if self.consensus.is_better_block(&indexed, &top) {
            return self.reorganize(&indexed);
        }
        debug!(hash = %hex::encode(indexed.hash), "stored block on side branch");
        Ok(ProcessedBlockStatus::Valid)
    }

    /// Run the connect checks, apply the block to the UTXO set and push it
    ///
    /// `Ok(false)` when the block fails its connect checks.
    fn connect_block(&self, block: &Block, indexed: &IndexedBlock) -> Result<bool> {
        let result = self
            .validator
            .check_connect_block_valid(block, &*self.utxo_set)?;
        if !result.is_valid() {
            warn!(
                hash = %hex::encode(indexed.hash),
                height = indexed.height(),
                rule = ?result.failed_rule(),
                "block failed to connect"
            );
            return Ok(false);
        }

        let undo = self.apply_block(block);
        self.storage.store_block_undo(&indexed.hash, undo)?;
        self.chain.push_top_block(indexed.clone())?;
        Ok(true)
    }

    fn apply_block(&self, block: &Block) -> BlockUndo {
        let mut undo = BlockUndo::default();
        for tx in &block.transactions {
            for input in &tx.inputs {
                let outpoint = input.outpoint();
                if let Some(info) = self.utxo_set.set_spent(&outpoint) {
                    undo.spent_outputs.push((outpoint, info));
                }
            }
            self.utxo_set.add_transaction_outputs(tx, block.block_height);
        }
        undo
    }

    /// Pop the main chain top, restoring the outputs it spent
    fn disconnect_top(&self) -> Result<IndexedBlock> {
        let top = self.chain.main_chain_top();
        let block = self.stored_block(&top.hash)?;
        let undo = self.storage.find_block_undo(&top.hash)?.ok_or_else(|| {
            ConsensusError::Storage(format!("no undo data for {}", hex::encode(top.hash)))
        })?;

        let created: HashSet<Hash> = block.transactions.iter().map(Transaction::hash).collect();
        for tx in block.transactions.iter().rev() {
            self.utxo_set.remove_transaction_outputs(tx);
        }
        // Outputs both created and spent inside the block stay gone
        for (outpoint, info) in undo.spent_outputs.into_iter().rev() {
            if !created.contains(&outpoint.hash) {
                self.utxo_set.set_unspent(outpoint, info);
            }
        }
        self.chain.pop_top_block()
    }

    fn stored_block(&self, hash: &Hash) -> Result<Block> {
        self.storage.find_block(hash)?.ok_or_else(|| {
            ConsensusError::Storage(format!("missing block {}", hex::encode(hash)))
        })
    }

    /// Switch the main chain to the branch ending at `new_top`
    ///
    /// Only pop and push are used. If a branch block fails to connect it and
    /// its descendants are marked invalid and the previous chain is restored.
    /// A branch descending from a block already marked invalid is refused
    /// without touching the main chain.
    fn reorganize(&self, new_top: &IndexedBlock) -> Result<ProcessedBlockStatus> {
        let mut branch: Vec<(IndexedBlock, Block)> = Vec::new();
        let mut cursor = new_top.clone();
        while !self.chain.main_chain_contains(&cursor) {
            if !cursor.info.valid {
                for (descendant, _) in &branch {
                    self.storage.set_block_invalid(&descendant.hash)?;
                }
                warn!(
                    hash = %hex::encode(new_top.hash),
                    invalid_ancestor = %hex::encode(cursor.hash),
                    "refused branch with invalid ancestor"
                );
                return Ok(ProcessedBlockStatus::Invalid);
            }
            let block = self.stored_block(&cursor.hash)?;
            let parent = self
                .storage
                .find_indexed_block(&block.previous_block_hash)?
                .ok_or_else(|| {
                    ConsensusError::Storage(format!(
                        "missing parent of {}",
                        hex::encode(cursor.hash)
                    ))
                })?;
            branch.push((cursor, block));
            cursor = parent;
        }
        branch.reverse();
        let fork_point = cursor;

        let old_top = self.chain.main_chain_top();
        info!(
            fork_height = fork_point.height(),
            old_height = old_top.height(),
            new_height = new_top.height(),
            "reorganizing main chain"
        );

        let mut disconnected = Vec::new();
        while self.chain.main_chain_height() > fork_point.height() {
            disconnected.push(self.disconnect_top()?);
        }

        for (position, (indexed, block)) in branch.iter().enumerate() {
            if self.connect_block(block, indexed)? {
                continue;
            }
            for (invalid, _) in &branch[position..] {
                self.storage.set_block_invalid(&invalid.hash)?;
            }
            while self.chain.main_chain_height() > fork_point.height() {
                self.disconnect_top()?;
            }
            for restored in disconnected.iter().rev() {
                let block = self.stored_block(&restored.hash)?;
                if !self.connect_block(&block, restored)? {
                    return Err(ConsensusError::ChainInvariant(format!(
                        "previous main chain block {} no longer connects",
                        hex::encode(restored.hash)
                    )));
                }
            }
            warn!(
                hash = %hex::encode(indexed.hash),
                "reorganization aborted, previous chain restored"
            );
            return Ok(ProcessedBlockStatus::Invalid);
        }

        info!(
            height = new_top.height(),
            hash = %hex::encode(new_top.hash),
            disconnected = disconnected.len(),
            "reorganization complete"
        );
        Ok(ProcessedBlockStatus::Valid)
    }
}
