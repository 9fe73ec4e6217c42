//! Main chain index and orphan bookkeeping
//!
//! [`IndexedChain`] is a gap-free sequence of blocks where the index equals
//! the block height. [`Blockchain`] pairs it with the orphan index, a
//! multimap from missing parent hash to the blocks waiting for it. Every
//! mutation goes through one lock so height, top hash and orphan membership
//! are always read consistently.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{ConsensusError, Result};
use crate::types::*;

/// Height-indexed main chain, never empty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedChain {
    blocks: Vec<IndexedBlock>,
}

impl IndexedChain {
    pub fn new(genesis: IndexedBlock) -> Result<Self> {
        if genesis.height() != 0 {
            return Err(ConsensusError::ChainInvariant(format!(
                "genesis block has height {}",
                genesis.height()
            )));
        }
        Ok(Self {
            blocks: vec![genesis],
        })
    }

    pub fn genesis(&self) -> &IndexedBlock {
        &self.blocks[0]
    }

    pub fn top_block(&self) -> &IndexedBlock {
        // Never empty: construction needs a genesis and pop keeps it
        &self.blocks[self.blocks.len() - 1]
    }

    pub fn height(&self) -> Height {
        (self.blocks.len() - 1) as Height
    }

    /// `None` outside `[0, height]`
    pub fn block_at_height(&self, height: Height) -> Option<&IndexedBlock> {
        usize::try_from(height)
            .ok()
            .and_then(|index| self.blocks.get(index))
    }

    /// The chain element at `block`'s height is `block`
    pub fn contains(&self, block: &IndexedBlock) -> bool {
        self.block_at_height(block.height())
            .map(|stored| stored.hash == block.hash)
            .unwrap_or(false)
    }

    /// Successor of `block` on this chain
    pub fn next_block(&self, block: &IndexedBlock) -> Option<&IndexedBlock> {
        if !self.contains(block) {
            return None;
        }
        block
            .height()
            .checked_add(1)
            .and_then(|height| self.block_at_height(height))
    }

    pub fn push_top_block(&mut self, block: IndexedBlock) -> Result<()> {
        let expected = self.blocks.len() as Height;
        if block.height() != expected {
            return Err(ConsensusError::ChainInvariant(format!(
                "cannot push block at height {} onto chain of length {}",
                block.height(),
                expected
            )));
        }
        if block.info.previous_block_hash != self.top_block().hash {
            return Err(ConsensusError::ChainInvariant(format!(
                "block {} does not extend top {}",
                hex::encode(block.hash),
                hex::encode(self.top_block().hash)
            )));
        }
        self.blocks.push(block);
        Ok(())
    }

    pub fn pop_top_block(&mut self) -> Result<IndexedBlock> {
        if self.blocks.len() == 1 {
            return Err(ConsensusError::ChainInvariant(
                "cannot pop the genesis block".to_string(),
            ));
        }
        self.blocks
            .pop()
            .ok_or_else(|| ConsensusError::ChainInvariant("empty chain".to_string()))
    }
}

#[derive(Debug, Default)]
struct OrphanIndex {
    by_parent: HashMap<Hash, Vec<Hash>>,
    by_hash: HashMap<Hash, (u64, Block)>,
    /// Insertion sequence, oldest first
    arrival: BTreeMap<u64, Hash>,
    next_sequence: u64,
}

impl OrphanIndex {
    fn insert(&mut self, hash: Hash, block: Block) -> bool {
        if self.by_hash.contains_key(&hash) {
            return false;
        }
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.by_parent
            .entry(block.previous_block_hash)
            .or_default()
            .push(hash);
        self.arrival.insert(sequence, hash);
        self.by_hash.insert(hash, (sequence, block));
        true
    }

    fn remove(&mut self, hash: &Hash) -> Option<Block> {
        let (sequence, block) = self.by_hash.remove(hash)?;
        self.arrival.remove(&sequence);
        if let Some(siblings) = self.by_parent.get_mut(&block.previous_block_hash) {
            siblings.retain(|sibling| sibling != hash);
            if siblings.is_empty() {
                self.by_parent.remove(&block.previous_block_hash);
            }
        }
        Some(block)
    }

    fn remove_children(&mut self, parent: &Hash) -> Vec<Block> {
        let hashes = self.by_parent.remove(parent).unwrap_or_default();
        hashes
            .iter()
            .filter_map(|hash| {
                let (sequence, block) = self.by_hash.remove(hash)?;
                self.arrival.remove(&sequence);
                Some(block)
            })
            .collect()
    }

    fn oldest(&self) -> Option<Hash> {
        self.arrival.values().next().copied()
    }
}

#[derive(Debug)]
struct ChainState {
    main_chain: IndexedChain,
    orphans: OrphanIndex,
}

/// Height and top hash read under one lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub height: Height,
    pub top_hash: Hash,
}

/// Main chain plus orphan index
#[derive(Debug)]
pub struct Blockchain {
    state: RwLock<ChainState>,
}

impl Blockchain {
    pub fn new(genesis: IndexedBlock) -> Result<Self> {
        Ok(Self {
            state: RwLock::new(ChainState {
                main_chain: IndexedChain::new(genesis)?,
                orphans: OrphanIndex::default(),
            }),
        })
    }

    pub fn main_chain_height(&self) -> Height {
        self.state.read().main_chain.height()
    }

    pub fn main_chain_top(&self) -> IndexedBlock {
        self.state.read().main_chain.top_block().clone()
    }

    pub fn main_chain_block_at_height(&self, height: Height) -> Option<IndexedBlock> {
        self.state.read().main_chain.block_at_height(height).cloned()
    }

    pub fn main_chain_contains(&self, block: &IndexedBlock) -> bool {
        self.state.read().main_chain.contains(block)
    }

    pub fn chain_snapshot(&self) -> ChainSnapshot {
        let state = self.state.read();
        ChainSnapshot {
            height: state.main_chain.height(),
            top_hash: state.main_chain.top_block().hash,
        }
    }

    pub fn push_top_block(&self, block: IndexedBlock) -> Result<()> {
        let mut state = self.state.write();
        let hash = block.hash;
        let height = block.height();
        state.main_chain.push_top_block(block)?;
        info!(height, hash = %hex::encode(hash), "pushed main chain top");
        Ok(())
    }

    pub fn pop_top_block(&self) -> Result<IndexedBlock> {
        let block = self.state.write().main_chain.pop_top_block()?;
        info!(height = block.height(), hash = %hex::encode(block.hash), "popped main chain top");
        Ok(block)
    }

    /// Record `block` as waiting for its parent; `false` if already present
    pub fn add_orphan(&self, block: Block) -> bool {
        let hash = block.hash();
        let parent = block.previous_block_hash;
        let added = self.state.write().orphans.insert(hash, block);
        if added {
            info!(
                hash = %hex::encode(hash),
                parent = %hex::encode(parent),
                "added orphan block"
            );
        }
        added
    }

    /// Remove and return every orphan whose parent is `parent_hash`
    pub fn remove_orphans_of_parent(&self, parent_hash: &Hash) -> Vec<Block> {
        let orphans = self.state.write().orphans.remove_children(parent_hash);
        if !orphans.is_empty() {
            info!(
                parent = %hex::encode(parent_hash),
                count = orphans.len(),
                "resolved orphan blocks"
            );
        }
        orphans
    }

    pub fn is_orphan(&self, hash: &Hash) -> bool {
        self.state.read().orphans.by_hash.contains_key(hash)
    }

    pub fn orphan_count(&self) -> usize {
        self.state.read().orphans.by_hash.len()
    }

    /// Drop the oldest orphans until at most `max` remain
    pub fn evict_orphans(&self, max: usize) -> Vec<Block> {
        let mut state = self.state.write();
        let mut evicted = Vec::new();
        while state.orphans.by_hash.len() > max {
            let oldest = match state.orphans.oldest() {
                Some(hash) => hash,
                None => break,
            };
            if let Some(block) = state.orphans.remove(&oldest) {
                debug!(hash = %hex::encode(oldest), "evicted orphan block");
                evicted.push(block);
            }
        }
        evicted
    }
}
