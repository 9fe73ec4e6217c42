//! Block storage capability
//!
//! Persistence formats belong to the storage engine; validation only goes
//! through this trait. `MemoryBlockStore` keeps everything in memory.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::error::{ConsensusError, Result};
use crate::types::*;

pub trait BlockStore: Send + Sync {
    /// Store `block` and return its index handle
    fn store_block(&self, block: &Block, valid: bool) -> Result<IndexedBlock>;

    fn find_block(&self, hash: &Hash) -> Result<Option<Block>>;

    fn find_block_info(&self, hash: &Hash) -> Result<Option<BlockInfo>>;

    fn has_block(&self, hash: &Hash) -> Result<bool> {
        Ok(self.find_block_info(hash)?.is_some())
    }

    fn set_block_invalid(&self, hash: &Hash) -> Result<()>;

    fn store_block_undo(&self, hash: &Hash, undo: BlockUndo) -> Result<()>;

    fn find_block_undo(&self, hash: &Hash) -> Result<Option<BlockUndo>>;

    fn find_indexed_block(&self, hash: &Hash) -> Result<Option<IndexedBlock>> {
        Ok(self
            .find_block_info(hash)?
            .map(|info| IndexedBlock::new(*hash, info)))
    }
}

#[derive(Debug, Default)]
struct StoreContents {
    blocks: HashMap<Hash, Block>,
    infos: HashMap<Hash, BlockInfo>,
    undo: HashMap<Hash, BlockUndo>,
    next_position: u64,
}

#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    contents: RwLock<StoreContents>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the genesis block
    pub fn with_genesis(genesis: &Block) -> Result<Self> {
        let store = Self::new();
        store.store_block(genesis, true)?;
        Ok(store)
    }

    pub fn block_count(&self) -> usize {
        self.contents.read().blocks.len()
    }
}

impl BlockStore for MemoryBlockStore {
    fn store_block(&self, block: &Block, valid: bool) -> Result<IndexedBlock> {
        let hash = block.hash();
        let mut contents = self.contents.write();
        if let Some(info) = contents.infos.get(&hash) {
            return Ok(IndexedBlock::new(hash, info.clone()));
        }

        let position = contents.next_position;
        contents.next_position += 1;
        let info = BlockInfo::from_block(block, valid, position);
        contents.blocks.insert(hash, block.clone());
        contents.infos.insert(hash, info.clone());
        Ok(IndexedBlock::new(hash, info))
    }

    fn find_block(&self, hash: &Hash) -> Result<Option<Block>> {
        Ok(self.contents.read().blocks.get(hash).cloned())
    }

    fn find_block_info(&self, hash: &Hash) -> Result<Option<BlockInfo>> {
        Ok(self.contents.read().infos.get(hash).cloned())
    }

    fn set_block_invalid(&self, hash: &Hash) -> Result<()> {
        match self.contents.write().infos.get_mut(hash) {
            Some(info) => {
                info.valid = false;
                Ok(())
            }
            None => Err(ConsensusError::Storage(format!(
                "cannot invalidate unknown block {}",
                hex::encode(hash)
            ))),
        }
    }

    fn store_block_undo(&self, hash: &Hash, undo: BlockUndo) -> Result<()> {
        self.contents.write().undo.insert(*hash, undo);
        Ok(())
    }

    fn find_block_undo(&self, hash: &Hash) -> Result<Option<BlockUndo>> {
        Ok(self.contents.read().undo.get(hash).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::Consensus;

    #[test]
    fn test_store_and_find() {
        let genesis = Consensus::default().genesis_block();
        let store = MemoryBlockStore::with_genesis(&genesis).unwrap();
        let hash = genesis.hash();

        assert!(store.has_block(&hash).unwrap());
        assert_eq!(store.find_block(&hash).unwrap(), Some(genesis.clone()));
        let indexed = store.find_indexed_block(&hash).unwrap().unwrap();
        assert_eq!(indexed.hash, hash);
        assert!(indexed.info.valid);
        assert!(!store.has_block(&[1; 32]).unwrap());
    }

    #[test]
    fn test_store_is_idempotent() {
        let genesis = Consensus::default().genesis_block();
        let store = MemoryBlockStore::with_genesis(&genesis).unwrap();
        let again = store.store_block(&genesis, true).unwrap();
        assert_eq!(again.info.storage_position, 0);
        assert_eq!(store.block_count(), 1);
    }

    #[test]
    fn test_set_block_invalid() {
        let genesis = Consensus::default().genesis_block();
        let store = MemoryBlockStore::with_genesis(&genesis).unwrap();
        store.set_block_invalid(&genesis.hash()).unwrap();
        assert!(!store.find_block_info(&genesis.hash()).unwrap().unwrap().valid);
        assert!(matches!(
            store.set_block_invalid(&[3; 32]),
            Err(ConsensusError::Storage(_))
        ));
    }

    #[test]
    fn test_undo_data() {
        let store = MemoryBlockStore::new();
        let undo = BlockUndo {
            spent_outputs: vec![(
                OutPoint { hash: [1; 32], index: 0 },
                UnspentOutputInfo {
                    coinbase: true,
                    block_height: 2,
                    amount: 5,
                    address: [0; 20],
                },
            )],
        };
        store.store_block_undo(&[7; 32], undo.clone()).unwrap();
        assert_eq!(store.find_block_undo(&[7; 32]).unwrap(), Some(undo));
        assert_eq!(store.find_block_undo(&[8; 32]).unwrap(), None);
    }
}
