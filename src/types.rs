//! Core chain types for consensus validation

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use crate::crypto;

/// Hash type: 256-bit hash
pub type Hash = [u8; 32];

/// Address type: RIPEMD160(SHA256(public key))
pub type Address = [u8; 20];

/// Byte string type
pub type ByteString = Vec<u8>;

/// Block height
pub type Height = u64;

/// Amount of value, in the smallest unit
pub type Amount = i64;

/// All-zero hash, used as the genesis parent
pub const ZERO_HASH: Hash = [0u8; 32];

/// Reference to a single transaction output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutPoint {
    pub hash: Hash,
    pub index: u32,
}

/// Public key and ECDSA signature authorising an input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// SEC1 compressed public key
    pub public_key: ByteString,
    /// DER encoded ECDSA signature over the transaction hash
    pub signature: ByteString,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
    pub referenced_transaction: Hash,
    pub referenced_output_index: u32,
    pub signature: Signature,
}

impl Input {
    /// Unsigned input spending `outpoint`
    pub fn new(referenced_transaction: Hash, referenced_output_index: u32) -> Self {
        Self {
            referenced_transaction,
            referenced_output_index,
            signature: Signature::default(),
        }
    }

    pub fn outpoint(&self) -> OutPoint {
        OutPoint {
            hash: self.referenced_transaction,
            index: self.referenced_output_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Output {
    pub address: Address,
    pub amount: Amount,
}

/// Transaction
///
/// A coinbase has no inputs, exactly one output and carries the height of the
/// block creating it in `coinbase_height`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub inputs: Vec<Input>,
    pub outputs: Vec<Output>,
    pub coinbase_height: Option<Height>,
}

impl Transaction {
    pub fn new(inputs: Vec<Input>, outputs: Vec<Output>) -> Self {
        Self {
            inputs,
            outputs,
            coinbase_height: None,
        }
    }

    /// Coinbase paying `output` in the block at `height`
    pub fn coinbase(output: Output, height: Height) -> Self {
        Self {
            inputs: Vec::new(),
            outputs: vec![output],
            coinbase_height: Some(height),
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.coinbase_height.is_some() && self.inputs.is_empty()
    }

    /// Transaction hash (signatures excluded)
    pub fn hash(&self) -> Hash {
        crypto::transaction_hash(self)
    }
}

/// Block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub previous_block_hash: Hash,
    pub merkle_root: Hash,
    pub target_value: Hash,
    pub nonce: BigUint,
    pub block_height: Height,
    pub transactions: Vec<Transaction>,
    pub network_id: u32,
}

impl Block {
    /// Block hash: double SHA-256 of the header encoding
    pub fn hash(&self) -> Hash {
        crypto::block_hash(self)
    }

    /// Merkle root over the hashes of the contained transactions
    pub fn compute_merkle_root(&self) -> Hash {
        let hashes: Vec<Hash> = self.transactions.iter().map(Transaction::hash).collect();
        crypto::merkle_root(&hashes)
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }
}

/// Snapshot of an unspent output, denormalised for maturity and value rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnspentOutputInfo {
    pub coinbase: bool,
    pub block_height: Height,
    pub amount: Amount,
    pub address: Address,
}

/// Header fields plus bookkeeping for a stored block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub previous_block_hash: Hash,
    pub merkle_root: Hash,
    pub target_value: Hash,
    pub nonce: BigUint,
    pub block_height: Height,
    pub network_id: u32,
    pub transaction_count: usize,
    pub valid: bool,
    /// Opaque location metadata owned by the storage backend
    pub storage_position: u64,
}

impl BlockInfo {
    pub fn from_block(block: &Block, valid: bool, storage_position: u64) -> Self {
        Self {
            previous_block_hash: block.previous_block_hash,
            merkle_root: block.merkle_root,
            target_value: block.target_value,
            nonce: block.nonce.clone(),
            block_height: block.block_height,
            network_id: block.network_id,
            transaction_count: block.transactions.len(),
            valid,
            storage_position,
        }
    }
}

/// Lightweight handle on a stored block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedBlock {
    pub hash: Hash,
    pub info: BlockInfo,
}

impl IndexedBlock {
    pub fn new(hash: Hash, info: BlockInfo) -> Self {
        Self { hash, info }
    }

    pub fn height(&self) -> Height {
        self.info.block_height
    }
}

/// Undo data recorded when a block is connected, used to disconnect it again
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockUndo {
    /// Outputs spent by the block, in spending order
    pub spent_outputs: Vec<(OutPoint, UnspentOutputInfo)>,
}
