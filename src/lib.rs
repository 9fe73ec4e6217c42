//! # Chain Rules
//!
//! Validation and chain-state core of a blockchain node.
//!
//! Every incoming block and transaction is classified as valid, invalid or
//! orphan by running an ordered rule list against a typed context. The
//! result drives the main chain index and its orphan bookkeeping.
//!
//! ## Architecture
//!
//! - [`rules`]: the sequential, short-circuiting rule engine
//! - [`transaction`] / [`block`]: the rule sets, their profiles and validators
//! - [`validation`]: the result model and derived status
//! - [`chain`]: the gap-free main chain plus the orphan index
//! - [`processor`]: the single-writer path from validation results to chain state
//! - [`utxo`], [`mempool`], [`storage`]: collaborator capabilities and
//!   in-memory implementations
//!
//! ## Design Principles
//!
//! 1. **Determinism**: rules run strictly in list order, first failure wins
//! 2. **Fail closed**: storage faults never pass a rule
//! 3. **Exact Version Pinning**: consensus-critical dependencies are pinned
//!
//! ## Usage
//!
//! ```rust
//! use chain_rules::{BlockProcessor, Config};
//!
//! let processor = BlockProcessor::in_memory(&Config::default()).unwrap();
//! assert_eq!(processor.chain().main_chain_height(), 0);
//! ```

pub mod types;
pub mod constants;
pub mod error;
pub mod crypto;
pub mod serialization;
pub mod consensus;
pub mod config;
pub mod rules;
pub mod validation;
pub mod utxo;
pub mod mempool;
pub mod storage;
pub mod transaction;
pub mod block;
pub mod chain;
pub mod processor;

// Re-export commonly used types
pub use types::*;
pub use constants::*;
pub use error::{ConsensusError, Result};
pub use config::Config;
pub use consensus::Consensus;
pub use crypto::Signer;
pub use rules::{FailMarker, RuleBook, RuleBookResult, RuleId, Verdict};
pub use validation::{ValidationResult, ValidationStatus};
pub use utxo::{CompositeUtxoSet, MemoryUtxoSet, ReadonlyUtxoSet};
pub use mempool::{MemoryTransactionPool, TransactionPool};
pub use storage::{BlockStore, MemoryBlockStore};
pub use transaction::{TransactionProfile, TransactionValidator};
pub use block::{BlockProfile, BlockValidator};
pub use chain::{Blockchain, ChainSnapshot, IndexedChain};
pub use processor::{BlockProcessor, ProcessedBlockStatus};
