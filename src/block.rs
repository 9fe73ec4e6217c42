//! Block rules and validator
//!
//! Rule list profiles:
//!
//! - `Incoming`: everything checkable when a block arrives, including a
//!   non-contextual pass over each transaction and the parent checks
//! - `AfterOrphan`: only the parent-dependent checks, re-run once a missing
//!   parent has been stored
//! - `OrphanAdmission`: the parent-independent tail of `Incoming`, which an
//!   unknown parent would otherwise skip
//! - `ConnectToChain`: checks against the chain UTXO set at the moment the
//!   block extends the main chain
//!
//! Proof of work compares arbitrary-precision integers; hashes are never
//! truncated to a machine word.

use std::cell::OnceCell;
use std::collections::HashSet;
use std::sync::Arc;

use crate::consensus::Consensus;
use crate::crypto::{hash_to_biguint, Signer};
use crate::error::{ConsensusError, Result};
use crate::rules::{Rule, RuleBook, RuleBookResult, RuleId, Verdict};
use crate::serialization::serialized_block_size;
use crate::storage::BlockStore;
use crate::transaction::{compute_fee, TransactionContext, TransactionProfile};
use crate::types::*;
use crate::utxo::{CompositeUtxoSet, MemoryUtxoSet, ReadonlyUtxoSet};
use crate::validation::ValidationResult;

pub const INCOMING_BLOCK_RULES: &[RuleId] = &[
    RuleId::MaxNonceBlk,
    RuleId::MaxSizeBlk,
    RuleId::NetworkIdBlk,
    RuleId::DuplicateStorageBlk,
    RuleId::SatisfiesTargetValueBlk,
    RuleId::CorrectTargetValueBlk,
    RuleId::NonEmptyTransactionsBlk,
    RuleId::ValidCoinbaseBlk,
    RuleId::CorrectMerkleRootBlk,
    RuleId::NonContextualTransactionCheckBlk,
    RuleId::DuplicateInputBlk,
    RuleId::KnownParentBlk,
    RuleId::ValidParentBlk,
    RuleId::ValidBlockHeightBlk,
    RuleId::CoinbaseHeightBlk,
];

pub const AFTER_ORPHAN_BLOCK_RULES: &[RuleId] = &[
    RuleId::KnownParentBlk,
    RuleId::ValidParentBlk,
    RuleId::ValidBlockHeightBlk,
];

/// Parent-independent checks that follow `KnownParentBlk` in the incoming
/// list, run before a block enters the orphan index
pub const ORPHAN_ADMISSION_RULES: &[RuleId] = &[RuleId::CoinbaseHeightBlk];

pub const CONNECT_TO_CHAIN_RULES: &[RuleId] = &[
    RuleId::DuplicateCoinbaseBlk,
    RuleId::ContextualTransactionCheckBlk,
    RuleId::MaxMoneyFeeBlk,
    RuleId::ValidCoinbaseOutputAmountBlk,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockProfile {
    Incoming,
    AfterOrphan,
    OrphanAdmission,
    ConnectToChain,
}

impl BlockProfile {
    pub fn rules(&self) -> &'static [RuleId] {
        match self {
            BlockProfile::Incoming => INCOMING_BLOCK_RULES,
            BlockProfile::AfterOrphan => AFTER_ORPHAN_BLOCK_RULES,
            BlockProfile::OrphanAdmission => ORPHAN_ADMISSION_RULES,
            BlockProfile::ConnectToChain => CONNECT_TO_CHAIN_RULES,
        }
    }
}

/// Facts available to block rules
pub struct BlockContext<'a> {
    pub block: &'a Block,
    pub block_hash: Hash,
    pub consensus: &'a Consensus,
    pub signer: &'a Signer,
    /// Network this node accepts blocks for
    pub network_id: u32,
    pub storage: Option<&'a dyn BlockStore>,
    /// Chain UTXO set, for connecting
    pub utxo_set: Option<&'a dyn ReadonlyUtxoSet>,
    fees: OnceCell<Option<Amount>>,
}

impl<'a> BlockContext<'a> {
    pub fn new(
        block: &'a Block,
        consensus: &'a Consensus,
        signer: &'a Signer,
        network_id: u32,
        storage: Option<&'a dyn BlockStore>,
        utxo_set: Option<&'a dyn ReadonlyUtxoSet>,
    ) -> Self {
        Self {
            block,
            block_hash: block.hash(),
            consensus,
            signer,
            network_id,
            storage,
            utxo_set,
            fees: OnceCell::new(),
        }
    }

    fn storage(&self) -> Result<&'a dyn BlockStore> {
        self.storage.ok_or(ConsensusError::MissingFact("block store"))
    }

    fn utxo_set(&self) -> Result<&'a dyn ReadonlyUtxoSet> {
        self.utxo_set.ok_or(ConsensusError::MissingFact("UTXO set"))
    }

    fn parent_info(&self) -> Result<Option<BlockInfo>> {
        self.storage()?
            .find_block_info(&self.block.previous_block_hash)
    }
}

impl Rule<BlockContext<'_>> for RuleId {
    fn evaluate(&self, context: &BlockContext<'_>) -> Result<Verdict> {
        let block = context.block;
        match self {
            RuleId::MaxNonceBlk => Ok((block.nonce <= context.consensus.max_nonce()).into()),
            RuleId::MaxSizeBlk => {
                Ok((serialized_block_size(block) <= context.consensus.max_block_size).into())
            }
            RuleId::NetworkIdBlk => Ok((block.network_id == context.network_id).into()),
            RuleId::DuplicateStorageBlk => {
                Ok((!context.storage()?.has_block(&context.block_hash)?).into())
            }
            RuleId::SatisfiesTargetValueBlk => Ok(satisfies_target_value(
                &context.block_hash,
                &block.target_value,
            )
            .into()),
            RuleId::CorrectTargetValueBlk => {
                Ok((block.target_value == context.consensus.target_value).into())
            }
            RuleId::NonEmptyTransactionsBlk => Ok((!block.transactions.is_empty()).into()),
            RuleId::ValidCoinbaseBlk => Ok(has_valid_coinbase(block).into()),
            RuleId::CorrectMerkleRootBlk => Ok((context
                .consensus
                .compute_merkle_root(&block.transactions)
                == block.merkle_root)
                .into()),
            RuleId::NonContextualTransactionCheckBlk => check_transactions_noncontextual(context),
            RuleId::DuplicateInputBlk => Ok(has_unique_block_inputs(block).into()),
            RuleId::KnownParentBlk => Ok(context
                .storage()?
                .has_block(&block.previous_block_hash)?
                .into()),
            RuleId::ValidParentBlk => Ok(context
                .parent_info()?
                .map(|parent| parent.valid)
                .unwrap_or(false)
                .into()),
            RuleId::ValidBlockHeightBlk => Ok(context
                .parent_info()?
                .and_then(|parent| parent.block_height.checked_add(1))
                .map(|expected| expected == block.block_height)
                .unwrap_or(false)
                .into()),
            RuleId::CoinbaseHeightBlk => Ok((block
                .transactions
                .first()
                .and_then(|tx| tx.coinbase_height)
                == Some(block.block_height))
            .into()),
            RuleId::DuplicateCoinbaseBlk => coinbase_not_unspent(context),
            RuleId::ContextualTransactionCheckBlk => check_transactions_contextual(context),
            RuleId::MaxMoneyFeeBlk => Ok(block_fees(context)?.is_some().into()),
            RuleId::ValidCoinbaseOutputAmountBlk => coinbase_amount_within_reward(context),
            other => Err(ConsensusError::UnknownRule(other.to_string())),
        }
    }
}

/// numeric(hash) <= numeric(target)
pub fn satisfies_target_value(block_hash: &Hash, target_value: &Hash) -> bool {
    hash_to_biguint(block_hash) <= hash_to_biguint(target_value)
}

/// First transaction is the only coinbase, with exactly one output
fn has_valid_coinbase(block: &Block) -> bool {
    match block.transactions.split_first() {
        Some((first, rest)) => {
            first.is_coinbase()
                && first.outputs.len() == 1
                && rest.iter().all(|tx| !tx.is_coinbase())
        }
        None => false,
    }
}

fn has_unique_block_inputs(block: &Block) -> bool {
    let mut seen = HashSet::new();
    block
        .transactions
        .iter()
        .flat_map(|tx| tx.inputs.iter())
        .all(|input| seen.insert(input.outpoint()))
}

/// Fold a nested rule book result into the composite rule's verdict
fn nested_verdict(result: RuleBookResult) -> Result<Option<Verdict>> {
    if result.passed {
        return Ok(None);
    }
    if let Some(fault) = result.fault {
        return Err(ConsensusError::Storage(fault));
    }
    Ok(Some(match result.fail_marker {
        Some(marker) => Verdict::FailWithChild(marker),
        None => Verdict::Fail,
    }))
}

fn check_transactions_noncontextual(context: &BlockContext<'_>) -> Result<Verdict> {
    for tx in &context.block.transactions {
        let tx_context = TransactionContext {
            transaction: tx,
            consensus: context.consensus,
            signer: context.signer,
            utxo_set: None,
            chain_height: context.block.block_height.saturating_sub(1),
            pool: None,
        };
        let result = RuleBook::run(TransactionProfile::BlockNonContextual.rules(), &tx_context)?;
        if let Some(verdict) = nested_verdict(result)? {
            return Ok(verdict);
        }
    }
    Ok(Verdict::Pass)
}

fn check_transactions_contextual(context: &BlockContext<'_>) -> Result<Verdict> {
    let chain = context.utxo_set()?;
    let mut transactions = context.block.transactions.iter();
    // Outputs created earlier in the block are spendable by later transactions
    let local = MemoryUtxoSet::new();
    if let Some(coinbase) = transactions.next() {
        local.add_transaction_outputs(coinbase, context.block.block_height);
    }
    for tx in transactions {
        let view = CompositeUtxoSet::new(chain, &local);
        let tx_context = TransactionContext {
            transaction: tx,
            consensus: context.consensus,
            signer: context.signer,
            utxo_set: Some(&view as &dyn ReadonlyUtxoSet),
            chain_height: context.block.block_height.saturating_sub(1),
            pool: None,
        };
        let result = RuleBook::run(TransactionProfile::BlockContextual.rules(), &tx_context)?;
        if let Some(verdict) = nested_verdict(result)? {
            return Ok(verdict);
        }
        local.add_transaction_outputs(tx, context.block.block_height);
    }
    Ok(Verdict::Pass)
}

fn coinbase_not_unspent(context: &BlockContext<'_>) -> Result<Verdict> {
    let coinbase = match context.block.coinbase() {
        Some(coinbase) => coinbase,
        None => return Ok(Verdict::Fail),
    };
    Ok((!context.utxo_set()?.is_unspent(&coinbase.hash(), 0)?).into())
}

/// Total fees of the non-coinbase transactions, computed once per context
///
/// `None` when a fee cannot be computed, a sum overflows or the total
/// exceeds max money.
fn block_fees(context: &BlockContext<'_>) -> Result<Option<Amount>> {
    if let Some(fees) = context.fees.get() {
        return Ok(*fees);
    }
    let fees = sum_block_fees(context)?;
    Ok(*context.fees.get_or_init(|| fees))
}

fn sum_block_fees(context: &BlockContext<'_>) -> Result<Option<Amount>> {
    let chain = context.utxo_set()?;
    let mut transactions = context.block.transactions.iter();
    let local = MemoryUtxoSet::new();
    if let Some(coinbase) = transactions.next() {
        local.add_transaction_outputs(coinbase, context.block.block_height);
    }
    let mut total: Amount = 0;
    for tx in transactions {
        let view = CompositeUtxoSet::new(chain, &local);
        let fee = match compute_fee(tx, &view, context.consensus)? {
            Some(fee) if fee >= 0 => fee,
            _ => return Ok(None),
        };
        total = match total.checked_add(fee) {
            Some(total) if total <= context.consensus.max_money_value => total,
            _ => return Ok(None),
        };
        local.add_transaction_outputs(tx, context.block.block_height);
    }
    Ok(Some(total))
}

fn coinbase_amount_within_reward(context: &BlockContext<'_>) -> Result<Verdict> {
    let coinbase = match context.block.coinbase() {
        Some(coinbase) => coinbase,
        None => return Ok(Verdict::Fail),
    };
    let fees = match block_fees(context)? {
        Some(fees) => fees,
        None => return Ok(Verdict::Fail),
    };
    let allowed = match context.consensus.block_reward.checked_add(fees) {
        Some(allowed) => allowed,
        None => return Ok(Verdict::Fail),
    };
    let paid = coinbase
        .outputs
        .iter()
        .try_fold(0 as Amount, |sum, output| sum.checked_add(output.amount));
    Ok(paid.map(|paid| paid <= allowed).unwrap_or(false).into())
}

/// Stateless block validator, shareable across threads
pub struct BlockValidator {
    consensus: Arc<Consensus>,
    signer: Arc<Signer>,
    network_id: u32,
    storage: Arc<dyn BlockStore>,
}

impl BlockValidator {
    pub fn new(
        consensus: Arc<Consensus>,
        signer: Arc<Signer>,
        network_id: u32,
        storage: Arc<dyn BlockStore>,
    ) -> Self {
        Self {
            consensus,
            signer,
            network_id,
            storage,
        }
    }

    pub fn consensus(&self) -> &Consensus {
        &self.consensus
    }

    /// Run `profile` against `block`
    pub fn check_block_valid(
        &self,
        profile: BlockProfile,
        block: &Block,
        utxo_set: Option<&dyn ReadonlyUtxoSet>,
    ) -> Result<ValidationResult> {
        let context = BlockContext::new(
            block,
            &self.consensus,
            &self.signer,
            self.network_id,
            Some(&*self.storage),
            utxo_set,
        );
        Ok(RuleBook::run(profile.rules(), &context)?.into())
    }

    pub fn check_incoming_block_valid(&self, block: &Block) -> Result<ValidationResult> {
        self.check_block_valid(BlockProfile::Incoming, block, None)
    }

    pub fn check_after_orphan_valid(&self, block: &Block) -> Result<ValidationResult> {
        self.check_block_valid(BlockProfile::AfterOrphan, block, None)
    }

    pub fn check_orphan_admission_valid(&self, block: &Block) -> Result<ValidationResult> {
        self.check_block_valid(BlockProfile::OrphanAdmission, block, None)
    }

    /// Checks at the moment `block` extends the main chain
    pub fn check_connect_block_valid(
        &self,
        block: &Block,
        chain_utxo: &dyn ReadonlyUtxoSet,
    ) -> Result<ValidationResult> {
        self.check_block_valid(BlockProfile::ConnectToChain, block, Some(chain_utxo))
    }
}
