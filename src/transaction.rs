//! Transaction rules and validator
//!
//! Atomic rules are plain functions over a [`TransactionContext`]. Four rule
//! list profiles reuse them for the different pipeline stages:
//!
//! - `All`: admission to the pool, against the chain and pool outputs
//! - `AfterOrphan`: context-dependent re-check once a missing input appears
//! - `BlockNonContextual`: checks needing no chain state, run on every
//!   transaction of an incoming block
//! - `BlockContextual`: chain-dependent checks run when a block connects

use std::collections::HashSet;
use std::sync::Arc;

use crate::consensus::Consensus;
use crate::crypto::Signer;
use crate::error::{ConsensusError, Result};
use crate::mempool::TransactionPool;
use crate::rules::{Rule, RuleBook, RuleId, Verdict};
use crate::serialization::serialize_transaction;
use crate::types::*;
use crate::utxo::{CompositeUtxoSet, ReadonlyUtxoSet};
use crate::validation::ValidationResult;

pub const ALL_RULES: &[RuleId] = &[
    RuleId::CoinbaseCreationTx,
    RuleId::InputOutputNotEmptyTx,
    RuleId::MaxSizeTx,
    RuleId::DuplicateInputTx,
    RuleId::PoolDuplicateTx,
    RuleId::PoolDoubleSpendingTx,
    RuleId::ValidInputUtxoTx,
    RuleId::MaturityTx,
    RuleId::OutputValueTx,
    RuleId::InputValueTx,
    RuleId::SufficientInputTx,
    RuleId::SignatureTx,
];

pub const AFTER_ORPHAN_RULES: &[RuleId] = &[
    RuleId::PoolDoubleSpendingTx,
    RuleId::ValidInputUtxoTx,
    RuleId::MaturityTx,
    RuleId::InputValueTx,
    RuleId::SufficientInputTx,
    RuleId::SignatureTx,
];

pub const BLOCK_NONCONTEXTUAL_RULES: &[RuleId] =
    &[RuleId::InputOutputNotEmptyTx, RuleId::OutputValueTx];

pub const BLOCK_CONTEXTUAL_RULES: &[RuleId] = &[
    RuleId::ValidInputUtxoTx,
    RuleId::MaturityTx,
    RuleId::InputValueTx,
    RuleId::SufficientInputTx,
    RuleId::SignatureTx,
];

/// Rule list profile for a pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionProfile {
    All,
    AfterOrphan,
    BlockNonContextual,
    BlockContextual,
}

impl TransactionProfile {
    pub fn rules(&self) -> &'static [RuleId] {
        match self {
            TransactionProfile::All => ALL_RULES,
            TransactionProfile::AfterOrphan => AFTER_ORPHAN_RULES,
            TransactionProfile::BlockNonContextual => BLOCK_NONCONTEXTUAL_RULES,
            TransactionProfile::BlockContextual => BLOCK_CONTEXTUAL_RULES,
        }
    }
}

/// Facts available to transaction rules
pub struct TransactionContext<'a> {
    pub transaction: &'a Transaction,
    pub consensus: &'a Consensus,
    pub signer: &'a Signer,
    /// View used to resolve inputs
    pub utxo_set: Option<&'a dyn ReadonlyUtxoSet>,
    /// Height of the current main chain top
    pub chain_height: Height,
    pub pool: Option<&'a dyn TransactionPool>,
}

impl<'a> TransactionContext<'a> {
    fn pool(&self) -> Result<&'a dyn TransactionPool> {
        self.pool.ok_or(ConsensusError::MissingFact("transaction pool"))
    }

    fn utxo_set(&self) -> Result<&'a dyn ReadonlyUtxoSet> {
        self.utxo_set.ok_or(ConsensusError::MissingFact("UTXO set"))
    }
}

impl Rule<TransactionContext<'_>> for RuleId {
    fn evaluate(&self, context: &TransactionContext<'_>) -> Result<Verdict> {
        match self {
            RuleId::CoinbaseCreationTx => Ok((!context.transaction.is_coinbase()).into()),
            RuleId::InputOutputNotEmptyTx => Ok(inputs_outputs_not_empty(context.transaction).into()),
            RuleId::MaxSizeTx => Ok(within_max_size(context).into()),
            RuleId::DuplicateInputTx => Ok(has_unique_inputs(context.transaction).into()),
            RuleId::PoolDuplicateTx => {
                let pool = context.pool()?;
                Ok((!pool.contains(&context.transaction.hash())).into())
            }
            RuleId::PoolDoubleSpendingTx => not_double_spent_in_pool(context),
            RuleId::ValidInputUtxoTx => inputs_unspent(context),
            RuleId::MaturityTx => inputs_mature(context),
            RuleId::OutputValueTx => Ok(output_values_in_range(context).into()),
            RuleId::InputValueTx => input_values_in_range(context),
            RuleId::SufficientInputTx => sufficient_input(context),
            RuleId::SignatureTx => signatures_valid(context),
            other => Err(ConsensusError::UnknownRule(other.to_string())),
        }
    }
}

fn inputs_outputs_not_empty(tx: &Transaction) -> bool {
    !tx.outputs.is_empty() && (tx.is_coinbase() || !tx.inputs.is_empty())
}

fn within_max_size(context: &TransactionContext<'_>) -> bool {
    serialize_transaction(context.transaction).len() <= context.consensus.max_block_size
}

fn has_unique_inputs(tx: &Transaction) -> bool {
    let mut seen = HashSet::with_capacity(tx.inputs.len());
    tx.inputs.iter().all(|input| seen.insert(input.outpoint()))
}

/// No other pooled transaction spends one of our outpoints
fn not_double_spent_in_pool(context: &TransactionContext<'_>) -> Result<Verdict> {
    let pool = context.pool()?;
    let own_hash = context.transaction.hash();
    let ours: HashSet<OutPoint> = context
        .transaction
        .inputs
        .iter()
        .map(Input::outpoint)
        .collect();

    let conflict = pool
        .transactions()
        .iter()
        .filter(|pooled| pooled.hash() != own_hash)
        .flat_map(|pooled| pooled.inputs.iter())
        .any(|input| ours.contains(&input.outpoint()));
    Ok((!conflict).into())
}

fn inputs_unspent(context: &TransactionContext<'_>) -> Result<Verdict> {
    for input in &context.transaction.inputs {
        if !context
            .utxo_set()?
            .is_unspent(&input.referenced_transaction, input.referenced_output_index)?
        {
            return Ok(Verdict::Fail);
        }
    }
    Ok(Verdict::Pass)
}

fn resolve(context: &TransactionContext<'_>, input: &Input) -> Result<Option<UnspentOutputInfo>> {
    context
        .utxo_set()?
        .find_unspent_output_info(&input.referenced_transaction, input.referenced_output_index)
}

/// Coinbase outputs need `coinbase_maturity_depth` blocks on top of them
fn inputs_mature(context: &TransactionContext<'_>) -> Result<Verdict> {
    for input in &context.transaction.inputs {
        let info = match resolve(context, input)? {
            Some(info) => info,
            None => return Ok(Verdict::Fail),
        };
        if info.coinbase {
            let depth = context.chain_height.saturating_sub(info.block_height);
            if depth < context.consensus.coinbase_maturity_depth {
                return Ok(Verdict::Fail);
            }
        }
    }
    Ok(Verdict::Pass)
}

/// Sum `amounts`, each in (0, max money], without overflow or exceeding max money
fn checked_value_sum(amounts: impl IntoIterator<Item = Amount>, max_money: Amount) -> Option<Amount> {
    let mut total: Amount = 0;
    for amount in amounts {
        if amount <= 0 || amount > max_money {
            return None;
        }
        total = total.checked_add(amount)?;
        if total > max_money {
            return None;
        }
    }
    Some(total)
}

fn output_values_in_range(context: &TransactionContext<'_>) -> bool {
    checked_value_sum(
        context.transaction.outputs.iter().map(|output| output.amount),
        context.consensus.max_money_value,
    )
    .is_some()
}

fn input_values_in_range(context: &TransactionContext<'_>) -> Result<Verdict> {
    let mut amounts = Vec::with_capacity(context.transaction.inputs.len());
    for input in &context.transaction.inputs {
        match resolve(context, input)? {
            Some(info) => amounts.push(info.amount),
            None => return Ok(Verdict::Fail),
        }
    }
    Ok(checked_value_sum(amounts, context.consensus.max_money_value)
        .is_some()
        .into())
}

fn sufficient_input(context: &TransactionContext<'_>) -> Result<Verdict> {
    let fee = compute_fee(context.transaction, context.utxo_set()?, context.consensus)?;
    Ok(fee
        .map(|fee| fee >= context.consensus.minimum_transaction_fee)
        .unwrap_or(false)
        .into())
}

fn signatures_valid(context: &TransactionContext<'_>) -> Result<Verdict> {
    let tx_hash = context.transaction.hash();
    for input in &context.transaction.inputs {
        let info = match resolve(context, input)? {
            Some(info) => info,
            None => return Ok(Verdict::Fail),
        };
        if !context.signer.verify(&tx_hash, &input.signature, &info.address) {
            return Ok(Verdict::Fail);
        }
    }
    Ok(Verdict::Pass)
}

/// Fee paid by `tx`: referenced amounts minus declared amounts
///
/// `None` when an input cannot be resolved or a sum leaves the valid range.
pub fn compute_fee(
    tx: &Transaction,
    utxo_set: &dyn ReadonlyUtxoSet,
    consensus: &Consensus,
) -> Result<Option<Amount>> {
    let mut inputs = Vec::with_capacity(tx.inputs.len());
    for input in &tx.inputs {
        match utxo_set.find_unspent_output_info(&input.referenced_transaction, input.referenced_output_index)? {
            Some(info) => inputs.push(info.amount),
            None => return Ok(None),
        }
    }

    let max_money = consensus.max_money_value;
    let input_total = checked_value_sum(inputs, max_money);
    let output_total = checked_value_sum(tx.outputs.iter().map(|o| o.amount), max_money);

    Ok(match (input_total, output_total) {
        (Some(input_total), Some(output_total)) => input_total.checked_sub(output_total),
        _ => None,
    })
}

/// Stateless transaction validator, shareable across threads
pub struct TransactionValidator {
    consensus: Arc<Consensus>,
    signer: Arc<Signer>,
}

impl TransactionValidator {
    pub fn new(consensus: Arc<Consensus>, signer: Arc<Signer>) -> Self {
        Self { consensus, signer }
    }

    pub fn consensus(&self) -> &Consensus {
        &self.consensus
    }

    /// Run `profile` against `tx` with explicitly chosen facts
    pub fn check_transaction_valid(
        &self,
        profile: TransactionProfile,
        tx: &Transaction,
        utxo_set: &dyn ReadonlyUtxoSet,
        pool: Option<&dyn TransactionPool>,
        chain_height: Height,
    ) -> Result<ValidationResult> {
        let context = TransactionContext {
            transaction: tx,
            consensus: &self.consensus,
            signer: &self.signer,
            utxo_set: Some(utxo_set),
            chain_height,
            pool,
        };
        Ok(RuleBook::run(profile.rules(), &context)?.into())
    }

    /// Full pool admission check against the chain and pool outputs
    pub fn check_pool_admission<P>(
        &self,
        tx: &Transaction,
        chain_utxo: &dyn ReadonlyUtxoSet,
        pool: &P,
        chain_height: Height,
    ) -> Result<ValidationResult>
    where
        P: TransactionPool + ReadonlyUtxoSet,
    {
        let composite = CompositeUtxoSet::new(chain_utxo, pool);
        let pool: &dyn TransactionPool = pool;
        self.check_transaction_valid(TransactionProfile::All, tx, &composite, Some(pool), chain_height)
    }

    /// Re-check a former orphan once its missing input is known
    pub fn check_after_orphan<P>(
        &self,
        tx: &Transaction,
        chain_utxo: &dyn ReadonlyUtxoSet,
        pool: &P,
        chain_height: Height,
    ) -> Result<ValidationResult>
    where
        P: TransactionPool + ReadonlyUtxoSet,
    {
        let composite = CompositeUtxoSet::new(chain_utxo, pool);
        let pool: &dyn TransactionPool = pool;
        self.check_transaction_valid(
            TransactionProfile::AfterOrphan,
            tx,
            &composite,
            Some(pool),
            chain_height,
        )
    }
}
