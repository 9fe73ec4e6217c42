//! Rule engine
//!
//! A rule list is an ordered slice of [`RuleId`]s. [`RuleBook::run`] evaluates
//! them against a typed validation context, strictly in order, and stops at
//! the first failure. Independent nodes must reach identical decisions, so the
//! engine never reorders, parallelises or skips rules.
//!
//! Three outcomes are possible for a single rule:
//! - `Ok(Verdict::Pass)` continues with the next rule
//! - `Ok(Verdict::Fail)` / `Ok(Verdict::FailWithChild(_))` stops with a fail marker
//! - `Err(e)` is either fatal (a wiring error, returned to the caller) or an
//!   infrastructure fault, which fails the rule closed and is reported
//!   alongside the marker

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;

/// Identifier of every atomic rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleId {
    // Transaction rules
    CoinbaseCreationTx,
    InputOutputNotEmptyTx,
    MaxSizeTx,
    DuplicateInputTx,
    PoolDuplicateTx,
    PoolDoubleSpendingTx,
    ValidInputUtxoTx,
    MaturityTx,
    OutputValueTx,
    InputValueTx,
    SufficientInputTx,
    SignatureTx,

    // Block rules
    MaxNonceBlk,
    MaxSizeBlk,
    NetworkIdBlk,
    DuplicateStorageBlk,
    SatisfiesTargetValueBlk,
    CorrectTargetValueBlk,
    NonEmptyTransactionsBlk,
    ValidCoinbaseBlk,
    CorrectMerkleRootBlk,
    NonContextualTransactionCheckBlk,
    DuplicateInputBlk,
    KnownParentBlk,
    ValidParentBlk,
    ValidBlockHeightBlk,
    CoinbaseHeightBlk,
    DuplicateCoinbaseBlk,
    ContextualTransactionCheckBlk,
    MaxMoneyFeeBlk,
    ValidCoinbaseOutputAmountBlk,
}

impl RuleId {
    pub fn name(&self) -> &'static str {
        match self {
            RuleId::CoinbaseCreationTx => "CoinbaseCreationTxRule",
            RuleId::InputOutputNotEmptyTx => "InputOutputNotEmptyTxRule",
            RuleId::MaxSizeTx => "MaxSizeTxRule",
            RuleId::DuplicateInputTx => "DuplicateInputTxRule",
            RuleId::PoolDuplicateTx => "PoolDuplicateTxRule",
            RuleId::PoolDoubleSpendingTx => "PoolDoubleSpendingTxRule",
            RuleId::ValidInputUtxoTx => "ValidInputUTXOTxRule",
            RuleId::MaturityTx => "MaturityTxRule",
            RuleId::OutputValueTx => "OutputValueTxRule",
            RuleId::InputValueTx => "InputValueTxRule",
            RuleId::SufficientInputTx => "SufficientInputTxRule",
            RuleId::SignatureTx => "SignatureTxRule",
            RuleId::MaxNonceBlk => "MaxNonceBlkRule",
            RuleId::MaxSizeBlk => "MaxSizeBlkRule",
            RuleId::NetworkIdBlk => "NetworkIdBlkRule",
            RuleId::DuplicateStorageBlk => "DuplicateStorageBlkRule",
            RuleId::SatisfiesTargetValueBlk => "SatisfiesTargetValueBlkRule",
            RuleId::CorrectTargetValueBlk => "CorrectTargetValueBlkRule",
            RuleId::NonEmptyTransactionsBlk => "NonEmptyTransactionsBlkRule",
            RuleId::ValidCoinbaseBlk => "ValidCoinbaseBlkRule",
            RuleId::CorrectMerkleRootBlk => "CorrectMerkleRootBlkRule",
            RuleId::NonContextualTransactionCheckBlk => "NonContextualTransactionCheckBlkRule",
            RuleId::DuplicateInputBlk => "DuplicateInputBlkRule",
            RuleId::KnownParentBlk => "KnownParentBlkRule",
            RuleId::ValidParentBlk => "ValidParentBlkRule",
            RuleId::ValidBlockHeightBlk => "ValidBlockHeightBlkRule",
            RuleId::CoinbaseHeightBlk => "CoinbaseHeightBlkRule",
            RuleId::DuplicateCoinbaseBlk => "DuplicateCoinbaseBlkRule",
            RuleId::ContextualTransactionCheckBlk => "ContextualTransactionCheckBlkRule",
            RuleId::MaxMoneyFeeBlk => "MaxMoneyFeeBlkRule",
            RuleId::ValidCoinbaseOutputAmountBlk => "ValidCoinbaseOutputAmountBlkRule",
        }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The rule that rejected an input, and for composite rules the nested
/// rule that rejected the inner input
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailMarker {
    pub rule: RuleId,
    pub child: Option<Box<FailMarker>>,
}

impl FailMarker {
    pub fn new(rule: RuleId) -> Self {
        Self { rule, child: None }
    }

    pub fn with_child(rule: RuleId, child: FailMarker) -> Self {
        Self {
            rule,
            child: Some(Box::new(child)),
        }
    }

    /// Rule ids from the outermost to the innermost failure
    pub fn chain(&self) -> Vec<RuleId> {
        let mut rules = vec![self.rule];
        let mut current = self.child.as_deref();
        while let Some(marker) = current {
            rules.push(marker.rule);
            current = marker.child.as_deref();
        }
        rules
    }

    /// Rule at the bottom of the nesting
    pub fn innermost(&self) -> RuleId {
        match &self.child {
            Some(child) => child.innermost(),
            None => self.rule,
        }
    }
}

impl fmt::Display for FailMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.chain().iter().map(RuleId::name).collect();
        f.write_str(&names.join(" -> "))
    }
}

/// Outcome of evaluating a single rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail,
    /// A composite rule failed because its nested rule list failed
    FailWithChild(FailMarker),
}

impl From<bool> for Verdict {
    fn from(valid: bool) -> Self {
        if valid {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

/// A rule evaluable against context `C`
///
/// Rules are resolved from their [`RuleId`]. A rule id with no meaning for a
/// context must return `ConsensusError::UnknownRule`.
pub trait Rule<C> {
    fn evaluate(&self, context: &C) -> Result<Verdict>;
}

/// Outcome of running a whole rule list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleBookResult {
    pub passed: bool,
    pub fail_marker: Option<FailMarker>,
    /// Infrastructure fault that failed a rule closed
    pub fault: Option<String>,
}

impl RuleBookResult {
    pub fn passed() -> Self {
        Self {
            passed: true,
            fail_marker: None,
            fault: None,
        }
    }

    pub fn failed(marker: FailMarker) -> Self {
        Self {
            passed: false,
            fail_marker: Some(marker),
            fault: None,
        }
    }

    pub fn faulted(marker: FailMarker, fault: String) -> Self {
        Self {
            passed: false,
            fail_marker: Some(marker),
            fault: Some(fault),
        }
    }

    pub fn failed_rule(&self) -> Option<RuleId> {
        self.fail_marker.as_ref().map(|marker| marker.rule)
    }
}

pub struct RuleBook;

impl RuleBook {
    /// Run `rules` in order against `context`
    ///
    /// Returns `Err` only for fatal wiring errors.
    pub fn run<C>(rules: &[RuleId], context: &C) -> Result<RuleBookResult>
    where
        RuleId: Rule<C>,
    {
        for rule in rules {
            match rule.evaluate(context) {
                Ok(Verdict::Pass) => continue,
                Ok(Verdict::Fail) => {
                    debug!(rule = rule.name(), "rule failed");
                    return Ok(RuleBookResult::failed(FailMarker::new(*rule)));
                }
                Ok(Verdict::FailWithChild(child)) => {
                    let marker = FailMarker::with_child(*rule, child);
                    debug!(rule = rule.name(), chain = %marker, "composite rule failed");
                    return Ok(RuleBookResult::failed(marker));
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(rule = rule.name(), error = %e, "rule failed closed on fault");
                    return Ok(RuleBookResult::faulted(FailMarker::new(*rule), e.to_string()));
                }
            }
        }
        Ok(RuleBookResult::passed())
    }
}
