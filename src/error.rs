//! Error types for consensus validation
//!
//! Rule outcomes are data (`ValidationResult`), not errors. This enum only
//! carries infrastructure faults and wiring mistakes.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    #[error("Transaction validation failed: {0}")]
    TransactionValidation(String),

    #[error("Block validation failed: {0}")]
    BlockValidation(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("UTXO not found: {0}")]
    UtxoNotFound(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Chain invariant violated: {0}")]
    ChainInvariant(String),

    #[error("Required fact missing from validation context: {0}")]
    MissingFact(&'static str),

    #[error("Rule {0} cannot be evaluated against this context")]
    UnknownRule(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Consensus rule violation: {0}")]
    ConsensusRuleViolation(String),
}

impl ConsensusError {
    /// Wiring errors abort a validation call instead of failing a rule.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ConsensusError::MissingFact(_) | ConsensusError::UnknownRule(_))
    }
}

pub type Result<T> = std::result::Result<T, ConsensusError>;
