//! Validation results and the derived status

use serde::{Deserialize, Serialize};

use crate::rules::{FailMarker, RuleBookResult, RuleId};

/// Classification of a validated block or transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStatus {
    Valid,
    /// Violates a rule under the current state
    Invalid,
    /// References an output not known yet; may become valid later
    Orphan,
}

/// Result of a validator call
///
/// The status is derived once, on construction. Only a top-level
/// `ValidInputUtxoTx` failure without a fault yields `Orphan`; a composite
/// block rule whose child failed on a missing output is still `Invalid`, and
/// so is a failed UTXO lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    status: ValidationStatus,
    result: RuleBookResult,
}

impl ValidationResult {
    pub fn new(result: RuleBookResult) -> Self {
        let status = if result.passed {
            ValidationStatus::Valid
        } else if result.fault.is_none() && result.failed_rule() == Some(RuleId::ValidInputUtxoTx) {
            ValidationStatus::Orphan
        } else {
            ValidationStatus::Invalid
        };
        Self { status, result }
    }

    pub fn status(&self) -> ValidationStatus {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }

    pub fn is_passed(&self) -> bool {
        self.result.passed
    }

    pub fn fail_marker(&self) -> Option<&FailMarker> {
        self.result.fail_marker.as_ref()
    }

    /// Top-level failed rule
    pub fn failed_rule(&self) -> Option<RuleId> {
        self.result.failed_rule()
    }

    /// Infrastructure fault that failed the validation closed, if any
    pub fn fault(&self) -> Option<&str> {
        self.result.fault.as_deref()
    }

    /// The parent block is not stored: the block belongs in the orphan index
    pub fn is_unknown_parent(&self) -> bool {
        self.failed_rule() == Some(RuleId::KnownParentBlk) && self.fault().is_none()
    }

    pub fn rule_book_result(&self) -> &RuleBookResult {
        &self.result
    }
}

impl From<RuleBookResult> for ValidationResult {
    fn from(result: RuleBookResult) -> Self {
        Self::new(result)
    }
}
