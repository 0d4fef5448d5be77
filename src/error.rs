//! Error classification
//!
//! Groups every failure the core can report into four categories. The route
//! layer turns a category into an HTTP status.

use serde::Serialize;

use crate::audit::ReasonCode;
use crate::distributor::DistributionError;
use crate::gate::GateError;
use crate::prize::PayoutError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Malformed request, nothing happened.
    Validation,
    /// Refused by the admin gate; always audited.
    Authorization,
    /// A collaborator (chain, storage) failed. Retry later.
    Infrastructure,
    /// Configuration the operator must fix.
    Computation,
}

impl GateError {
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Validation
    }
}

impl PayoutError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PayoutError::InvalidTiers(_) => ErrorCategory::Computation,
            PayoutError::DuplicateParticipant(_) => ErrorCategory::Validation,
        }
    }
}

impl DistributionError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DistributionError::Payout(e) => e.category(),
            DistributionError::PersistenceUnavailable(_) => ErrorCategory::Infrastructure,
            DistributionError::Competition(_) => ErrorCategory::Validation,
        }
    }
}

impl ReasonCode {
    /// `None` for `Ok`.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            ReasonCode::Ok => None,
            ReasonCode::RateLimited
            | ReasonCode::InvalidSignature
            | ReasonCode::ExpiredSignature
            | ReasonCode::NotOwner => Some(ErrorCategory::Authorization),
            ReasonCode::ChainUnavailable => Some(ErrorCategory::Infrastructure),
        }
    }
}
