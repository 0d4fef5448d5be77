//! Admin request gate
//!
//! Composes the rate limiter, signature freshness, signer recovery and the
//! on-chain owner check. Checks run in that order and stop at the first
//! denial. Every request that passes shape validation leaves exactly one
//! audit entry.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::audit::{AuditAck, AuditEntry, AuditLog, ReasonCode};
use crate::auth::{AdminMessage, FreshnessWindow, MessageError, SignatureVerifier};
use crate::chain::OwnerAuthority;
use crate::model::Address;
use crate::rate_limit::RateLimiter;

// ============================================================================
// CONTRACT REGISTRY
// ============================================================================

/// Contracts the gate accepts admin requests for, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractRegistry {
    contracts: HashMap<String, Address>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contract(mut self, name: impl Into<String>, address: Address) -> Self {
        self.contracts.insert(name.into(), address);
        self
    }

    /// Resolve a registry name, or an address that is registered under some name.
    pub fn resolve(&self, name_or_address: &str) -> Option<Address> {
        if let Some(address) = self.contracts.get(name_or_address) {
            return Some(*address);
        }
        let address: Address = name_or_address.parse().ok()?;
        self.contracts
            .values()
            .any(|a| *a == address)
            .then_some(address)
    }
}

impl FromIterator<(String, Address)> for ContractRegistry {
    fn from_iter<I: IntoIterator<Item = (String, Address)>>(iter: I) -> Self {
        Self {
            contracts: iter.into_iter().collect(),
        }
    }
}

// ============================================================================
// REQUEST / DECISION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Network address of the caller, used as the rate-limit key.
    pub client_addr: String,
    pub route: String,
    pub message: String,
    pub signature: String,
    pub signer: Address,
    /// Registry name or registered address.
    pub contract: String,
    /// Digest of the request body the caller wants executed.
    pub payload: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Allowed(Address),
    Denied(ReasonCode),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthorizationDecision {
    pub outcome: Outcome,
    pub reason: ReasonCode,
    pub signer: Option<Address>,
    pub decided_at: DateTime<Utc>,
    /// Contract named in the signed message.
    pub contract: Address,
    /// Resource id named in the signed message.
    pub target: String,
    #[serde(skip)]
    pub audit: AuditAck,
}

impl AuthorizationDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self.outcome, Outcome::Allowed(_))
    }
}

/// Request rejected before any side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("invalid admin message: {0}")]
    Message(#[from] MessageError),
    #[error("message was signed for route '{signed}', not '{requested}'")]
    RouteMismatch { signed: String, requested: String },
    #[error("unknown contract: {0}")]
    UnknownContract(String),
    #[error("message was signed for contract {signed}, not {requested}")]
    ContractMismatch { signed: Address, requested: Address },
    #[error("request body does not match the signed payload digest")]
    PayloadMismatch,
}

// ============================================================================
// GATE
// ============================================================================

pub struct AdminGate {
    contracts: ContractRegistry,
    limiter: RateLimiter,
    freshness: FreshnessWindow,
    verifier: SignatureVerifier,
    owners: OwnerAuthority,
    audit: AuditLog,
}

impl AdminGate {
    pub fn new(
        contracts: ContractRegistry,
        limiter: RateLimiter,
        owners: OwnerAuthority,
        audit: AuditLog,
    ) -> Self {
        Self {
            contracts,
            limiter,
            freshness: FreshnessWindow::default(),
            verifier: SignatureVerifier::new(),
            owners,
            audit,
        }
    }

    pub fn with_freshness(mut self, freshness: FreshnessWindow) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationDecision, GateError> {
        self.authorize_at(request, Utc::now()).await
    }

    pub async fn authorize_at(
        &self,
        request: &AuthorizationRequest,
        now: DateTime<Utc>,
    ) -> Result<AuthorizationDecision, GateError> {
        let message = AdminMessage::parse(&request.message)?;
        if message.route != request.route {
            return Err(GateError::RouteMismatch {
                signed: message.route,
                requested: request.route.clone(),
            });
        }
        let contract = self
            .contracts
            .resolve(&request.contract)
            .ok_or_else(|| GateError::UnknownContract(request.contract.clone()))?;
        if message.contract != contract {
            return Err(GateError::ContractMismatch {
                signed: message.contract,
                requested: contract,
            });
        }
        if message.payload != request.payload {
            return Err(GateError::PayloadMismatch);
        }

        let (reason, signer) = self.evaluate(request, &message, &contract, now).await;

        let entry = AuditEntry::new(
            signer.as_ref(),
            &message,
            reason,
            now,
            request.client_addr.as_str(),
        );
        let audit = self.audit.record(entry).await;

        let outcome = match (reason, signer) {
            (ReasonCode::Ok, Some(signer)) => Outcome::Allowed(signer),
            _ => Outcome::Denied(reason),
        };

        Ok(AuthorizationDecision {
            outcome,
            reason,
            signer,
            decided_at: now,
            contract,
            target: message.target,
            audit,
        })
    }

    async fn evaluate(
        &self,
        request: &AuthorizationRequest,
        message: &AdminMessage,
        contract: &Address,
        now: DateTime<Utc>,
    ) -> (ReasonCode, Option<Address>) {
        if !self
            .limiter
            .allow(&request.client_addr, &request.route, now.timestamp())
        {
            return (ReasonCode::RateLimited, None);
        }

        if !self.freshness.is_fresh(message.timestamp, now.timestamp()) {
            return (ReasonCode::ExpiredSignature, None);
        }

        let signer = match self.verifier.verify(
            request.message.as_bytes(),
            &request.signature,
            &request.signer,
        ) {
            Ok(signer) => signer,
            Err(e) => {
                debug!("Signature rejected for {}: {}", request.client_addr, e);
                return (ReasonCode::InvalidSignature, None);
            }
        };

        match self.owners.is_owner(contract, &signer).await {
            Ok(true) => (ReasonCode::Ok, Some(signer)),
            Ok(false) => (ReasonCode::NotOwner, Some(signer)),
            Err(e) => {
                debug!("Owner lookup for {} failed: {}", contract, e);
                (ReasonCode::ChainUnavailable, Some(signer))
            }
        }
    }
}
