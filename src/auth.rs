//! Authentication primitives
//!
//! - Canonical admin message format
//! - Signature freshness window
//! - secp256k1 signer recovery (EIP-191 personal_sign)

use std::fmt;

use libsecp256k1::{Message, RecoveryId, Signature};
use sha3::{Digest, Keccak256};
use thiserror::Error;
use tracing::debug;

use crate::model::{Address, AddressError};

const MESSAGE_PREFIX: &str = "geo-admin";
const SIGNATURE_LEN: usize = 65;

// ============================================================================
// ADMIN MESSAGE
// ============================================================================

/// Message an admin signs to perform `route` on `target` within `contract`.
///
/// `payload` is the digest of the request body the signature authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminMessage {
    pub route: String,
    pub contract: Address,
    pub target: String,
    pub payload: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error(
        "message must have the form geo-admin:<route>:<contract>:<target>:<payload>:<timestamp>"
    )]
    Malformed,
    #[error("invalid contract address: {0}")]
    InvalidContract(#[from] AddressError),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("route, target and payload must be non-empty and must not contain ':'")]
    InvalidField,
}

impl AdminMessage {
    pub fn new(
        route: impl Into<String>,
        contract: Address,
        target: impl Into<String>,
        payload: impl Into<String>,
        timestamp: i64,
    ) -> Result<Self, MessageError> {
        let msg = Self {
            route: route.into(),
            contract,
            target: target.into(),
            payload: payload.into(),
            timestamp,
        };
        if [&msg.route, &msg.target, &msg.payload]
            .iter()
            .any(|field| !is_valid_field(field))
        {
            return Err(MessageError::InvalidField);
        }
        Ok(msg)
    }

    pub fn parse(message: &str) -> Result<Self, MessageError> {
        let parts: Vec<&str> = message.split(':').collect();
        match parts.as_slice() {
            [prefix, route, contract, target, payload, ts] if *prefix == MESSAGE_PREFIX => {
                let contract: Address = contract.parse()?;
                let timestamp = ts
                    .parse::<i64>()
                    .map_err(|_| MessageError::InvalidTimestamp(ts.to_string()))?;
                Self::new(*route, contract, *target, *payload, timestamp)
            }
            _ => Err(MessageError::Malformed),
        }
    }
}

impl fmt::Display for AdminMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}:{}:{}",
            MESSAGE_PREFIX, self.route, self.contract, self.target, self.payload, self.timestamp
        )
    }
}

fn is_valid_field(s: &str) -> bool {
    !s.is_empty() && !s.contains(':')
}

// ============================================================================
// FRESHNESS
// ============================================================================

/// Accepted age of a signed message.
///
/// Timestamps older than `max_age_secs` are stale. Timestamps ahead of `now`
/// are tolerated only up to `max_future_secs` of clock drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessWindow {
    pub max_age_secs: i64,
    pub max_future_secs: i64,
}

impl Default for FreshnessWindow {
    fn default() -> Self {
        Self {
            max_age_secs: 5 * 60,
            max_future_secs: 30,
        }
    }
}

impl FreshnessWindow {
    pub fn is_fresh(&self, timestamp: i64, now: i64) -> bool {
        let age = now.saturating_sub(timestamp);
        age <= self.max_age_secs && -age <= self.max_future_secs
    }
}

// ============================================================================
// SIGNATURE VERIFIER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature is not valid hex")]
    InvalidHex,
    #[error("invalid signature length: {0} (expected 65)")]
    InvalidLength(usize),
    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),
    #[error("malformed signature")]
    Malformed,
    #[error("non-canonical signature (high s)")]
    HighS,
    #[error("public key recovery failed")]
    RecoveryFailed,
    #[error("recovered signer {recovered} does not match claimed signer {claimed}")]
    SignerMismatch { claimed: Address, recovered: Address },
}

/// Recovers signers of EIP-191 `personal_sign` messages.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureVerifier;

impl SignatureVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Recover the address that produced `signature_hex` over `message`.
    pub fn recover(&self, message: &[u8], signature_hex: &str) -> Result<Address, SignatureError> {
        let sig_hex = signature_hex.trim();
        let sig_hex = sig_hex
            .strip_prefix("0x")
            .or_else(|| sig_hex.strip_prefix("0X"))
            .unwrap_or(sig_hex);

        let sig_bytes = hex::decode(sig_hex).map_err(|e| {
            debug!("Failed to decode signature hex: {}", e);
            SignatureError::InvalidHex
        })?;

        if sig_bytes.len() != SIGNATURE_LEN {
            debug!(
                "Invalid signature length: {} (expected {})",
                sig_bytes.len(),
                SIGNATURE_LEN
            );
            return Err(SignatureError::InvalidLength(sig_bytes.len()));
        }

        let v = sig_bytes[64];
        let rid = match v {
            0 | 1 => v,
            27 | 28 => v - 27,
            other => return Err(SignatureError::InvalidRecoveryId(other)),
        };
        let rid = RecoveryId::parse(rid).map_err(|_| SignatureError::InvalidRecoveryId(v))?;

        let mut rs = [0u8; 64];
        rs.copy_from_slice(&sig_bytes[..64]);
        let signature = Signature::parse_standard(&rs).map_err(|_| SignatureError::Malformed)?;
        if signature.r.is_zero() || signature.s.is_zero() {
            return Err(SignatureError::Malformed);
        }
        if signature.s.is_high() {
            return Err(SignatureError::HighS);
        }

        let digest = Message::parse(&personal_message_hash(message));
        let public_key = libsecp256k1::recover(&digest, &signature, &rid)
            .map_err(|_| SignatureError::RecoveryFailed)?;

        Ok(address_from_uncompressed(&public_key.serialize()))
    }

    /// Recover the signer and require it to be `claimed`.
    pub fn verify(
        &self,
        message: &[u8],
        signature_hex: &str,
        claimed: &Address,
    ) -> Result<Address, SignatureError> {
        let recovered = self.recover(message, signature_hex)?;
        if &recovered != claimed {
            debug!("Signer mismatch: claimed {}, recovered {}", claimed, recovered);
            return Err(SignatureError::SignerMismatch {
                claimed: *claimed,
                recovered,
            });
        }
        Ok(recovered)
    }
}

/// keccak256("\x19Ethereum Signed Message:\n" ++ len ++ message)
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Address of a 65-byte uncompressed secp256k1 public key.
pub fn address_from_uncompressed(public_key: &[u8; 65]) -> Address {
    let hash = Keccak256::digest(&public_key[1..]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Address::from_bytes(out)
}

/// Sign `message` the way a wallet's personal_sign does. Used by tooling and tests.
pub fn sign_personal_message(message: &[u8], secret: &libsecp256k1::SecretKey) -> String {
    let digest = Message::parse(&personal_message_hash(message));
    let (signature, rid) = libsecp256k1::sign(&digest, secret);
    let mut out = Vec::with_capacity(SIGNATURE_LEN);
    out.extend_from_slice(&signature.serialize());
    out.push(rid.serialize() + 27);
    format!("0x{}", hex::encode(out))
}

pub fn address_of(secret: &libsecp256k1::SecretKey) -> Address {
    let public_key = libsecp256k1::PublicKey::from_secret_key(secret);
    address_from_uncompressed(&public_key.serialize())
}
