//! Core data model
//!
//! - Account addresses
//! - Competitions, entries and their lifecycle
//! - Payout instructions handed to the payment executor

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

// ============================================================================
// ADDRESS
// ============================================================================

/// 20-byte account address.
///
/// Parsing accepts any hex casing, display is always lowercase, so two addresses
/// that differ only in checksum casing compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 20]);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address must be 0x-prefixed")]
    MissingPrefix,
    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),
    #[error("address is not valid hex: {0}")]
    InvalidHex(String),
}

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let hex_part = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressError::MissingPrefix)?;

        if hex_part.len() != 40 {
            return Err(AddressError::InvalidLength(hex_part.len() / 2));
        }

        let bytes = hex::decode(hex_part).map_err(|e| AddressError::InvalidHex(e.to_string()))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// AMOUNTS
// ============================================================================

/// Serde for `u128` amounts: written as decimal strings, read from strings or numbers.
pub mod amount {
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
            Repr::Number(n) => Ok(n as u128),
        }
    }
}

// ============================================================================
// COMPETITION
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompetitionState {
    Created,
    Active,
    Closed,
    Finalized,
    Cancelled,
}

impl CompetitionState {
    pub fn can_transition_to(self, next: CompetitionState) -> bool {
        use CompetitionState::*;
        matches!(
            (self, next),
            (Created, Active)
                | (Active, Closed)
                | (Closed, Finalized)
                | (Created, Cancelled)
                | (Active, Cancelled)
        )
    }

    pub fn has_ranking(self) -> bool {
        matches!(self, CompetitionState::Closed | CompetitionState::Finalized)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub participant: Address,
    pub score: u64,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompetitionError {
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: CompetitionState,
        to: CompetitionState,
    },
    #[error("participant {0} already has an entry")]
    DuplicateEntry(Address),
    #[error("entries can only be added while active (state: {0:?})")]
    NotAcceptingEntries(CompetitionState),
    #[error("ranking is not available in state {0:?}")]
    RankingUnavailable(CompetitionState),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Competition {
    pub id: String,
    pub contract: Address,
    #[serde(with = "amount")]
    pub prize_pool: u128,
    state: CompetitionState,
    entries: Vec<Entry>,
    ranking: Vec<Address>,
}

impl Competition {
    pub fn new(id: impl Into<String>, contract: Address, prize_pool: u128) -> Self {
        Self {
            id: id.into(),
            contract,
            prize_pool,
            state: CompetitionState::Created,
            entries: Vec::new(),
            ranking: Vec::new(),
        }
    }

    pub fn state(&self) -> CompetitionState {
        self.state
    }

    pub fn key(&self) -> CompetitionKey {
        CompetitionKey::new(self.contract, self.id.clone())
    }

    /// Final ranking, best first. Only defined once the competition is closed.
    pub fn ranking(&self) -> Result<&[Address], CompetitionError> {
        if self.state.has_ranking() {
            Ok(&self.ranking)
        } else {
            Err(CompetitionError::RankingUnavailable(self.state))
        }
    }

    pub fn add_entry(&mut self, entry: Entry) -> Result<(), CompetitionError> {
        if self.state != CompetitionState::Active {
            return Err(CompetitionError::NotAcceptingEntries(self.state));
        }
        if self.entries.iter().any(|e| e.participant == entry.participant) {
            return Err(CompetitionError::DuplicateEntry(entry.participant));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Apply a state change observed on chain.
    pub fn transition(&mut self, next: CompetitionState) -> Result<(), CompetitionError> {
        if !self.state.can_transition_to(next) {
            return Err(CompetitionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        if next == CompetitionState::Closed {
            self.ranking = rank_entries(&self.entries);
        }
        self.state = next;
        Ok(())
    }
}

/// Score descending, then earliest submission, then address.
pub fn rank_entries(entries: &[Entry]) -> Vec<Address> {
    let mut sorted: Vec<&Entry> = entries.iter().collect();
    sorted.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.submitted_at.cmp(&b.submitted_at))
            .then_with(|| a.participant.cmp(&b.participant))
    });

    let mut seen = HashSet::with_capacity(sorted.len());
    sorted
        .into_iter()
        .filter(|e| seen.insert(e.participant))
        .map(|e| e.participant)
        .collect()
}

// ============================================================================
// PAYOUT INSTRUCTIONS
// ============================================================================

/// A competition is only unique within the contract that runs it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompetitionKey {
    pub contract: Address,
    pub id: String,
}

impl CompetitionKey {
    pub fn new(contract: Address, id: impl Into<String>) -> Self {
        Self {
            contract,
            id: id.into(),
        }
    }
}

impl fmt::Display for CompetitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.contract, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutInstruction {
    pub idempotency_key: String,
    pub contract: Address,
    pub competition_id: String,
    pub recipient: Address,
    #[serde(with = "amount")]
    pub amount: u128,
    pub tier_id: String,
    pub rank: u32,
}

/// Deterministic key for one (contract, competition, recipient, tier) payout.
pub fn idempotency_key(competition: &CompetitionKey, recipient: &Address, tier_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(competition.contract.as_bytes());
    hasher.update([0u8]);
    hasher.update(competition.id.as_bytes());
    hasher.update([0u8]);
    hasher.update(recipient.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(tier_id.as_bytes());
    hex::encode(hasher.finalize())
}
