//! Geo Prize - admin authorization and prize distribution
//!
//! Privileged actions on a competition are signed by the wallet that owns the
//! competition's contract on chain. The prize pool of a closed competition is
//! split across its ranking by tiers and turned into payout instructions that
//! are recorded exactly once.
//!
//! # Request flow
//!
//! 1. The admin signs `geo-admin:<route>:<contract>:<target>:<payload>:<unix_timestamp>`,
//!    where `payload` is the digest of the distribution inputs
//! 2. The gate binds the message to the requested contract and body, throttles
//!    the caller, checks the timestamp, recovers the signer and asks the chain
//!    for the contract owner
//! 3. Every decision is written to the audit log
//! 4. Allowed distributions compute payouts and persist them with a
//!    set-if-absent write, so repeated calls return the same instructions

pub mod audit;
pub mod auth;
pub mod chain;
pub mod config;
pub mod distributor;
pub mod error;
pub mod gate;
pub mod model;
pub mod pg_storage;
pub mod prize;
pub mod rate_limit;
pub mod server;
pub mod storage;

pub use audit::{AuditAck, AuditEntry, AuditLog, ReasonCode};
pub use auth::{AdminMessage, FreshnessWindow, SignatureVerifier};
pub use chain::{ChainReader, JsonRpcChain, Network, OwnerAuthority, StaticChain};
pub use distributor::{distribution_digest, Distribution, DistributionError, PrizeDistributor};
pub use error::ErrorCategory;
pub use gate::{AdminGate, AuthorizationDecision, AuthorizationRequest, ContractRegistry, Outcome};
pub use model::{Address, Competition, CompetitionKey, CompetitionState, PayoutInstruction};
pub use prize::{CoveragePolicy, PayoutTable, PrizeCalculator, PrizeTier, Share};
pub use rate_limit::{RateLimit, RateLimiter};
pub use storage::{MemoryStore, SqliteStore};
