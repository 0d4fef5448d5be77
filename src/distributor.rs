//! Finalize-once prize distribution
//!
//! Turns a payout table into payout instructions and records them with a
//! single set-if-absent write. A competition moves from NotDistributed to
//! Distributed exactly once; every later call returns the recorded
//! instructions unchanged.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{
    idempotency_key, Address, Competition, CompetitionError, CompetitionKey, PayoutInstruction,
};
use crate::prize::{PayoutError, PayoutTable, PrizeCalculator, PrizeTier, Share};
use crate::storage::{DistributionState, DistributionStore, SetOutcome, StorageError};

const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error(transparent)]
    Payout(#[from] PayoutError),
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[source] StorageError),
    #[error(transparent)]
    Competition(#[from] CompetitionError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Distribution {
    pub competition: CompetitionKey,
    pub instructions: Vec<PayoutInstruction>,
    /// False when the instructions come from an earlier distribution.
    pub newly_recorded: bool,
}

pub struct PrizeDistributor {
    calculator: PrizeCalculator,
    store: Arc<dyn DistributionStore>,
    persist_attempts: u32,
    retry_backoff: Duration,
}

impl PrizeDistributor {
    pub fn new(calculator: PrizeCalculator, store: Arc<dyn DistributionStore>) -> Self {
        Self {
            calculator,
            store,
            persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.persist_attempts = attempts.max(1);
        self.retry_backoff = backoff;
        self
    }

    pub fn calculator(&self) -> &PrizeCalculator {
        &self.calculator
    }

    pub async fn distribute(
        &self,
        competition: &CompetitionKey,
        ranking: &[Address],
        pool: u128,
        tiers: &[PrizeTier],
    ) -> Result<Distribution, DistributionError> {
        let state = self
            .store
            .distribution_state(competition)
            .await
            .map_err(DistributionError::PersistenceUnavailable)?;

        if let DistributionState::Distributed(instructions) = state {
            info!(
                "Competition {} already distributed ({} instructions)",
                competition,
                instructions.len()
            );
            return Ok(Distribution {
                competition: competition.clone(),
                instructions,
                newly_recorded: false,
            });
        }

        let table = self.calculator.compute_payouts(ranking, pool, tiers)?;
        let instructions = build_instructions(competition, &table);

        // Retry the marker write with the same instructions; never recompute.
        let mut attempt = 0;
        let outcome = loop {
            attempt += 1;
            match self.store.set_distributed(competition, &instructions).await {
                Ok(outcome) => break outcome,
                Err(e) if attempt < self.persist_attempts => {
                    warn!(
                        "Persisting distribution for {} failed (attempt {}/{}): {}",
                        competition, attempt, self.persist_attempts, e
                    );
                    tokio::time::sleep(self.retry_backoff * attempt).await;
                }
                Err(e) => return Err(DistributionError::PersistenceUnavailable(e)),
            }
        };

        match outcome {
            SetOutcome::Inserted => {
                info!(
                    "Distributed competition {}: {} payouts totalling {}",
                    competition,
                    instructions.len(),
                    table.total()
                );
                Ok(Distribution {
                    competition: competition.clone(),
                    instructions,
                    newly_recorded: true,
                })
            }
            SetOutcome::AlreadyDistributed(existing) => {
                info!(
                    "Competition {} was distributed concurrently; returning recorded instructions",
                    competition
                );
                Ok(Distribution {
                    competition: competition.clone(),
                    instructions: existing,
                    newly_recorded: false,
                })
            }
        }
    }

    /// Distribute a closed competition using its own ranking and pool.
    pub async fn distribute_competition(
        &self,
        competition: &Competition,
        tiers: &[PrizeTier],
    ) -> Result<Distribution, DistributionError> {
        let ranking = competition.ranking()?;
        self.distribute(&competition.key(), ranking, competition.prize_pool, tiers)
            .await
    }
}

/// One instruction per non-zero payout, in ranking order.
pub fn build_instructions(
    competition: &CompetitionKey,
    table: &PayoutTable,
) -> Vec<PayoutInstruction> {
    table
        .non_zero()
        .filter_map(|p| {
            let tier_id = p.tier_id.as_ref()?;
            Some(PayoutInstruction {
                idempotency_key: idempotency_key(competition, &p.participant, tier_id),
                contract: competition.contract,
                competition_id: competition.id.clone(),
                recipient: p.participant,
                amount: p.amount,
                tier_id: tier_id.clone(),
                rank: p.rank,
            })
        })
        .collect()
}

/// Hex SHA-256 over the inputs a distribution is computed from.
///
/// Admins sign this digest, so a signature authorizes one ranking, pool and
/// tier set. Every field is length- or tag-prefixed.
pub fn distribution_digest(ranking: &[Address], pool: u128, tiers: &[PrizeTier]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((ranking.len() as u64).to_be_bytes());
    for participant in ranking {
        hasher.update(participant.as_bytes());
    }
    hasher.update(pool.to_be_bytes());
    hasher.update((tiers.len() as u64).to_be_bytes());
    for tier in tiers {
        hasher.update((tier.id.len() as u64).to_be_bytes());
        hasher.update(tier.id.as_bytes());
        hasher.update(tier.lower.to_be_bytes());
        match tier.upper {
            Some(upper) => {
                hasher.update([1u8]);
                hasher.update(upper.to_be_bytes());
            }
            None => hasher.update([0u8]),
        }
        match &tier.share {
            Share::Fraction {
                numerator,
                denominator,
            } => {
                hasher.update([0u8]);
                hasher.update(numerator.to_be_bytes());
                hasher.update(denominator.to_be_bytes());
            }
            Share::Fixed { amount } => {
                hasher.update([1u8]);
                hasher.update(amount.to_be_bytes());
            }
        }
    }
    hex::encode(hasher.finalize())
}
