//! Prize pool split
//!
//! Maps a final ranking, a pool amount and a set of prize tiers to a payout
//! table. All arithmetic is integer: fractional shares are floored and the
//! leftover goes to the best-ranked paid participant, so the table always sums
//! to the pool exactly.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{amount, Address};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Share {
    Fraction { numerator: u64, denominator: u64 },
    Fixed {
        #[serde(with = "amount")]
        amount: u128,
    },
}

/// Rule mapping the ranks `lower..=upper` to a share of the pool.
///
/// A tier without `upper` is a catch-all covering every rank from `lower` on.
/// The tier amount is split evenly among the occupied ranks it covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrizeTier {
    pub id: String,
    pub lower: u32,
    #[serde(default)]
    pub upper: Option<u32>,
    pub share: Share,
}

impl PrizeTier {
    pub fn fraction(
        id: impl Into<String>,
        lower: u32,
        upper: u32,
        numerator: u64,
        denominator: u64,
    ) -> Self {
        Self {
            id: id.into(),
            lower,
            upper: Some(upper),
            share: Share::Fraction {
                numerator,
                denominator,
            },
        }
    }

    pub fn fixed(id: impl Into<String>, lower: u32, upper: u32, amount: u128) -> Self {
        Self {
            id: id.into(),
            lower,
            upper: Some(upper),
            share: Share::Fixed { amount },
        }
    }

    pub fn catch_all(id: impl Into<String>, lower: u32, share: Share) -> Self {
        Self {
            id: id.into(),
            lower,
            upper: None,
            share,
        }
    }

    pub fn is_catch_all(&self) -> bool {
        self.upper.is_none()
    }

    pub fn covers(&self, rank: u32) -> bool {
        rank >= self.lower && self.upper.map_or(true, |u| rank <= u)
    }

    /// Ranks of this tier that are occupied in a ranking of `len` participants.
    fn occupied(&self, len: u32) -> u32 {
        if self.lower > len {
            return 0;
        }
        let top = self.upper.map_or(len, |u| u.min(len));
        top - self.lower + 1
    }
}

/// What to do with ranked participants no tier covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoveragePolicy {
    /// Uncovered ranks are paid zero.
    #[default]
    ZeroUncovered,
    /// Every occupied rank must fall in a tier.
    Required,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TierError {
    #[error("tier id must not be empty")]
    EmptyTierId,
    #[error("duplicate tier id: {0}")]
    DuplicateTierId(String),
    #[error("tier {tier} has invalid rank range {lower}..={upper:?}")]
    InvalidRange {
        tier: String,
        lower: u32,
        upper: Option<u32>,
    },
    #[error("tier {0} has a zero denominator")]
    ZeroDenominator(String),
    #[error("tier {0} has a share above 100%")]
    ShareAboveOne(String),
    #[error("tiers {0} and {1} overlap")]
    Overlap(String, String),
    #[error("more than one catch-all tier")]
    MultipleCatchAll,
    #[error("catch-all tier {0} must start above every bounded tier")]
    CatchAllNotLast(String),
    #[error("fractional shares sum to more than 100%")]
    FractionsExceedOne,
    #[error("tiers allocate {allocated} but the pool is {pool}")]
    Overallocated { allocated: u128, pool: u128 },
    #[error("rank {0} is not covered by any tier")]
    UncoveredRank(u32),
    #[error("no ranked participant is covered by a tier")]
    NoCoveredRecipients,
    #[error("arithmetic overflow computing tier amounts")]
    Overflow,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayoutError {
    #[error("invalid tiers: {0}")]
    InvalidTiers(#[from] TierError),
    #[error("participant {0} appears more than once in the ranking")]
    DuplicateParticipant(Address),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub participant: Address,
    pub rank: u32,
    pub tier_id: Option<String>,
    #[serde(with = "amount")]
    pub amount: u128,
}

/// Payouts in ranking order, one row per ranked participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutTable {
    #[serde(with = "amount")]
    pub pool: u128,
    pub payouts: Vec<Payout>,
}

impl PayoutTable {
    pub fn total(&self) -> u128 {
        self.payouts.iter().map(|p| p.amount).sum()
    }

    pub fn amount_for(&self, participant: &Address) -> u128 {
        self.payouts
            .iter()
            .find(|p| &p.participant == participant)
            .map_or(0, |p| p.amount)
    }

    pub fn non_zero(&self) -> impl Iterator<Item = &Payout> {
        self.payouts.iter().filter(|p| p.amount > 0)
    }

    pub fn to_map(&self) -> BTreeMap<Address, u128> {
        self.payouts
            .iter()
            .map(|p| (p.participant, p.amount))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PrizeCalculator {
    policy: CoveragePolicy,
}

impl PrizeCalculator {
    pub fn new(policy: CoveragePolicy) -> Self {
        Self { policy }
    }

    pub fn compute_payouts(
        &self,
        ranking: &[Address],
        pool: u128,
        tiers: &[PrizeTier],
    ) -> Result<PayoutTable, PayoutError> {
        validate_tiers(tiers)?;

        let mut seen = HashSet::with_capacity(ranking.len());
        for participant in ranking {
            if !seen.insert(participant) {
                return Err(PayoutError::DuplicateParticipant(*participant));
            }
        }

        let len = u32::try_from(ranking.len()).map_err(|_| TierError::Overflow)?;

        if self.policy == CoveragePolicy::Required {
            for rank in 1..=len {
                if !tiers.iter().any(|t| t.covers(rank)) {
                    return Err(TierError::UncoveredRank(rank).into());
                }
            }
        }

        let mut tier_amounts = Vec::with_capacity(tiers.len());
        let mut allocated: u128 = 0;
        for tier in tiers {
            let amount = tier_amount(tier, pool)?;
            allocated = allocated.checked_add(amount).ok_or(TierError::Overflow)?;
            tier_amounts.push(amount);
        }
        if allocated > pool {
            return Err(TierError::Overallocated { allocated, pool }.into());
        }

        let mut payouts: Vec<Payout> = ranking
            .iter()
            .enumerate()
            .map(|(i, participant)| Payout {
                participant: *participant,
                rank: i as u32 + 1,
                tier_id: None,
                amount: 0,
            })
            .collect();

        for (tier, tier_total) in tiers.iter().zip(tier_amounts) {
            let occupied = tier.occupied(len);
            if occupied == 0 {
                continue;
            }
            let per_rank = tier_total / occupied as u128;
            let top = tier.upper.map_or(len, |u| u.min(len));
            for rank in tier.lower..=top {
                let payout = &mut payouts[(rank - 1) as usize];
                payout.tier_id = Some(tier.id.clone());
                payout.amount = per_rank;
            }
        }

        let paid: u128 = payouts.iter().map(|p| p.amount).sum();
        let remainder = pool - paid;
        if remainder > 0 {
            let best = payouts
                .iter_mut()
                .find(|p| p.tier_id.is_some())
                .ok_or(TierError::NoCoveredRecipients)?;
            best.amount += remainder;
        }

        Ok(PayoutTable { pool, payouts })
    }
}

fn tier_amount(tier: &PrizeTier, pool: u128) -> Result<u128, TierError> {
    match tier.share {
        Share::Fraction {
            numerator,
            denominator,
        } => {
            let scaled = (numerator as u128)
                .checked_mul(pool)
                .ok_or(TierError::Overflow)?;
            Ok(scaled / denominator as u128)
        }
        Share::Fixed { amount } => Ok(amount),
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Structural checks that do not depend on the ranking or the pool.
pub fn validate_tiers(tiers: &[PrizeTier]) -> Result<(), TierError> {
    let mut ids = HashSet::with_capacity(tiers.len());
    for tier in tiers {
        if tier.id.is_empty() {
            return Err(TierError::EmptyTierId);
        }
        if !ids.insert(tier.id.as_str()) {
            return Err(TierError::DuplicateTierId(tier.id.clone()));
        }
        if tier.lower == 0 || tier.upper.is_some_and(|u| u < tier.lower) {
            return Err(TierError::InvalidRange {
                tier: tier.id.clone(),
                lower: tier.lower,
                upper: tier.upper,
            });
        }
        if let Share::Fraction {
            numerator,
            denominator,
        } = tier.share
        {
            if denominator == 0 {
                return Err(TierError::ZeroDenominator(tier.id.clone()));
            }
            if numerator > denominator {
                return Err(TierError::ShareAboveOne(tier.id.clone()));
            }
        }
    }

    let catch_alls: Vec<&PrizeTier> = tiers.iter().filter(|t| t.is_catch_all()).collect();
    if catch_alls.len() > 1 {
        return Err(TierError::MultipleCatchAll);
    }

    let mut bounded: Vec<&PrizeTier> = tiers.iter().filter(|t| !t.is_catch_all()).collect();
    bounded.sort_by_key(|t| t.lower);
    for pair in bounded.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if a.upper.is_some_and(|u| u >= b.lower) {
            return Err(TierError::Overlap(a.id.clone(), b.id.clone()));
        }
    }
    if let Some(catch_all) = catch_alls.first() {
        if let Some(last) = bounded.last() {
            if last.upper.is_some_and(|u| u >= catch_all.lower) {
                return Err(TierError::CatchAllNotLast(catch_all.id.clone()));
            }
        }
    }

    // Exact rational sum of fractional shares, kept reduced.
    let (mut num, mut den): (u128, u128) = (0, 1);
    for tier in tiers {
        if let Share::Fraction {
            numerator,
            denominator,
        } = tier.share
        {
            let (n, d) = (numerator as u128, denominator as u128);
            let new_num = num
                .checked_mul(d)
                .and_then(|x| n.checked_mul(den).and_then(|y| x.checked_add(y)))
                .ok_or(TierError::Overflow)?;
            let new_den = den.checked_mul(d).ok_or(TierError::Overflow)?;
            let g = gcd(new_num, new_den).max(1);
            num = new_num / g;
            den = new_den / g;
            if num > den {
                return Err(TierError::FractionsExceedOne);
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes([n; 20])
    }

    fn podium() -> Vec<PrizeTier> {
        vec![
            PrizeTier::fraction("gold", 1, 1, 50, 100),
            PrizeTier::fraction("silver", 2, 2, 30, 100),
            PrizeTier::fraction("bronze", 3, 3, 20, 100),
        ]
    }

    #[test]
    fn test_podium_split() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let table = PrizeCalculator::default()
            .compute_payouts(&[a, b, c], 1000, &podium())
            .unwrap();
        assert_eq!(table.to_map(), BTreeMap::from([(a, 500), (b, 300), (c, 200)]));
    }

    #[test]
    fn test_flooring_remainder_goes_to_first_place() {
        let (a, b, c) = (addr(1), addr(2), addr(3));
        let table = PrizeCalculator::default()
            .compute_payouts(&[a, b, c], 1001, &podium())
            .unwrap();
        assert_eq!(table.to_map(), BTreeMap::from([(a, 501), (b, 300), (c, 200)]));
        assert_eq!(table.total(), 1001);
    }

    #[test]
    fn test_range_tier_splits_evenly() {
        let ranking: Vec<Address> = (1..=5).map(addr).collect();
        let tiers = vec![
            PrizeTier::fraction("winner", 1, 1, 1, 2),
            PrizeTier::fraction("finalists", 2, 5, 1, 2),
        ];
        let table = PrizeCalculator::default()
            .compute_payouts(&ranking, 1003, &tiers)
            .unwrap();
        // flooring leaves 2 units over, both go to the winner
        assert_eq!(table.amount_for(&addr(1)), 1003 - 4 * 125);
        for n in 2..=5 {
            assert_eq!(table.amount_for(&addr(n)), 125);
        }
    }

    #[test]
    fn test_uncovered_ranks_get_zero_by_default() {
        let ranking: Vec<Address> = (1..=5).map(addr).collect();
        let table = PrizeCalculator::default()
            .compute_payouts(&ranking, 1000, &podium())
            .unwrap();
        assert_eq!(table.amount_for(&addr(4)), 0);
        assert_eq!(table.amount_for(&addr(5)), 0);
        assert_eq!(table.payouts[4].tier_id, None);
        assert_eq!(table.non_zero().count(), 3);
        assert_eq!(table.total(), 1000);
    }

    #[test]
    fn test_required_coverage_rejects_uncovered() {
        let ranking: Vec<Address> = (1..=4).map(addr).collect();
        let err = PrizeCalculator::new(CoveragePolicy::Required)
            .compute_payouts(&ranking, 1000, &podium())
            .unwrap_err();
        assert_eq!(err, PayoutError::InvalidTiers(TierError::UncoveredRank(4)));
    }

    #[test]
    fn test_catch_all_covers_the_tail() {
        let ranking: Vec<Address> = (1..=6).map(addr).collect();
        let mut tiers = podium();
        tiers[0] = PrizeTier::fraction("gold", 1, 1, 40, 100);
        tiers.push(PrizeTier::catch_all(
            "participation",
            4,
            Share::Fraction {
                numerator: 1,
                denominator: 10,
            },
        ));
        let table = PrizeCalculator::new(CoveragePolicy::Required)
            .compute_payouts(&ranking, 900, &tiers)
            .unwrap();
        assert_eq!(table.amount_for(&addr(4)), 30);
        assert_eq!(table.amount_for(&addr(6)), 30);
        assert_eq!(table.total(), 900);
    }

    #[test]
    fn test_fixed_and_fraction_mix() {
        let ranking = vec![addr(1), addr(2)];
        let tiers = vec![
            PrizeTier::fraction("winner", 1, 1, 1, 2),
            PrizeTier::fixed("runner-up", 2, 2, 100),
        ];
        let table = PrizeCalculator::default()
            .compute_payouts(&ranking, 1000, &tiers)
            .unwrap();
        assert_eq!(table.amount_for(&addr(1)), 900);
        assert_eq!(table.amount_for(&addr(2)), 100);
    }

    #[test]
    fn test_overallocation_rejected() {
        let tiers = vec![
            PrizeTier::fraction("winner", 1, 1, 9, 10),
            PrizeTier::fixed("runner-up", 2, 2, 200),
        ];
        let err = PrizeCalculator::default()
            .compute_payouts(&[addr(1), addr(2)], 1000, &tiers)
            .unwrap_err();
        assert_eq!(
            err,
            PayoutError::InvalidTiers(TierError::Overallocated {
                allocated: 1100,
                pool: 1000
            })
        );
    }

    #[test]
    fn test_structural_validation() {
        let overlap = vec![
            PrizeTier::fraction("a", 1, 2, 1, 4),
            PrizeTier::fraction("b", 2, 3, 1, 4),
        ];
        assert_eq!(
            validate_tiers(&overlap),
            Err(TierError::Overlap("a".into(), "b".into()))
        );

        let too_much = vec![
            PrizeTier::fraction("a", 1, 1, 2, 3),
            PrizeTier::fraction("b", 2, 2, 1, 2),
        ];
        assert_eq!(validate_tiers(&too_much), Err(TierError::FractionsExceedOne));

        let exactly_one = vec![
            PrizeTier::fraction("a", 1, 1, 1, 3),
            PrizeTier::fraction("b", 2, 2, 2, 3),
        ];
        assert_eq!(validate_tiers(&exactly_one), Ok(()));

        assert!(matches!(
            validate_tiers(&[PrizeTier::fraction("a", 0, 1, 1, 2)]),
            Err(TierError::InvalidRange { .. })
        ));
        assert_eq!(
            validate_tiers(&[PrizeTier::fraction("a", 1, 1, 1, 0)]),
            Err(TierError::ZeroDenominator("a".into()))
        );
        assert_eq!(
            validate_tiers(&[
                PrizeTier::fraction("a", 1, 1, 1, 4),
                PrizeTier::fraction("a", 2, 2, 1, 4),
            ]),
            Err(TierError::DuplicateTierId("a".into()))
        );

        let tail = Share::Fixed { amount: 1 };
        assert_eq!(
            validate_tiers(&[
                PrizeTier::catch_all("x", 2, tail.clone()),
                PrizeTier::fraction("a", 1, 3, 1, 4),
            ]),
            Err(TierError::CatchAllNotLast("x".into()))
        );
        assert_eq!(
            validate_tiers(&[
                PrizeTier::catch_all("x", 5, tail.clone()),
                PrizeTier::catch_all("y", 9, tail),
            ]),
            Err(TierError::MultipleCatchAll)
        );
    }

    #[test]
    fn test_duplicate_participant_rejected() {
        let err = PrizeCalculator::default()
            .compute_payouts(&[addr(1), addr(1)], 10, &podium())
            .unwrap_err();
        assert_eq!(err, PayoutError::DuplicateParticipant(addr(1)));
    }

    #[test]
    fn test_no_covered_recipient() {
        let tiers = vec![PrizeTier::fraction("late", 5, 5, 1, 1)];
        let err = PrizeCalculator::default()
            .compute_payouts(&[addr(1), addr(2)], 10, &tiers)
            .unwrap_err();
        assert_eq!(err, PayoutError::InvalidTiers(TierError::NoCoveredRecipients));

        // nothing to hand out, nothing to complain about
        let table = PrizeCalculator::default()
            .compute_payouts(&[], 0, &podium())
            .unwrap();
        assert!(table.payouts.is_empty());
    }

    #[test]
    fn test_huge_pool_does_not_overflow() {
        let pool = 10u128.pow(30);
        let table = PrizeCalculator::default()
            .compute_payouts(&[addr(1), addr(2), addr(3)], pool, &podium())
            .unwrap();
        assert_eq!(table.total(), pool);
        assert_eq!(table.amount_for(&addr(2)), pool / 100 * 30);
    }

    #[test]
    fn test_tier_config_deserializes() {
        let tier: PrizeTier = serde_json::from_value(serde_json::json!({
            "id": "gold",
            "lower": 1,
            "upper": 1,
            "share": { "kind": "fraction", "numerator": 1, "denominator": 2 }
        }))
        .unwrap();
        assert_eq!(tier, PrizeTier::fraction("gold", 1, 1, 1, 2));

        let tail: PrizeTier = serde_json::from_value(serde_json::json!({
            "id": "rest",
            "lower": 4,
            "share": { "kind": "fixed", "amount": "250" }
        }))
        .unwrap();
        assert!(tail.is_catch_all());
        assert_eq!(tail.share, Share::Fixed { amount: 250 });
    }

    /// Disjoint tiers covering ranks 1..=N with weights summing to at most 1.
    fn covering_tiers() -> impl Strategy<Value = (Vec<PrizeTier>, u32)> {
        (prop::collection::vec((1u32..4, 0u64..100), 1..8), 0u64..50).prop_map(
            |(specs, slack)| {
                let total_weight: u64 = specs.iter().map(|(_, w)| *w).sum::<u64>() + slack;
                let denominator = total_weight.max(1);
                let mut lower = 1;
                let tiers = specs
                    .iter()
                    .enumerate()
                    .map(|(i, (size, weight))| {
                        let tier = PrizeTier::fraction(
                            format!("t{}", i),
                            lower,
                            lower + size - 1,
                            *weight,
                            denominator,
                        );
                        lower += size;
                        tier
                    })
                    .collect();
                (tiers, lower - 1)
            },
        )
    }

    proptest! {
        #[test]
        fn prop_payouts_conserve_pool(
            (tiers, covered) in covering_tiers(),
            extra in 0u32..5,
            pool in 0u128..10_000_000_000_000u128,
        ) {
            let len = covered + extra;
            let ranking: Vec<Address> = (0..len)
                .map(|i| {
                    let mut bytes = [0u8; 20];
                    bytes[..4].copy_from_slice(&i.to_be_bytes());
                    Address::from_bytes(bytes)
                })
                .collect();

            let table = PrizeCalculator::default()
                .compute_payouts(&ranking, pool, &tiers)
                .unwrap();

            prop_assert_eq!(table.total(), pool);
            for payout in &table.payouts {
                if payout.rank > covered {
                    prop_assert_eq!(payout.amount, 0);
                }
            }
        }

        #[test]
        fn prop_compute_is_deterministic(
            (tiers, covered) in covering_tiers(),
            pool in 0u128..1_000_000u128,
        ) {
            let ranking: Vec<Address> = (0..covered).map(|i| addr(i as u8)).collect();
            let calc = PrizeCalculator::default();
            prop_assert_eq!(
                calc.compute_payouts(&ranking, pool, &tiers),
                calc.compute_payouts(&ranking, pool, &tiers)
            );
        }
    }
}
