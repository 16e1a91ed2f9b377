//! Pure settlement planning: deduplication, second-price selection and
//! balance arithmetic, free of any storage or timing concerns.
//!
//! The engine feeds it the batch and the pre-round balances and persists
//! whatever comes back; keeping this side-effect free makes the auction
//! rules directly unit- and property-testable.

use std::cmp::Reverse;
use std::collections::HashMap;

use crate::broker::types::Bid;

#[derive(Clone, Copy, Debug)]
pub struct RoundPolicy {
    /// Reward credited to each losing unique bidder.
    pub accumulate_balance: i64,
    /// Hard ceiling on any balance.
    pub max_balance: i64,
}

/// Outcome of planning one round.
#[derive(Clone, Debug)]
pub struct RoundPlan {
    /// Unique bids, highest first. The winner is `unique[0]`.
    pub unique: Vec<Bid>,
    /// Second-highest unique amount, or 0 for a single bidder.
    pub clearing: i64,
    /// Sum over unique amounts.
    pub sum: i64,
    /// Post-settlement balance per unique token.
    pub balances: HashMap<String, i64>,
}

impl RoundPlan {
    pub fn winner(&self) -> &Bid {
        &self.unique[0]
    }
}

/// Plans the settlement of a non-empty batch. Returns `None` on an empty
/// batch, which the engine never produces.
///
/// Rules:
/// - One bid per token survives: the strictly largest amount wins the
///   dedup, so on equal amounts the earlier admission is kept.
/// - Unique bids rank by descending amount, then ascending admission
///   index.
/// - The winner pays the clearing price, floored at zero when it exceeds
///   the stored balance.
/// - Every other unique bidder gains `accumulate_balance`, capped at
///   `max_balance`.
pub fn plan_round(
    bids: &[Bid],
    balances_before: &HashMap<String, i64>,
    policy: &RoundPolicy,
) -> Option<RoundPlan> {
    let mut best: HashMap<&str, &Bid> = HashMap::new();
    for bid in bids {
        match best.get(bid.token.as_str()) {
            Some(held) if bid.amount <= held.amount => {}
            _ => {
                best.insert(&bid.token, bid);
            }
        }
    }

    let mut unique: Vec<Bid> = best.into_values().cloned().collect();
    unique.sort_by_key(|b| (Reverse(b.amount), b.seq));

    let winner = unique.first()?.clone();
    let clearing = unique.get(1).map(|b| b.amount).unwrap_or(0);
    let sum = unique.iter().map(|b| b.amount).sum();

    let mut balances = HashMap::with_capacity(unique.len());
    for bid in &unique {
        let before = balances_before.get(&bid.token).copied().unwrap_or(0);
        let after = if bid.token == winner.token {
            (before - clearing).max(0)
        } else {
            (before + policy.accumulate_balance).min(policy.max_balance)
        };
        balances.insert(bid.token.clone(), after);
    }

    Some(RoundPlan {
        unique,
        clearing,
        sum,
        balances,
    })
}
