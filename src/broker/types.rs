use serde::Serialize;

/// A bid admitted to the current batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bid {
    pub token: String,
    pub message: String,
    /// Offered amount, integer balance units. Strictly positive.
    pub amount: i64,
    /// Admission index, strictly monotonic across the broker's lifetime.
    pub seq: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BidStatus {
    Accepted,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStats {
    /// Clearing price the winner paid (second-highest unique bid).
    pub win_bid: i64,
    /// Sum of all unique bids in the round.
    pub sum_bid: i64,
    /// Number of unique bidders.
    pub n_bids: usize,
}

/// Per-token view of a settled round. Every parked request belonging to a
/// token receives the same reply.
#[derive(Clone, Debug, Serialize)]
pub struct RoundReply {
    /// The winning message of the round.
    pub message: String,
    /// This token's balance after settlement.
    pub balance: i64,
    pub name: String,
    pub status: BidStatus,
    pub stats: RoundStats,
}

/// Resolution delivered to a parked request.
#[derive(Clone, Debug)]
pub enum RoundOutcome {
    Settled(RoundReply),
    /// The round was torn down before producing a result
    /// (storage failure or admin reset).
    Aborted,
}
