//! Serialized round state machine: bid intake, settlement, reset.
//!
//! Responsibilities:
//! - Admit concurrent bid submissions into the current batch and park each
//!   caller until the batch settles.
//! - Trigger settlement on the batch threshold or on the round alarm,
//!   whichever comes first, exactly once per batch.
//! - Apply second-price settlement: the highest unique bid wins and pays
//!   the second-highest; losers collect the accumulate reward.
//! - Commit balances and the winning message in one atomic multi-put and
//!   resolve every parked request with its token's view of the round.
//!
//! Non-responsibilities:
//! - Client registration and balance reads (`registry`).
//! - Replay of the message log (`journal`).
//!
//! Every mutating path (admission, both settlement triggers, reset) locks
//! the single round mutex for its full duration; that lock is the
//! serialization discipline, and holding it across storage awaits is what
//! makes settlement atomic with respect to incoming bids and the alarm.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::broker::alarm::RoundAlarm;
use crate::broker::plan::{RoundPolicy, plan_round};
use crate::broker::types::{Bid, BidStatus, RoundOutcome, RoundReply, RoundStats};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::journal::AcceptedMessage;
use crate::logger::warn_if_slow;
use crate::metrics::counters::Counters;
use crate::registry::parse_balance;
use crate::storage::{
    BALANCE_PREFIX, ListQuery, MESSAGE_PREFIX, NAME_PREFIX, Storage, balance_key, name_key,
};
use crate::time::now_ms;

#[derive(Clone, Copy, Debug)]
pub struct RoundConfig {
    /// Batch size that triggers immediate settlement.
    pub batch_threshold: usize,
    /// Alarm delay from the first admission of a batch.
    pub round_timeout: Duration,
    pub policy: RoundPolicy,
}

impl RoundConfig {
    pub fn from_app(cfg: &AppConfig) -> Self {
        Self {
            batch_threshold: cfg.batch_threshold,
            round_timeout: Duration::from_millis(cfg.round_timeout_ms),
            policy: RoundPolicy {
                accumulate_balance: cfg.accumulate_balance,
                max_balance: cfg.max_balance,
            },
        }
    }
}

/// A response withheld until the batch it belongs to settles.
struct ParkedRequest {
    token: String,
    resolver: oneshot::Sender<RoundOutcome>,
}

/// Everything the round lock guards.
struct RoundState {
    bids: Vec<Bid>,
    parked: Vec<ParkedRequest>,
    alarm: RoundAlarm,
    next_seq: u64,
}

impl RoundState {
    fn new() -> Self {
        Self {
            bids: Vec::new(),
            parked: Vec::new(),
            alarm: RoundAlarm::new(),
            next_seq: 0,
        }
    }
}

pub struct Broker {
    storage: Arc<dyn Storage>,
    cfg: RoundConfig,
    state: Mutex<RoundState>,
    counters: Counters,
}

impl Broker {
    pub fn new(storage: Arc<dyn Storage>, cfg: RoundConfig, counters: Counters) -> Self {
        Self {
            storage,
            cfg,
            state: Mutex::new(RoundState::new()),
            counters,
        }
    }

    /// Number of bids in the current batch.
    pub async fn batch_size(&self) -> usize {
        self.state.lock().await.bids.len()
    }

    /// Whether the round alarm is armed. Holds exactly when the batch is
    /// non-empty.
    pub async fn alarm_armed(&self) -> bool {
        self.state.lock().await.alarm.is_armed()
    }

    /// Admits a bid and waits for the settlement of the batch it joins.
    ///
    /// Validation failures surface immediately as `BadRequest` and leave
    /// the batch untouched. The stored balance check here is advisory;
    /// settlement recomputes against whatever is stored at that point.
    #[instrument(skip(self, token, message), target = "broker")]
    pub async fn submit(
        self: &Arc<Self>,
        token: &str,
        message: &str,
        amount: i64,
    ) -> Result<RoundReply, AppError> {
        if message.is_empty() {
            self.counters.bids_rejected.fetch_add(1, Relaxed);
            return Err(AppError::bad_request("Missing message or bid"));
        }
        if amount <= 0 {
            self.counters.bids_rejected.fetch_add(1, Relaxed);
            return Err(AppError::bad_request("Bid must be a positive number"));
        }

        let resolution = {
            let mut state = self.state.lock().await;

            let stored = self
                .storage
                .get(&balance_key(token))
                .await
                .context("failed to load bidder balance")?;
            let balance = match stored {
                Some(raw) => parse_balance(&raw)?,
                None => {
                    self.counters.bids_rejected.fetch_add(1, Relaxed);
                    return Err(AppError::bad_request("Invalid token"));
                }
            };
            if balance < amount {
                self.counters.bids_rejected.fetch_add(1, Relaxed);
                return Err(AppError::bad_request("Insufficient balance"));
            }

            let seq = state.next_seq;
            state.next_seq += 1;
            state.bids.push(Bid {
                token: token.to_string(),
                message: message.to_string(),
                amount,
                seq,
            });
            self.counters.bids_admitted.fetch_add(1, Relaxed);

            if state.bids.len() == 1 {
                let broker = Arc::clone(self);
                state
                    .alarm
                    .arm(self.cfg.round_timeout, async move { broker.on_alarm().await });
            }

            let (resolver, resolution) = oneshot::channel();
            state.parked.push(ParkedRequest {
                token: token.to_string(),
                resolver,
            });

            debug!(batch = state.bids.len(), seq, "bid admitted");

            if state.bids.len() >= self.cfg.batch_threshold {
                self.settle(&mut state).await;
            }

            resolution
        };

        match resolution.await {
            Ok(RoundOutcome::Settled(reply)) => Ok(reply),
            Ok(RoundOutcome::Aborted) | Err(_) => Err(AppError::Internal(anyhow!(
                "round aborted before this bid settled"
            ))),
        }
    }

    /// Alarm entry point: settles an underfull batch once the round
    /// timeout elapses. Finding an empty batch means a threshold
    /// settlement won the race, which is benign.
    async fn on_alarm(self: Arc<Self>) {
        let mut state = self.state.lock().await;

        if state.bids.is_empty() {
            self.counters.alarm_noop.fetch_add(1, Relaxed);
            debug!("alarm fired on empty batch");
            return;
        }

        self.counters.alarm_fired.fetch_add(1, Relaxed);
        self.settle(&mut state).await;
    }

    /// Settles the current batch. Callers hold the round lock, which is
    /// what guarantees exactly-once settlement and rejects re-entry.
    async fn settle(&self, state: &mut RoundState) {
        state.alarm.cancel();

        let round_id = Uuid::new_v4();

        let settled = self.run_settlement(round_id, &state.bids).await;

        match settled {
            Ok(replies) => {
                self.counters.rounds_settled.fetch_add(1, Relaxed);

                for parked in state.parked.drain(..) {
                    let outcome = match replies.get(&parked.token) {
                        Some(reply) => RoundOutcome::Settled(reply.clone()),
                        None => RoundOutcome::Aborted,
                    };
                    // A closed receiver means the caller went away; the
                    // round result stands regardless.
                    let _ = parked.resolver.send(outcome);
                }
            }
            Err(e) => {
                error!(%round_id, error = ?e, "settlement failed; aborting round");
                self.counters.rounds_aborted.fetch_add(1, Relaxed);

                for parked in state.parked.drain(..) {
                    let _ = parked.resolver.send(RoundOutcome::Aborted);
                }
            }
        }

        state.bids.clear();
    }

    /// Pure plan plus its two storage round-trips: one multi-get of the
    /// bidders' rows, one multi-put committing balances and the accepted
    /// message together.
    async fn run_settlement(
        &self,
        round_id: Uuid,
        bids: &[Bid],
    ) -> Result<HashMap<String, RoundReply>> {
        let mut tokens: Vec<String> = bids.iter().map(|b| b.token.clone()).collect();
        tokens.sort();
        tokens.dedup();

        let mut keys = Vec::with_capacity(tokens.len() * 2);
        for token in &tokens {
            keys.push(balance_key(token));
            keys.push(name_key(token));
        }
        let rows = warn_if_slow("load_round_clients", Duration::from_millis(100), async {
            self.storage.get_many(&keys).await
        })
        .await
        .context("failed to load round clients")?;

        let mut balances_before = HashMap::with_capacity(tokens.len());
        let mut names = HashMap::with_capacity(tokens.len());
        for token in &tokens {
            // A missing balance row can only follow an admin reset that
            // raced this batch; the round still completes, settling from 0.
            let balance = match rows.get(&balance_key(token)) {
                Some(raw) => parse_balance(raw)?,
                None => {
                    warn!(%round_id, "bidder vanished mid-round; settling from zero");
                    0
                }
            };
            balances_before.insert(token.clone(), balance);
            names.insert(
                token.clone(),
                rows.get(&name_key(token)).cloned().unwrap_or_default(),
            );
        }

        let Some(plan) = plan_round(bids, &balances_before, &self.cfg.policy) else {
            bail!("settlement invoked on an empty batch");
        };
        let winner = plan.winner().clone();

        let accepted = AcceptedMessage::new(
            winner.message.clone(),
            winner.token.clone(),
            names.get(&winner.token).cloned().unwrap_or_default(),
        );

        let mut entries: Vec<(String, String)> = plan
            .balances
            .iter()
            .map(|(token, balance)| (balance_key(token), balance.to_string()))
            .collect();
        entries.push(accepted.to_entry(now_ms())?);

        warn_if_slow("commit_round", Duration::from_millis(100), async {
            self.storage.put_many(&entries).await
        })
        .await
        .context("failed to commit round")?;

        let stats = RoundStats {
            win_bid: plan.clearing,
            sum_bid: plan.sum,
            n_bids: plan.unique.len(),
        };

        let mut replies = HashMap::with_capacity(plan.unique.len());
        for bid in &plan.unique {
            let status = if bid.token == winner.token {
                BidStatus::Accepted
            } else {
                BidStatus::Rejected
            };
            replies.insert(
                bid.token.clone(),
                RoundReply {
                    message: winner.message.clone(),
                    balance: plan.balances[&bid.token],
                    name: names.get(&bid.token).cloned().unwrap_or_default(),
                    status,
                    stats,
                },
            );
        }

        info!(
            %round_id,
            unique_bidders = plan.unique.len(),
            clearing = plan.clearing,
            sum = plan.sum,
            "round settled"
        );

        Ok(replies)
    }

    /// Admin reset: disarms the alarm, aborts any parked requests and
    /// wipes every storage namespace. Defines a new epoch; parked callers
    /// receive an internal error rather than hanging.
    #[instrument(skip(self), target = "broker")]
    pub async fn reset(&self) -> Result<u64, AppError> {
        let mut state = self.state.lock().await;

        state.alarm.cancel();
        for parked in state.parked.drain(..) {
            let _ = parked.resolver.send(RoundOutcome::Aborted);
        }
        state.bids.clear();

        let mut removed = 0;
        for prefix in [BALANCE_PREFIX, NAME_PREFIX, MESSAGE_PREFIX] {
            let rows = self
                .storage
                .list(&ListQuery::prefix(prefix))
                .await
                .context("failed to list keys for reset")?;
            let keys: Vec<String> = rows.into_iter().map(|(k, _)| k).collect();
            removed += self
                .storage
                .delete_many(&keys)
                .await
                .context("failed to delete keys for reset")?;
        }

        info!(removed, "broker reset; storage wiped");
        Ok(removed)
    }
}
