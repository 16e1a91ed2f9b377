//! End-to-end round scenarios: registration, concurrent bidding, alarm and
//! threshold settlement, replay and reset, over the in-memory store.
//! Virtual time (`start_paused`) drives the round alarm deterministically.

use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use tokio::task::JoinHandle;

use bidcast::broker::{BidStatus, Broker, RoundConfig, RoundPolicy, RoundReply};
use bidcast::error::AppError;
use bidcast::journal::Journal;
use bidcast::metrics::counters::Counters;
use bidcast::registry::Registry;
use bidcast::storage::MemoryStorage;

const START_BAL: i64 = 10;
const MAX_BAL: i64 = 100;
const TIMEOUT: Duration = Duration::from_millis(5_000);

struct Harness {
    storage: Arc<MemoryStorage>,
    registry: Registry,
    journal: Journal,
    broker: Arc<Broker>,
    counters: Counters,
}

fn harness(batch_threshold: usize, accumulate_balance: i64) -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let counters = Counters::default();

    let cfg = RoundConfig {
        batch_threshold,
        round_timeout: TIMEOUT,
        policy: RoundPolicy {
            accumulate_balance,
            max_balance: MAX_BAL,
        },
    };

    Harness {
        registry: Registry::new(storage.clone(), START_BAL),
        journal: Journal::new(storage.clone()),
        broker: Arc::new(Broker::new(storage.clone(), cfg, counters.clone())),
        storage,
        counters,
    }
}

impl Harness {
    async fn register(&self, name: &str) -> String {
        self.registry.register(name).await.unwrap().token
    }

    async fn stored_balance(&self, token: &str) -> i64 {
        self.registry.balance(token).await.unwrap().balance
    }

    /// Admits a bid in the background and returns its parked response.
    /// Yields so the bid is admitted before the caller continues.
    async fn park_bid(
        &self,
        token: &str,
        message: &str,
        amount: i64,
    ) -> JoinHandle<Result<RoundReply, AppError>> {
        let broker = self.broker.clone();
        let token = token.to_string();
        let message = message.to_string();
        let handle =
            tokio::spawn(async move { broker.submit(&token, &message, amount).await });
        tokio::task::yield_now().await;
        handle
    }
}

#[tokio::test(start_paused = true)]
async fn single_bidder_settles_on_alarm_and_pays_nothing() {
    let h = harness(5, 0);
    let alice = h.register("Alice").await;

    // Awaiting the parked response parks the test too; virtual time then
    // advances to the alarm.
    let reply = h.broker.submit(&alice, "hi", 3).await.unwrap();

    assert_eq!(reply.status, BidStatus::Accepted);
    assert_eq!(reply.message, "hi");
    assert_eq!(reply.balance, 10);
    assert_eq!(reply.name, "Alice");
    assert_eq!(reply.stats.win_bid, 0);
    assert_eq!(reply.stats.sum_bid, 3);
    assert_eq!(reply.stats.n_bids, 1);

    let page = h.journal.replay(None, None).await.unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].message, "hi");
    assert_eq!(page.messages[0].bidder_name, "Alice");

    assert_eq!(h.counters.alarm_fired.load(Relaxed), 1);
    assert_eq!(h.counters.rounds_settled.load(Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn two_bidders_settle_at_second_price() {
    let h = harness(5, 0);
    let alice = h.register("Alice").await;
    let bob = h.register("Bob").await;

    let alice_bid = h.park_bid(&alice, "x", 5).await;
    let bob_bid = h.park_bid(&bob, "y", 7).await;

    let alice_reply = alice_bid.await.unwrap().unwrap();
    let bob_reply = bob_bid.await.unwrap().unwrap();

    assert_eq!(bob_reply.status, BidStatus::Accepted);
    assert_eq!(bob_reply.balance, 5);
    assert_eq!(alice_reply.status, BidStatus::Rejected);
    assert_eq!(alice_reply.balance, 10);

    // Both see the same round: winning message and stats.
    assert_eq!(alice_reply.message, "y");
    assert_eq!(alice_reply.stats.win_bid, 5);
    assert_eq!(alice_reply.stats.sum_bid, 12);
    assert_eq!(alice_reply.stats.n_bids, 2);

    assert_eq!(h.stored_balance(&alice).await, 10);
    assert_eq!(h.stored_balance(&bob).await, 5);

    let page = h.journal.replay(None, None).await.unwrap();
    assert_eq!(page.messages[0].message, "y");
    assert_eq!(page.messages[0].bidder_name, "Bob");
}

#[tokio::test(start_paused = true)]
async fn duplicate_bidders_settle_once_but_answer_every_request() {
    let h = harness(5, 0);
    let alice = h.register("Alice").await;
    let bob = h.register("Bob").await;

    let first = h.park_bid(&alice, "a", 2).await;
    let second = h.park_bid(&alice, "b", 4).await;
    let third = h.park_bid(&alice, "c", 3).await;
    let bob_bid = h.park_bid(&bob, "d", 5).await;

    let alice_replies = [
        first.await.unwrap().unwrap(),
        second.await.unwrap().unwrap(),
        third.await.unwrap().unwrap(),
    ];
    let bob_reply = bob_bid.await.unwrap().unwrap();

    // Alice deduplicates to her highest bid; Bob wins and pays it.
    assert_eq!(bob_reply.status, BidStatus::Accepted);
    assert_eq!(bob_reply.balance, 6);
    assert_eq!(bob_reply.stats.win_bid, 4);
    assert_eq!(bob_reply.stats.n_bids, 2);

    for reply in &alice_replies {
        assert_eq!(reply.status, BidStatus::Rejected);
        assert_eq!(reply.message, "d");
        assert_eq!(reply.balance, 10);
        assert_eq!(reply.stats.win_bid, 4);
    }

    let page = h.journal.replay(None, None).await.unwrap();
    assert_eq!(page.messages.len(), 1);
    assert_eq!(page.messages[0].message, "d");

    assert_eq!(h.counters.rounds_settled.load(Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn reaching_the_threshold_settles_immediately() {
    let h = harness(5, 0);

    let mut tokens = Vec::new();
    for i in 0..5 {
        tokens.push(h.register(&format!("client-{i}")).await);
    }

    let mut parked = Vec::new();
    for (i, token) in tokens.iter().take(4).enumerate() {
        parked.push(h.park_bid(token, &format!("m{i}"), i as i64 + 1).await);
    }
    assert!(h.broker.alarm_armed().await);

    // The fifth admission crosses the threshold and settles inline,
    // without any passage of time.
    let winner_reply = h.broker.submit(&tokens[4], "m4", 5).await.unwrap();

    assert_eq!(winner_reply.status, BidStatus::Accepted);
    assert_eq!(winner_reply.stats.win_bid, 4);
    assert_eq!(winner_reply.balance, 10 - 4);

    for handle in parked {
        let reply = handle.await.unwrap().unwrap();
        assert_eq!(reply.status, BidStatus::Rejected);
        assert_eq!(reply.message, "m4");
    }

    assert!(!h.broker.alarm_armed().await);
    assert_eq!(h.counters.alarm_fired.load(Relaxed), 0);
    assert_eq!(h.counters.rounds_settled.load(Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn insufficient_balance_is_rejected_before_admission() {
    let h = harness(5, 0);
    let alice = h.register("Alice").await;

    let err = h.broker.submit(&alice, "hi", 11).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    assert_eq!(h.broker.batch_size().await, 0);
    assert!(!h.broker.alarm_armed().await);
    assert_eq!(h.counters.bids_admitted.load(Relaxed), 0);
}

#[tokio::test(start_paused = true)]
async fn reset_aborts_parked_bids_and_starts_a_new_epoch() {
    let h = harness(5, 0);
    let alice = h.register("Alice").await;

    let parked = h.park_bid(&alice, "hi", 3).await;
    assert!(h.broker.alarm_armed().await);

    h.broker.reset().await.unwrap();

    let outcome = parked.await.unwrap();
    assert!(matches!(outcome, Err(AppError::Internal(_))));

    assert!(!h.broker.alarm_armed().await);
    assert!(h.storage.is_empty());

    let page = h.journal.replay(None, None).await.unwrap();
    assert!(page.messages.is_empty());

    // A fresh registration starts over at the initial balance.
    let again = h.registry.register("Alice").await.unwrap();
    assert_eq!(again.balance, START_BAL);
    assert_ne!(again.token, alice);
}

#[tokio::test(start_paused = true)]
async fn losers_collect_the_accumulate_reward() {
    let h = harness(5, 2);
    let alice = h.register("Alice").await;
    let bob = h.register("Bob").await;
    let carol = h.register("Carol").await;

    let alice_bid = h.park_bid(&alice, "a", 1).await;
    let bob_bid = h.park_bid(&bob, "b", 2).await;
    let carol_bid = h.park_bid(&carol, "c", 3).await;

    let alice_reply = alice_bid.await.unwrap().unwrap();
    let bob_reply = bob_bid.await.unwrap().unwrap();
    let carol_reply = carol_bid.await.unwrap().unwrap();

    assert_eq!(carol_reply.status, BidStatus::Accepted);
    assert_eq!(carol_reply.balance, 10 - 2);
    assert_eq!(alice_reply.balance, 12);
    assert_eq!(bob_reply.balance, 12);

    assert_eq!(h.stored_balance(&alice).await, 12);
    assert_eq!(h.stored_balance(&bob).await, 12);
}

#[tokio::test(start_paused = true)]
async fn consecutive_rounds_replay_newest_first() {
    let h = harness(5, 0);
    let alice = h.register("Alice").await;

    for (i, bid) in [(0, 1), (1, 2), (2, 3)] {
        let reply = h
            .broker
            .submit(&alice, &format!("round-{i}"), bid)
            .await
            .unwrap();
        assert_eq!(reply.status, BidStatus::Accepted);
        // Sole bidder: every round clears at zero.
        assert_eq!(reply.balance, START_BAL);

        // Message keys are ordered by wall-clock millisecond; space the
        // rounds out so the replay ordering below is deterministic.
        std::thread::sleep(Duration::from_millis(2));
    }

    let page = h.journal.replay(None, Some(2)).await.unwrap();
    assert_eq!(page.messages.len(), 2);
    assert_eq!(page.messages[0].message, "round-2");
    assert_eq!(page.messages[1].message, "round-1");

    let cursor = page.next.unwrap();
    let rest = h.journal.replay(Some(cursor), Some(2)).await.unwrap();
    assert_eq!(rest.messages.len(), 1);
    assert_eq!(rest.messages[0].message, "round-0");
    assert!(rest.next.is_none());

    assert_eq!(h.counters.rounds_settled.load(Relaxed), 3);
}
