//! Append-only log of accepted messages.
//!
//! The journal owns the `message:` key format and the record encoding so
//! the settlement append path and the replay path cannot drift apart.
//! Keys are `message:<epoch_ms, zero-padded>-<5-char base36>`: the padded
//! millisecond prefix keeps lexicographic order chronological, the random
//! suffix disambiguates settlements landing in the same millisecond.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::error::AppError;
use crate::storage::{ListQuery, MESSAGE_PREFIX, Storage};

/// Replay pages default to this many messages.
pub const DEFAULT_REPLAY_LIMIT: usize = 10;

/// Millisecond timestamps are padded to this width so keys sort
/// chronologically across order-of-magnitude boundaries.
const MS_WIDTH: usize = 13;

const SUFFIX_LEN: usize = 5;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// A settled round's winning message, as persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedMessage {
    pub message: String,
    pub bidder_token: String,
    pub bidder_name: String,
    /// ISO-8601 UTC with millisecond precision.
    pub timestamp: String,
}

impl AcceptedMessage {
    pub fn new(message: String, bidder_token: String, bidder_name: String) -> Self {
        Self {
            message,
            bidder_token,
            bidder_name,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Key/value pair for the storage multi-put that commits a settlement.
    pub fn to_entry(&self, now_ms: u64) -> Result<(String, String)> {
        let value = serde_json::to_string(self).context("failed to encode accepted message")?;
        Ok((message_key(now_ms), value))
    }
}

pub fn message_key(now_ms: u64) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{MESSAGE_PREFIX}{now_ms:0width$}-{suffix}", width = MS_WIDTH)
}

#[derive(Clone, Debug, Serialize)]
pub struct ReplayPage {
    /// Newest first.
    pub messages: Vec<AcceptedMessage>,
    /// Cursor for the next page; pass back as `end`. Present only when the
    /// page was full.
    pub next: Option<String>,
}

pub struct Journal {
    storage: Arc<dyn Storage>,
}

impl Journal {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Reverse-chronological page of accepted messages.
    #[instrument(skip(self), target = "journal")]
    pub async fn replay(
        &self,
        end: Option<String>,
        limit: Option<usize>,
    ) -> Result<ReplayPage, AppError> {
        let limit = limit.unwrap_or(DEFAULT_REPLAY_LIMIT).max(1);

        let rows = self
            .storage
            .list(&ListQuery {
                prefix: MESSAGE_PREFIX.to_string(),
                reverse: true,
                limit: Some(limit),
                end,
            })
            .await
            .context("failed to list messages")?;

        let next = (rows.len() == limit).then(|| rows[rows.len() - 1].0.clone());

        let mut messages = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            match serde_json::from_str::<AcceptedMessage>(&value) {
                Ok(m) => messages.push(m),
                Err(e) => {
                    // poison-row resilience: skip but don't fail the page
                    warn!(key, error = %e, "skipping malformed message row");
                }
            }
        }

        Ok(ReplayPage { messages, next })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn record(text: &str) -> AcceptedMessage {
        AcceptedMessage::new(text.to_string(), "tok".to_string(), "Name".to_string())
    }

    #[test]
    fn keys_sort_chronologically_across_magnitudes() {
        let early = message_key(999_999_999_999);
        let late = message_key(1_000_000_000_000);
        assert!(early < late);
    }

    #[tokio::test]
    async fn replay_pages_newest_first_with_cursor() {
        let storage = Arc::new(MemoryStorage::new());
        let journal = Journal::new(storage.clone());

        let mut entries = Vec::new();
        for i in 0..3u64 {
            entries.push(record(&format!("msg-{i}")).to_entry(1_000 + i).unwrap());
        }
        storage.put_many(&entries).await.unwrap();

        let first = journal.replay(None, Some(2)).await.unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.messages[0].message, "msg-2");
        assert_eq!(first.messages[1].message, "msg-1");
        let cursor = first.next.expect("full page carries a cursor");

        let rest = journal.replay(Some(cursor), Some(2)).await.unwrap();
        assert_eq!(rest.messages.len(), 1);
        assert_eq!(rest.messages[0].message, "msg-0");
        assert!(rest.next.is_none());
    }

    #[tokio::test]
    async fn replay_skips_malformed_rows() {
        let storage = Arc::new(MemoryStorage::new());
        let journal = Journal::new(storage.clone());

        storage
            .put_many(&[
                record("good").to_entry(2_000).unwrap(),
                (message_key(1_000), "not json".to_string()),
            ])
            .await
            .unwrap();

        let page = journal.replay(None, None).await.unwrap();
        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].message, "good");
    }
}
