use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::storage::{ListQuery, Storage};

/// In-process store over a sorted map. Backs unit and scenario tests and
/// local development; shares the exact `Storage` contract with the
/// sqlx-backed implementation.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn put_many(&self, new_entries: &[(String, String)]) -> Result<()> {
        let mut entries = self.entries.lock();
        for (k, v) in new_entries {
            entries.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut entries = self.entries.lock();
        let mut removed = 0;
        for k in keys {
            if entries.remove(k).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<(String, String)>> {
        let entries = self.entries.lock();

        let in_range = entries
            .range(query.prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&query.prefix))
            .filter(|(k, _)| query.end.as_deref().is_none_or(|end| k.as_str() < end))
            .map(|(k, v)| (k.clone(), v.clone()));

        let mut rows: Vec<(String, String)> = in_range.collect();
        if query.reverse {
            rows.reverse();
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }
}
