use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};

use crate::storage::{ListQuery, Storage};

/// SQLx-backed implementation of `Storage`.
/// Responsible only for persistence and row mapping; multi-key writes and
/// deletes run inside a transaction so they commit or roll back as a unit.
pub struct SqliteStorage {
    pool: AnyPool,
}

impl SqliteStorage {
    /// Connects and ensures the schema exists.
    ///
    /// Callers must have installed the sqlx Any drivers
    /// (`sqlx::any::install_default_drivers`) before the first connect.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = AnyPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("failed to connect key-value store")?;

        let storage = Self { pool };
        storage.migrate().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
CREATE TABLE IF NOT EXISTS kv (
  k TEXT PRIMARY KEY,
  v TEXT NOT NULL
);
"#,
        )
        .execute(&self.pool)
        .await
        .context("failed to migrate kv schema")?;

        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT v FROM kv WHERE k = ?;")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get::<String, _>("v")))
    }

    async fn get_many(&self, keys: &[String]) -> Result<HashMap<String, String>> {
        // Single transaction so the multi-get observes one snapshot.
        let mut tx = self.pool.begin().await?;

        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            let row = sqlx::query("SELECT v FROM kv WHERE k = ?;")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await?;

            if let Some(r) = row {
                out.insert(key.clone(), r.get::<String, _>("v"));
            }
        }

        tx.commit().await?;
        Ok(out)
    }

    async fn put_many(&self, entries: &[(String, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for (key, value) in entries {
            sqlx::query(
                r#"
INSERT INTO kv (k, v) VALUES (?, ?)
ON CONFLICT (k) DO UPDATE SET v = excluded.v;
"#,
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("failed to commit multi-put")?;
        Ok(())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let mut removed = 0;
        for key in keys {
            let res = sqlx::query("DELETE FROM kv WHERE k = ?;")
                .bind(key)
                .execute(&mut *tx)
                .await?;
            removed += res.rows_affected();
        }

        tx.commit().await.context("failed to commit multi-delete")?;
        Ok(removed)
    }

    async fn list(&self, query: &ListQuery) -> Result<Vec<(String, String)>> {
        // Namespace prefixes contain no LIKE wildcards, so a plain
        // `LIKE prefix%` matches exactly the prefix range.
        let order = if query.reverse { "DESC" } else { "ASC" };
        let sql = match query.end {
            Some(_) => format!(
                "SELECT k, v FROM kv WHERE k LIKE ? || '%' AND k < ? ORDER BY k {order} LIMIT ?;"
            ),
            None => format!("SELECT k, v FROM kv WHERE k LIKE ? || '%' ORDER BY k {order} LIMIT ?;"),
        };

        // LIMIT -1 is "no limit" for sqlite.
        let limit = query.limit.map(|l| l as i64).unwrap_or(-1);

        let mut q = sqlx::query(&sql).bind(&query.prefix);
        if let Some(end) = &query.end {
            q = q.bind(end);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>("k"), r.get::<String, _>("v")))
            .collect())
    }
}
