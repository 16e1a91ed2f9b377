//! Client registry: issues opaque tokens and owns the `balance:` / `name:`
//! read paths. Balance mutation during rounds belongs to the settlement
//! engine, not here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::error::AppError;
use crate::logger::warn_if_slow;
use crate::storage::{BALANCE_PREFIX, ListQuery, Storage, balance_key, name_key};

/// Issued tokens are this many URL-safe characters.
pub const TOKEN_LEN: usize = 16;

#[derive(Clone, Debug, Serialize)]
pub struct ClientProfile {
    pub token: String,
    pub balance: i64,
    pub name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClientInfo {
    pub balance: i64,
    pub name: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
    pub total: usize,
    pub total_pages: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct ClientPage {
    /// Token → profile, in lexicographic token order.
    pub clients: BTreeMap<String, ClientInfo>,
    pub pagination: Pagination,
}

pub struct Registry {
    storage: Arc<dyn Storage>,
    start_balance: i64,
}

impl Registry {
    pub fn new(storage: Arc<dyn Storage>, start_balance: i64) -> Self {
        Self {
            storage,
            start_balance,
        }
    }

    /// Registers a client and issues its token. The balance and name rows
    /// land in one atomic multi-put.
    #[instrument(skip(self, name), target = "registry")]
    pub async fn register(&self, name: &str) -> Result<ClientProfile, AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::bad_request("Missing name"));
        }

        let token = issue_token();

        warn_if_slow("registry_register", Duration::from_millis(100), async {
            self.storage
                .put_many(&[
                    (balance_key(&token), self.start_balance.to_string()),
                    (name_key(&token), name.to_string()),
                ])
                .await
        })
        .await
        .context("failed to persist registration")?;

        info!(name, "client registered");

        Ok(ClientProfile {
            token,
            balance: self.start_balance,
            name: name.to_string(),
        })
    }

    /// Looks up a client by token. An unknown token (no balance row) is a
    /// bad request, not an internal error.
    #[instrument(skip(self, token), target = "registry")]
    pub async fn balance(&self, token: &str) -> Result<ClientProfile, AppError> {
        let keys = [balance_key(token), name_key(token)];
        let rows = self
            .storage
            .get_many(&keys)
            .await
            .context("failed to load client")?;

        let balance = match rows.get(&keys[0]) {
            Some(raw) => parse_balance(raw)?,
            None => return Err(AppError::bad_request("Invalid token")),
        };
        let name = rows.get(&keys[1]).cloned().unwrap_or_default();

        Ok(ClientProfile {
            token: token.to_string(),
            balance,
            name,
        })
    }

    /// Paginated listing of all registered clients, ordered by token.
    /// `page` is 1-based.
    #[instrument(skip(self), target = "registry")]
    pub async fn list_clients(
        &self,
        page: usize,
        page_size: usize,
    ) -> Result<ClientPage, AppError> {
        let page = page.max(1);
        let page_size = page_size.max(1);

        let balances = self
            .storage
            .list(&ListQuery::prefix(BALANCE_PREFIX))
            .await
            .context("failed to list clients")?;

        let total = balances.len();
        let total_pages = total.div_ceil(page_size);

        let start = (page - 1).saturating_mul(page_size);
        let slice = balances
            .iter()
            .skip(start)
            .take(page_size)
            .collect::<Vec<_>>();

        let name_keys: Vec<String> = slice
            .iter()
            .map(|(k, _)| name_key(k.trim_start_matches(BALANCE_PREFIX)))
            .collect();
        let names = self
            .storage
            .get_many(&name_keys)
            .await
            .context("failed to load client names")?;

        let mut clients = BTreeMap::new();
        for (key, raw_balance) in slice {
            let token = key.trim_start_matches(BALANCE_PREFIX).to_string();
            clients.insert(
                token.clone(),
                ClientInfo {
                    balance: parse_balance(raw_balance)?,
                    name: names.get(&name_key(&token)).cloned().unwrap_or_default(),
                },
            );
        }

        debug!(page, page_size, total, "listed clients");

        Ok(ClientPage {
            clients,
            pagination: Pagination {
                page,
                page_size,
                total,
                total_pages,
            },
        })
    }
}

/// Decodes a stored `balance:` row.
pub fn parse_balance(raw: &str) -> Result<i64> {
    raw.trim()
        .parse()
        .with_context(|| format!("malformed stored balance: {raw:?}"))
}

/// Issues an opaque client token: base64 of random bytes with `+` and `/`
/// stripped, concatenated until `TOKEN_LEN` characters are available.
pub fn issue_token() -> String {
    let mut rng = rand::thread_rng();
    let mut token = String::new();

    while token.len() < TOKEN_LEN {
        let mut buf = [0u8; 12];
        rng.fill_bytes(&mut buf);
        token.extend(BASE64.encode(buf).chars().filter(|c| !"+/".contains(*c)));
    }

    token.truncate(TOKEN_LEN);
    token
}
