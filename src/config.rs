use std::net::SocketAddr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Address the HTTP API binds to.
    pub bind_addr: SocketAddr,

    /// Database connection string for the key-value store.
    pub database_url: String,

    // =========================
    // Round configuration
    // =========================
    /// Number of admitted bids that triggers an immediate settlement.
    ///
    /// A round settles as soon as the batch holds this many bids,
    /// without waiting for the round timeout.
    pub batch_threshold: usize,

    /// Milliseconds from the first bid of a batch until the alarm forces
    /// settlement of an underfull batch.
    ///
    /// Measured from the first admission only; later bids never extend it.
    pub round_timeout_ms: u64,

    /// Reward credited to every losing unique bidder per round,
    /// clamped against `max_balance`.
    pub accumulate_balance: i64,

    // =========================
    // Balance configuration
    // =========================
    /// Balance issued to a client at registration.
    pub start_balance: i64,

    /// Upper bound on any client balance. Loser rewards clamp here.
    pub max_balance: i64,

    // =========================
    // Admin
    // =========================
    /// Bearer token for the admin endpoints. When unset, every admin
    /// request is rejected as unauthorized.
    pub admin_token: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let bind_addr = std::env::var("BIND_ADDR")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)));

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://bidcast_dev.db".to_string());

        Self {
            bind_addr,
            database_url,
            batch_threshold: env_int("N", 5).max(1) as usize,
            round_timeout_ms: env_int("TIMEOUT", 5000).max(0) as u64,
            accumulate_balance: env_int("ACCUMULATE_BAL", 0).max(0),
            start_balance: env_int("START_BAL", 10),
            max_balance: env_int("MAX_BAL", 100),
            admin_token: std::env::var("ADMIN_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }
}

fn env_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
