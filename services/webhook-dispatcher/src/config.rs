use anyhow::{bail, Context, Result};

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub max_concurrent_deliveries: usize,
    /// When set, a dialect named `"hmac"` is registered signing every
    /// payload it ships with this secret; subscriptions opt in by
    /// declaring `dialect_id: "hmac"`.
    pub hmac_secret: Option<String>,
    /// Only read when the `legacy-outbox` feature is compiled in, and
    /// only starts the loop when both are set.
    pub legacy_outbox_url: Option<String>,
    pub legacy_outbox_secret: Option<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = get("DATABASE_URL")?;
        let bind_addr = std::env::var("DISPATCHER_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8090".to_string());
        let max_concurrent_deliveries = std::env::var("DISPATCHER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(4);
        let hmac_secret = std::env::var("WEBHOOK_HMAC_SECRET").ok().filter(|s| !s.is_empty());
        let legacy_outbox_url = std::env::var("LEGACY_OUTBOX_URL").ok().filter(|s| !s.is_empty());
        let legacy_outbox_secret = std::env::var("LEGACY_OUTBOX_SECRET").ok().filter(|s| !s.is_empty());

        if max_concurrent_deliveries == 0 {
            bail!("DISPATCHER_MAX_CONCURRENT must be at least 1");
        }

        Ok(Self {
            database_url,
            bind_addr,
            max_concurrent_deliveries,
            hmac_secret,
            legacy_outbox_url,
            legacy_outbox_secret,
        })
    }
}

fn get(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required env var: {key}"))
}
