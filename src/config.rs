use std::time::Duration;

use crate::transport::HttpSettings;

#[derive(Debug, Clone)]
pub struct Config {
    /// Lifetime of cached webservice configs.
    /// Set via GI_CACHE_TTL_SECS. Default: 300.
    pub cache_ttl: Duration,
    /// Default overall request timeout when a config sets none.
    /// Set via GI_HTTP_TIMEOUT_SECS. Default: 30.
    pub http_timeout: Duration,
    /// Set via GI_CONNECT_TIMEOUT_SECS. Default: 5.
    pub connect_timeout: Duration,
    /// Fallback lifetime of field search results when a field sets CacheTTL 0.
    /// Set via GI_FIELD_CACHE_TTL_SECS. Default: 60.
    pub field_cache_ttl: Duration,
    /// Selects the Postgres repository when set.
    pub database_url: Option<String>,
    /// YAML seed for the in-memory repository.
    pub config_file: Option<String>,
    /// User recorded as creator/changer for CLI writes.
    pub user_id: i32,
}

impl Config {
    pub fn http_settings(&self) -> HttpSettings {
        HttpSettings {
            timeout: self.http_timeout,
            connect_timeout: self.connect_timeout,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let user_id = match std::env::var("GI_USER_ID") {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("GI_USER_ID must be an integer, got {:?}", raw))?,
        Err(_) => 1,
    };

    Ok(Config {
        cache_ttl: secs("GI_CACHE_TTL_SECS", 300),
        http_timeout: secs("GI_HTTP_TIMEOUT_SECS", 30),
        connect_timeout: secs("GI_CONNECT_TIMEOUT_SECS", 5),
        field_cache_ttl: secs("GI_FIELD_CACHE_TTL_SECS", 60),
        database_url: non_empty("DATABASE_URL"),
        config_file: non_empty("GI_CONFIG_FILE"),
        user_id,
    })
}

fn secs(var: &str, default: u64) -> Duration {
    let value = std::env::var(var)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default);
    Duration::from_secs(value)
}

fn non_empty(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}
