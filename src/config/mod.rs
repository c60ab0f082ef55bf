use anyhow::{anyhow, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::net::SocketAddr;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub http_addr: String,
    pub app_mode: String,
    pub database_url: String,
    pub redis_url: String,
    pub db_max_connections: u32,
    pub db_connect_timeout_seconds: u64,
    pub db_idle_timeout_seconds: u64,
    pub db_max_lifetime_seconds: u64,
    pub admin_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub feed: FeedSettings,
    pub realtime_channel_capacity: usize,
    pub reconcile_interval_seconds: u64,
    pub reconcile_batch_size: i64,
}

/// Tunables for feed pagination and suggestion ranking.
#[derive(Clone, Copy, Debug)]
pub struct FeedSettings {
    pub page_size: i64,
    pub max_page_size: i64,
    pub suggestion_like_window: i64,
    pub suggestion_limit: usize,
    pub membership_cache_ttl_seconds: u64,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            page_size: 20,
            max_page_size: 50,
            suggestion_like_window: 100,
            suggestion_limit: 5,
            membership_cache_ttl_seconds: 300,
        }
    }
}

impl FeedSettings {
    /// The default page size must itself be a valid `limit`.
    pub fn validate(&self) -> Result<()> {
        if !(1..=self.max_page_size).contains(&self.page_size) {
            return Err(anyhow!(
                "invalid FEED_PAGE_SIZE: must be between 1 and {}",
                self.max_page_size
            ));
        }
        Ok(())
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let http_addr = env_or("HTTP_ADDR", "0.0.0.0:8080");
        let _parsed_http_addr = SocketAddr::from_str(&http_addr)
            .map_err(|err| anyhow!("invalid HTTP_ADDR: {}", err))?;
        let app_mode = env_or("APP_MODE", "api");

        let feed = FeedSettings {
            page_size: env_or_parse("FEED_PAGE_SIZE", "20")?,
            max_page_size: 50,
            suggestion_like_window: env_or_parse("SUGGESTION_LIKE_WINDOW", "100")?,
            suggestion_limit: env_or_parse("SUGGESTION_LIMIT", "5")?,
            membership_cache_ttl_seconds: env_or_parse("MEMBERSHIP_CACHE_TTL_SECONDS", "300")?,
        };
        feed.validate()?;

        Ok(Self {
            http_addr,
            app_mode,
            database_url: env_or_err("DATABASE_URL")?,
            redis_url: env_or("REDIS_URL", "redis://127.0.0.1/"),
            db_max_connections: env_or_parse("DB_MAX_CONNECTIONS", "25")?,
            db_connect_timeout_seconds: env_or_parse("DB_CONNECT_TIMEOUT_SECONDS", "5")?,
            db_idle_timeout_seconds: env_or_parse("DB_IDLE_TIMEOUT_SECONDS", "300")?,
            db_max_lifetime_seconds: env_or_parse("DB_MAX_LIFETIME_SECONDS", "1800")?,
            admin_token: std::env::var("ADMIN_TOKEN").ok(),
            paseto_access_key: env_key_32("PASETO_ACCESS_KEY")?,
            access_ttl_minutes: env_or_parse("ACCESS_TTL_MINUTES", "15")?,
            feed,
            realtime_channel_capacity: env_or_parse("REALTIME_CHANNEL_CAPACITY", "256")?,
            reconcile_interval_seconds: env_or_parse("RECONCILE_INTERVAL_SECONDS", "60")?,
            reconcile_batch_size: env_or_parse("RECONCILE_BATCH_SIZE", "500")?,
        })
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_or_err(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| anyhow!("missing required env var: {}", key))
}

fn env_or_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value
        .parse::<T>()
        .map_err(|err| anyhow!("invalid {}: {}", key, err))
}

fn env_key_32(key: &str) -> Result<[u8; 32]> {
    let value = env_or_err(key)?;
    decode_key_32(key, &value)
}

fn decode_key_32(key: &str, value: &str) -> Result<[u8; 32]> {
    let decoded = STANDARD
        .decode(value.as_bytes())
        .map_err(|err| anyhow!("invalid {}: {}", key, err))?;
    if decoded.len() != 32 {
        return Err(anyhow!("invalid {}: expected 32 bytes", key));
    }
    let mut key_bytes = [0u8; 32];
    key_bytes.copy_from_slice(&decoded);
    Ok(key_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_must_decode_to_32_bytes() {
        let key = decode_key_32("K", "MDEyMzQ1Njc4OWFiY2RlZjAxMjM0NTY3ODlhYmNkZWY=").unwrap();
        assert_eq!(&key[..4], b"0123");

        let short = decode_key_32("K", "c2hvcnQ=").unwrap_err();
        assert_eq!(short.to_string(), "invalid K: expected 32 bytes");
        assert!(decode_key_32("K", "***").is_err());
    }

    #[test]
    fn default_page_size_must_fit_the_limit_range() {
        assert!(FeedSettings::default().validate().is_ok());

        let too_big = FeedSettings {
            page_size: 51,
            ..FeedSettings::default()
        };
        assert_eq!(
            too_big.validate().unwrap_err().to_string(),
            "invalid FEED_PAGE_SIZE: must be between 1 and 50"
        );

        let zero = FeedSettings {
            page_size: 0,
            ..FeedSettings::default()
        };
        assert!(zero.validate().is_err());
    }
}
