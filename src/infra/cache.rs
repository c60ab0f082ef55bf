use anyhow::Result;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

/// Redis holds short-lived derived state only. Reads and writes are
/// best-effort: a failing cache degrades to a miss, never to an error.
#[derive(Clone)]
pub struct RedisCache {
    client: Client,
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = Client::open(redis_url)?;
        let mut conn = client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }

    async fn conn(&self) -> Option<MultiplexedConnection> {
        match self.client.get_multiplexed_async_connection().await {
            Ok(conn) => Some(conn),
            Err(err) => {
                warn!(error = ?err, "redis unavailable");
                None
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn().await?;
        let payload = match conn.get::<_, Option<String>>(key).await {
            Ok(payload) => payload?,
            Err(err) => {
                warn!(error = ?err, key, "failed to read cache");
                return None;
            }
        };
        match serde_json::from_str(&payload) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(error = ?err, key, "discarding undecodable cache entry");
                let _ = conn.del::<_, ()>(key).await;
                None
            }
        }
    }

    fn encode<T: Serialize>(key: &str, value: &T) -> Option<String> {
        match serde_json::to_string(value) {
            Ok(payload) => Some(payload),
            Err(err) => {
                warn!(error = ?err, key, "failed to encode cache entry");
                None
            }
        }
    }

    /// Writes `value`, replacing any current entry.
    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) {
        let Some(payload) = Self::encode(key, value) else {
            return;
        };
        let Some(mut conn) = self.conn().await else {
            return;
        };
        if let Err(err) = conn.set_ex::<_, _, ()>(key, payload, ttl_seconds).await {
            warn!(error = ?err, key, "failed to write cache");
        }
    }

    /// Writes `value` only if the key is absent, so a read-through fill
    /// computed before a concurrent write never replaces that write.
    /// Returns whether the value was stored.
    pub async fn fill_json<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: u64) -> bool {
        let Some(payload) = Self::encode(key, value) else {
            return false;
        };
        let Some(mut conn) = self.conn().await else {
            return false;
        };
        let stored = redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async::<_, Option<String>>(&mut conn)
            .await;
        match stored {
            Ok(reply) => reply.is_some(),
            Err(err) => {
                warn!(error = ?err, key, "failed to fill cache");
                false
            }
        }
    }
}
