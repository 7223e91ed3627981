/// Redis wrapper with graceful degradation.
///
/// All operations return `Option<T>` or `bool`. On any Redis error the operation logs a
/// warning and reports failure; callers keep working from memory. The service is fully
/// functional without Redis, it just forgets documents across restarts.
use redis::AsyncCommands;
use tracing::warn;

pub struct RedisCache {
    client: Option<redis::Client>,
}

impl RedisCache {
    /// Attempt to create a client. If the URL is `None` or invalid, returns a
    /// `RedisCache` whose operations are all no-ops.
    pub fn new(url: Option<&str>) -> Self {
        let client = url.and_then(|u| {
            redis::Client::open(u)
                .inspect_err(|e| warn!(error = %e, url = u, "failed to create redis client, persistence disabled"))
                .ok()
        });
        Self { client }
    }

    /// A cache that never touches the network.
    pub fn disabled() -> Self {
        Self { client: None }
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }

    /// Test the connection by sending a PING. Returns `true` if Redis is reachable.
    pub async fn is_available(&self) -> bool {
        let Some(client) = &self.client else {
            return false;
        };
        match client.get_multiplexed_async_connection().await {
            Ok(mut conn) => {
                let result: Result<String, _> = redis::cmd("PING").query_async(&mut conn).await;
                result.is_ok()
            }
            Err(_) => false,
        }
    }

    async fn connection(&self) -> Option<redis::aio::MultiplexedConnection> {
        let client = self.client.as_ref()?;
        client
            .get_multiplexed_async_connection()
            .await
            .inspect_err(|e| warn!(error = %e, "redis connection failed"))
            .ok()
    }

    /// Get a value. Returns `None` if Redis is unavailable or the key doesn't exist.
    pub async fn get(&self, key: &str) -> Option<String> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn
            .get(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis GET failed"))
            .ok()?;
        value
    }

    /// Set a value with no expiry. Returns `true` if successful.
    pub async fn set(&self, key: &str, value: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        conn.set::<_, _, ()>(key, value)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis SET failed"))
            .is_ok()
    }

    /// Delete a specific key. Returns `true` if successful.
    pub async fn delete(&self, key: &str) -> bool {
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        conn.del::<_, ()>(key)
            .await
            .inspect_err(|e| warn!(error = %e, key, "redis DEL failed"))
            .is_ok()
    }

    /// All keys starting with `prefix`, collected with SCAN (not KEYS, which blocks).
    pub async fn scan_keys(&self, prefix: &str) -> Option<Vec<String>> {
        let mut conn = self.connection().await?;
        let pattern = format!("{prefix}*");
        let mut cursor: u64 = 0;
        let mut out = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await
                .inspect_err(|e| warn!(error = %e, pattern, "redis SCAN failed"))
                .ok()?;
            out.extend(keys);
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Some(out)
    }

    /// Delete all keys matching a prefix.
    pub async fn delete_by_prefix(&self, prefix: &str) -> bool {
        let Some(keys) = self.scan_keys(prefix).await else {
            return false;
        };
        if keys.is_empty() {
            return true;
        }
        let Some(mut conn) = self.connection().await else {
            return false;
        };
        conn.del::<_, ()>(&keys)
            .await
            .inspect_err(|e| warn!(error = %e, "redis batch DEL failed during prefix delete"))
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_cache_degrades() {
        let cache = RedisCache::disabled();
        assert!(!cache.is_configured());
        assert!(!cache.is_available().await);
        assert_eq!(cache.get("k").await, None);
        assert!(!cache.set("k", "v").await);
        assert!(!cache.delete("k").await);
        assert_eq!(cache.scan_keys("iep:").await, None);
        assert!(!cache.delete_by_prefix("iep:").await);
    }

    #[test]
    fn invalid_url_disables_cache() {
        let cache = RedisCache::new(Some("not a url"));
        assert!(!cache.is_configured());
    }
}
