//! Lazy, health-checked connection pool over the key-value store.
//!
//! Construction only parses the URL. The first [`RedisPool::acquire`]
//! opens a multiplexed async connection, verifies it with PING, and caches
//! it; later acquires re-ping lazily once `health_check_interval` has
//! elapsed and reconnect on failure. The pool is meant to be created at
//! service startup and passed into components explicitly - a
//! constructor-injected handle, not a process global.

use std::time::Instant;

use redis::aio::ConnectionManager;
use tracing::{debug, warn};

use crate::settings::StoreSettings;
use crate::store::StoreError;

struct PoolInner {
    manager: Option<ConnectionManager>,
    checked_at: Option<Instant>,
}

/// Shared handle to the store connection.
pub struct RedisPool {
    client: redis::Client,
    settings: StoreSettings,
    inner: tokio::sync::Mutex<PoolInner>,
}

impl core::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisPool")
            .field("client", &self.client)
            .field("health_check_interval", &self.settings.health_check_interval)
            .finish()
    }
}

impl RedisPool {
    /// Parse the URL and build the pool. No I/O happens here.
    pub fn new(settings: StoreSettings) -> Result<Self, StoreError> {
        let client = redis::Client::open(settings.url.as_str())
            .map_err(|e| StoreError::Connection(format!("invalid store url: {e}")))?;
        Ok(Self {
            client,
            settings,
            inner: tokio::sync::Mutex::new(PoolInner {
                manager: None,
                checked_at: None,
            }),
        })
    }

    /// Hand out the shared connection, creating and pinging it on first use.
    ///
    /// A startup ping failure surfaces as an error so the service fails
    /// fast instead of limping along unconnected.
    pub async fn acquire(&self) -> Result<ConnectionManager, StoreError> {
        let mut inner = self.inner.lock().await;

        if let Some(manager) = inner.manager.clone() {
            let due = inner
                .checked_at
                .is_none_or(|at| at.elapsed() >= self.settings.health_check_interval);
            if !due {
                return Ok(manager);
            }

            let mut probe = manager.clone();
            match redis::cmd("PING").query_async::<_, String>(&mut probe).await {
                Ok(_) => {
                    inner.checked_at = Some(Instant::now());
                    return Ok(manager);
                }
                Err(err) => {
                    warn!(error = %err, "store health check failed, reconnecting");
                    inner.manager = None;
                }
            }
        }

        let manager = self.connect().await?;
        inner.manager = Some(manager.clone());
        inner.checked_at = Some(Instant::now());
        Ok(manager)
    }

    async fn connect(&self) -> Result<ConnectionManager, StoreError> {
        let manager = tokio::time::timeout(
            self.settings.socket_connect_timeout,
            ConnectionManager::new(self.client.clone()),
        )
        .await
        .map_err(|_| {
            StoreError::Connection(format!(
                "store connect timed out after {:?}",
                self.settings.socket_connect_timeout
            ))
        })?
        .map_err(|e| StoreError::Connection(e.to_string()))?;

        let mut probe = manager.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut probe)
            .await
            .map_err(|e| StoreError::Connection(format!("store ping failed: {e}")))?;

        debug!("store connection established");
        Ok(manager)
    }

    /// Drop the cached connection. The next acquire reconnects.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.manager = None;
        inner.checked_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_rejects_malformed_urls_without_io() {
        let settings = StoreSettings {
            url: "not a url".to_string(),
            ..StoreSettings::default()
        };
        assert!(matches!(
            RedisPool::new(settings),
            Err(StoreError::Connection(_))
        ));
    }

    #[test]
    fn construction_accepts_a_valid_url_without_io() {
        // No server is listening here; only acquire() does I/O.
        let settings = StoreSettings {
            url: "redis://127.0.0.1:1/0".to_string(),
            ..StoreSettings::default()
        };
        assert!(RedisPool::new(settings).is_ok());
    }
}
