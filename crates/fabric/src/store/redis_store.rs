//! Redis-backed store (streams, lists, pub/sub, strings, counters).
//!
//! Stream plumbing uses XADD/XREADGROUP/XACK/XPENDING/XCLAIM through one
//! async connection manager. Entries carry a single `data` field holding
//! the JSON-encoded envelope; no auxiliary fields.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::instrument;

use crate::pool::RedisPool;
use crate::store::{Store, StoreError, StreamEntry};

/// Production [`Store`] over a [`RedisPool`].
#[derive(Debug)]
pub struct RedisStore {
    pool: RedisPool,
}

impl RedisStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &RedisPool {
        &self.pool
    }

    async fn conn(&self) -> Result<ConnectionManager, StoreError> {
        self.pool.acquire().await
    }
}

fn command_error(err: redis::RedisError) -> StoreError {
    if err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

#[async_trait]
impl Store for RedisStore {
    #[instrument(skip(self, payload), fields(stream = %stream), err)]
    async fn append_stream(&self, stream: &str, payload: &str) -> Result<String, StoreError> {
        let mut conn = self.conn().await?;
        redis::cmd("XADD")
            .arg(stream)
            .arg("*")
            .arg("data")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        // MKSTREAM creates the stream if absent; "0" starts the group at
        // the beginning of the stream.
        let created: Result<String, redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match created {
            Ok(_) => Ok(()),
            // The group already exists: idempotent create.
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(command_error(err)),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let reply: redis::Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        match reply {
            // Block timeout, no new entries.
            redis::Value::Nil => Ok(Vec::new()),
            other => parse_read_reply(stream, &other),
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(ids)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut conn = self.conn().await?;
        let min_idle_ms = min_idle.as_millis() as u64;

        // Extended XPENDING: (id, holder, idle_ms, delivery_count) per entry.
        let pending: Vec<(String, String, u64, u64)> = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .arg("IDLE")
            .arg(min_idle_ms)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<&str> = pending.iter().map(|(id, _, _, _)| id.as_str()).collect();
        let reply: redis::Value = redis::cmd("XCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg(&ids[..])
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        let entries = match reply {
            redis::Value::Nil => Vec::new(),
            redis::Value::Bulk(items) => items,
            other => {
                return Err(StoreError::Reply(format!(
                    "XCLAIM returned {other:?}"
                )))
            }
        };

        // XCLAIM bumps the delivery counter; report the post-claim count.
        let mut claimed = Vec::new();
        for item in &entries {
            if let Some((id, payload)) = parse_stream_entry(item) {
                let prior = pending
                    .iter()
                    .find(|(pid, _, _, _)| *pid == id)
                    .map(|(_, _, _, n)| *n)
                    .unwrap_or(0);
                claimed.push(StreamEntry {
                    id,
                    payload,
                    deliveries: prior.saturating_add(1) as u32,
                });
            }
        }
        Ok(claimed)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        // Summary XPENDING: [count, first-id, last-id, consumers].
        let reply: redis::Value = redis::cmd("XPENDING")
            .arg(stream)
            .arg(group)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        match reply {
            redis::Value::Nil => Ok(0),
            redis::Value::Bulk(items) => match items.first() {
                Some(redis::Value::Int(n)) => Ok((*n).max(0) as u64),
                _ => Err(StoreError::Reply("XPENDING summary without count".into())),
            },
            other => Err(StoreError::Reply(format!("XPENDING returned {other:?}"))),
        }
    }

    async fn push_list(
        &self,
        queue: &str,
        payload: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("RPUSH")
            .arg(queue)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        if let Some(ttl) = ttl {
            let _: i64 = redis::cmd("EXPIRE")
                .arg(queue)
                .arg(ttl.as_secs().max(1))
                .query_async(&mut conn)
                .await
                .map_err(command_error)?;
        }
        Ok(())
    }

    async fn pop_list(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;

        // BLPOP with timeout 0 blocks forever; a zero timeout here means
        // "check once".
        if timeout.is_zero() {
            return redis::cmd("LPOP")
                .arg(queue)
                .query_async(&mut conn)
                .await
                .map_err(command_error);
        }

        let popped: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(queue)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(popped.map(|(_, payload)| payload))
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn().await?;
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut conn = self.conn().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("EX").arg(ttl.as_secs().max(1));
        }
        let _: () = cmd.query_async(&mut conn).await.map_err(command_error)?;
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn().await?;
        let removed: u64 = redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        Ok(removed > 0)
    }

    async fn increment(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<u64, StoreError> {
        let mut conn = self.conn().await?;
        let total: i64 = redis::cmd("INCRBY")
            .arg(key)
            .arg(amount)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;

        // First increment created the key: pin the window TTL once.
        if total == amount as i64 {
            if let Some(ttl) = ttl {
                let _: i64 = redis::cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .query_async(&mut conn)
                    .await
                    .map_err(command_error)?;
            }
        }
        Ok(total.max(0) as u64)
    }
}

fn as_text(value: &redis::Value) -> Option<String> {
    match value {
        redis::Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        redis::Value::Status(text) => Some(text.clone()),
        _ => None,
    }
}

/// Parse one stream entry `[id, [field, value, ...]]`, returning the id and
/// the `data` field.
fn parse_stream_entry(entry: &redis::Value) -> Option<(String, String)> {
    let parts = match entry {
        redis::Value::Bulk(parts) if parts.len() >= 2 => parts,
        _ => return None,
    };

    let id = as_text(&parts[0])?;
    let fields = match &parts[1] {
        redis::Value::Bulk(fields) => fields,
        _ => return None,
    };

    for pair in fields.chunks(2) {
        if pair.len() == 2 && as_text(&pair[0]).as_deref() == Some("data") {
            return Some((id, as_text(&pair[1])?));
        }
    }
    None
}

/// Parse an XREADGROUP reply `[[stream, [entry, ...]], ...]` for `stream`.
fn parse_read_reply(stream: &str, reply: &redis::Value) -> Result<Vec<StreamEntry>, StoreError> {
    let streams = match reply {
        redis::Value::Bulk(streams) => streams,
        other => return Err(StoreError::Reply(format!("XREADGROUP returned {other:?}"))),
    };

    let mut entries = Vec::new();
    for stream_block in streams {
        let parts = match stream_block {
            redis::Value::Bulk(parts) if parts.len() >= 2 => parts,
            _ => continue,
        };
        if as_text(&parts[0]).as_deref() != Some(stream) {
            continue;
        }
        if let redis::Value::Bulk(items) = &parts[1] {
            for item in items {
                if let Some((id, payload)) = parse_stream_entry(item) {
                    entries.push(StreamEntry {
                        id,
                        payload,
                        // Fresh XREADGROUP delivery.
                        deliveries: 1,
                    });
                }
            }
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(text: &str) -> redis::Value {
        redis::Value::Data(text.as_bytes().to_vec())
    }

    #[test]
    fn parses_a_single_field_entry() {
        let entry = redis::Value::Bulk(vec![
            data("1700000000000-0"),
            redis::Value::Bulk(vec![data("data"), data("{\"k\":1}")]),
        ]);
        assert_eq!(
            parse_stream_entry(&entry),
            Some(("1700000000000-0".to_string(), "{\"k\":1}".to_string()))
        );
    }

    #[test]
    fn skips_entries_without_a_data_field() {
        let entry = redis::Value::Bulk(vec![
            data("1-0"),
            redis::Value::Bulk(vec![data("other"), data("x")]),
        ]);
        assert_eq!(parse_stream_entry(&entry), None);
    }

    #[test]
    fn read_reply_filters_to_the_requested_stream() {
        let reply = redis::Value::Bulk(vec![redis::Value::Bulk(vec![
            data("nooble4:dev:query:actions:stream"),
            redis::Value::Bulk(vec![redis::Value::Bulk(vec![
                data("1-0"),
                redis::Value::Bulk(vec![data("data"), data("{}")]),
            ])]),
        ])]);

        let entries = parse_read_reply("nooble4:dev:query:actions:stream", &reply).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "1-0");
        assert_eq!(entries[0].deliveries, 1);

        let none = parse_read_reply("nooble4:dev:other:actions:stream", &reply).unwrap();
        assert!(none.is_empty());
    }
}
