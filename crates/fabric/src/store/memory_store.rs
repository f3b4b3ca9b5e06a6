//! In-memory store for tests and local development.
//!
//! Implements the full [`Store`] contract in-process, including
//! consumer-group bookkeeping (delivery cursors, pending-entry ownership,
//! delivery counts, idle claims), so transport and worker semantics can be
//! exercised without a Redis server. Blocking reads poll with a short
//! interval. List TTLs are not modeled; queue reaping is a store-side
//! concern the tests assert around explicitly.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::store::{Store, StoreError, StreamEntry};

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Clone)]
struct MemEntry {
    id: String,
    payload: String,
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    deliveries: u32,
    last_delivery: Instant,
}

#[derive(Debug, Default)]
struct MemGroup {
    /// Index of the next never-delivered entry.
    cursor: usize,
    /// Delivered-but-unacknowledged entries by id.
    pending: HashMap<String, PendingEntry>,
}

#[derive(Debug, Default)]
struct MemStream {
    entries: Vec<MemEntry>,
    next_seq: u64,
    groups: HashMap<String, MemGroup>,
}

#[derive(Debug)]
struct MemValue {
    value: String,
    expires_at: Option<Instant>,
}

impl MemValue {
    fn live(&self) -> bool {
        self.expires_at.is_none_or(|at| Instant::now() < at)
    }
}

#[derive(Default)]
struct Inner {
    streams: HashMap<String, MemStream>,
    queues: HashMap<String, VecDeque<String>>,
    values: HashMap<String, MemValue>,
    channels: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

/// In-process [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to a pub/sub channel (test-side observer).
    pub fn subscribe(&self, channel: &str) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap();
        inner.channels.entry(channel.to_string()).or_default().push(tx);
        rx
    }

    /// Current length of a list queue (test inspection).
    pub fn queue_len(&self, queue: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Names of all non-empty list queues (test inspection).
    pub fn queue_names(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .queues
            .iter()
            .filter(|(_, q)| !q.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Number of entries ever appended to a stream (test inspection).
    pub fn stream_len(&self, stream: &str) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.streams.get(stream).map_or(0, |s| s.entries.len())
    }
}

impl core::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock().unwrap();
        f.debug_struct("MemoryStore")
            .field("streams", &inner.streams.len())
            .field("queues", &inner.queues.len())
            .field("values", &inner.values.len())
            .finish()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn append_stream(&self, stream: &str, payload: &str) -> Result<String, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.entry(stream.to_string()).or_default();
        stream.next_seq += 1;
        let id = format!("{}-0", stream.next_seq);
        stream.entries.push(MemEntry {
            id: id.clone(),
            payload: payload.to_string(),
        });
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let stream = inner.streams.entry(stream.to_string()).or_default();
        stream.groups.entry(group.to_string()).or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let deadline = Instant::now() + block;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                let mem_stream = inner
                    .streams
                    .get_mut(stream)
                    .ok_or_else(|| StoreError::Command(format!("no such stream: {stream}")))?;
                let total = mem_stream.entries.len();
                let cursor = mem_stream
                    .groups
                    .get(group)
                    .ok_or_else(|| StoreError::Command(format!("no such group: {group}")))?
                    .cursor;

                if cursor < total {
                    let upto = (cursor + count).min(total);
                    let batch: Vec<MemEntry> = mem_stream.entries[cursor..upto].to_vec();
                    let group_state = mem_stream
                        .groups
                        .get_mut(group)
                        .ok_or_else(|| StoreError::Command(format!("no such group: {group}")))?;
                    group_state.cursor = upto;

                    let now = Instant::now();
                    let mut delivered = Vec::with_capacity(batch.len());
                    for entry in batch {
                        group_state.pending.insert(
                            entry.id.clone(),
                            PendingEntry {
                                consumer: consumer.to_string(),
                                deliveries: 1,
                                last_delivery: now,
                            },
                        );
                        delivered.push(StreamEntry {
                            id: entry.id,
                            payload: entry.payload,
                            deliveries: 1,
                        });
                    }
                    return Ok(delivered);
                }
            }

            if Instant::now() >= deadline {
                return Ok(Vec::new());
            }
            tokio::time::sleep(POLL_INTERVAL.min(block)).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(group_state) = inner
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };
        let mut acked = 0;
        for id in ids {
            if group_state.pending.remove(id).is_some() {
                acked += 1;
            }
        }
        Ok(acked)
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let Some(mem_stream) = inner.streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let entries = mem_stream.entries.clone();
        let Some(group_state) = mem_stream.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let mut idle_ids: Vec<String> = group_state
            .pending
            .iter()
            .filter(|(_, p)| p.last_delivery.elapsed() >= min_idle)
            .map(|(id, _)| id.clone())
            .collect();
        idle_ids.sort();
        idle_ids.truncate(count);

        let mut claimed = Vec::new();
        for id in idle_ids {
            let Some(pending) = group_state.pending.get_mut(&id) else {
                continue;
            };
            pending.consumer = consumer.to_string();
            pending.deliveries += 1;
            pending.last_delivery = Instant::now();

            if let Some(entry) = entries.iter().find(|e| e.id == id) {
                claimed.push(StreamEntry {
                    id: entry.id.clone(),
                    payload: entry.payload.clone(),
                    deliveries: pending.deliveries,
                });
            }
        }
        Ok(claimed)
    }

    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map_or(0, |g| g.pending.len() as u64))
    }

    async fn push_list(
        &self,
        queue: &str,
        payload: &str,
        _ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(payload.to_string());
        Ok(())
    }

    async fn pop_list(
        &self,
        queue: &str,
        timeout: Duration,
    ) -> Result<Option<String>, StoreError> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(popped) = inner.queues.get_mut(queue).and_then(VecDeque::pop_front) {
                    return Ok(Some(popped));
                }
            }

            if timeout.is_zero() || Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL.min(timeout)).await;
        }
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subscribers) = inner.channels.get_mut(channel) {
            subscribers.retain(|tx| tx.send(payload.to_string()).is_ok());
        }
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.values.get(key) {
            Some(v) if v.live() => Ok(Some(v.value.clone())),
            Some(_) => {
                inner.values.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.values.insert(
            key.to_string(),
            MemValue {
                value: value.to_string(),
                expires_at: ttl.map(|t| Instant::now() + t),
            },
        );
        Ok(())
    }

    async fn delete_value(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.values.remove(key) {
            Some(v) => Ok(v.live()),
            None => Ok(false),
        }
    }

    async fn increment(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<u64, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let fresh = !inner.values.get(key).is_some_and(MemValue::live);

        let current = if fresh {
            0
        } else {
            inner.values[key]
                .value
                .parse::<u64>()
                .map_err(|_| StoreError::Command(format!("value at {key} is not an integer")))?
        };
        let total = current + amount;

        let expires_at = if fresh {
            ttl.map(|t| Instant::now() + t)
        } else {
            inner.values[key].expires_at
        };
        inner.values.insert(
            key.to_string(),
            MemValue {
                value: total.to_string(),
                expires_at,
            },
        );
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_marks_pending_and_ack_clears_it() {
        let store = MemoryStore::new();
        store.ensure_group("s", "g").await.unwrap();
        let id = store.append_stream("s", "payload").await.unwrap();

        let read = store
            .read_group("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].id, id);
        assert_eq!(store.pending_count("s", "g").await.unwrap(), 1);

        // Same group does not see the entry again.
        let again = store
            .read_group("s", "g", "c1", 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(again.is_empty());

        store.ack("s", "g", &[id]).await.unwrap();
        assert_eq!(store.pending_count("s", "g").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn claim_takes_over_idle_entries_and_counts_deliveries() {
        let store = MemoryStore::new();
        store.ensure_group("s", "g").await.unwrap();
        store.append_stream("s", "payload").await.unwrap();

        // Consumer A reads and "crashes" without acking.
        let read = store
            .read_group("s", "g", "consumer-a", 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(read[0].deliveries, 1);

        // Not idle long enough yet.
        let early = store
            .claim_idle("s", "g", "consumer-b", Duration::from_secs(60), 10)
            .await
            .unwrap();
        assert!(early.is_empty());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let claimed = store
            .claim_idle("s", "g", "consumer-b", Duration::from_millis(10), 10)
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].deliveries, 2);
        assert_eq!(claimed[0].payload, "payload");
    }

    #[tokio::test]
    async fn blocking_pop_waits_for_a_push() {
        let store = std::sync::Arc::new(MemoryStore::new());

        let popper = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .pop_list("q", Duration::from_millis(500))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push_list("q", "hello", None).await.unwrap();

        assert_eq!(popper.await.unwrap(), Some("hello".to_string()));
    }

    #[tokio::test]
    async fn pop_times_out_empty() {
        let store = MemoryStore::new();
        let popped = store
            .pop_list("q", Duration::from_millis(20))
            .await
            .unwrap();
        assert_eq!(popped, None);
    }

    #[tokio::test]
    async fn counters_expire_with_their_window() {
        let store = MemoryStore::new();
        let total = store
            .increment("usage", 3, Some(Duration::from_millis(30)))
            .await
            .unwrap();
        assert_eq!(total, 3);

        // Later increments do not extend the window.
        let total = store
            .increment("usage", 2, Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(total, 5);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get_value("usage").await.unwrap(), None);
        let total = store.increment("usage", 1, None).await.unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe("chan");
        store.publish("chan", "ping").await.unwrap();
        assert_eq!(rx.recv().await, Some("ping".to_string()));
    }
}
