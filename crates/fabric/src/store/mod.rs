//! Key-value store abstraction.
//!
//! One trait over every store primitive the fabric uses, with two
//! backends: [`RedisStore`] for production and [`MemoryStore`] for tests
//! and local development. Higher layers (transport, worker, state manager,
//! tier engine) are generic over [`Store`] and behave identically on both.

mod memory_store;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use nooble_core::ActionError;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

/// Store-level failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connectivity problem (refused, dropped, timed out). Transient:
    /// workers leave entries pending and retry.
    #[error("store connection error: {0}")]
    Connection(String),

    /// A command was rejected by the store.
    #[error("store command error: {0}")]
    Command(String),

    /// The store answered with a shape we cannot interpret.
    #[error("unexpected store reply: {0}")]
    Reply(String),
}

impl From<StoreError> for ActionError {
    fn from(err: StoreError) -> Self {
        ActionError::transient(err.to_string())
    }
}

/// One entry read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Stream-assigned entry id.
    pub id: String,
    /// Value of the single `data` field: the JSON-encoded envelope.
    pub payload: String,
    /// Delivery attempts so far, this one included.
    pub deliveries: u32,
}

/// Async surface of the shared key-value store.
///
/// Stream entries are written as a single-field map `data -> payload`;
/// queues are plain lists of payload strings.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Append one entry to a stream; returns the stream-assigned id.
    async fn append_stream(&self, stream: &str, payload: &str) -> Result<String, StoreError>;

    /// Create a consumer group from the beginning of a stream, creating the
    /// stream if needed. Idempotent: an already-existing group is fine.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), StoreError>;

    /// Read up to `count` new entries for `consumer` in `group`, blocking
    /// up to `block`. Empty result on timeout.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    /// Acknowledge processed entries; returns how many were pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<u64, StoreError>;

    /// Claim entries pending longer than `min_idle` (from any consumer in
    /// the group) for `consumer`. Claimed entries report their updated
    /// delivery count.
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamEntry>, StoreError>;

    /// Length of the group's pending list (backpressure signal).
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StoreError>;

    /// Push one element onto a list queue, refreshing its TTL if given.
    async fn push_list(
        &self,
        queue: &str,
        payload: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Pop one element from a list queue, blocking up to `timeout`
    /// (a zero timeout checks once without blocking).
    async fn pop_list(&self, queue: &str, timeout: Duration)
        -> Result<Option<String>, StoreError>;

    /// Publish to a pub/sub channel (best effort, not durable).
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), StoreError>;

    /// Read a string value.
    async fn get_value(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value with optional TTL.
    async fn set_value(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError>;

    /// Delete a key; true if it existed.
    async fn delete_value(&self, key: &str) -> Result<bool, StoreError>;

    /// Atomically add `amount` to a counter, returning the new total. The
    /// TTL is applied only when the increment created the key.
    async fn increment(
        &self,
        key: &str,
        amount: u64,
        ttl: Option<Duration>,
    ) -> Result<u64, StoreError>;
}
