//! Worker runtime: binds a service's `process_action` to its queues.
//!
//! [`ActionWorker`] consumes an action stream as part of a consumer group:
//! read, decode, dispatch, acknowledge. Failures are classified - terminal
//! ones are acked (after unblocking a pseudo-sync caller with a failure
//! response), transient ones are left pending for redelivery. A periodic
//! sweep claims entries stuck with dead consumers and surfaces pending
//! backlog as a backpressure warning; entries delivered too many times are
//! moved to the paired `:dead` stream so one poison pill cannot stall the
//! group.
//!
//! [`CallbackWorker`] is the list-queue analog the originating service
//! runs over its stable callback queue.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use nooble_actions::{
    codec, ActionService, DomainActionResponse, ErrorDetail, NameBuilder, ReplyPattern,
};
use nooble_core::{ActionError, ActionId, CorrelationId, TraceId};

use crate::settings::FabricSettings;
use crate::store::{Store, StoreError, StreamEntry};

/// Handle to control and join a spawned worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    grace: Duration,
}

impl WorkerHandle {
    /// Request graceful shutdown: stop reading, await the in-flight
    /// dispatch up to the grace budget, then abort.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if tokio::time::timeout(self.grace, &mut self.join)
            .await
            .is_err()
        {
            warn!("worker exceeded shutdown grace, aborting");
            self.join.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

/// Stream consumer-group worker for one service.
pub struct ActionWorker<S> {
    store: Arc<S>,
    service: Arc<dyn ActionService>,
    settings: FabricSettings,
    stream: String,
    group: String,
    consumer: String,
}

impl<S: Store> ActionWorker<S> {
    pub fn new(store: Arc<S>, service: Arc<dyn ActionService>, settings: FabricSettings) -> Self {
        let stream = settings.names().action_stream(
            settings.service_name.as_str(),
            settings.worker.stream_context.as_deref(),
        );
        let group = settings
            .worker
            .consumer_group_for(settings.service_name.as_str());
        let consumer = settings.worker.consumer_id_or_default();
        Self {
            store,
            service,
            settings,
            stream,
            group,
            consumer,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn consumer_group(&self) -> &str {
        &self.group
    }

    /// Ensure the consumer group exists, then start the read loop.
    ///
    /// Group creation failure is a startup error (fail fast); an
    /// already-existing group is fine.
    pub async fn spawn(self) -> Result<WorkerHandle, StoreError> {
        self.store.ensure_group(&self.stream, &self.group).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let grace = self.settings.worker.grace_shutdown;
        let join = tokio::spawn(self.run(shutdown_rx));
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join,
            grace,
        })
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            stream = %self.stream,
            group = %self.group,
            consumer = %self.consumer,
            "action worker started"
        );

        let mut last_sweep: Option<Instant> = None;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let sweep_due = last_sweep
                .is_none_or(|at| at.elapsed() >= self.settings.worker.claim_interval);
            if sweep_due {
                self.sweep_pending().await;
                last_sweep = Some(Instant::now());
            }

            let read = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Handle dropped: treat as shutdown.
                        break;
                    }
                    continue;
                }
                read = self.store.read_group(
                    &self.stream,
                    &self.group,
                    &self.consumer,
                    self.settings.worker.read_count,
                    self.settings.worker.block_timeout,
                ) => read,
            };

            match read {
                Ok(entries) => {
                    for entry in entries {
                        // In-flight dispatch is never interrupted; the
                        // shutdown check happens between entries.
                        self.process(entry).await;
                    }
                }
                Err(err) => {
                    warn!(stream = %self.stream, error = %err, "stream read failed");
                    tokio::time::sleep(self.settings.worker.block_timeout).await;
                }
            }
        }

        info!(stream = %self.stream, consumer = %self.consumer, "action worker stopped");
    }

    /// Claim entries stuck with dead consumers and check backpressure.
    async fn sweep_pending(&self) {
        match self
            .store
            .claim_idle(
                &self.stream,
                &self.group,
                &self.consumer,
                self.settings.worker.idle_claim,
                self.settings.worker.read_count,
            )
            .await
        {
            Ok(claimed) => {
                for entry in claimed {
                    debug!(
                        stream = %self.stream,
                        entry_id = %entry.id,
                        deliveries = entry.deliveries,
                        "claimed idle entry"
                    );
                    self.process(entry).await;
                }
            }
            Err(err) => warn!(stream = %self.stream, error = %err, "idle claim failed"),
        }

        match self.store.pending_count(&self.stream, &self.group).await {
            Ok(pending) if pending > self.settings.worker.pending_warn_threshold => {
                warn!(
                    stream = %self.stream,
                    group = %self.group,
                    pending,
                    threshold = self.settings.worker.pending_warn_threshold,
                    "consumer group pending backlog above threshold"
                );
            }
            Ok(_) => {}
            Err(err) => warn!(stream = %self.stream, error = %err, "pending count failed"),
        }
    }

    async fn process(&self, entry: StreamEntry) {
        if entry.deliveries > self.settings.worker.max_deliveries {
            self.dead_letter(&entry).await;
            return;
        }

        let action = match codec::decode(&entry.payload) {
            Ok(action) => action,
            Err(err) => {
                error!(
                    stream = %self.stream,
                    entry_id = %entry.id,
                    error = %err,
                    "undecodable envelope dropped"
                );
                if let Some((queue, response)) = salvage_failure_reply(&entry.payload, &err) {
                    self.emit_failure(&queue, &response).await;
                }
                self.ack(&entry).await;
                return;
            }
        };

        debug!(
            stream = %self.stream,
            entry_id = %entry.id,
            action_type = %action.action_type(),
            action_id = %action.action_id(),
            "dispatching"
        );

        match self.service.process_action(action.clone()).await {
            Ok(()) => self.ack(&entry).await,
            Err(err) if err.is_transient() => {
                // Not acked: the entry stays pending and is redelivered.
                warn!(
                    stream = %self.stream,
                    entry_id = %entry.id,
                    action_type = %action.action_type(),
                    error = %err,
                    "transient failure, leaving entry pending"
                );
            }
            Err(err) => {
                error!(
                    stream = %self.stream,
                    entry_id = %entry.id,
                    action_type = %action.action_type(),
                    error = %err,
                    "terminal failure, dropping entry"
                );
                // Unblock a pseudo-sync caller. A service that already
                // responded produces a duplicate, which the reply-queue
                // TTL reaps.
                if action.reply_pattern() == ReplyPattern::PseudoSync {
                    if let Some(queue) = action.callback_queue_name() {
                        let response =
                            DomainActionResponse::fail(&action, ErrorDetail::from(&err));
                        self.emit_failure(queue, &response).await;
                    }
                }
                self.ack(&entry).await;
            }
        }
    }

    async fn ack(&self, entry: &StreamEntry) {
        if let Err(err) = self
            .store
            .ack(&self.stream, &self.group, std::slice::from_ref(&entry.id))
            .await
        {
            warn!(
                stream = %self.stream,
                entry_id = %entry.id,
                error = %err,
                "ack failed"
            );
        }
    }

    async fn emit_failure(&self, queue: &str, response: &DomainActionResponse) {
        let payload = match codec::encode_response(response) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "failure response encode failed");
                return;
            }
        };
        if let Err(err) = self
            .store
            .push_list(
                queue,
                &payload,
                Some(self.settings.transport.response_queue_ttl),
            )
            .await
        {
            warn!(queue = %queue, error = %err, "failure response push failed");
        }
    }

    /// Move a poison pill to the dead-letter stream and ack it.
    async fn dead_letter(&self, entry: &StreamEntry) {
        let dead_stream = NameBuilder::dead_letter_stream(&self.stream);
        let record = serde_json::json!({
            "source_entry_id": entry.id,
            "deliveries": entry.deliveries,
            "dead_at": chrono::Utc::now().to_rfc3339(),
            "envelope": entry.payload,
        });

        match self
            .store
            .append_stream(&dead_stream, &record.to_string())
            .await
        {
            Ok(_) => {
                warn!(
                    stream = %self.stream,
                    entry_id = %entry.id,
                    deliveries = entry.deliveries,
                    "entry dead-lettered"
                );
                self.ack(entry).await;
            }
            Err(err) => {
                // Leave the entry pending; the next sweep retries the move.
                warn!(
                    stream = %self.stream,
                    entry_id = %entry.id,
                    error = %err,
                    "dead-letter append failed"
                );
            }
        }
    }
}

/// Best-effort recovery of the reply coordinates from an undecodable
/// envelope, so a pseudo-sync caller is not left waiting for the full
/// timeout. Callback-pattern envelopes are skipped: their failure
/// convention is a dedicated callback action type the originator
/// registers, which cannot be known here.
fn salvage_failure_reply(
    payload: &str,
    err: &ActionError,
) -> Option<(String, DomainActionResponse)> {
    let value: Value = serde_json::from_str(payload).ok()?;
    let queue = value.get("callback_queue_name")?.as_str()?.to_string();
    if value
        .get("callback_action_type")
        .and_then(Value::as_str)
        .is_some()
    {
        return None;
    }

    let action_id = value
        .get("action_id")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<ActionId>().ok())
        .unwrap_or_default();
    let correlation_id = value
        .get("correlation_id")
        .and_then(Value::as_str)
        .map(CorrelationId::new);
    let trace_id = value
        .get("trace_id")
        .and_then(Value::as_str)
        .map(TraceId::new);

    Some((
        queue,
        DomainActionResponse::fail_detached(
            action_id,
            correlation_id,
            trace_id,
            ErrorDetail::from(err),
        ),
    ))
}

/// List-queue worker over a stable callback queue.
///
/// Pops are destructive (no pending list, no ack); decode and dispatch
/// failures are logged and the element is dropped.
pub struct CallbackWorker<S> {
    store: Arc<S>,
    service: Arc<dyn ActionService>,
    queue: String,
    block_timeout: Duration,
    grace: Duration,
}

impl<S: Store> CallbackWorker<S> {
    pub fn new(
        store: Arc<S>,
        service: Arc<dyn ActionService>,
        queue: impl Into<String>,
        settings: &FabricSettings,
    ) -> Self {
        Self {
            store,
            service,
            queue: queue.into(),
            block_timeout: settings.worker.block_timeout,
            grace: settings.worker.grace_shutdown,
        }
    }

    /// Worker over this service's callback queue for `event`.
    pub fn for_event(
        store: Arc<S>,
        service: Arc<dyn ActionService>,
        event: &str,
        settings: &FabricSettings,
    ) -> Self {
        let queue = settings.names().callback_queue(
            settings.service_name.as_str(),
            settings.worker.stream_context.as_deref(),
            event,
        );
        Self::new(store, service, queue, settings)
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn spawn(self) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let grace = self.grace;
        let join = tokio::spawn(self.run(shutdown_rx));
        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            grace,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(queue = %self.queue, "callback worker started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let popped = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                popped = self.store.pop_list(&self.queue, self.block_timeout) => popped,
            };

            match popped {
                Ok(Some(raw)) => match codec::decode(&raw) {
                    Ok(action) => {
                        if let Err(err) = self.service.process_action(action).await {
                            error!(queue = %self.queue, error = %err, "callback dispatch failed");
                        }
                    }
                    Err(err) => {
                        error!(queue = %self.queue, error = %err, "undecodable callback dropped");
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    warn!(queue = %self.queue, error = %err, "callback pop failed");
                    tokio::time::sleep(self.block_timeout).await;
                }
            }
        }

        info!(queue = %self.queue, "callback worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn salvage_recovers_reply_coordinates_from_broken_envelopes() {
        let err = ActionError::bad_envelope("decode failed");
        let payload = r#"{
            "callback_queue_name": "nooble4:dev:orchestrator:responses:q:c9",
            "correlation_id": "c9",
            "data": "not-an-object"
        }"#;

        let (queue, response) = salvage_failure_reply(payload, &err).unwrap();
        assert_eq!(queue, "nooble4:dev:orchestrator:responses:q:c9");
        assert!(!response.is_success());
        assert_eq!(response.correlation_id().unwrap().as_str(), "c9");
        assert_eq!(response.error().unwrap().error_code(), "BAD_ENVELOPE");
    }

    #[test]
    fn salvage_skips_callback_pattern_envelopes() {
        let err = ActionError::bad_envelope("decode failed");
        let payload = r#"{
            "callback_queue_name": "nooble4:dev:ingestion:callbacks:embedding_done",
            "callback_action_type": "ingestion.embedding.done"
        }"#;
        assert!(salvage_failure_reply(payload, &err).is_none());
    }

    #[test]
    fn salvage_requires_a_reply_queue() {
        let err = ActionError::bad_envelope("decode failed");
        assert!(salvage_failure_reply("{}", &err).is_none());
        assert!(salvage_failure_reply("not json", &err).is_none());
    }
}
