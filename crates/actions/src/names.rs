//! Queue naming authority.
//!
//! Every stream, queue, channel, and key name in the fabric is derived
//! here and nowhere else. All functions are pure string construction -
//! deterministic for fixed inputs, no I/O.
//!
//! Segments are joined with `:`, so individual segments (service names,
//! contexts, event names) must not contain `:` themselves.

/// Default name prefix for every key, stream, queue, and channel.
pub const DEFAULT_PREFIX: &str = "nooble4";

/// Default environment segment when a deployment does not set one.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Derives fabric names from a `(prefix, environment)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameBuilder {
    prefix: String,
    environment: String,
}

impl Default for NameBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX, DEFAULT_ENVIRONMENT)
    }
}

impl NameBuilder {
    pub fn new(prefix: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            environment: environment.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn scoped(&self, service: &str, context: Option<&str>) -> String {
        match context {
            Some(ctx) => format!("{}:{}:{}:{}", self.prefix, self.environment, service, ctx),
            None => format!("{}:{}:{}", self.prefix, self.environment, service),
        }
    }

    /// Action stream a service consumes:
    /// `{prefix}:{env}:{service}[:{context}]:actions:stream`.
    pub fn action_stream(&self, service: &str, context: Option<&str>) -> String {
        format!("{}:actions:stream", self.scoped(service, context))
    }

    /// Per-call reply queue for a pseudo-synchronous send:
    /// `{prefix}:{env}:{origin}[:{context}]:responses:{action_name}:{correlation_id}`.
    pub fn response_queue(
        &self,
        origin_service: &str,
        context: Option<&str>,
        action_name: &str,
        correlation_id: &str,
    ) -> String {
        format!(
            "{}:responses:{}:{}",
            self.scoped(origin_service, context),
            action_name,
            correlation_id
        )
    }

    /// Stable per-event callback queue:
    /// `{prefix}:{env}:{origin}[:{context}]:callbacks:{event_name}`.
    pub fn callback_queue(
        &self,
        origin_service: &str,
        context: Option<&str>,
        event_name: &str,
    ) -> String {
        format!("{}:callbacks:{}", self.scoped(origin_service, context), event_name)
    }

    /// Pub/sub notification channel:
    /// `{prefix}:{env}:{origin}[:{context}]:notifications:{event_name}`.
    pub fn notification_channel(
        &self,
        origin_service: &str,
        context: Option<&str>,
        event_name: &str,
    ) -> String {
        format!(
            "{}:notifications:{}",
            self.scoped(origin_service, context),
            event_name
        )
    }

    /// State-manager key: `{prefix}:{env}:{service}:state:{schema}:{key}`.
    pub fn state_key(&self, service: &str, schema: &str, key: &str) -> String {
        format!("{}:state:{}:{}", self.scoped(service, None), schema, key)
    }

    /// Tier usage counter:
    /// `{prefix}:{env}:tier:usage:{tenant}:{resource}[:{window}]`.
    pub fn usage_key(&self, tenant: &str, resource: &str, window: Option<&str>) -> String {
        let base = format!("{}:usage:{}:{}", self.scoped("tier", None), tenant, resource);
        match window {
            Some(w) => format!("{base}:{w}"),
            None => base,
        }
    }

    /// Dead-letter stream paired with an action stream.
    pub fn dead_letter_stream(stream: &str) -> String {
        format!("{stream}:dead")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_stream_matches_the_wire_contract() {
        let names = NameBuilder::default();
        assert_eq!(
            names.action_stream("ingestion", None),
            "nooble4:dev:ingestion:actions:stream"
        );
        assert_eq!(
            names.action_stream("query", Some("tenant-7")),
            "nooble4:dev:query:tenant-7:actions:stream"
        );
    }

    #[test]
    fn response_queue_is_unique_per_correlation() {
        let names = NameBuilder::default();
        assert_eq!(
            names.response_queue("orchestrator", None, "query.rag.search", "c1"),
            "nooble4:dev:orchestrator:responses:query.rag.search:c1"
        );
        assert_ne!(
            names.response_queue("orchestrator", None, "query.rag.search", "c1"),
            names.response_queue("orchestrator", None, "query.rag.search", "c2"),
        );
    }

    #[test]
    fn callback_queue_is_stable_per_event() {
        let names = NameBuilder::default();
        assert_eq!(
            names.callback_queue("ingestion", None, "embedding_done"),
            "nooble4:dev:ingestion:callbacks:embedding_done"
        );
        // Stable: same inputs, same name, every call.
        assert_eq!(
            names.callback_queue("ingestion", None, "embedding_done"),
            names.callback_queue("ingestion", None, "embedding_done"),
        );
    }

    #[test]
    fn notification_channel_and_state_key_formats() {
        let names = NameBuilder::new("nooble4", "prod");
        assert_eq!(
            names.notification_channel("conversation", None, "message_ready"),
            "nooble4:prod:conversation:notifications:message_ready"
        );
        assert_eq!(
            names.state_key("orchestrator", "execution_context", "ctx-1"),
            "nooble4:prod:orchestrator:state:execution_context:ctx-1"
        );
    }

    #[test]
    fn usage_key_bakes_the_window_into_the_name() {
        let names = NameBuilder::default();
        assert_eq!(
            names.usage_key("t1", "queries_per_hour", Some("2026080112")),
            "nooble4:dev:tier:usage:t1:queries_per_hour:2026080112"
        );
        assert_eq!(
            names.usage_key("t1", "max_agents", None),
            "nooble4:dev:tier:usage:t1:max_agents"
        );
    }

    #[test]
    fn dead_letter_stream_suffixes_the_source() {
        assert_eq!(
            NameBuilder::dead_letter_stream("nooble4:dev:query:actions:stream"),
            "nooble4:dev:query:actions:stream:dead"
        );
    }
}
