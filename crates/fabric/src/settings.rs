//! Per-service fabric configuration.
//!
//! Settings are consumed at construction time - components take them (or a
//! slice of them) as explicit constructor arguments. [`FabricSettings::from_env`]
//! populates them from `NOOBLE_*` environment variables with documented
//! defaults; only the service name is required.

use std::time::Duration;

use thiserror::Error;

use nooble_actions::names::{DEFAULT_ENVIRONMENT, DEFAULT_PREFIX};
use nooble_actions::NameBuilder;
use nooble_core::ServiceName;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {var}: `{value}`")]
    Invalid { var: &'static str, value: String },
}

/// Key-value store connection tuning.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Connection string, e.g. `redis://127.0.0.1:6379`.
    pub url: String,
    /// Bound on the initial connect + ping.
    pub socket_connect_timeout: Duration,
    /// How stale a cached connection may get before it is re-pinged.
    pub health_check_interval: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            socket_connect_timeout: Duration::from_millis(5_000),
            health_check_interval: Duration::from_millis(30_000),
        }
    }
}

/// Worker runtime tuning.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Extra routing segment in the action stream name (e.g. per-tenant).
    pub stream_context: Option<String>,
    /// Consumer group; defaults to `{service_name}_group`.
    pub consumer_group: Option<String>,
    /// Consumer id, unique per process; defaults to `{hostname}-{pid}`.
    pub consumer_id: Option<String>,
    /// Block duration of one stream read.
    pub block_timeout: Duration,
    /// Pending entries idle longer than this are claimed from dead consumers.
    pub idle_claim: Duration,
    /// How often the claim/backpressure sweep runs.
    pub claim_interval: Duration,
    /// Drain budget on shutdown.
    pub grace_shutdown: Duration,
    /// Deliveries after which an entry is dead-lettered instead of retried.
    pub max_deliveries: u32,
    /// Pending-list length above which the worker warns (backpressure).
    pub pending_warn_threshold: u64,
    /// Max entries per stream read.
    pub read_count: usize,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            stream_context: None,
            consumer_group: None,
            consumer_id: None,
            block_timeout: Duration::from_millis(2_000),
            idle_claim: Duration::from_millis(60_000),
            claim_interval: Duration::from_millis(30_000),
            grace_shutdown: Duration::from_millis(5_000),
            max_deliveries: 5,
            pending_warn_threshold: 1_000,
            read_count: 10,
        }
    }
}

impl WorkerSettings {
    pub fn consumer_group_for(&self, service_name: &str) -> String {
        self.consumer_group
            .clone()
            .unwrap_or_else(|| format!("{service_name}_group"))
    }

    pub fn consumer_id_or_default(&self) -> String {
        self.consumer_id.clone().unwrap_or_else(|| {
            let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
            format!("{host}-{}", std::process::id())
        })
    }
}

/// Transport client tuning.
#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Timeout for `send_pseudo_sync` when the caller passes none.
    pub default_pseudo_sync_timeout: Duration,
    /// TTL on reply queues; abandoned responses are reaped with the queue.
    pub response_queue_ttl: Duration,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            default_pseudo_sync_timeout: Duration::from_secs(30),
            response_queue_ttl: Duration::from_secs(300),
        }
    }
}

/// Tier engine switches.
#[derive(Debug, Clone)]
pub struct TierSettings {
    /// Master switch for downstream usage accounting.
    pub usage_tracking_enabled: bool,
}

impl Default for TierSettings {
    fn default() -> Self {
        Self {
            usage_tracking_enabled: true,
        }
    }
}

/// Everything a service hands to the fabric at startup.
#[derive(Debug, Clone)]
pub struct FabricSettings {
    /// First segment of every key/queue name.
    pub prefix: String,
    /// Second segment; isolates deployments sharing one store.
    pub environment: String,
    /// Origin service in envelopes and queue names.
    pub service_name: ServiceName,
    pub store: StoreSettings,
    pub worker: WorkerSettings,
    pub transport: TransportSettings,
    pub tier: TierSettings,
}

impl FabricSettings {
    pub fn new(service_name: impl Into<ServiceName>) -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            environment: DEFAULT_ENVIRONMENT.to_string(),
            service_name: service_name.into(),
            store: StoreSettings::default(),
            worker: WorkerSettings::default(),
            transport: TransportSettings::default(),
            tier: TierSettings::default(),
        }
    }

    /// Read settings from `NOOBLE_*` environment variables.
    ///
    /// `NOOBLE_SERVICE_NAME` is required; everything else falls back to the
    /// defaults documented on the individual settings structs.
    pub fn from_env() -> Result<Self, SettingsError> {
        let service_name = std::env::var("NOOBLE_SERVICE_NAME")
            .map_err(|_| SettingsError::Missing("NOOBLE_SERVICE_NAME"))?;

        let mut settings = Self::new(service_name);

        if let Ok(prefix) = std::env::var("NOOBLE_PREFIX") {
            settings.prefix = prefix;
        }
        if let Ok(environment) = std::env::var("NOOBLE_ENVIRONMENT") {
            settings.environment = environment;
        }
        if let Ok(url) = std::env::var("NOOBLE_STORE_URL") {
            settings.store.url = url;
        }

        settings.store.socket_connect_timeout = env_duration_ms(
            "NOOBLE_STORE_CONNECT_TIMEOUT_MS",
            settings.store.socket_connect_timeout,
        )?;
        settings.store.health_check_interval = env_duration_ms(
            "NOOBLE_STORE_HEALTH_CHECK_INTERVAL_MS",
            settings.store.health_check_interval,
        )?;

        settings.worker.stream_context = std::env::var("NOOBLE_WORKER_STREAM_CONTEXT").ok();
        settings.worker.consumer_group = std::env::var("NOOBLE_WORKER_CONSUMER_GROUP").ok();
        settings.worker.consumer_id = std::env::var("NOOBLE_WORKER_CONSUMER_ID").ok();
        settings.worker.block_timeout =
            env_duration_ms("NOOBLE_WORKER_BLOCK_TIMEOUT_MS", settings.worker.block_timeout)?;
        settings.worker.idle_claim =
            env_duration_ms("NOOBLE_WORKER_IDLE_CLAIM_MS", settings.worker.idle_claim)?;
        settings.worker.claim_interval = env_duration_ms(
            "NOOBLE_WORKER_CLAIM_INTERVAL_MS",
            settings.worker.claim_interval,
        )?;
        settings.worker.grace_shutdown = env_duration_ms(
            "NOOBLE_WORKER_GRACE_SHUTDOWN_MS",
            settings.worker.grace_shutdown,
        )?;
        settings.worker.max_deliveries = env_parse(
            "NOOBLE_WORKER_MAX_DELIVERIES",
            settings.worker.max_deliveries,
        )?;
        settings.worker.pending_warn_threshold = env_parse(
            "NOOBLE_WORKER_PENDING_WARN_THRESHOLD",
            settings.worker.pending_warn_threshold,
        )?;
        settings.worker.read_count =
            env_parse("NOOBLE_WORKER_READ_COUNT", settings.worker.read_count)?;

        settings.transport.default_pseudo_sync_timeout = env_duration_secs(
            "NOOBLE_TRANSPORT_PSEUDO_SYNC_TIMEOUT_S",
            settings.transport.default_pseudo_sync_timeout,
        )?;
        settings.transport.response_queue_ttl = env_duration_secs(
            "NOOBLE_TRANSPORT_RESPONSE_QUEUE_TTL_S",
            settings.transport.response_queue_ttl,
        )?;

        settings.tier.usage_tracking_enabled = env_parse(
            "NOOBLE_TIER_USAGE_TRACKING",
            settings.tier.usage_tracking_enabled,
        )?;

        Ok(settings)
    }

    /// Naming authority configured for this deployment.
    pub fn names(&self) -> NameBuilder {
        NameBuilder::new(&self.prefix, &self.environment)
    }
}

fn env_parse<T: std::str::FromStr>(var: &'static str, default: T) -> Result<T, SettingsError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| SettingsError::Invalid { var, value: raw }),
        Err(_) => Ok(default),
    }
}

fn env_duration_ms(var: &'static str, default: Duration) -> Result<Duration, SettingsError> {
    Ok(Duration::from_millis(env_parse(
        var,
        default.as_millis() as u64,
    )?))
}

fn env_duration_secs(var: &'static str, default: Duration) -> Result<Duration, SettingsError> {
    Ok(Duration::from_secs(env_parse(var, default.as_secs())?))
}
