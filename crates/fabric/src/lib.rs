//! Transport and runtime of the Nooble fabric.
//!
//! Everything that touches the key-value store lives here: the connection
//! pool, the [`Store`](store::Store) abstraction with its Redis and
//! in-memory backends, the typed state manager, the transport client with
//! the three send patterns, and the worker runtime that binds a service's
//! `process_action` to its action stream.

pub mod pool;
pub mod settings;
pub mod state;
pub mod store;
pub mod transport;
pub mod worker;


pub use pool::RedisPool;
pub use settings::{
    FabricSettings, SettingsError, StoreSettings, TierSettings, TransportSettings, WorkerSettings,
};
pub use state::{StateError, StateManager};
pub use store::{MemoryStore, RedisStore, Store, StoreError, StreamEntry};
pub use transport::{TransportClient, TransportError};
pub use worker::{ActionWorker, CallbackWorker, WorkerHandle};
