//! Wire model and service contract of the Nooble fabric.
//!
//! Everything here is pure: envelopes, their JSON codec, the queue naming
//! authority, the execution-context state object, and the contract a
//! business service implements. I/O lives in `nooble-fabric`.

pub mod codec;
pub mod context;
pub mod dispatch;
pub mod envelope;
pub mod names;
pub mod service;

pub use context::{ContextType, ExecutionContext};
pub use dispatch::{ActionHandler, HandlerRegistry};
pub use envelope::{
    ActionType, DomainAction, DomainActionResponse, ErrorDetail, JsonMap, ReplyPattern,
};
pub use names::NameBuilder;
pub use service::ActionService;
