//! Gate state management and decision logic.

mod identity;
mod memory;
mod pipeline;
mod redis;
mod store;

pub use identity::resolve_identity;
pub use memory::InMemoryStore;
pub use pipeline::{DenyReason, GatePipeline, SignalOutcome, Verdict};
pub use redis::RedisStore;
pub use store::{Decision, GateStore};
