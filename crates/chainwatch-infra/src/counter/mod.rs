//! Counter store backends: redis for shared deployments, an in-process
//! sharded map for single-replica dev/test.

mod memory;
mod redis;

pub use memory::InMemoryCounterStore;
pub use redis::{RedisCounterConfig, RedisCounterStore};
