//! Broker adapter boundary.
//!
//! The broker is an external ordered list/key-value service; everything the
//! protocol needs from it is expressed here as a typed command surface.
//! Adapters decode the broker's dynamic reply format at this boundary and
//! fail with [`JobwireError::InvalidReply`](crate::error::JobwireError) on a
//! shape mismatch, so the rest of the crate never touches raw replies.
//!
//! Long-lived polling loops (worker dispatch, demultiplexers, `wait`) each
//! hold a dedicated connection obtained from [`Broker::dedicated`]; short
//! commands share the adapter's internal connection.

pub mod memory;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::MemoryBroker;
pub use self::redis::RedisBroker;

/// Typed command surface of the shared broker.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append `value` to an ordered list, returning the new length.
    /// Appending to the submission log doubles as the id generator.
    async fn append(&self, list: &str, value: &[u8]) -> Result<i64>;

    /// Values of `list` between `start` and `stop` inclusive; negative
    /// indices count from the end (`-1` is the last element).
    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Set several fields of a hash at once.
    async fn hash_set(&self, key: &str, pairs: &[(String, String)]) -> Result<()>;

    /// All field/value pairs of a hash; empty map if the hash is absent.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Atomic set-if-absent. Returns true when this caller created the key;
    /// this is the exclusivity token behind job claims.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// Open a dedicated connection for blocking pops.
    async fn dedicated(&self) -> Result<Box<dyn BrokerQueue>>;
}

/// A dedicated broker connection used by one polling loop for its lifetime.
#[async_trait]
pub trait BrokerQueue: Send {
    /// Pop the head of `list`, blocking until a value arrives. A timeout of
    /// zero waits forever; `Ok(None)` means a non-zero timeout elapsed.
    async fn blocking_pop(&mut self, list: &str, timeout_secs: u64) -> Result<Option<Vec<u8>>>;
}
