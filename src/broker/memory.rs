//! In-process broker with the same semantics as the Redis adapter.
//!
//! Useful for tests and single-process demos: ordered lists with blocking
//! pops, hashes, cells, and an atomic set-if-absent. All clones share state.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::broker::{Broker, BrokerQueue};
use crate::error::{JobwireError, Result};

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<Vec<u8>>>,
    hashes: HashMap<String, HashMap<String, String>>,
    cells: HashMap<String, String>,
}

struct Shared {
    state: Mutex<State>,
    // One notifier for all lists; poppers re-check after every wakeup.
    notify: Notify,
}

#[derive(Clone)]
pub struct MemoryBroker {
    shared: Arc<Shared>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.shared
            .state
            .lock()
            .map_err(|_| JobwireError::Broker("broker state poisoned".to_string()))
    }

    fn try_pop(&self, list: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.lock()?;
        Ok(state.lists.get_mut(list).and_then(VecDeque::pop_front))
    }

    async fn pop_wait(&self, list: &str) -> Result<Vec<u8>> {
        loop {
            // Register for wakeups before checking, so an append between the
            // check and the await is not lost.
            let notified = self.shared.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(value) = self.try_pop(list)? {
                return Ok(value);
            }
            notified.await;
        }
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn append(&self, list: &str, value: &[u8]) -> Result<i64> {
        let len = {
            let mut state = self.lock()?;
            let entries = state.lists.entry(list.to_string()).or_default();
            entries.push_back(value.to_vec());
            entries.len() as i64
        };
        self.shared.notify.notify_waiters();
        Ok(len)
    }

    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let state = self.lock()?;
        let Some(entries) = state.lists.get(list) else {
            return Ok(Vec::new());
        };
        let len = entries.len() as i64;
        let clamp = |i: i64| -> i64 {
            let i = if i < 0 { len + i } else { i };
            i.clamp(0, len)
        };
        let start = clamp(start);
        let stop = (clamp(stop) + 1).min(len);
        if start >= stop {
            return Ok(Vec::new());
        }
        entries
            .iter()
            .skip(start as usize)
            .take((stop - start) as usize)
            .map(|v| {
                String::from_utf8(v.clone())
                    .map_err(|_| JobwireError::InvalidReply("non-utf8 list entry".to_string()))
            })
            .collect()
    }

    async fn hash_set(&self, key: &str, pairs: &[(String, String)]) -> Result<()> {
        let mut state = self.lock()?;
        let hash = state.hashes.entry(key.to_string()).or_default();
        for (k, v) in pairs {
            hash.insert(k.clone(), v.clone());
        }
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let state = self.lock()?;
        Ok(state.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let state = self.lock()?;
        Ok(state.cells.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut state = self.lock()?;
        state.cells.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if state.cells.contains_key(key) {
            return Ok(false);
        }
        state.cells.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn dedicated(&self) -> Result<Box<dyn BrokerQueue>> {
        Ok(Box::new(MemoryQueue {
            broker: self.clone(),
        }))
    }
}

struct MemoryQueue {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerQueue for MemoryQueue {
    async fn blocking_pop(&mut self, list: &str, timeout_secs: u64) -> Result<Option<Vec<u8>>> {
        if timeout_secs == 0 {
            return self.broker.pop_wait(list).await.map(Some);
        }
        match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.broker.pop_wait(list),
        )
        .await
        {
            Ok(value) => value.map(Some),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn append_assigns_positions() {
        let broker = MemoryBroker::new();
        assert_eq!(broker.append("/jobs", b"a").await.unwrap(), 1);
        assert_eq!(broker.append("/jobs", b"b").await.unwrap(), 2);
        assert_eq!(
            broker.range("/jobs", 0, -1).await.unwrap(),
            vec!["a".to_string(), "b".to_string()]
        );
        assert_eq!(
            broker.range("/jobs", 1, 1).await.unwrap(),
            vec!["b".to_string()]
        );
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_append() {
        let broker = MemoryBroker::new();
        let mut queue = broker.dedicated().await.unwrap();
        let waiter = tokio::spawn(async move { queue.blocking_pop("/q", 0).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        broker.append("/q", b"v").await.unwrap();
        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn blocking_pop_times_out() {
        let broker = MemoryBroker::new();
        let mut queue = broker.dedicated().await.unwrap();
        // No producer; sub-second timeouts are not modeled, so use the
        // shortest non-zero wait.
        let start = std::time::Instant::now();
        let popped = queue.blocking_pop("/empty", 1).await.unwrap();
        assert!(popped.is_none());
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn set_if_absent_is_exclusive() {
        let broker = MemoryBroker::new();
        assert!(broker.set_if_absent("/k", "a").await.unwrap());
        assert!(!broker.set_if_absent("/k", "b").await.unwrap());
        assert_eq!(broker.get("/k").await.unwrap(), Some("a".to_string()));
    }

    #[tokio::test]
    async fn hash_round_trip() {
        let broker = MemoryBroker::new();
        broker
            .hash_set(
                "/env",
                &[
                    ("PATH".to_string(), "/bin".to_string()),
                    ("HOME".to_string(), "/root".to_string()),
                ],
            )
            .await
            .unwrap();
        let all = broker.hash_get_all("/env").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all.get("PATH").map(String::as_str), Some("/bin"));
    }
}
