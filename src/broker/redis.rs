//! Redis adapter for the broker surface.
//!
//! Short commands go through a shared [`ConnectionManager`] (multiplexed,
//! reconnecting); every polling loop gets its own connection from
//! [`Broker::dedicated`] so a pending BLPOP never stalls unrelated commands.

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::ErrorKind;

use crate::broker::{Broker, BrokerQueue};
use crate::error::{JobwireError, Result};

pub struct RedisBroker {
    client: redis::Client,
    manager: ConnectionManager,
}

impl RedisBroker {
    /// Connect to the broker at `url`, e.g. `redis://127.0.0.1:6379`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_err)?;
        let manager = client.get_connection_manager().await.map_err(map_err)?;
        Ok(Self { client, manager })
    }
}

fn map_err(e: redis::RedisError) -> JobwireError {
    if e.kind() == ErrorKind::TypeError {
        JobwireError::InvalidReply(e.to_string())
    } else {
        JobwireError::Broker(e.to_string())
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn append(&self, list: &str, value: &[u8]) -> Result<i64> {
        let mut conn = self.manager.clone();
        redis::cmd("RPUSH")
            .arg(list)
            .arg(value)
            .query_async::<_, i64>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn range(&self, list: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("LRANGE")
            .arg(list)
            .arg(start)
            .arg(stop)
            .query_async::<_, Vec<String>>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn hash_set(&self, key: &str, pairs: &[(String, String)]) -> Result<()> {
        let mut cmd = redis::cmd("HSET");
        cmd.arg(key);
        for (k, v) in pairs {
            cmd.arg(k).arg(v);
        }
        let mut conn = self.manager.clone();
        cmd.query_async::<_, ()>(&mut conn).await.map_err(map_err)
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.manager.clone();
        redis::cmd("HGETALL")
            .arg(key)
            .query_async::<_, HashMap<String, String>>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.manager.clone();
        redis::cmd("SETNX")
            .arg(key)
            .arg(value)
            .query_async::<_, bool>(&mut conn)
            .await
            .map_err(map_err)
    }

    async fn dedicated(&self) -> Result<Box<dyn BrokerQueue>> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_err)?;
        Ok(Box::new(RedisQueue { conn }))
    }
}

struct RedisQueue {
    conn: MultiplexedConnection,
}

#[async_trait]
impl BrokerQueue for RedisQueue {
    async fn blocking_pop(&mut self, list: &str, timeout_secs: u64) -> Result<Option<Vec<u8>>> {
        // BLPOP replies (key, value), or nil on timeout.
        let reply = redis::cmd("BLPOP")
            .arg(list)
            .arg(timeout_secs)
            .query_async::<_, Option<(String, Vec<u8>)>>(&mut self.conn)
            .await
            .map_err(map_err)?;
        Ok(reply.map(|(_, value)| value))
    }
}
