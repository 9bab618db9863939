//! Client-side job handle.
//!
//! A job moves Created -> Started -> Completed. Submission assigns the id
//! (position in the broker's submission log); `start` makes the arguments
//! and environment durable before appending the start signal, so no worker
//! can observe the signal and race ahead of its inputs; `wait` checks the
//! status cell first and only then blocks on the completion-wait queue.

use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::Broker;
use crate::config::WireConfig;
use crate::error::{JobwireError, Result};
use crate::keyspace::{JobId, Keyspace};
use crate::stream::{StreamChannel, Streamer};

/// Submits jobs against one broker/keyspace.
pub struct Client {
    broker: Arc<dyn Broker>,
    config: WireConfig,
    keyspace: Keyspace,
}

impl Client {
    pub fn new(broker: Arc<dyn Broker>, config: WireConfig) -> Self {
        let keyspace = Keyspace::new(config.key_prefix.clone());
        Self {
            broker,
            config,
            keyspace,
        }
    }

    /// Create and register a new job. The broker assigns the id; no worker
    /// is signalled until [`Job::start`].
    pub async fn new_job(&self, name: &str, args: Vec<String>) -> Result<Job> {
        let length = self
            .broker
            .append(&self.keyspace.jobs(), name.as_bytes())
            .await?;
        let id = length - 1;
        // The client reads the job's "out" queue and writes its "in" queue.
        let (streams, _errors) = Streamer::new(
            self.broker.clone(),
            self.keyspace.streams_out(id),
            self.keyspace.streams_in(id),
            &self.config,
        );
        tracing::debug!(job_id = id, name, "Job created");
        Ok(Job {
            id,
            name: name.to_string(),
            args,
            env: HashMap::new(),
            state: JobState::Created,
            status: None,
            broker: self.broker.clone(),
            keyspace: self.keyspace.clone(),
            streams,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Started,
    Completed,
}

pub struct Job {
    id: JobId,
    name: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    state: JobState,
    // Terminal status, cached after the first successful wait.
    status: Option<String>,
    broker: Arc<dyn Broker>,
    keyspace: Keyspace,
    streams: Streamer,
}

impl Job {
    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Split `KEY=VALUE` pairs into an environment map. Pairs without `=`
    /// are skipped.
    pub fn env_from_pairs<I, S>(pairs: I) -> HashMap<String, String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        pairs
            .into_iter()
            .filter_map(|pair| {
                pair.as_ref()
                    .split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect()
    }

    /// Transfer the arguments and environment to the broker, then append the
    /// job id to the start-notification queue. The ordering is mandatory:
    /// workers race to read args/env the moment the signal lands.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != JobState::Created {
            return Err(JobwireError::Internal(format!(
                "job {} already started",
                self.id
            )));
        }
        if !self.args.is_empty() {
            let args_key = self.keyspace.args(self.id);
            for arg in &self.args {
                self.broker.append(&args_key, arg.as_bytes()).await?;
            }
        }
        if !self.env.is_empty() {
            let pairs: Vec<(String, String)> = self
                .env
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            self.broker
                .hash_set(&self.keyspace.env(self.id), &pairs)
                .await?;
        }
        self.broker
            .append(&self.keyspace.start(), self.id.to_string().as_bytes())
            .await?;
        self.state = JobState::Started;
        tracing::debug!(job_id = self.id, name = %self.name, "Job started");
        Ok(())
    }

    /// Open a read stream on the job's output.
    pub async fn open_read(&self, name: &str) -> Result<StreamChannel> {
        self.streams.open_read(name).await
    }

    /// Open a write stream on the job's input.
    pub async fn open_write(&self, name: &str) -> Result<StreamChannel> {
        self.streams.open_write(name).await
    }

    /// Block until the worker publishes the job's terminal status. An empty
    /// status is success; anything else surfaces as
    /// [`JobwireError::JobFailed`]. Once a status is known every later call
    /// returns it immediately, and so does `wait` on any other handle for a
    /// job whose status cell is already set.
    pub async fn wait(&mut self) -> Result<()> {
        if let Some(status) = &self.status {
            return status_result(status);
        }
        if let Some(status) = self.broker.get(&self.keyspace.status(self.id)).await? {
            return self.finish(status);
        }
        let mut queue = self.broker.dedicated().await?;
        let raw = queue
            .blocking_pop(&self.keyspace.wait(self.id), 0)
            .await?
            .ok_or_else(|| JobwireError::Broker("wait queue pop interrupted".to_string()))?;
        let status = String::from_utf8(raw)
            .map_err(|_| JobwireError::InvalidReply("non-utf8 status".to_string()))?;
        self.finish(status)
    }

    /// Tear down the worker side of the job's streams by sending the
    /// end-of-job terminator on the input queue. `wait` never does this
    /// implicitly.
    pub async fn close(&self) -> Result<()> {
        self.streams.shutdown().await
    }

    fn finish(&mut self, status: String) -> Result<()> {
        tracing::debug!(job_id = self.id, status = %status, "Job completed");
        self.state = JobState::Completed;
        self.status = Some(status);
        status_result(self.status.as_deref().unwrap_or(""))
    }
}

fn status_result(status: &str) -> Result<()> {
    if status.is_empty() {
        Ok(())
    } else {
        Err(JobwireError::JobFailed(status.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_from_pairs_splits_on_first_equals() {
        let env = Job::env_from_pairs(["PATH=/bin:/usr/bin", "EMPTY=", "X=a=b", "garbage"]);
        assert_eq!(env.len(), 3);
        assert_eq!(env.get("PATH").map(String::as_str), Some("/bin:/usr/bin"));
        assert_eq!(env.get("EMPTY").map(String::as_str), Some(""));
        assert_eq!(env.get("X").map(String::as_str), Some("a=b"));
    }
}
