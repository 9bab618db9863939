//! Server-side dispatch loop and per-job execution.
//!
//! The dispatch loop blocking-pops the start-notification queue, attempts
//! the atomic claim on the job's claim cell, and spawns an independent task
//! for every claim it wins. Losing a claim is expected and silent; there is
//! no coordinator assigning jobs to workers beyond that single atomic
//! primitive.
//!
//! Per claimed job: fetch name, arguments, and environment from the broker,
//! wire up the job's streams (demultiplexing the "in" direction), invoke the
//! registered handler, then publish the terminal status: status cell first,
//! completion-wait queue second, so a client's fast-path check and blocking
//! wait agree regardless of arrival order.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::broker::Broker;
use crate::config::WireConfig;
use crate::error::{JobwireError, Result};
use crate::keyspace::{JobId, Keyspace};
use crate::registry::{HandlerRegistry, JobRequest};
use crate::stream::Streamer;

#[derive(Clone)]
pub struct Worker {
    broker: Arc<dyn Broker>,
    config: WireConfig,
    keyspace: Keyspace,
    registry: Arc<HandlerRegistry>,
}

impl Worker {
    pub fn new(broker: Arc<dyn Broker>, config: WireConfig, registry: HandlerRegistry) -> Self {
        let keyspace = Keyspace::new(config.key_prefix.clone());
        Self {
            broker,
            config,
            keyspace,
            registry: Arc::new(registry),
        }
    }

    /// Run the dispatch loop until the token is cancelled or the broker
    /// connection fails. Jobs already claimed keep running after the loop
    /// stops claiming new ones.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut queue = self.broker.dedicated().await?;
        let start_key = self.keyspace.start();
        tracing::info!(identity = %self.config.worker_identity, "Worker dispatch loop started");
        loop {
            let popped = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(identity = %self.config.worker_identity, "Worker stopping");
                    return Ok(());
                }
                popped = queue.blocking_pop(&start_key, 0) => popped?,
            };
            let Some(raw) = popped else { continue };
            let id = match parse_job_id(&raw) {
                Some(id) => id,
                None => {
                    tracing::warn!("Dropping unparseable start signal");
                    continue;
                }
            };
            let claimed = self
                .broker
                .set_if_absent(&self.keyspace.claim(id), &self.config.worker_identity)
                .await?;
            if !claimed {
                // Another worker owns this job.
                tracing::debug!(job_id = id, "Claim lost");
                continue;
            }
            tracing::debug!(job_id = id, identity = %self.config.worker_identity, "Claim acquired");
            let worker = self.clone();
            tokio::spawn(async move {
                if let Err(e) = worker.run_job(id).await {
                    tracing::error!(job_id = id, error = %e, "Job execution failed");
                }
            });
        }
    }

    /// Execute one claimed job end to end.
    async fn run_job(&self, id: JobId) -> Result<()> {
        let name = self
            .broker
            .range(&self.keyspace.jobs(), id, id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                JobwireError::InvalidReply(format!("no submission log entry for job {id}"))
            })?;
        let args = self.broker.range(&self.keyspace.args(id), 0, -1).await?;
        let env = self.broker.hash_get_all(&self.keyspace.env(id)).await?;

        // The worker reads the job's "in" queue and writes its "out" queue.
        let (streams, _errors) = Streamer::new(
            self.broker.clone(),
            self.keyspace.streams_in(id),
            self.keyspace.streams_out(id),
            &self.config,
        );

        tracing::info!(job_id = id, name = %name, args = ?args, "Executing job");
        let outcome = match self.registry.get(&name) {
            Some(handler) => {
                handler
                    .run(JobRequest {
                        name: name.clone(),
                        args,
                        env,
                        streams: streams.clone(),
                    })
                    .await
            }
            None => Err(JobwireError::JobNotFound(name.clone())),
        };

        let status = match &outcome {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        };
        // Cell before queue: late waiters read the cell, blocked waiters pop
        // the queue, and both must observe the same terminal state.
        self.broker
            .set(&self.keyspace.status(id), &status)
            .await?;
        self.broker
            .append(&self.keyspace.wait(id), status.as_bytes())
            .await?;
        // Tear down the client's demultiplexer.
        streams.shutdown().await?;
        tracing::info!(job_id = id, name = %name, success = outcome.is_ok(), "Job completed");
        Ok(())
    }
}

fn parse_job_id(raw: &[u8]) -> Option<JobId> {
    std::str::from_utf8(raw).ok()?.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_parsing() {
        assert_eq!(parse_job_id(b"42"), Some(42));
        assert_eq!(parse_job_id(b" 7\n"), Some(7));
        assert_eq!(parse_job_id(b"not-a-number"), None);
        assert_eq!(parse_job_id(&[0xff, 0xfe]), None);
    }
}
