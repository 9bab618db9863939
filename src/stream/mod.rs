//! Named byte streams multiplexed over one broker frame queue per direction.

pub mod channel;
mod demux;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::broker::Broker;
use crate::config::WireConfig;
use crate::error::{JobwireError, Result};
use crate::frame::{Frame, CLOSE_MARKER, SEPARATOR};

pub use channel::{ChannelState, StreamChannel};

/// Per-side stream access for one job.
///
/// Reads come through the side's demultiplexer; writes push frames straight
/// onto the side's outbound queue. Each stream name may be opened at most
/// once per direction. Clones share the same demultiplexer and open-name
/// bookkeeping.
#[derive(Clone)]
pub struct Streamer {
    broker: Arc<dyn Broker>,
    write_key: String,
    open_tx: mpsc::Sender<demux::OpenRequest>,
    writers: Arc<Mutex<HashSet<String>>>,
}

impl Streamer {
    /// Start the demultiplexer for `read_key` and return the stream handle
    /// together with its protocol-error channel. Dropping the receiver is
    /// allowed; errors are then only logged.
    pub fn new(
        broker: Arc<dyn Broker>,
        read_key: String,
        write_key: String,
        config: &WireConfig,
    ) -> (Self, mpsc::Receiver<JobwireError>) {
        let (open_tx, errors) = demux::spawn(
            broker.clone(),
            read_key,
            config.channel_capacity,
            config.frame_queue_depth,
        );
        (
            Self {
                broker,
                write_key,
                open_tx,
                writers: Arc::new(Mutex::new(HashSet::new())),
            },
            errors,
        )
    }

    /// Open the named stream for reading. Data that arrived before the open
    /// is buffered and delivered first. Fails with `StreamAlreadyExists` on
    /// a second read-open of the same name.
    pub async fn open_read(&self, name: &str) -> Result<StreamChannel> {
        validate_name(name)?;
        let (reply, response) = oneshot::channel();
        self.open_tx
            .send(demux::OpenRequest {
                name: name.to_string(),
                reply,
            })
            .await
            .map_err(|_| JobwireError::Broker("demultiplexer stopped".to_string()))?;
        let rx = response
            .await
            .map_err(|_| JobwireError::Broker("demultiplexer stopped".to_string()))??;
        Ok(StreamChannel::reader(name.to_string(), rx))
    }

    /// Open the named stream for writing. Fails with `StreamAlreadyExists`
    /// on a second write-open of the same name.
    pub async fn open_write(&self, name: &str) -> Result<StreamChannel> {
        validate_name(name)?;
        {
            let mut writers = self
                .writers
                .lock()
                .map_err(|_| JobwireError::Internal("writer table poisoned".to_string()))?;
            if !writers.insert(name.to_string()) {
                return Err(JobwireError::StreamAlreadyExists(name.to_string()));
            }
        }
        Ok(StreamChannel::writer(
            name.to_string(),
            self.broker.clone(),
            self.write_key.clone(),
        ))
    }

    /// Emit the end-of-job terminator on this side's outbound queue: the
    /// peer closes all of its streams and stops its demultiplexer.
    pub async fn shutdown(&self) -> Result<()> {
        self.broker
            .append(&self.write_key, &Frame::Terminator.encode())
            .await?;
        Ok(())
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.as_bytes().contains(&SEPARATOR)
        || name.as_bytes()[0] == CLOSE_MARKER
    {
        return Err(JobwireError::Internal(format!(
            "invalid stream name: {name:?}"
        )));
    }
    Ok(())
}
