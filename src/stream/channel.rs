//! Bounded, named, directional byte conduit.
//!
//! A read channel drains a bounded chunk queue fed by the demultiplexer:
//! reads block while the queue is empty and return `Ok(0)` once the remote
//! end has closed the stream and the queue is drained. A write channel
//! pushes one data frame per write straight onto the job's frame queue.
//!
//! Lifecycle is Open -> Closing -> Closed. Closing only exists on the write
//! side, between deciding to close and the close frame landing on the wire;
//! if that push fails the channel stays Closing and close can be retried.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::broker::Broker;
use crate::error::{JobwireError, Result};
use crate::frame::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Open,
    Closing,
    Closed,
}

enum Inner {
    Read {
        rx: Option<mpsc::Receiver<Vec<u8>>>,
        // Unconsumed tail of the last chunk.
        buffer: Vec<u8>,
        pos: usize,
    },
    Write {
        broker: Arc<dyn Broker>,
        key: String,
    },
}

pub struct StreamChannel {
    name: String,
    state: ChannelState,
    inner: Inner,
}

impl StreamChannel {
    pub(crate) fn reader(name: String, rx: mpsc::Receiver<Vec<u8>>) -> Self {
        Self {
            name,
            state: ChannelState::Open,
            inner: Inner::Read {
                rx: Some(rx),
                buffer: Vec::new(),
                pos: 0,
            },
        }
    }

    pub(crate) fn writer(name: String, broker: Arc<dyn Broker>, key: String) -> Self {
        Self {
            name,
            state: ChannelState::Open,
            inner: Inner::Write { broker, key },
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Read into `buf`, blocking until data is available. Returns `Ok(0)`
    /// at end of stream. Fails with
    /// [`JobwireError::WriteOnlyStream`] on a write channel.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Inner::Read { rx, buffer, pos } = &mut self.inner else {
            return Err(JobwireError::WriteOnlyStream);
        };
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if *pos < buffer.len() {
                let n = (buffer.len() - *pos).min(buf.len());
                buf[..n].copy_from_slice(&buffer[*pos..*pos + n]);
                *pos += n;
                return Ok(n);
            }
            if self.state == ChannelState::Closed {
                return Ok(0);
            }
            let Some(rx) = rx.as_mut() else {
                self.state = ChannelState::Closed;
                return Ok(0);
            };
            match rx.recv().await {
                Some(chunk) => {
                    *buffer = chunk;
                    *pos = 0;
                }
                None => {
                    self.state = ChannelState::Closed;
                    return Ok(0);
                }
            }
        }
    }

    /// Read everything until end of stream.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }

    /// Write `data` as one frame. Empty writes return `Ok(0)` without
    /// touching the wire: an empty-body frame would read as a control.
    /// Fails with [`JobwireError::ReadOnlyStream`] on a read channel and
    /// [`JobwireError::ClosedPipe`] after close.
    pub async fn write(&mut self, data: &[u8]) -> Result<usize> {
        let Inner::Write { broker, key } = &self.inner else {
            return Err(JobwireError::ReadOnlyStream);
        };
        if self.state != ChannelState::Open {
            return Err(JobwireError::ClosedPipe);
        }
        if data.is_empty() {
            return Ok(0);
        }
        let frame = Frame::data(self.name.clone(), data.to_vec())?;
        broker.append(key, &frame.encode()).await?;
        Ok(data.len())
    }

    pub async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.write(data).await.map(|_| ())
    }

    /// Close the channel. On a write channel this emits a close frame so the
    /// peer's reader sees end of stream once it drains. Closing an already
    /// closed channel is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == ChannelState::Closed {
            return Ok(());
        }
        match &mut self.inner {
            Inner::Read { rx, buffer, pos } => {
                // Local close releases the queue; buffered data is dropped.
                rx.take();
                buffer.clear();
                *pos = 0;
                self.state = ChannelState::Closed;
            }
            Inner::Write { broker, key } => {
                self.state = ChannelState::Closing;
                let frame = Frame::close_stream(self.name.clone());
                broker.append(key, &frame.encode()).await?;
                self.state = ChannelState::Closed;
            }
        }
        Ok(())
    }
}
