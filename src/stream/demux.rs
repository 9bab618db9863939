//! Stream demultiplexer: one pop task plus one router task per job per
//! direction.
//!
//! The pop task owns a dedicated broker connection, blocking-pops the side's
//! frame queue, decodes, and forwards frames over a bounded channel. The
//! router task privately owns the name -> channel table: it lazily creates a
//! channel the first time a name is referenced (by a frame or by an open
//! request), enqueues data bodies, and drops senders on close frames so
//! readers see end of stream after draining.
//!
//! Frames for a name nobody has opened yet are buffered under the lazily
//! created channel, so a late open still observes earlier data. The
//! terminator frame closes every channel and stops frame routing; open
//! requests keep being served afterwards so late readers can drain. A
//! terminal broker error is handled the same way.
//!
//! Decode errors are reported on the error channel and the loop continues; a
//! single malformed frame never takes the multiplexer down.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::broker::Broker;
use crate::error::{JobwireError, Result};
use crate::frame::Frame;

pub(crate) struct OpenRequest {
    pub name: String,
    pub reply: oneshot::Sender<Result<mpsc::Receiver<Vec<u8>>>>,
}

/// Spawn the pop and router tasks for one (job, direction).
///
/// Returns the open-request sender and the protocol-error channel. The tasks
/// stop once the terminator is routed and every open-request sender is gone.
pub(crate) fn spawn(
    broker: Arc<dyn Broker>,
    read_key: String,
    channel_capacity: usize,
    frame_queue_depth: usize,
) -> (mpsc::Sender<OpenRequest>, mpsc::Receiver<JobwireError>) {
    let (frame_tx, frame_rx) = mpsc::channel(frame_queue_depth.max(1));
    let (open_tx, open_rx) = mpsc::channel(16);
    let (err_tx, err_rx) = mpsc::channel(16);

    tokio::spawn(pop_loop(broker, read_key, frame_tx, err_tx.clone()));
    tokio::spawn(route_loop(frame_rx, open_rx, err_tx, channel_capacity));

    (open_tx, err_rx)
}

fn report(err_tx: &mpsc::Sender<JobwireError>, err: JobwireError) {
    // Nobody is required to listen; drop on a full or closed channel.
    let _ = err_tx.try_send(err);
}

async fn pop_loop(
    broker: Arc<dyn Broker>,
    read_key: String,
    frame_tx: mpsc::Sender<Frame>,
    err_tx: mpsc::Sender<JobwireError>,
) {
    let mut queue = match broker.dedicated().await {
        Ok(queue) => queue,
        Err(e) => {
            tracing::error!(key = %read_key, error = %e, "Demultiplexer failed to connect");
            report(&err_tx, e);
            return;
        }
    };
    loop {
        let raw = match queue.blocking_pop(&read_key, 0).await {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(e) => {
                tracing::error!(key = %read_key, error = %e, "Demultiplexer connection lost");
                report(&err_tx, e);
                // Dropping frame_tx makes the router tear down all streams.
                return;
            }
        };
        match Frame::decode(&raw) {
            Ok(frame) => {
                let terminal = matches!(frame, Frame::Terminator);
                if frame_tx.send(frame).await.is_err() {
                    return;
                }
                if terminal {
                    return;
                }
            }
            Err(e) => {
                tracing::warn!(key = %read_key, "Dropping malformed frame");
                report(&err_tx, e);
            }
        }
    }
}

struct Slot {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    rx: Option<mpsc::Receiver<Vec<u8>>>,
    opened: bool,
}

impl Slot {
    fn live(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Some(tx),
            rx: Some(rx),
            opened: false,
        }
    }

    /// A slot whose reader sees immediate end of stream.
    fn drained(capacity: usize) -> Self {
        let mut slot = Self::live(capacity);
        slot.tx = None;
        slot
    }
}

async fn route_loop(
    mut frame_rx: mpsc::Receiver<Frame>,
    mut open_rx: mpsc::Receiver<OpenRequest>,
    err_tx: mpsc::Sender<JobwireError>,
    capacity: usize,
) {
    let mut table: HashMap<String, Slot> = HashMap::new();
    let mut done = false;

    loop {
        tokio::select! {
            frame = frame_rx.recv(), if !done => {
                match frame {
                    Some(Frame::Data { name, body }) => {
                        if !deliver(&mut table, &mut open_rx, &err_tx, capacity, name, body)
                            .await
                        {
                            return;
                        }
                    }
                    Some(Frame::CloseStream { name }) => {
                        let slot = table
                            .entry(name)
                            .or_insert_with(|| Slot::live(capacity));
                        slot.tx = None;
                    }
                    Some(Frame::Terminator) | None => {
                        for slot in table.values_mut() {
                            slot.tx = None;
                        }
                        done = true;
                    }
                }
            }
            request = open_rx.recv() => {
                let Some(request) = request else {
                    return;
                };
                serve_open(&mut table, request, done, capacity, &err_tx);
            }
        }
    }
}

/// Enqueue one data body, keeping the open path live the whole time.
///
/// A full queue on a stream nobody has opened yet can only drain once an
/// open request hands out its receiver, so a blocked send must not stop
/// open requests from being served. Frame routing does stay stalled while
/// the send is pending; a slow sibling stream holding up the direction is
/// the intended backpressure.
///
/// Returns false once every open-request sender is gone.
async fn deliver(
    table: &mut HashMap<String, Slot>,
    open_rx: &mut mpsc::Receiver<OpenRequest>,
    err_tx: &mpsc::Sender<JobwireError>,
    capacity: usize,
    name: String,
    body: Vec<u8>,
) -> bool {
    let Some(tx) = table
        .entry(name.clone())
        .or_insert_with(|| Slot::live(capacity))
        .tx
        .clone()
    else {
        // Stream closed on this side; drop the body.
        return true;
    };
    let mut pending = Some(body);
    while let Some(chunk) = pending.take() {
        tokio::select! {
            permit = tx.reserve() => match permit {
                Ok(permit) => permit.send(chunk),
                Err(_) => {
                    // Receiver closed locally; drop the stream's sender.
                    if let Some(slot) = table.get_mut(&name) {
                        slot.tx = None;
                    }
                }
            },
            request = open_rx.recv() => {
                let Some(request) = request else {
                    // No handles left to open anything; finish the send if
                    // the reader is still draining, then stop routing.
                    if tx.send(chunk).await.is_err() {
                        if let Some(slot) = table.get_mut(&name) {
                            slot.tx = None;
                        }
                    }
                    return false;
                };
                pending = Some(chunk);
                serve_open(table, request, false, capacity, err_tx);
            }
        }
    }
    true
}

fn serve_open(
    table: &mut HashMap<String, Slot>,
    request: OpenRequest,
    done: bool,
    capacity: usize,
    err_tx: &mpsc::Sender<JobwireError>,
) {
    let OpenRequest { name, reply } = request;
    let slot = table.entry(name.clone()).or_insert_with(|| {
        if done {
            Slot::drained(capacity)
        } else {
            Slot::live(capacity)
        }
    });
    let response = if slot.opened {
        Err(JobwireError::StreamAlreadyExists(name))
    } else {
        slot.opened = true;
        match slot.rx.take() {
            Some(rx) => Ok(rx),
            None => Err(JobwireError::Internal(format!(
                "stream {name} has no receiver"
            ))),
        }
    };
    if let Err(Err(e)) = reply.send(response) {
        report(err_tx, e);
    }
}
