/// Configuration shared by clients and workers.
///
/// Everything here is a knob on the protocol layer; connecting to the broker
/// itself (URL, credentials) belongs to whoever constructs the broker
/// adapter.
#[derive(Debug, Clone)]
pub struct WireConfig {
    /// Prefix prepended to every broker key. Empty means keys live at the
    /// root (`/jobs`, `/jobs/start`, ...).
    pub key_prefix: String,
    /// Capacity, in chunks, of each stream's inbound queue. Producers block
    /// once the queue is full; that backpressure propagates to the shared
    /// frame channel and can stall sibling streams.
    pub channel_capacity: usize,
    /// Depth of the decoded-frame queue between the pop task and the router
    /// task of each demultiplexer.
    pub frame_queue_depth: usize,
    /// Identity string written into a job's claim cell when this worker wins
    /// the claim. Defaults to `worker-<pid>`.
    pub worker_identity: String,
}

impl Default for WireConfig {
    fn default() -> Self {
        Self {
            key_prefix: String::new(),
            channel_capacity: 1024,
            frame_queue_depth: 32,
            worker_identity: format!("worker-{}", std::process::id()),
        }
    }
}

impl WireConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_worker_identity(mut self, identity: impl Into<String>) -> Self {
        self.worker_identity = identity.into();
        self
    }
}
