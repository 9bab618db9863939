//! jobwire: remote job invocation over a shared broker.
//!
//! A client submits a named job with arguments and an environment; a pool of
//! workers competes for exclusive ownership via an atomic claim; the winning
//! worker runs the registered handler while both sides exchange any number
//! of independent named byte streams multiplexed over the broker's ordered
//! queues; a status handshake completes the job. Client and worker never
//! connect to each other; the broker is the only transport.

pub mod broker;
pub mod config;
pub mod error;
pub mod frame;
pub mod job;
pub mod keyspace;
pub mod registry;
pub mod shutdown;
pub mod stream;
pub mod worker;

pub use broker::{Broker, MemoryBroker, RedisBroker};
pub use config::WireConfig;
pub use error::{JobwireError, Result};
pub use job::{Client, Job, JobState};
pub use keyspace::JobId;
pub use registry::{HandlerRegistry, JobHandler, JobRequest};
pub use stream::{ChannelState, StreamChannel, Streamer};
pub use worker::Worker;
