use thiserror::Error;

#[derive(Error, Debug)]
pub enum JobwireError {
    /// A frame arrived without the `name:body` separator. The demultiplexer
    /// drops the frame and keeps running.
    #[error("Malformed frame: missing separator")]
    MalformedFrame,

    /// Connection or command failure talking to the broker. Terminal for the
    /// task that hit it.
    #[error("Broker error: {0}")]
    Broker(String),

    /// The broker replied with a shape the adapter did not expect.
    #[error("Unexpected broker reply: {0}")]
    InvalidReply(String),

    #[error("Stream already exists: {0}")]
    StreamAlreadyExists(String),

    #[error("Cannot write on read-only stream")]
    ReadOnlyStream,

    #[error("Cannot read on write-only stream")]
    WriteOnlyStream,

    #[error("Stream is closed")]
    ClosedPipe,

    #[error("No such job: {0}")]
    JobNotFound(String),

    /// The worker reported a non-empty status for the job.
    #[error("Job failed: {0}")]
    JobFailed(String),

    /// Raised inside a job handler; the message becomes the job's failure
    /// status verbatim.
    #[error("{0}")]
    Handler(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, JobwireError>;
