//! Handler registry: the mapping from job name to handler.
//!
//! The registry is a plain value handed to the worker at construction; there
//! is no process-wide table.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::stream::Streamer;

/// Everything a handler receives for one invocation, in the manner of a unix
/// process: a name, arguments, an environment, and named byte streams. The
/// handler must eventually close the streams it opens.
pub struct JobRequest {
    pub name: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub streams: Streamer,
}

/// A function invocable as a remote job. Returning `Err` sets the job's
/// failure status to the error's message; that message is the only error
/// channel the remote client sees.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, request: JobRequest) -> Result<()>;
}

type HandlerFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

struct FnHandler {
    f: Box<dyn Fn(JobRequest) -> HandlerFuture + Send + Sync>,
}

#[async_trait]
impl JobHandler for FnHandler {
    async fn run(&self, request: JobRequest) -> Result<()> {
        (self.f)(request).await
    }
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expose `handler` to clients under `name`. A later registration for
    /// the same name replaces the earlier one.
    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(JobRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(
            name,
            Arc::new(FnHandler {
                f: Box::new(move |request| Box::pin(f(request))),
            }),
        );
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
