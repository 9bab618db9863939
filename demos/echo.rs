//! One worker, one client, one echo job over the in-process broker.
//!
//! Run with `cargo run --example echo`. Point `RedisBroker::connect` at a
//! real broker to run the same code across processes.

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use jobwire::{Client, HandlerRegistry, MemoryBroker, WireConfig, Worker};

#[tokio::main]
async fn main() -> jobwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let broker = Arc::new(MemoryBroker::new());

    let mut registry = HandlerRegistry::new();
    registry.register_fn("echo", |request| async move {
        let mut out = request.streams.open_write("out").await?;
        out.write_all(format!("{}\n", request.args.join(" ")).as_bytes())
            .await?;
        out.close().await?;
        Ok(())
    });

    let worker = Worker::new(broker.clone(), WireConfig::default(), registry);
    let shutdown = jobwire::shutdown::shutdown_token();
    let worker_shutdown = shutdown.clone();
    tokio::spawn(async move { worker.run(worker_shutdown).await });

    let client = Client::new(broker, WireConfig::default());
    let mut job = client
        .new_job("echo", vec!["hello".to_string(), "world".to_string()])
        .await?;
    job.start().await?;

    let mut out = job.open_read("out").await?;
    job.wait().await?;
    print!("{}", String::from_utf8_lossy(&out.read_to_end().await?));

    job.close().await?;
    shutdown.cancel();
    Ok(())
}
