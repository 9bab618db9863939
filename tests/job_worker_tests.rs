//! End-to-end tests over the in-process broker: submission, claim, handler
//! execution, stream round-trips, and wait semantics.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use jobwire::broker::Broker;
use jobwire::{
    Client, HandlerRegistry, JobwireError, MemoryBroker, WireConfig, Worker,
};

fn echo_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register_fn("echo", |request| async move {
        let mut out = request.streams.open_write("out").await?;
        out.write_all(format!("{}\n", request.args.join(" ")).as_bytes())
            .await?;
        out.close().await?;
        Ok(())
    });
    registry.register_fn("boom", |_request| async move {
        Err(JobwireError::Handler("boom".to_string()))
    });
    registry
}

fn spawn_worker(broker: &MemoryBroker, identity: &str, registry: HandlerRegistry) -> CancellationToken {
    let worker = Worker::new(
        Arc::new(broker.clone()),
        WireConfig::default().with_worker_identity(identity),
        registry,
    );
    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move { worker.run(shutdown).await });
    token
}

#[tokio::test]
async fn echo_job_round_trip() {
    let broker = MemoryBroker::new();
    let token = spawn_worker(&broker, "w1", echo_registry());

    let client = Client::new(Arc::new(broker.clone()), WireConfig::default());
    let mut job = client.new_job("echo", vec!["hi".to_string()]).await.unwrap();
    assert_eq!(job.id(), 0);

    job.start().await.unwrap();
    let mut out = job.open_read("out").await.unwrap();
    job.wait().await.unwrap();

    assert_eq!(out.read_to_end().await.unwrap(), b"hi\n");
    job.close().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn handler_error_becomes_failure_status() {
    let broker = MemoryBroker::new();
    let token = spawn_worker(&broker, "w1", echo_registry());

    let client = Client::new(Arc::new(broker.clone()), WireConfig::default());
    let mut job = client.new_job("boom", Vec::new()).await.unwrap();
    job.start().await.unwrap();

    match job.wait().await {
        Err(JobwireError::JobFailed(message)) => assert_eq!(message, "boom"),
        other => panic!("expected JobFailed(boom), got {:?}", other),
    }
    job.close().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn unknown_job_name_fails_the_job_not_the_worker() {
    let broker = MemoryBroker::new();
    let token = spawn_worker(&broker, "w1", echo_registry());

    let client = Client::new(Arc::new(broker.clone()), WireConfig::default());
    let mut job = client.new_job("no-such-handler", Vec::new()).await.unwrap();
    job.start().await.unwrap();

    match job.wait().await {
        Err(JobwireError::JobFailed(message)) => {
            assert!(message.contains("no-such-handler"), "status: {message}");
        }
        other => panic!("expected JobFailed, got {:?}", other),
    }
    job.close().await.unwrap();

    // The worker survives and still serves registered jobs.
    let mut job = client.new_job("echo", vec!["ok".to_string()]).await.unwrap();
    job.start().await.unwrap();
    job.wait().await.unwrap();
    job.close().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn env_reaches_the_handler() {
    let broker = MemoryBroker::new();
    let seen = Arc::new(std::sync::Mutex::new(None));
    let seen_clone = seen.clone();
    let mut registry = HandlerRegistry::new();
    registry.register_fn("env-check", move |request| {
        let seen = seen_clone.clone();
        async move {
            *seen.lock().unwrap() = request.env.get("GREETING").cloned();
            Ok(())
        }
    });
    let token = spawn_worker(&broker, "w1", registry);

    let client = Client::new(Arc::new(broker.clone()), WireConfig::default());
    let mut job = client.new_job("env-check", Vec::new()).await.unwrap();
    job.env = jobwire::Job::env_from_pairs(["GREETING=hello"]);
    job.start().await.unwrap();
    job.wait().await.unwrap();

    assert_eq!(seen.lock().unwrap().as_deref(), Some("hello"));
    job.close().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn claim_cell_admits_exactly_one_winner() {
    let broker = MemoryBroker::new();
    let wins = Arc::new(AtomicUsize::new(0));
    let mut racers = Vec::new();
    for i in 0..16 {
        let broker = broker.clone();
        let wins = wins.clone();
        racers.push(tokio::spawn(async move {
            if broker
                .set_if_absent("/jobs/9/worker", &format!("w{i}"))
                .await
                .unwrap()
            {
                wins.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }
    for racer in racers {
        racer.await.unwrap();
    }
    assert_eq!(wins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn only_one_worker_executes_a_job() {
    let broker = MemoryBroker::new();
    let executions = Arc::new(AtomicUsize::new(0));

    let mut tokens = Vec::new();
    for i in 0..4 {
        let executions = executions.clone();
        let mut registry = HandlerRegistry::new();
        registry.register_fn("count", move |_request| {
            let executions = executions.clone();
            async move {
                executions.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        tokens.push(spawn_worker(&broker, &format!("w{i}"), registry));
    }

    let client = Client::new(Arc::new(broker.clone()), WireConfig::default());
    let mut job = client.new_job("count", Vec::new()).await.unwrap();
    job.start().await.unwrap();
    job.wait().await.unwrap();

    // Give any losing worker a moment to misbehave before we check.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(executions.load(Ordering::SeqCst), 1);

    // The claim cell records some worker's identity.
    let claim = broker.get("/jobs/0/worker").await.unwrap().unwrap();
    assert!(claim.starts_with('w'), "claim: {claim}");

    job.close().await.unwrap();
    for token in tokens {
        token.cancel();
    }
}

#[tokio::test]
async fn wait_is_idempotent_and_fast_pathed() {
    let broker = MemoryBroker::new();
    let token = spawn_worker(&broker, "w1", echo_registry());

    let client = Client::new(Arc::new(broker.clone()), WireConfig::default());
    let mut job = client.new_job("echo", vec!["x".to_string()]).await.unwrap();
    job.start().await.unwrap();

    // Wait for the status cell without consuming the wait queue.
    let status_key = format!("/jobs/{}/status", job.id());
    loop {
        if broker.get(&status_key).await.unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // First wait takes the fast path: the wait-queue entry must survive.
    job.wait().await.unwrap();
    // The worker pushes the wait-queue entry just after setting the cell;
    // poll briefly, then insist it stays unconsumed.
    let wait_key = format!("/jobs/{}/wait", job.id());
    for _ in 0..100 {
        if !broker.range(&wait_key, 0, -1).await.unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(broker.range(&wait_key, 0, -1).await.unwrap().len(), 1);

    // Repeated waits return the cached status immediately.
    job.wait().await.unwrap();
    job.wait().await.unwrap();

    job.close().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn stdin_round_trip_through_the_worker() {
    let broker = MemoryBroker::new();
    let mut registry = HandlerRegistry::new();
    registry.register_fn("upcase", |request| async move {
        let mut input = request.streams.open_read("in").await?;
        let body = input.read_to_end().await?;
        let mut out = request.streams.open_write("out").await?;
        out.write_all(String::from_utf8_lossy(&body).to_uppercase().as_bytes())
            .await?;
        out.close().await?;
        Ok(())
    });
    let token = spawn_worker(&broker, "w1", registry);

    let client = Client::new(Arc::new(broker.clone()), WireConfig::default());
    let mut job = client.new_job("upcase", Vec::new()).await.unwrap();
    job.start().await.unwrap();

    let mut stdin = job.open_write("in").await.unwrap();
    stdin.write_all(b"quiet please").await.unwrap();
    stdin.close().await.unwrap();

    let mut out = job.open_read("out").await.unwrap();
    job.wait().await.unwrap();
    assert_eq!(out.read_to_end().await.unwrap(), b"QUIET PLEASE");

    job.close().await.unwrap();
    token.cancel();
}

#[tokio::test]
async fn job_ids_are_monotonic_positions() {
    let broker = MemoryBroker::new();
    let client = Client::new(Arc::new(broker.clone()), WireConfig::default());
    let first = client.new_job("echo", Vec::new()).await.unwrap();
    let second = client.new_job("echo", Vec::new()).await.unwrap();
    assert_eq!(first.id(), 0);
    assert_eq!(second.id(), 1);
    assert_eq!(
        broker.range("/jobs", 0, -1).await.unwrap(),
        vec!["echo".to_string(), "echo".to_string()]
    );
}
