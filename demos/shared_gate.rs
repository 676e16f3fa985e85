//! Several workers sharing one governed endpoint.
//!
//! Four threads call the same `CallGovernor`, which lets one call through
//! every 200ms and makes the others wait their turn. A background scheduler
//! prints per-second call counts from the governor's event store.
//!
//! Run with `RUST_LOG=tempo_governor=debug` to see gate and bucket activity.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tempo_governor::{
    CallEvent, CallGovernor, CallTally, GateConfig, Invocable, RateGate, Scheduler,
    SchedulerHandle, SchedulerMode, SystemClock, SystemSleeper, WaitPolicy, WindowedEventStore,
};
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

type Store = WindowedEventStore<Instant, CallEvent<usize, String>, CallTally>;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let clock = Arc::new(SystemClock::new());
    let sleeper = Arc::new(SystemSleeper::new());

    let gate = Arc::new(RateGate::new(
        GateConfig::new(Duration::from_millis(200)).unwrap(),
        clock.clone(),
    ));
    let store: Arc<Store> = Arc::new(
        WindowedEventStore::builder(Duration::from_secs(1), clock.clone())
            .build()
            .unwrap(),
    );
    let governor = Arc::new(
        CallGovernor::builder(gate, Arc::clone(&store))
            .with_wait_policy(WaitPolicy::BlockAndRetry)
            .with_sleeper(sleeper.clone())
            .build()
            .unwrap(),
    );

    println!("=== Shared Gate Example ===\n");
    println!("Gate: one call per 200ms, callers block and retry once\n");

    let scheduler: Arc<Scheduler<Instant, (), ()>> = Arc::new(
        Scheduler::builder(clock.clone(), sleeper.clone())
            .with_mode(SchedulerMode::Cooperative)
            .build(),
    );
    let report = {
        let store = Arc::clone(&store);
        Invocable::immediate(move |_: ()| {
            if let Some(bucket) = store.iterate_past().nth(1) {
                let tally = bucket.value();
                info!(
                    called = tally.called,
                    returned = tally.returned,
                    "calls in the last full second"
                );
            }
            Ok(())
        })
    };
    scheduler
        .schedule_periodic(Instant::now(), 0, Duration::from_secs(1), report, ())
        .unwrap();
    let reporter = SchedulerHandle::spawn(Arc::clone(&scheduler));

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let governor = Arc::clone(&governor);
            std::thread::spawn(move || {
                let fetch = Invocable::immediate(move |n: usize| Ok(format!("w{}-r{}", worker, n)));
                let mut served = 0;
                for n in 0..5 {
                    match governor.invoke_blocking(&fetch, n) {
                        Ok(output) => {
                            served += 1;
                            println!("worker {} got {:?}", worker, output.value());
                        }
                        Err(e) => println!("worker {} refused: {}", worker, e),
                    }
                }
                served
            })
        })
        .collect();

    let served: usize = workers
        .into_iter()
        .map(|w| w.join().expect("worker panicked"))
        .sum();

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    reporter.shutdown().await.expect("reporter shutdown failed");

    let snapshot = governor.metrics().snapshot();
    let total = store.total().unwrap();
    println!("\n=== Example Complete ===");
    println!(
        "served {} calls, {} refused after waiting, {} waits",
        served, snapshot.rejected, snapshot.waited
    );
    println!(
        "store recorded {} calls and {} returns",
        total.called, total.returned
    );
}
