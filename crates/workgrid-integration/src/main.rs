//! The integration-test worker: the stock worker binary shape with a
//! registry of scenario functions compiled in.

use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use serde_json::json;
use tracing::level_filters::LevelFilter;

use workgrid_primitives::{Event, Lock, NetInstance, Queue, Semaphore, SharedMap, net_print};
use workgrid_protocol::Value;
use workgrid_worker::args::Args;
use workgrid_worker::registry::{TaskArgs, TaskRegistry};
use workgrid_worker::{runner, server};

fn main() {
    let registry = scenario_registry();
    if runner::run_if_task_child(&registry) {
        return;
    }

    let args = Args::parse();
    let level = if args.quiet {
        LevelFilter::ERROR
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = args.worker_config().expect("invalid worker arguments");
    server::serve(config, &registry).expect("worker failed");
}

fn scenario_registry() -> TaskRegistry {
    let mut registry = TaskRegistry::new();
    registry
        .register("echo", echo)
        .register("add", add)
        .register("boom", boom)
        .register("sleep_forever", sleep_forever)
        .register("pipeline_step", pipeline_step)
        .register("locked_increment", locked_increment)
        .register("wait_event_timestamps", wait_event_timestamps)
        .register("sem_hold", sem_hold)
        .register("say_hello", say_hello)
        .register("use_counter", use_counter)
        .register("counter_bump", counter_bump);
    registry
}

fn echo(args: TaskArgs) -> anyhow::Result<Value> {
    Ok(args.args.first().cloned().unwrap_or(Value::Null))
}

fn add(args: TaskArgs) -> anyhow::Result<Value> {
    let a: i64 = args.arg(0)?;
    let b: i64 = args.arg(1)?;
    Ok(json!(a + b))
}

fn boom(_: TaskArgs) -> anyhow::Result<Value> {
    anyhow::bail!("boom")
}

fn sleep_forever(_: TaskArgs) -> anyhow::Result<Value> {
    loop {
        thread::sleep(Duration::from_secs(3600));
    }
}

/// One stage of the increment pipeline: take from the inbound queue, add
/// one, pass it on.
fn pipeline_step(args: TaskArgs) -> anyhow::Result<Value> {
    let inbound: Queue = args.arg(0)?;
    let outbound: Queue = args.arg(1)?;

    let value: i64 = inbound.get()?;
    outbound.put(&(value + 1))?;
    Ok(Value::Null)
}

/// Critical-section increment of a shared-map counter.
fn locked_increment(args: TaskArgs) -> anyhow::Result<Value> {
    let lock: Lock = args.arg(0)?;
    let map: SharedMap = args.arg(1)?;
    let key: String = args.kwarg("key")?.unwrap_or_else(|| "n".to_string());

    lock.acquire()?;
    let current: i64 = map.get(&key)?;
    map.set(&key, &(current + 1))?;
    lock.release()?;
    Ok(Value::Null)
}

/// Record a timestamp, wait for the barrier event, record another.
fn wait_event_timestamps(args: TaskArgs) -> anyhow::Result<Value> {
    let event: Event = args.arg(0)?;

    let before = epoch_millis();
    event.wait()?;
    let after = epoch_millis();
    Ok(json!([before, after]))
}

/// Hold a semaphore permit for one second.
fn sem_hold(args: TaskArgs) -> anyhow::Result<Value> {
    let semaphore: Semaphore = args.arg(0)?;

    semaphore.acquire()?;
    thread::sleep(Duration::from_secs(1));
    semaphore.release()?;
    Ok(Value::Null)
}

fn say_hello(args: TaskArgs) -> anyhow::Result<Value> {
    let from: String = args.arg(0)?;
    net_print(&[json!("hello from"), json!(from)])?;
    Ok(Value::Null)
}

/// Bump a Counter net-object through its broadcast method table.
fn use_counter(args: TaskArgs) -> anyhow::Result<Value> {
    let mut counter: NetInstance = args.arg(0)?;
    let step: i64 = args.arg(1)?;

    runner::call_method(&mut counter, "bump", vec![json!(step)])
}

/// Method body of `Counter::bump`: receives the instance first, returns
/// the updated instance alongside the new count.
fn counter_bump(args: TaskArgs) -> anyhow::Result<Value> {
    let mut counter: NetInstance = args.arg(0)?;
    let step: i64 = args.arg(1)?;

    let count = counter.attr("count").and_then(Value::as_i64).unwrap_or(0) + step;
    counter.set_attr("count", json!(count));
    Ok(json!({"SELF": counter, "RET": count}))
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_millis() as u64
}
