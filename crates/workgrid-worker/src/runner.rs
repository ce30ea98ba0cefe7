//! The task runner: the child-process half of the executor.
//!
//! A worker binary's `main` must call [`run_if_task_child`] before doing
//! anything else; when the runner environment trigger is present the
//! process is a task child, not a server. The runner installs the
//! remote-to-master courier, resolves the target in the registry, invokes
//! it, and reports a JSON outcome on stdout.

use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, OnceLock};

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use workgrid_net::NetConfig;
use workgrid_primitives::request::exchange;
use workgrid_primitives::{Courier, NetInstance, TokenKind, context};
use workgrid_protocol::{Body, Kind, NetClassSpec, Origin, Reply, TaskSpec, Value};

use crate::mirror_bus::{self, MirrorOp, MirrorReply};
use crate::registry::{TaskArgs, TaskRegistry};

/// Environment trigger marking a process as a task runner child.
pub const RUNNER_ENV: &str = "WORKGRID_TASK_RUNNER";

/// Everything a task child needs to reach the master and its parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildConfig {
    pub master_addr: SocketAddr,
    pub worker_id: u32,
    pub net: NetConfig,
    pub bus_port: u16,
    pub classes: HashMap<u64, NetClassSpec>,
}

/// The stdin payload of a runner child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildPayload {
    pub config: ChildConfig,
    pub task: TaskSpec,
}

/// The stdout record of a runner child.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub result: Value,
    pub exception: Value,
    pub exception_raised: bool,
}

/// When this process is a task child, run the task and return true; the
/// caller's `main` should then exit. Returns false in a serving process.
pub fn run_if_task_child(registry: &TaskRegistry) -> bool {
    if std::env::var_os(RUNNER_ENV).is_none() {
        return false;
    }

    let outcome = run_task(registry, &mut std::io::stdin().lock());
    match serde_json::to_string(&outcome) {
        Ok(encoded) => println!("{encoded}"),
        Err(e) => eprintln!("could not encode task outcome: {e}"),
    }
    true
}

fn run_task(registry: &TaskRegistry, input: &mut impl Read) -> TaskOutcome {
    let payload: ChildPayload = match serde_json::from_reader(input) {
        Ok(payload) => payload,
        Err(e) => return failure(format!("malformed task payload: {e}")),
    };
    let ChildPayload { config, task } = payload;
    install_runtime(registry.clone(), &config);

    let Some(function) = registry.get(&task.target) else {
        return failure(format!("unknown task function {:?}", task.target));
    };

    let args = TaskArgs::new(task.args, task.kwargs);
    match catch_unwind(AssertUnwindSafe(|| function(args))) {
        Ok(Ok(result)) => TaskOutcome {
            result,
            exception: Value::Null,
            exception_raised: false,
        },
        Ok(Err(error)) => failure(format!("{error:#}")),
        Err(panic) => failure(panic_message(&*panic)),
    }
}

fn failure(message: String) -> TaskOutcome {
    TaskOutcome {
        result: Value::Null,
        exception: Value::String(message),
        exception_raised: true,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        format!("task panicked: {text}")
    } else if let Some(text) = panic.downcast_ref::<String>() {
        format!("task panicked: {text}")
    } else {
        "task panicked".to_string()
    }
}

// ---- child runtime ------------------------------------------------------

struct ChildRuntime {
    registry: TaskRegistry,
    classes: HashMap<u64, NetClassSpec>,
}

static RUNTIME: OnceLock<ChildRuntime> = OnceLock::new();

fn install_runtime(registry: TaskRegistry, config: &ChildConfig) {
    context::install(Arc::new(ChildCourier {
        master: config.master_addr,
        worker_id: config.worker_id,
        net: Arc::new(config.net.clone()),
        bus_port: config.bus_port,
    }));
    let _ = RUNTIME.set(ChildRuntime {
        registry,
        classes: config.classes.clone(),
    });
}

/// Invoke a net-class instance method inside a task. The method function
/// receives the instance as its first positional argument; it may return
/// `{"SELF": <instance>, "RET": <value>}` to update the instance's
/// attributes, or any other value to leave them untouched.
pub fn call_method(
    instance: &mut NetInstance,
    method: &str,
    args: Vec<Value>,
) -> anyhow::Result<Value> {
    let runtime = RUNTIME
        .get()
        .ok_or_else(|| anyhow!("net-object runtime is only available inside tasks"))?;
    let class = runtime
        .classes
        .get(&instance.class())
        .ok_or_else(|| anyhow!("unknown net class #{}", instance.class()))?;
    let target = class
        .methods
        .get(method)
        .ok_or_else(|| anyhow!("class {:?} has no method {method:?}", class.name))?;
    let function = runtime
        .registry
        .get(target)
        .ok_or_else(|| anyhow!("method {method:?} names unregistered function {target:?}"))?;

    let mut all_args = vec![serde_json::to_value(&*instance)?];
    all_args.extend(args);
    let returned = function(TaskArgs::new(all_args, Default::default()))?;

    if let Value::Object(mut map) = returned {
        if let Some(updated) = map.remove("SELF") {
            *instance = serde_json::from_value(updated)?;
            return Ok(map.remove("RET").unwrap_or(Value::Null));
        }
        return Ok(Value::Object(map));
    }
    Ok(returned)
}

/// Invoke a net-class static function inside a task.
pub fn call_static(class_id: u64, name: &str, args: Vec<Value>) -> anyhow::Result<Value> {
    let runtime = RUNTIME
        .get()
        .ok_or_else(|| anyhow!("net-object runtime is only available inside tasks"))?;
    let class = runtime
        .classes
        .get(&class_id)
        .ok_or_else(|| anyhow!("unknown net class #{class_id}"))?;
    let target = class
        .statics
        .get(name)
        .ok_or_else(|| anyhow!("class {:?} has no static {name:?}", class.name))?;
    let function = runtime
        .registry
        .get(target)
        .ok_or_else(|| anyhow!("static {name:?} names unregistered function {target:?}"))?;

    function(TaskArgs::new(args, Default::default())).map_err(Into::into)
}

// ---- remote-to-master courier -------------------------------------------

/// The courier installed in task children: requests go straight to the
/// master over the wire, parking goes through the parent's mirror bus.
struct ChildCourier {
    master: SocketAddr,
    worker_id: u32,
    net: Arc<NetConfig>,
    bus_port: u16,
}

impl ChildCourier {
    fn bus(&self, op: MirrorOp) -> Result<MirrorReply, workgrid_primitives::Error> {
        match mirror_bus::request(self.bus_port, &op) {
            Ok(MirrorReply::Failed(message)) => {
                Err(workgrid_primitives::Error::UnexpectedReply(message))
            }
            Ok(reply) => Ok(reply),
            Err(e) => Err(workgrid_primitives::Error::UnexpectedReply(e.to_string())),
        }
    }
}

impl Courier for ChildCourier {
    fn send(&self, kind: Kind, body: Body) -> Result<(), workgrid_primitives::Error> {
        self.call(kind, body).map(|_| ())
    }

    fn call(&self, kind: Kind, mut body: Body) -> Result<Reply, workgrid_primitives::Error> {
        body.worker = Some(Origin::Worker(self.worker_id));
        exchange(self.master, &self.net, kind, &body)
    }

    fn wait_event(&self, id: u64) -> Result<(), workgrid_primitives::Error> {
        match self.bus(MirrorOp::WaitEvent { id })? {
            MirrorReply::Woken => Ok(()),
            other => Err(workgrid_primitives::Error::UnexpectedReply(format!(
                "{other:?}"
            ))),
        }
    }

    fn acquire_token(&self, kind: TokenKind, id: u64) -> Result<(), workgrid_primitives::Error> {
        let op = match kind {
            TokenKind::Lock => MirrorOp::AcquireLock { id },
            TokenKind::Semaphore => MirrorOp::AcquireSemaphore { id },
        };
        match self.bus(op)? {
            MirrorReply::Woken => Ok(()),
            other => Err(workgrid_primitives::Error::UnexpectedReply(format!(
                "{other:?}"
            ))),
        }
    }

    fn pop_queue(&self, id: u64) -> Result<Value, workgrid_primitives::Error> {
        match self.bus(MirrorOp::PopQueue { id })? {
            MirrorReply::Item(value) => Ok(value),
            other => Err(workgrid_primitives::Error::UnexpectedReply(format!(
                "{other:?}"
            ))),
        }
    }
}
