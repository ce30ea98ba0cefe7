//! The task executor: one OS process per task.
//!
//! The child is this same binary re-entered in runner mode; it receives
//! its configuration and the task spec on stdin and reports a JSON
//! outcome on stdout. A reaper thread ingests the outcome into the status
//! block, which only session handlers read. Termination is a hard kill.

use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, warn};

use workgrid_protocol::{TaskSpec, Value};

use crate::error::Error;
use crate::runner::{ChildConfig, ChildPayload, RUNNER_ENV, TaskOutcome};

/// The shared status block of one task.
#[derive(Debug, Clone)]
pub struct TaskStatus {
    pub running: bool,
    pub done: bool,
    pub result: Value,
    pub exception: Value,
    pub exception_raised: bool,
    pub terminated: bool,
}

impl TaskStatus {
    fn started() -> Self {
        TaskStatus {
            running: true,
            done: false,
            result: Value::Null,
            exception: Value::Null,
            exception_raised: false,
            terminated: false,
        }
    }
}

/// Owns one task process and its status block.
pub struct TaskExecutor {
    child: Option<Arc<Mutex<Child>>>,
    status: Arc<Mutex<TaskStatus>>,
}

impl TaskExecutor {
    /// Spawn the runner child and start it immediately.
    pub fn spawn(task: TaskSpec, config: ChildConfig) -> Result<Self, Error> {
        let task_id = task.id;
        let exe = std::env::current_exe()?;
        let mut child = Command::new(exe)
            .env(RUNNER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;

        let payload = ChildPayload { config, task };
        let encoded = serde_json::to_vec(&payload)?;
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::IoError(std::io::Error::other("runner stdin not piped")))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::IoError(std::io::Error::other("runner stdout not piped")))?;

        if let Err(e) = stdin.write_all(&encoded) {
            let _ = child.kill();
            let _ = child.wait();
            return Err(Error::IoError(e));
        }
        // Closing stdin signals the runner that the payload is complete.
        drop(stdin);

        let child = Arc::new(Mutex::new(child));
        let status = Arc::new(Mutex::new(TaskStatus::started()));

        let reaper_child = child.clone();
        let reaper_status = status.clone();
        thread::Builder::new()
            .name(format!("task-{task_id}-reaper"))
            .spawn(move || reap(reaper_child, reaper_status, &mut stdout))?;

        debug!("started task #{task_id}");
        Ok(TaskExecutor {
            child: Some(child),
            status,
        })
    }

    /// A record for a task whose process could not be started. The
    /// failure surfaces through the normal exception calls.
    pub fn failed(message: String) -> Self {
        let status = TaskStatus {
            running: false,
            done: true,
            result: Value::Null,
            exception: Value::String(message),
            exception_raised: true,
            terminated: false,
        };
        TaskExecutor {
            child: None,
            status: Arc::new(Mutex::new(status)),
        }
    }

    pub fn result(&self) -> Value {
        self.status().result
    }

    pub fn exception(&self) -> Value {
        self.status().exception
    }

    pub fn exception_raised(&self) -> bool {
        self.status().exception_raised
    }

    pub fn running(&self) -> bool {
        self.status().running
    }

    pub fn done(&self) -> bool {
        self.status().done
    }

    /// Kill the task process. The terminated flag is set first so the
    /// reaper does not mistake the kill for a crash.
    pub fn terminate(&self) {
        {
            let mut status = self.status.lock().expect("status block poisoned");
            status.terminated = true;
            status.running = false;
        }
        if let Some(child) = &self.child {
            let mut child = child.lock().expect("child handle poisoned");
            if let Err(e) = child.kill() {
                debug!("kill failed (task already gone): {e}");
            }
        }
    }

    fn status(&self) -> TaskStatus {
        self.status.lock().expect("status block poisoned").clone()
    }
}

/// Wait for the child to finish, then ingest its outcome. Reading stdout
/// to EOF is the exit signal; only then is the child handle locked to
/// reap it, so `terminate` can always take the lock to kill.
fn reap(child: Arc<Mutex<Child>>, status: Arc<Mutex<TaskStatus>>, stdout: &mut impl Read) {
    let mut output = String::new();
    let _ = stdout.read_to_string(&mut output);

    {
        let mut child = child.lock().expect("child handle poisoned");
        let _ = child.wait();
    }

    let mut status = status.lock().expect("status block poisoned");
    status.running = false;
    status.done = true;

    // The outcome is the last line; anything before it is the task's own
    // stdout.
    let outcome_line = output
        .lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .unwrap_or_default();

    match serde_json::from_str::<TaskOutcome>(outcome_line) {
        Ok(outcome) => {
            status.result = outcome.result;
            status.exception = outcome.exception;
            status.exception_raised = outcome.exception_raised;
        }
        Err(_) if status.terminated => {}
        Err(e) => {
            warn!("task process died without reporting an outcome: {e}");
            status.exception_raised = true;
            status.exception = Value::String("task process died without reporting an outcome".to_string());
        }
    }
}
