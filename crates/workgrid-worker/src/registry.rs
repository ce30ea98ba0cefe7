//! The worker-side function registry.
//!
//! Code cannot be shipped at runtime, so a task payload names a function
//! registered here by a stable string id. The same registry must be
//! present in the serving process and in the task runner child, which is
//! why both are entered through the same binary.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, anyhow};
use serde::de::DeserializeOwned;

use workgrid_protocol::Value;

/// Positional and keyword arguments delivered to a task function.
#[derive(Debug, Clone, Default)]
pub struct TaskArgs {
    pub args: Vec<Value>,
    pub kwargs: BTreeMap<String, Value>,
}

impl TaskArgs {
    pub fn new(args: Vec<Value>, kwargs: BTreeMap<String, Value>) -> Self {
        TaskArgs { args, kwargs }
    }

    /// Decode positional argument `index`.
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> anyhow::Result<T> {
        let value = self
            .args
            .get(index)
            .ok_or_else(|| anyhow!("missing positional argument {index}"))?;
        serde_json::from_value(value.clone())
            .with_context(|| format!("positional argument {index}"))
    }

    /// Decode keyword argument `name` if present.
    pub fn kwarg<T: DeserializeOwned>(&self, name: &str) -> anyhow::Result<Option<T>> {
        match self.kwargs.get(name) {
            None => Ok(None),
            Some(value) => Ok(Some(
                serde_json::from_value(value.clone())
                    .with_context(|| format!("keyword argument {name:?}"))?,
            )),
        }
    }
}

/// A registered task function.
pub type TaskFn = fn(TaskArgs) -> anyhow::Result<Value>;

/// Named functions available to task payloads and net-class method
/// tables.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    functions: HashMap<String, TaskFn>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        TaskRegistry::default()
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register(&mut self, name: impl Into<String>, function: TaskFn) -> &mut Self {
        self.functions.insert(name.into(), function);
        self
    }

    pub fn get(&self, name: &str) -> Option<TaskFn> {
        self.functions.get(name).copied()
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}
