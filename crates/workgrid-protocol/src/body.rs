use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::Value;

/// Originator of a request: a worker, or the master itself.
///
/// On the wire the master is encoded as `-1` and workers as their dense
/// non-negative id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Master,
    Worker(u32),
}

impl Origin {
    pub fn worker_id(&self) -> Option<u32> {
        match self {
            Origin::Master => None,
            Origin::Worker(id) => Some(*id),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Origin::Master => f.write_str("-1 (master)"),
            Origin::Worker(id) => write!(f, "worker #{id}"),
        }
    }
}

impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Origin::Master => serializer.serialize_i64(-1),
            Origin::Worker(id) => serializer.serialize_i64(i64::from(*id)),
        }
    }
}

impl<'de> Deserialize<'de> for Origin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        match raw {
            -1 => Ok(Origin::Master),
            id if id >= 0 && id <= i64::from(u32::MAX) => Ok(Origin::Worker(id as u32)),
            other => Err(de::Error::custom(format!("invalid origin id {other}"))),
        }
    }
}

/// One unit of work shipped to a worker: a registered function id plus
/// its serialized arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "TARGET")]
    pub target: String,
    #[serde(rename = "ARGS")]
    pub args: Vec<Value>,
    #[serde(rename = "KWARGS")]
    pub kwargs: BTreeMap<String, Value>,
}

/// A net class: a method table resolved on workers by class id. Method
/// values are registered function ids, so the class itself carries no
/// code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetClassSpec {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "NAME")]
    pub name: String,
    #[serde(rename = "METHODS")]
    pub methods: BTreeMap<String, String>,
    #[serde(rename = "STATICS", default)]
    pub statics: BTreeMap<String, String>,
}

/// A request body. Keys are drawn from a closed literal set; absent keys
/// are omitted from the wire encoding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Body {
    /// Originating worker, `-1` for the master.
    #[serde(rename = "WORKER", skip_serializing_if = "Option::is_none", default)]
    pub worker: Option<Origin>,

    /// Task payload for `TSK`.
    #[serde(rename = "TASK", skip_serializing_if = "Option::is_none", default)]
    pub task: Option<TaskSpec>,

    /// Primitive or task id, depending on the kind.
    #[serde(rename = "ID", skip_serializing_if = "Option::is_none", default)]
    pub id: Option<u64>,

    /// Queue id for `QUR`/`QUP`/`QUG`.
    #[serde(rename = "QUEUE", skip_serializing_if = "Option::is_none", default)]
    pub queue: Option<u64>,

    /// Queue item payload.
    #[serde(rename = "DATA", skip_serializing_if = "Option::is_none", default)]
    pub data: Option<Value>,

    /// Shared-map key.
    #[serde(rename = "ITEM", skip_serializing_if = "Option::is_none", default)]
    pub item: Option<String>,

    /// Shared-map value or semaphore initial value.
    #[serde(rename = "VALUE", skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,

    /// Net class payload for `NCR`.
    #[serde(rename = "CLS", skip_serializing_if = "Option::is_none", default)]
    pub class: Option<NetClassSpec>,

    /// Positional arguments for `NPR`.
    #[serde(rename = "ARGS", skip_serializing_if = "Option::is_none", default)]
    pub args: Option<Vec<Value>>,

    /// Keyword arguments for `NPR`.
    #[serde(rename = "KWARGS", skip_serializing_if = "Option::is_none", default)]
    pub kwargs: Option<BTreeMap<String, Value>>,
}

impl Body {
    pub fn empty() -> Self {
        Body::default()
    }

    /// Body carrying just a primitive or task id.
    pub fn with_id(id: u64) -> Self {
        Body {
            id: Some(id),
            ..Body::default()
        }
    }

    /// Body naming a queue.
    pub fn with_queue(queue: u64) -> Self {
        Body {
            queue: Some(queue),
            ..Body::default()
        }
    }

    pub fn and_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn and_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn and_item(mut self, key: impl Into<String>) -> Self {
        self.item = Some(key.into());
        self
    }

    pub fn and_worker(mut self, origin: Origin) -> Self {
        self.worker = Some(origin);
        self
    }
}
