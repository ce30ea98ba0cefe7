use serde::{Deserialize, Serialize};

use crate::Value;
use crate::error::Error;

/// A reply to a request. Unit variants encode as their bare sentinel
/// string, matching the wire's byte sentinels; payload variants encode as
/// a single-key map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// Sent by request cleanup when a handler did not answer explicitly,
    /// so callers never block on a reply that is not coming.
    #[serde(rename = "DEFAULT_RESPONSE")]
    Default,
    /// Answer to `ALV`.
    #[serde(rename = "IMALIVE")]
    Alive,
    /// Answer to `TSK` once the task process has been started.
    #[serde(rename = "TASKSTART")]
    TaskStarted,
    /// Generic success.
    #[serde(rename = "OK")]
    Ok,
    /// Shared-map get on an absent key.
    #[serde(rename = "KERR")]
    KeyError,
    #[serde(rename = "VALUE")]
    Value(Value),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "LENGTH")]
    Length(u64),
    #[serde(rename = "KEYS")]
    Keys(Vec<String>),
    /// The worker the request was forwarded to is dead.
    #[serde(rename = "DEADWORKER")]
    DeadWorker(u32),
}

impl Reply {
    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(payload)?)
    }
}
