use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use workgrid_protocol::Value;

/// An instance of a registered net class.
///
/// Instances carry only their class id and attribute map; methods are
/// resolved on the worker by class-id lookup against the class table the
/// master broadcast at registration time. That keeps instances cheap to
/// ship inside task arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetInstance {
    #[serde(rename = "ID")]
    class: u64,
    #[serde(rename = "ATT")]
    attrs: BTreeMap<String, Value>,
}

impl NetInstance {
    pub fn new(class: u64) -> Self {
        NetInstance {
            class,
            attrs: BTreeMap::new(),
        }
    }

    pub fn class(&self) -> u64 {
        self.class
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: Value) {
        self.attrs.insert(name.into(), value);
    }

    pub fn attrs(&self) -> &BTreeMap<String, Value> {
        &self.attrs
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    #[test]
    fn instance_serializes_as_class_and_attrs() {
        let mut counter = NetInstance::new(1);
        counter.set_attr("count", json!(3));

        let encoded = serde_json::to_value(&counter).unwrap();
        assert_eq!(encoded, json!({"ID": 1, "ATT": {"count": 3}}));

        let decoded: NetInstance = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, counter);
    }

    #[test]
    fn attrs_are_mutable() {
        let mut instance = NetInstance::new(2);
        assert!(instance.attr("x").is_none());

        instance.set_attr("x", json!([1, 2]));
        assert_eq!(instance.attr("x"), Some(&json!([1, 2])));

        instance.set_attr("x", json!(null));
        assert_eq!(instance.attr("x"), Some(&json!(null)));
    }
}
