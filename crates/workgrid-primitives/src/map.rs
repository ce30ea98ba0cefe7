use serde::Serialize;
use serde::de::DeserializeOwned;

use workgrid_protocol::{Body, Kind, Reply};

use crate::context;
use crate::error::Error;

/// A shared key/value map living on the master. Keys are strings; values
/// are any serializable type.
///
/// `set` is fire-and-forget; reads go through the master, so a `get`
/// issued after a `set` returned may still observe the old value until
/// the dispatcher has processed the set. Reads after a read-back are
/// stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SharedMap {
    #[serde(rename = "ID")]
    id: u64,
}

impl SharedMap {
    /// Normally obtained from `Workgroup::register_map`.
    pub fn new(id: u64) -> Self {
        SharedMap { id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        let value = serde_json::to_value(value)?;
        context::current()?.send(
            Kind::MapSet,
            Body::with_id(self.id).and_item(key).and_value(value),
        )
    }

    /// Fetch `key`, failing with [`Error::KeyAbsent`] when it was never
    /// set.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        let reply = context::current()?.call(Kind::MapGet, Body::with_id(self.id).and_item(key))?;
        match reply {
            Reply::Value(value) => Ok(serde_json::from_value(value)?),
            Reply::KeyError => Err(Error::KeyAbsent(key.to_string())),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub fn contains(&self, key: &str) -> Result<bool, Error> {
        let reply =
            context::current()?.call(Kind::MapContains, Body::with_id(self.id).and_item(key))?;
        match reply {
            Reply::Bool(present) => Ok(present),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub fn len(&self) -> Result<u64, Error> {
        let reply = context::current()?.call(Kind::MapLength, Body::with_id(self.id))?;
        match reply {
            Reply::Length(len) => Ok(len),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        Ok(self.len()? == 0)
    }

    pub fn keys(&self) -> Result<Vec<String>, Error> {
        let reply = context::current()?.call(Kind::MapKeys, Body::with_id(self.id))?;
        match reply {
            Reply::Keys(keys) => Ok(keys),
            other => Err(Error::UnexpectedReply(format!("{other:?}"))),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::context::test_support::RecordingCourier;

    #[test]
    fn set_is_fire_and_forget() {
        let _guard = crate::context::test_support::serialize_courier_tests();
        let courier = Arc::new(RecordingCourier::default());
        context::install(courier.clone());

        SharedMap::new(1).set("n", &0).unwrap();

        let sent = courier.sent.lock().unwrap();
        assert_eq!(sent[0].0, Kind::MapSet);
        assert_eq!(sent[0].1.item.as_deref(), Some("n"));
        assert_eq!(sent[0].1.value, Some(json!(0)));
        context::clear();
    }

    #[test]
    fn get_translates_kerr() {
        let _guard = crate::context::test_support::serialize_courier_tests();
        let courier = Arc::new(RecordingCourier::default());
        courier.replies.lock().unwrap().push(Reply::KeyError);
        context::install(courier);

        let result: Result<u32, _> = SharedMap::new(1).get("missing");
        assert!(matches!(result, Err(Error::KeyAbsent(key)) if key == "missing"));
        context::clear();
    }

    #[test]
    fn get_returns_typed_value() {
        let _guard = crate::context::test_support::serialize_courier_tests();
        let courier = Arc::new(RecordingCourier::default());
        courier
            .replies
            .lock()
            .unwrap()
            .push(Reply::Value(json!(10)));
        context::install(courier);

        let n: u32 = SharedMap::new(1).get("n").unwrap();
        assert_eq!(n, 10);
        context::clear();
    }

    #[test]
    fn metadata_accessors() {
        let _guard = crate::context::test_support::serialize_courier_tests();
        let courier = Arc::new(RecordingCourier::default());
        {
            let mut replies = courier.replies.lock().unwrap();
            replies.push(Reply::Bool(true));
            replies.push(Reply::Length(2));
            replies.push(Reply::Keys(vec!["a".into(), "b".into()]));
        }
        context::install(courier);

        let map = SharedMap::new(1);
        assert!(map.contains("a").unwrap());
        assert_eq!(map.len().unwrap(), 2);
        assert_eq!(map.keys().unwrap(), vec!["a", "b"]);
        context::clear();
    }
}
