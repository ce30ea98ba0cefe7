use workgrid_protocol::{Body, Kind, Reply, Value};

use crate::context;
use crate::error::Error;

/// Print `args` on the master's stdout, wherever the caller runs.
///
/// Blocks until the master confirms, so output is ordered per caller.
pub fn net_print(args: &[Value]) -> Result<(), Error> {
    let body = Body {
        args: Some(args.to_vec()),
        ..Body::default()
    };
    match context::current()?.call(Kind::NetPrint, body)? {
        Reply::Ok => Ok(()),
        other => Err(Error::UnexpectedReply(format!("{other:?}"))),
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::context::test_support::RecordingCourier;

    #[test]
    fn sends_args_and_expects_ok() {
        let _guard = crate::context::test_support::serialize_courier_tests();
        let courier = Arc::new(RecordingCourier::default());
        courier.replies.lock().unwrap().push(Reply::Ok);
        context::install(courier.clone());

        net_print(&[json!("hello"), json!(42)]).unwrap();

        let sent = courier.sent.lock().unwrap();
        assert_eq!(sent[0].0, Kind::NetPrint);
        assert_eq!(sent[0].1.args, Some(vec![json!("hello"), json!(42)]));
        context::clear();
    }

    #[test]
    fn unexpected_reply_is_an_error() {
        let _guard = crate::context::test_support::serialize_courier_tests();
        let courier = Arc::new(RecordingCourier::default());
        courier.replies.lock().unwrap().push(Reply::Bool(false));
        context::install(courier);

        assert!(net_print(&[json!(1)]).is_err());
        context::clear();
    }
}
