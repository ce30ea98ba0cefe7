#![no_main]

use arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use workgrid_protocol::{Body, Envelope, Kind};

#[derive(Arbitrary)]
struct FuzzBody {
    id: Option<u64>,
    queue: Option<u64>,
    item: Option<String>,
}

fuzz_target!(|data: &[u8]| {
    // Structure-aware: encode a well-formed envelope and decode it back.
    let mut u = Unstructured::new(data);
    if let Ok(fuzz_body) = FuzzBody::arbitrary(&mut u) {
        let mut body = Body::empty();
        body.id = fuzz_body.id;
        body.queue = fuzz_body.queue;
        body.item = fuzz_body.item;

        let envelope = Envelope::new(Kind::MapGet, body);
        let bytes = envelope.encode().expect("own envelopes encode");
        let decoded = Envelope::decode(&bytes).expect("own envelopes decode");
        assert_eq!(decoded, envelope);
    }

    // Raw: decoding arbitrary bytes must never panic.
    let _ = Envelope::decode(data);
});
