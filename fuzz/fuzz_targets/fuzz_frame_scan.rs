#![no_main]

use libfuzzer_sys::fuzz_target;
use workgrid_protocol::frame::{encode_frame, scan_header};

fuzz_target!(|data: &[u8]| {
    // Raw header scanning must never panic and never report a header
    // longer than the input.
    if let Ok(Some(header)) = scan_header(data) {
        assert!(header.header_len <= data.len());
    }

    // Anything we encode must scan back to itself.
    let frame = encode_frame(data);
    let header = scan_header(&frame)
        .expect("own frames always scan")
        .expect("own frames are complete");
    assert_eq!(header.payload_len, data.len());
    assert_eq!(&frame[header.header_len..], data);
});
