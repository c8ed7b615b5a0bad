#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Bad sync bytes, ids or length digits must surface as errors, never
    // as panics.
    let mut buf = BytesMut::from(data);
    while let Ok(Some(msg)) = dds_wire::Message::decode(&mut buf) {
        assert!(msg.len() <= dds_wire::MAX_BODY_LEN);

        let frame = msg.to_bytes();
        let mut again = BytesMut::from(&frame[..]);
        let decoded = dds_wire::Message::decode(&mut again)
            .expect("re-encoded frame decodes")
            .expect("re-encoded frame is complete");
        assert_eq!(decoded, msg);

        let _ = dds_server::dispatch(&msg);
    }
});
