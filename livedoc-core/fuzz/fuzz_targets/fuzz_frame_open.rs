#![no_main]

use libfuzzer_sys::fuzz_target;
use livedoc_core::core_crypto::{Envelope, RoomKey};
use livedoc_core::core_engine::Frame;
use livedoc_core::core_model::RoomId;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes off a data channel must fail cleanly
    let envelope = Envelope::new(&RoomId::new("fuzz-room"), &RoomKey::from_bytes([7u8; 32]));
    let _ = Frame::open(&envelope, data);

    // Sealed garbage must decrypt but may still fail to decode
    if let Ok(sealed) = envelope.encrypt(data) {
        let _ = Frame::open(&envelope, &sealed);
    }
});
