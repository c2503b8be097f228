#![no_main]

use libfuzzer_sys::fuzz_target;
use livedoc_core::core_doc::{DocSnapshot, DocState};

fuzz_target!(|data: &[u8]| {
    let _ = DocState::decode(data);

    if let Ok(json) = std::str::from_utf8(data) {
        if let Ok(snapshot) = DocSnapshot::from_json(json) {
            let _ = snapshot.decode_state();
        }
    }
});
