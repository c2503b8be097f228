#![no_main]

use libfuzzer_sys::fuzz_target;
use livedoc_core::core_crypto::JoinLink;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Anything that parses must render again
        if let Ok(link) = JoinLink::parse(input) {
            let _ = link.to_url();
        }
    }
});
