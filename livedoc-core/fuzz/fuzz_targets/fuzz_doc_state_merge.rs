#![no_main]

use libfuzzer_sys::fuzz_target;
use livedoc_core::core_doc::{DocState, DocUpdate, TextDocument};
use livedoc_core::core_model::PeerId;

fuzz_target!(|data: &[u8]| {
    let mut doc = TextDocument::new(PeerId::new("fuzz"));
    let _ = doc.local_insert(0, "seed text");

    // Decoded states and updates from a peer must never corrupt the replica
    if let Ok(state) = DocState::decode(data) {
        let _ = doc.merge_state(&state);
    }
    if let Ok(update) = decode_update(data) {
        let _ = doc.apply_remote(&update);
    }
    let _ = doc.export_state();
});

fn decode_update(data: &[u8]) -> Result<DocUpdate, serde_json::Error> {
    serde_json::from_slice(data)
}
