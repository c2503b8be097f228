//! Deterministic peer colors

use crate::core_model::PeerId;
use sha2::{Digest, Sha256};

const PALETTE: [&str; 12] = [
    "#e6194b", "#3cb44b", "#4363d8", "#f58231", "#911eb4", "#42d4f4",
    "#f032e6", "#9a6324", "#469990", "#800000", "#808000", "#000075",
];

/// Every participant computes the same color for the same peer
pub fn color_for(peer_id: &PeerId) -> &'static str {
    let digest = Sha256::digest(peer_id.as_str().as_bytes());
    PALETTE[digest[0] as usize % PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_color_is_stable_and_from_palette() {
        let peer = PeerId::new("peer-1");
        assert_eq!(color_for(&peer), color_for(&PeerId::new("peer-1")));
        assert!(PALETTE.contains(&color_for(&peer)));
    }
}
