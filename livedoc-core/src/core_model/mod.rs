/*
    core_model - identifiers shared across the session engine
*/

pub mod types;

pub use types::{PeerId, RoomId, Timestamp, UserId};
