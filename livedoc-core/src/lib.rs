//! livedoc - end-to-end encrypted live-share sessions for small rooms
//!
//! A host opens a room on a relay, hands out a join link, and up to eight
//! peers edit one shared text document over direct encrypted links. The
//! relay stores room metadata and carries signaling; it never sees the
//! document, chat, presence or the room key.
//!
//! Layers, bottom-up:
//! - [`core_crypto`]: room key, frame envelope, access proof, join links
//! - [`core_doc`]: replicated text document and snapshots
//! - [`core_transport`]: peer links, connection pool, reconnect backoff
//! - [`core_relay`] / [`core_signal`]: relay contract and signaling
//! - [`core_session`]: room and participant records, admission, permissions
//! - [`core_presence`]: cursors, typing, heartbeats, chat
//! - [`core_engine`]: the running session tying it all together

pub mod config;
pub mod core_crypto;
pub mod core_doc;
pub mod core_engine;
pub mod core_model;
pub mod core_presence;
pub mod core_relay;
pub mod core_session;
pub mod core_signal;
pub mod core_transport;
pub mod logging;
pub mod test_utils;

pub use config::Config;
pub use core_engine::{host_room, join_room, HostOptions, HostedRoom, JoinOptions, SessionHandle, SessionSnapshot};
pub use core_session::{SessionError, SessionResult};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = HostOptions::default();
        assert!(Config::default().validate().is_ok());
    }
}
