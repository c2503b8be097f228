//! Test fixtures: fast configuration and a hosted room on a memory network

use crate::config::Config;
use crate::core_crypto::{JoinLink, KdfParams};
use crate::core_engine::{host_room, join_room, HostOptions, JoinOptions, SessionHandle};
use crate::core_model::{RoomId, UserId};
use crate::core_relay::MemoryRelay;
use crate::core_session::SessionResult;
use crate::core_transport::{BackoffPolicy, MemoryNetwork};
use std::sync::Arc;
use std::time::Duration;

/// How long fixtures wait for a state before failing a test
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Intervals short enough for tests, and a KDF cheap enough to run often
pub fn fast_config() -> Config {
    let mut config = Config::default();

    let session = &mut config.session;
    session.approval_poll_interval = Duration::from_millis(40);
    session.queue_poll_interval = Duration::from_millis(40);
    session.room_poll_interval = Duration::from_millis(60);
    session.handshake_timeout = Duration::from_millis(500);

    let transport = &mut config.transport;
    transport.connect_timeout = Duration::from_millis(500);
    transport.backoff = BackoffPolicy {
        initial_delay: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
        multiplier: 2.0,
        max_attempts: 50,
    };

    let presence = &mut config.presence;
    presence.cursor_throttle = Duration::from_millis(20);
    presence.typing_throttle = Duration::from_millis(20);
    presence.tick_interval = Duration::from_millis(20);
    presence.heartbeat_interval = Duration::from_millis(50);
    presence.presence_ttl = Duration::from_millis(400);
    presence.cursor_ttl = Duration::from_millis(400);
    presence.typing_ttl = Duration::from_millis(200);

    config.crypto.kdf = KdfParams {
        memory_kib: 1024,
        iterations: 1,
        parallelism: 1,
    };
    config
}

pub fn test_user(name: &str) -> UserId {
    UserId::new(format!("user-{}", name))
}

/// A hosted room with its relay and network kept alive for the test
pub struct TestRoom {
    pub relay: MemoryRelay,
    pub net: MemoryNetwork,
    pub config: Config,
    pub room_id: RoomId,
    pub host: SessionHandle,
    pub host_user: UserId,
    pub link: JoinLink,
}

impl TestRoom {
    /// Host `room` as "host" with default (link-secret) options
    pub async fn open(room: &str) -> SessionResult<Self> {
        Self::open_with(room, HostOptions::default()).await
    }

    pub async fn open_with(room: &str, options: HostOptions) -> SessionResult<Self> {
        let relay = MemoryRelay::new();
        let net = MemoryNetwork::new();
        let config = fast_config();
        let room_id = RoomId::new(room);
        let host_user = test_user("host");
        let hosted = host_room(
            relay.shared(),
            Arc::new(net.endpoint("host")),
            config.clone(),
            room_id.clone(),
            host_user.clone(),
            "Host",
            options,
        )
        .await?;
        Ok(TestRoom {
            relay,
            net,
            config,
            room_id,
            host: hosted.handle,
            host_user,
            link: hosted.link,
        })
    }

    /// Join as `name`; the memory endpoint is named after the user
    pub async fn join(&self, name: &str) -> SessionResult<SessionHandle> {
        self.join_with(name, JoinOptions::new(test_user(name), name)).await
    }

    pub async fn join_with(&self, endpoint: &str, options: JoinOptions) -> SessionResult<SessionHandle> {
        self.join_link(endpoint, &self.link, options).await
    }

    pub async fn join_link(
        &self,
        endpoint: &str,
        link: &JoinLink,
        options: JoinOptions,
    ) -> SessionResult<SessionHandle> {
        join_room(
            self.relay.shared(),
            Arc::new(self.net.endpoint(endpoint)),
            self.config.clone(),
            link,
            options,
        )
        .await
    }

    /// Join as `name` and wait until the host holds a link to the guest
    /// and knows it as approved
    pub async fn join_connected(&self, name: &str) -> SessionResult<SessionHandle> {
        let guest = self.join(name).await?;
        let peer = guest.peer_id();
        self.host
            .wait_for_timeout(SETTLE_TIMEOUT, |s| {
                s.connected_peer_ids.contains(&peer)
                    && s.participant_by_peer(&peer).is_some_and(|p| p.is_approved())
            })
            .await?;
        Ok(guest)
    }
}
