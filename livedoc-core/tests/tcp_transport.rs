/*
    tcp_transport.rs - A host and a guest over real loopback sockets

    Run with: cargo test --test tcp_transport
*/

use livedoc_core::core_engine::{host_room, join_room, HostOptions, JoinOptions};
use livedoc_core::core_model::{RoomId, UserId};
use livedoc_core::core_relay::MemoryRelay;
use livedoc_core::core_transport::{CandidateKind, TcpDriver};
use livedoc_core::test_utils::*;
use std::sync::Arc;

#[tokio::test]
async fn test_session_over_tcp_links() {
    let relay = MemoryRelay::new();
    let config = fast_config();

    let host_driver = TcpDriver::bind("127.0.0.1:0", config.transport.max_frame_size)
        .await
        .unwrap();
    let guest_driver = TcpDriver::bind("127.0.0.1:0", config.transport.max_frame_size)
        .await
        .unwrap();

    let hosted = host_room(
        relay.shared(),
        Arc::new(host_driver),
        config.clone(),
        RoomId::new("tcp-room"),
        UserId::new("host"),
        "Host",
        HostOptions::default(),
    )
    .await
    .unwrap();
    let host = hosted.handle;

    let guest = join_room(
        relay.shared(),
        Arc::new(guest_driver),
        config,
        &hosted.link,
        JoinOptions::new(UserId::new("guest"), "Guest"),
    )
    .await
    .unwrap();
    let guest_peer = guest.peer_id();

    host.wait_for_timeout(SETTLE_TIMEOUT, |s| s.connected_peer_ids.contains(&guest_peer))
        .await
        .unwrap();

    guest.set_text("over the wire").await.unwrap();
    host.wait_for_timeout(SETTLE_TIMEOUT, |s| s.text == "over the wire")
        .await
        .unwrap();
    host.insert_text(0, ">> ").await.unwrap();
    guest
        .wait_for_timeout(SETTLE_TIMEOUT, |s| s.text == ">> over the wire")
        .await
        .unwrap();

    let diag = host.peer_diagnostics(&guest_peer).await.unwrap();
    assert_eq!(diag.local_candidate, Some(CandidateKind::Host));
    assert_eq!(diag.remote_candidate, Some(CandidateKind::Host));

    leave_all(&[&guest, &host]).await;
}
