/*
    access_control.rs - Admission rules enforced across relay and session

    Capacity, bans, lock, password proofs. Each test drives real sessions
    through the join flow rather than poking the relay directly.

    Run with: cargo test --test access_control
*/

use livedoc_core::core_crypto::{derive_key, AccessProof, JoinLink, LinkSecret};
use livedoc_core::core_engine::{HostOptions, JoinOptions};
use livedoc_core::core_relay::Relay;
use livedoc_core::core_session::{ParticipantStatus, SessionError};
use livedoc_core::test_utils::*;
use secrecy::{ExposeSecret, SecretString};
use std::io::Write;
use std::sync::{Arc, Mutex};

#[tokio::test]
async fn test_capacity_rejects_the_extra_joiner() {
    let room = TestRoom::open_with(
        "capacity",
        HostOptions {
            max_peers: 3,
            ..HostOptions::default()
        },
    )
    .await
    .unwrap();

    let a = room.join_connected("a").await.unwrap();
    let b = room.join_connected("b").await.unwrap();
    let extra = room.join("c").await;
    assert!(matches!(extra, Err(SessionError::RoomFull)));

    let state = room.host.snapshot();
    assert!(state.is_room_full);
    assert!(state.connected_peer_ids.len() + 1 <= state.effective_max_peers as usize);
    let seated = state.participants.iter().filter(|p| p.holds_seat()).count();
    assert!(seated <= 3);

    // A seat frees up when someone leaves
    a.leave().await.unwrap();
    room.host
        .wait_for_timeout(SETTLE_TIMEOUT, |s| !s.is_room_full)
        .await
        .unwrap();
    let c = room.join_connected("c").await.unwrap();

    leave_all(&[&b, &c, &room.host]).await;
}

#[tokio::test]
async fn test_capacity_hint_is_clamped() {
    let room = TestRoom::open_with(
        "clamped",
        HostOptions {
            max_peers: 40,
            ..HostOptions::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(room.link.max_peers_hint, Some(8));
    assert_eq!(room.host.snapshot().effective_max_peers, 8);
    room.host.leave().await.unwrap();
}

#[tokio::test]
async fn test_banned_participant_stays_out_even_with_invite() {
    let room = TestRoom::open("bans").await.unwrap();
    let guest = room.join_connected("troll").await.unwrap();
    let troll = test_user("troll");

    room.host.ban_participant(&troll).await.unwrap();
    let state = guest
        .wait_for_timeout(SETTLE_TIMEOUT, |s| s.kicked)
        .await
        .unwrap();
    assert_eq!(state.approval, ParticipantStatus::Banned);

    let invite = room.host.create_invite(Some(5), None).await.unwrap();
    let retry = room
        .join_with("troll", JoinOptions::new(troll.clone(), "troll").with_invite(invite.code))
        .await;
    assert!(matches!(retry, Err(SessionError::AccessDenied(_))));

    // Banning survives the troll's record being looked up again
    let record = room
        .relay
        .get_participant(&room.room_id, &troll)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ParticipantStatus::Banned);

    room.host.leave().await.unwrap();
}

#[tokio::test]
async fn test_lock_blocks_guests_but_not_the_host() {
    let room = TestRoom::open("scenario-c").await.unwrap();
    let guest = room.join_connected("guest").await.unwrap();

    room.host.update_room_locked(true).await.unwrap();
    guest
        .wait_for_timeout(SETTLE_TIMEOUT, |s| s.room_locked)
        .await
        .unwrap();

    let third = room.join("third").await;
    assert!(matches!(third, Err(SessionError::Locked)));

    // The host rejoins through its own link while locked
    let host_again = room
        .join_with("host-2", JoinOptions::new(room.host_user.clone(), "Host"))
        .await
        .unwrap();
    assert!(host_again.snapshot().is_host);
    assert!(!host_again.snapshot().blocked_by_lock);

    room.host.update_room_locked(false).await.unwrap();
    let third = room.join_connected("third").await.unwrap();
    assert!(third.snapshot().is_approved());

    leave_all(&[&guest, &third, &host_again, &room.host]).await;
}

#[tokio::test]
async fn test_refused_join_keeps_the_invite_use() {
    let room = TestRoom::open("invite-kept").await.unwrap();
    let invite = room.host.create_invite(Some(1), None).await.unwrap();
    room.host.update_room_locked(true).await.unwrap();

    let options = || JoinOptions::new(test_user("guest"), "Guest").with_invite(invite.code.clone());
    let refused = room.join_with("guest-locked", options()).await;
    assert!(matches!(refused, Err(SessionError::Locked)));

    room.host.update_room_locked(false).await.unwrap();
    let guest = room.join_with("guest", options()).await.unwrap();
    assert_eq!(guest.snapshot().approval, ParticipantStatus::Pending);

    // That was the only use
    let other = room
        .join_with(
            "other",
            JoinOptions::new(test_user("other"), "Other").with_invite(invite.code),
        )
        .await;
    assert!(matches!(other, Err(SessionError::AccessDenied(_))));

    leave_all(&[&guest, &room.host]).await;
}

#[tokio::test]
async fn test_password_room_requires_the_password() {
    let password = SecretString::new("correcthorse1".to_string());
    let room = TestRoom::open_with(
        "scenario-b",
        HostOptions {
            password: Some(SecretString::new(password.expose_secret().clone())),
            ..HostOptions::default()
        },
    )
    .await
    .unwrap();
    assert!(matches!(room.link.secret, LinkSecret::Proof(_)));

    let no_password = room.join("nopass").await;
    assert!(matches!(no_password, Err(SessionError::AccessDenied(_))));

    let wrong = room
        .join_with(
            "wrong",
            JoinOptions::new(test_user("wrong"), "wrong").with_password(SecretString::new("batterystaple".to_string())),
        )
        .await;
    assert!(matches!(wrong, Err(SessionError::AccessDenied(_))));

    // A link without the proof fragment still works with the password
    let bare = JoinLink::new(room.link.base.clone(), room.room_id.clone(), LinkSecret::None);
    let guest = room
        .join_link(
            "right",
            &bare,
            JoinOptions::new(test_user("right"), "right").with_password(password),
        )
        .await
        .unwrap();

    room.host.set_text("shared under a password").await.unwrap();
    guest
        .wait_for_timeout(SETTLE_TIMEOUT, |s| s.text == "shared under a password")
        .await
        .unwrap();

    leave_all(&[&guest, &room.host]).await;
}

#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Proof checks answer yes/no; nothing logged at any level carries the
/// password or the derived key
#[tokio::test]
async fn test_proof_checks_never_disclose_secrets() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let password = "correcthorse1";
    let room = TestRoom::open_with(
        "non-disclosure",
        HostOptions {
            password: Some(SecretString::new(password.to_string())),
            ..HostOptions::default()
        },
    )
    .await
    .unwrap();

    let record = room.relay.get_room(&room.room_id).await.unwrap();
    let salt = record.password_salt.clone().unwrap();
    let secret = SecretString::new(password.to_string());
    let key = derive_key(&secret, &salt, &room.config.crypto.kdf).unwrap();

    let good = AccessProof::compute(&room.room_id, &secret, &salt);
    let bad = AccessProof::compute(&room.room_id, &SecretString::new("guess".to_string()), &salt);
    assert!(room.relay.verify_proof(&room.room_id, &good).await.unwrap());
    assert!(!room.relay.verify_proof(&room.room_id, &bad).await.unwrap());

    let guest = room
        .join_with(
            "guest",
            JoinOptions::new(test_user("guest"), "guest").with_password(SecretString::new(password.to_string())),
        )
        .await
        .unwrap();
    let _ = room
        .join_with(
            "intruder",
            JoinOptions::new(test_user("intruder"), "intruder").with_password(SecretString::new("guess".to_string())),
        )
        .await;
    leave_all(&[&guest, &room.host]).await;

    let output = logs.contents();
    assert!(!output.is_empty());
    assert!(!output.contains(password));
    assert!(!output.contains(&hex::encode(key.as_bytes())));
    assert!(!output.contains(&key.to_fragment()));
    assert!(!format!("{:?}", key).contains(&hex::encode(key.as_bytes())));
}
