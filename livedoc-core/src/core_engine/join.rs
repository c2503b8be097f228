/*
    join.rs - Entry points: host a room, join a room

    Hosting:
      validate config -> pick key (random, or derived from the password)
      -> create room record -> claim the host seat -> start session

    Joining:
      read room record -> establish the key (link fragment, or password +
      proof check) -> refuse banned users -> redeem invite -> claim seat
      -> start session (pending guests start without a mesh)

    The key never leaves this process. In password mode the relay stores
    only the salt and the proof.
*/

use super::handle::SessionHandle;
use super::session::{start_session, SessionParams};
use crate::config::Config;
use crate::core_crypto::{
    derive_key, generate_key, generate_salt, AccessProof, JoinLink, KdfParams, LinkSecret, RoomKey,
};
use crate::core_model::{PeerId, RoomId, Timestamp, UserId};
use crate::core_relay::{SeatClaim, SharedRelay};
use crate::core_session::{
    ParticipantStatus, RoomPhase, RoomRecord, SessionError, SessionResult, MAX_PEERS, MIN_PEERS,
};
use crate::core_transport::LinkDriver;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_LINK_BASE: &str = "https://livedoc.local";

/// Run the password KDF off the async workers
pub(crate) async fn derive_key_blocking(
    password: &SecretString,
    salt: &str,
    params: KdfParams,
) -> SessionResult<RoomKey> {
    let password = SecretString::new(password.expose_secret().clone());
    let salt = salt.to_string();
    tokio::task::spawn_blocking(move || derive_key(&password, &salt, &params))
        .await
        .map_err(|e| SessionError::InvalidInput(format!("key derivation task failed: {}", e)))?
        .map_err(SessionError::from)
}

pub struct HostOptions {
    /// Requested capacity; clamped to 2..=8
    pub max_peers: u8,
    /// Password mode when set; otherwise the key travels in the link
    pub password: Option<SecretString>,
    /// Guests need an invite code to claim a seat
    pub invite_only: bool,
    pub expires_in: Option<Duration>,
    pub link_base: String,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            max_peers: MAX_PEERS,
            password: None,
            invite_only: false,
            expires_in: None,
            link_base: DEFAULT_LINK_BASE.to_string(),
        }
    }
}

/// A freshly hosted room and the link to hand out
pub struct HostedRoom {
    pub handle: SessionHandle,
    pub link: JoinLink,
}

pub struct JoinOptions {
    pub user_id: UserId,
    pub display_name: String,
    /// Required for password rooms
    pub password: Option<SecretString>,
    pub invite_code: Option<String>,
}

impl JoinOptions {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
            password: None,
            invite_code: None,
        }
    }

    pub fn with_password(mut self, password: SecretString) -> Self {
        self.password = Some(password);
        self
    }

    pub fn with_invite(mut self, code: impl Into<String>) -> Self {
        self.invite_code = Some(code.into());
        self
    }
}

fn check_display_name(name: &str) -> SessionResult<()> {
    if name.trim().is_empty() {
        return Err(SessionError::InvalidInput("display name must not be empty".to_string()));
    }
    Ok(())
}

/// Create (or reconfigure) `room_id` with `user_id` as host and start the
/// host's session
pub async fn host_room(
    relay: SharedRelay,
    driver: Arc<dyn LinkDriver>,
    config: Config,
    room_id: RoomId,
    user_id: UserId,
    display_name: impl Into<String>,
    options: HostOptions,
) -> SessionResult<HostedRoom> {
    let display_name = display_name.into();
    config.validate()?;
    check_display_name(&display_name)?;
    if !room_id.is_valid() {
        return Err(SessionError::InvalidInput(format!("invalid room id '{}'", room_id)));
    }

    let max_peers = options.max_peers.clamp(MIN_PEERS, MAX_PEERS);
    let mut record = RoomRecord::new(room_id.clone(), user_id.clone(), max_peers)
        .with_invite_only(options.invite_only);
    if let Some(expires_in) = options.expires_in {
        record = record.with_expiry(Timestamp::now().after(expires_in));
    }

    let (key, secret) = match &options.password {
        Some(password) => {
            let salt = generate_salt();
            let proof = AccessProof::compute(&room_id, password, &salt);
            let key = derive_key_blocking(password, &salt, config.crypto.kdf).await?;
            record = record.with_password(salt, proof.clone());
            (key, LinkSecret::Proof(proof))
        }
        None => {
            let key = generate_key();
            (key.clone(), LinkSecret::Key(key))
        }
    };

    let link = JoinLink::new(options.link_base.clone(), room_id.clone(), secret)
        .with_max_peers_hint(record.effective_max_peers());
    // Reject an unusable base before anything is created
    link.to_url()?;

    relay.upsert_room(&user_id, record).await?;

    let peer_id = PeerId::generate();
    let seat = relay
        .claim_seat(
            &room_id,
            SeatClaim {
                user_id: user_id.clone(),
                peer_id: peer_id.clone(),
                display_name: display_name.clone(),
                proof: link.proof().cloned(),
                invite_code: None,
            },
        )
        .await?;

    let room = relay.get_room(&room_id).await?;
    let participants = relay.list_participants(&room_id).await?;
    let grants = relay.get_grants(&room_id).await?;

    info!(
        room_id = %room_id,
        max_peers = room.effective_max_peers(),
        password = room.is_password_protected(),
        invite_only = room.invite_only,
        "Hosting room"
    );

    let handle = start_session(SessionParams {
        relay,
        driver,
        config,
        room,
        participants,
        grants,
        user_id,
        peer_id,
        display_name,
        approval: seat.status,
        key,
        password: options.password,
        link_base: options.link_base,
    })
    .await?;

    Ok(HostedRoom { handle, link })
}

/// Join the room `link` points at
pub async fn join_room(
    relay: SharedRelay,
    driver: Arc<dyn LinkDriver>,
    config: Config,
    link: &JoinLink,
    options: JoinOptions,
) -> SessionResult<SessionHandle> {
    config.validate()?;
    check_display_name(&options.display_name)?;
    let room_id = link.room_id.clone();

    let room = relay.get_room(&room_id).await?;
    if room.phase(Timestamp::now()) == RoomPhase::Ended {
        return Err(SessionError::RoomEnded);
    }

    let (key, proof) = if room.is_password_protected() {
        let password = options
            .password
            .as_ref()
            .ok_or_else(|| SessionError::AccessDenied("room requires a password".to_string()))?;
        let salt = room
            .password_salt
            .clone()
            .ok_or_else(|| SessionError::AccessDenied("room has no password salt".to_string()))?;
        let proof = AccessProof::compute(&room_id, password, &salt);
        if link.proof().is_some_and(|expected| !expected.matches(&proof)) {
            warn!(room_id = %room_id, "Password does not match the link");
            return Err(SessionError::AccessDenied("wrong password".to_string()));
        }
        if !relay.verify_proof(&room_id, &proof).await? {
            warn!(room_id = %room_id, "Access proof rejected");
            return Err(SessionError::AccessDenied("wrong password".to_string()));
        }
        let key = derive_key_blocking(password, &salt, config.crypto.kdf).await?;
        (key, Some(proof))
    } else {
        let key = link
            .key()
            .cloned()
            .ok_or_else(|| SessionError::AccessDenied("link carries no room key".to_string()))?;
        (key, None)
    };

    if let Some(existing) = relay.get_participant(&room_id, &options.user_id).await? {
        if existing.status == ParticipantStatus::Banned {
            return Err(SessionError::AccessDenied("banned from this room".to_string()));
        }
    }

    let peer_id = PeerId::generate();
    let seat = relay
        .claim_seat(
            &room_id,
            SeatClaim {
                user_id: options.user_id.clone(),
                peer_id: peer_id.clone(),
                display_name: options.display_name.clone(),
                proof,
                invite_code: options.invite_code.clone(),
            },
        )
        .await?;

    let room = relay.get_room(&room_id).await?;
    let participants = relay.list_participants(&room_id).await?;
    let grants = relay.get_grants(&room_id).await?;

    info!(
        room_id = %room_id,
        peer_id = %peer_id,
        status = %seat.status,
        "Joined room"
    );

    start_session(SessionParams {
        relay,
        driver,
        config,
        room,
        participants,
        grants,
        user_id: options.user_id,
        peer_id,
        display_name: options.display_name,
        approval: seat.status,
        key,
        password: None,
        link_base: link.base.clone(),
    })
    .await
}
