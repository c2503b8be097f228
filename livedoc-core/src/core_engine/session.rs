/*
    session.rs - The per-room session task

    One task owns everything mutable about a participant's view of a room:
    the document replica, the peer pool, the signaling coordinator, the
    presence hub and the cached relay records. Nothing else writes to them.

    ┌──────────────┐  commands   ┌────────────────────────────────────────┐
    │ SessionHandle│────────────►│              SessionActor              │
    └──────────────┘             │                                        │
           ▲                     │  doc ── pool ── coordinator ── presence│
           │ watch               │                                        │
           └─────────────────────│  select! over:                         │
                                 │   • commands (mpsc + oneshot reply)    │
                                 │   • link events (frames, closes)       │
                                 │   • internal events (dials, polls,     │
                                 │     timers, accepted links)            │
                                 │   • signaling broadcast                │
                                 └────────────────────────────────────────┘

    Link lifecycle:
      accept/dial -> send Hello -> first inbound frame must be Hello
      -> attach to pool -> exchange DocState when the sender is approved.
      A lost link is retried with backoff by the offering side only; a
      link closed on purpose (bye, kick, end) is never retried.

    Apply gates (per frame, against the last-known relay records):
      DocUpdate            approved sender with edit permission
      DocState/SyncRequest approved sender
      Chat                 approved sender with chat permission
      Presence             approved sender
      Control              the host only
*/

use super::command::{Reply, SessionCommand};
use super::frame::{ControlFrame, Frame, PresenceFrame};
use super::handle::SessionHandle;
use super::join::derive_key_blocking;
use super::scheduler::ScheduledTask;
use super::state::SessionSnapshot;
use crate::config::Config;
use crate::core_crypto::{generate_key, generate_salt, AccessProof, Envelope, JoinLink, LinkSecret, RoomKey};
use crate::core_doc::{DocSnapshot, DocUpdate, TextDocument};
use crate::core_model::{PeerId, RoomId, Timestamp, UserId};
use crate::core_presence::{ChatMessage, PresenceHub};
use crate::core_relay::{RelayError, RelayResult, SharedRelay};
use crate::core_session::{
    access, allowed_actions, Action, AllowedActions, ParticipantRecord, ParticipantStatus,
    PermissionGrant, RoomInvite, RoomPhase, RoomRecord, SessionError, SessionResult,
};
use crate::core_signal::{SignalAction, SignalChannel, SignalMessage, SignalingCoordinator};
use crate::core_transport::link::LINK_BUFFER;
use crate::core_transport::{
    spawn_link_reader, Candidate, LinkDriver, LinkEvent, LinkId, PeerPool, RawLink,
    TransportError, TransportResult,
};
use secrecy::SecretString;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Internal events queued per session
const INTERNAL_BUFFER: usize = 64;

/// Everything a session starts from: relay records fetched during the
/// join, the room key, and the local identity
pub(crate) struct SessionParams {
    pub relay: SharedRelay,
    pub driver: Arc<dyn LinkDriver>,
    pub config: Config,
    pub room: RoomRecord,
    pub participants: Vec<ParticipantRecord>,
    pub grants: Vec<PermissionGrant>,
    pub user_id: UserId,
    pub peer_id: PeerId,
    pub display_name: String,
    pub approval: ParticipantStatus,
    pub key: RoomKey,
    /// Kept by a password-mode host so the key can be rotated
    pub password: Option<SecretString>,
    pub link_base: String,
}

struct RoomState {
    room: RoomRecord,
    participants: Vec<ParticipantRecord>,
    grants: Vec<PermissionGrant>,
}

async fn fetch_room_state(relay: &SharedRelay, room_id: &RoomId) -> RelayResult<RoomState> {
    let room = relay.get_room(room_id).await?;
    let participants = relay.list_participants(room_id).await?;
    let grants = relay.get_grants(room_id).await?;
    Ok(RoomState {
        room,
        participants,
        grants,
    })
}

enum Internal {
    Accepted(RawLink),
    Dialed {
        peer_id: PeerId,
        result: TransportResult<RawLink>,
    },
    HandshakeDeadline(LinkId),
    Retry(PeerId),
    RoomState(RelayResult<RoomState>),
    OwnStatus(ParticipantRecord),
    Queue(Vec<ParticipantRecord>),
    PresenceTick,
    Heartbeat,
}

/// A link that has not presented its Hello yet
struct PendingLink {
    outbound: mpsc::Sender<Vec<u8>>,
    local: Candidate,
    remote: Candidate,
    reader_cancel: CancellationToken,
    /// Peer we dialed, if we dialed
    expected: Option<PeerId>,
}

struct Inbox {
    commands: mpsc::Receiver<SessionCommand>,
    links: mpsc::Receiver<LinkEvent>,
    internal: mpsc::Receiver<Internal>,
    signals: Option<broadcast::Receiver<String>>,
}

async fn next_signal(signals: &mut Option<broadcast::Receiver<String>>) -> Result<String, RecvError> {
    match signals {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

struct SessionActor {
    relay: SharedRelay,
    driver: Arc<dyn LinkDriver>,
    config: Config,
    signal_channel: SignalChannel,

    room_id: RoomId,
    user_id: UserId,
    local_peer: PeerId,
    display_name: String,
    link_base: String,
    password: Option<SecretString>,
    envelope: Envelope,

    doc: TextDocument,
    pool: PeerPool,
    coordinator: SignalingCoordinator,
    presence: PresenceHub,

    room: RoomRecord,
    participants: Vec<ParticipantRecord>,
    grants: Vec<PermissionGrant>,
    approval: ParticipantStatus,

    /// Identity each connected peer presented in its Hello
    peer_users: HashMap<PeerId, UserId>,
    /// Connected peers whose frames were dropped because our records did
    /// not show them approved yet
    unverified: HashSet<PeerId>,
    pending_links: HashMap<LinkId, PendingLink>,
    next_link_id: u64,
    retry_pending: HashSet<PeerId>,
    refresh_in_flight: bool,

    decrypt_failures: u32,
    desynchronized: bool,
    kicked: bool,
    ended: bool,
    key_rotated: bool,
    mesh_active: bool,
    closed: bool,

    cancel: CancellationToken,
    tasks: Vec<ScheduledTask>,
    link_tx: mpsc::Sender<LinkEvent>,
    internal_tx: mpsc::Sender<Internal>,
    signal_tx: mpsc::UnboundedSender<SignalMessage>,
    state_tx: watch::Sender<SessionSnapshot>,
}

/// Subscribe to signaling, spawn the session task and return its handle
pub(crate) async fn start_session(params: SessionParams) -> SessionResult<SessionHandle> {
    let SessionParams {
        relay,
        driver,
        config,
        room,
        participants,
        grants,
        user_id,
        peer_id,
        display_name,
        approval,
        key,
        password,
        link_base,
    } = params;

    let room_id = room.id.clone();
    let signal_channel = SignalChannel::new(relay.clone(), room_id.clone());
    let signals = signal_channel.subscribe().await?;

    let (command_tx, command_rx) = mpsc::channel(config.session.command_buffer);
    let (link_tx, link_rx) = mpsc::channel(LINK_BUFFER);
    let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_BUFFER);
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    spawn_signal_publisher(signal_channel.clone(), signal_rx, cancel.clone());
    spawn_accept_loop(driver.clone(), internal_tx.clone(), cancel.clone());

    let envelope = Envelope::new(&room_id, &key);
    let placeholder = SessionSnapshot {
        room_id: room_id.clone(),
        local_peer_id: peer_id.clone(),
        local_user_id: user_id.clone(),
        display_name: display_name.clone(),
        text: String::new(),
        participants: Vec::new(),
        pending_participants: Vec::new(),
        effective_max_peers: room.effective_max_peers(),
        is_room_full: false,
        room_locked: room.locked,
        blocked_by_lock: false,
        kicked: false,
        ended: false,
        is_host: room.is_host(&user_id),
        approval,
        connected_peer_ids: Vec::new(),
        presence_peer_ids: Vec::new(),
        typing_peer_ids: Vec::new(),
        remote_cursors: Vec::new(),
        chat_messages: Vec::new(),
        allowed_actions: AllowedActions::none(),
        is_within_capacity: true,
        desynchronized: false,
        key_rotated: false,
    };
    let (state_tx, state_rx) = watch::channel(placeholder);

    let mut actor = SessionActor {
        doc: TextDocument::new(peer_id.clone()),
        pool: PeerPool::new(config.transport.max_frame_size),
        coordinator: SignalingCoordinator::new(room_id.clone(), peer_id.clone(), display_name.clone()),
        presence: PresenceHub::new(peer_id.clone(), display_name.clone(), &config.presence),
        relay,
        driver,
        config,
        signal_channel,
        room_id,
        user_id,
        local_peer: peer_id,
        display_name,
        link_base,
        password,
        envelope,
        room,
        participants,
        grants,
        approval,
        peer_users: HashMap::new(),
        unverified: HashSet::new(),
        pending_links: HashMap::new(),
        next_link_id: 1,
        retry_pending: HashSet::new(),
        refresh_in_flight: false,
        decrypt_failures: 0,
        desynchronized: false,
        kicked: false,
        ended: false,
        key_rotated: false,
        mesh_active: false,
        closed: false,
        cancel,
        tasks: Vec::new(),
        link_tx,
        internal_tx,
        signal_tx,
        state_tx,
    };

    actor.start_timers();
    if actor.approval == ParticipantStatus::Approved {
        actor.activate_mesh();
    }
    actor.publish_state();

    info!(
        room_id = %actor.room_id,
        peer_id = %actor.local_peer,
        host = actor.is_host(),
        approval = %actor.approval,
        "Session started"
    );

    let inbox = Inbox {
        commands: command_rx,
        links: link_rx,
        internal: internal_rx,
        signals: Some(signals),
    };
    tokio::spawn(actor.run(inbox));

    Ok(SessionHandle::new(command_tx, state_rx))
}

fn spawn_signal_publisher(
    channel: SignalChannel,
    mut rx: mpsc::UnboundedReceiver<SignalMessage>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                _ = cancel.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };
            if let Err(e) = channel.publish(&msg).await {
                debug!(kind = msg.payload.kind(), error = %e, "Signal publish failed");
            }
        }
    });
}

fn spawn_accept_loop(driver: Arc<dyn LinkDriver>, tx: mpsc::Sender<Internal>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = driver.accept() => accepted,
            };
            match accepted {
                Ok(link) => {
                    if tx.send(Internal::Accepted(link)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!(error = %e, "Link driver stopped accepting");
                    break;
                }
            }
        }
    });
}

fn respond<T>(name: &'static str, reply: Reply<T>, result: SessionResult<T>) {
    if let Err(e) = &result {
        debug!(command = name, error = %e, "Command failed");
    }
    let _ = reply.send(result);
}

impl SessionActor {
    async fn run(mut self, mut inbox: Inbox) {
        loop {
            tokio::select! {
                command = inbox.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    // Every handle is gone
                    None => self.leave().await,
                },
                Some(event) = inbox.links.recv() => self.handle_link_event(event),
                Some(event) = inbox.internal.recv() => self.handle_internal(event),
                signal = next_signal(&mut inbox.signals) => match signal {
                    Ok(raw) => self.on_signal(&raw),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(room_id = %self.room_id, skipped, "Signaling stream lagged");
                        if self.mesh_active {
                            let announce = self.coordinator.announce();
                            self.publish_signal(announce);
                        }
                    }
                    Err(RecvError::Closed) => {
                        debug!(room_id = %self.room_id, "Signaling stream closed");
                        inbox.signals = None;
                        self.refresh_now();
                    }
                },
            }

            self.publish_state();
            if self.closed {
                break;
            }
        }
        debug!(room_id = %self.room_id, peer_id = %self.local_peer, "Session task stopped");
    }

    fn is_host(&self) -> bool {
        self.room.is_host(&self.user_id)
    }

    // ---------------------------------------------------------------------
    // Timers and background work
    // ---------------------------------------------------------------------

    fn start_timers(&mut self) {
        let session = &self.config.session;
        let presence = &self.config.presence;

        let relay = self.relay.clone();
        let room_id = self.room_id.clone();
        let tx = self.internal_tx.clone();
        self.tasks.push(ScheduledTask::spawn(
            "room_poll",
            session.room_poll_interval,
            &self.cancel,
            move || {
                let relay = relay.clone();
                let room_id = room_id.clone();
                let tx = tx.clone();
                async move {
                    let result = fetch_room_state(&relay, &room_id).await;
                    tx.send(Internal::RoomState(result)).await.is_ok()
                }
            },
        ));

        if self.approval == ParticipantStatus::Pending {
            let relay = self.relay.clone();
            let room_id = self.room_id.clone();
            let user_id = self.user_id.clone();
            let tx = self.internal_tx.clone();
            self.tasks.push(ScheduledTask::spawn(
                "approval_poll",
                session.approval_poll_interval,
                &self.cancel,
                move || {
                    let relay = relay.clone();
                    let room_id = room_id.clone();
                    let user_id = user_id.clone();
                    let tx = tx.clone();
                    async move {
                        match relay.get_participant(&room_id, &user_id).await {
                            Ok(Some(record)) if record.status != ParticipantStatus::Pending => {
                                let _ = tx.send(Internal::OwnStatus(record)).await;
                                false
                            }
                            Ok(_) => true,
                            Err(e @ (RelayError::RoomEnded | RelayError::RoomNotFound(_))) => {
                                let _ = tx.send(Internal::RoomState(Err(e))).await;
                                false
                            }
                            Err(e) => {
                                debug!(error = %e, "Approval poll failed");
                                true
                            }
                        }
                    }
                },
            ));
        }

        if self.is_host() {
            let relay = self.relay.clone();
            let room_id = self.room_id.clone();
            let tx = self.internal_tx.clone();
            self.tasks.push(ScheduledTask::spawn(
                "queue_poll",
                session.queue_poll_interval,
                &self.cancel,
                move || {
                    let relay = relay.clone();
                    let room_id = room_id.clone();
                    let tx = tx.clone();
                    async move {
                        match relay.list_participants(&room_id).await {
                            Ok(list) => tx.send(Internal::Queue(list)).await.is_ok(),
                            Err(e) => {
                                debug!(error = %e, "Queue poll failed");
                                true
                            }
                        }
                    }
                },
            ));
        }

        let tx = self.internal_tx.clone();
        self.tasks.push(ScheduledTask::spawn(
            "presence_tick",
            presence.tick_interval,
            &self.cancel,
            move || {
                let tx = tx.clone();
                async move { tx.send(Internal::PresenceTick).await.is_ok() }
            },
        ));

        let tx = self.internal_tx.clone();
        self.tasks.push(ScheduledTask::spawn(
            "heartbeat",
            presence.heartbeat_interval,
            &self.cancel,
            move || {
                let tx = tx.clone();
                async move { tx.send(Internal::Heartbeat).await.is_ok() }
            },
        ));
    }

    /// Fetch room, participants and grants now instead of at the next poll
    fn refresh_now(&mut self) {
        if self.refresh_in_flight || self.closed {
            return;
        }
        self.refresh_in_flight = true;
        let relay = self.relay.clone();
        let room_id = self.room_id.clone();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let result = fetch_room_state(&relay, &room_id).await;
            let _ = tx.send(Internal::RoomState(result)).await;
        });
    }

    fn publish_signal(&self, msg: SignalMessage) {
        if self.signal_tx.send(msg).is_err() {
            debug!("Signal publisher stopped");
        }
    }

    fn publish_state(&self) {
        let next = self.build_snapshot();
        self.state_tx.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
    }

    fn build_snapshot(&self) -> SessionSnapshot {
        let now = Timestamp::now();
        let is_host = self.is_host();
        let approved = self.approval == ParticipantStatus::Approved;
        let connected_peer_ids = self.pool.connected_peers();
        let effective_max_peers = self.room.effective_max_peers();

        let participants = self
            .participants
            .iter()
            .filter(|p| {
                p.is_host() || p.holds_seat() || (p.status == ParticipantStatus::Pending && p.online)
            })
            .cloned()
            .collect();
        let pending_participants = if is_host {
            self.participants
                .iter()
                .filter(|p| p.status == ParticipantStatus::Pending && p.online)
                .cloned()
                .collect()
        } else {
            Vec::new()
        };
        let allowed = if approved && !self.closed {
            allowed_actions(&self.grants, &self.user_id, is_host, now)
        } else {
            AllowedActions::none()
        };

        SessionSnapshot {
            room_id: self.room_id.clone(),
            local_peer_id: self.local_peer.clone(),
            local_user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            text: self.doc.text().to_string(),
            participants,
            pending_participants,
            effective_max_peers,
            is_room_full: access::is_full(&self.room, &self.participants),
            room_locked: self.room.locked,
            blocked_by_lock: self.room.locked && !is_host && !approved,
            kicked: self.kicked,
            ended: self.ended,
            is_host,
            approval: self.approval,
            is_within_capacity: connected_peer_ids.len() < effective_max_peers as usize,
            connected_peer_ids,
            presence_peer_ids: self.presence.presence_peer_ids(),
            typing_peer_ids: self.presence.typing_peer_ids(),
            remote_cursors: self.presence.remote_cursors(),
            chat_messages: self.presence.chat_messages(),
            allowed_actions: allowed,
            desynchronized: self.desynchronized,
            key_rotated: self.key_rotated,
        }
    }

    // ---------------------------------------------------------------------
    // Mesh and links
    // ---------------------------------------------------------------------

    fn activate_mesh(&mut self) {
        if self.mesh_active || self.closed {
            return;
        }
        self.mesh_active = true;
        let announce = self.coordinator.announce();
        self.publish_signal(announce);
        debug!(room_id = %self.room_id, peer_id = %self.local_peer, "Mesh active");
    }

    /// Drop every link and forget every negotiation; signaling stays on
    fn reset_mesh(&mut self) {
        self.pool.close_all();
        for (_, pending) in self.pending_links.drain() {
            pending.reader_cancel.cancel();
        }
        self.peer_users.clear();
        self.unverified.clear();
        self.retry_pending.clear();
        self.presence.clear_remote();
        self.coordinator = SignalingCoordinator::new(
            self.room_id.clone(),
            self.local_peer.clone(),
            self.display_name.clone(),
        );
    }

    fn on_signal(&mut self, raw: &str) {
        if !self.mesh_active {
            return;
        }
        let candidates = self.driver.local_candidates();
        for action in self.coordinator.handle_raw(raw, &candidates) {
            match action {
                SignalAction::Publish(msg) => self.publish_signal(msg),
                SignalAction::Dial { peer_id, candidate } => self.dial(peer_id, candidate),
                SignalAction::PeerLeft(peer_id) => {
                    self.on_peer_left(&peer_id, "signaled bye");
                    self.refresh_now();
                }
            }
        }
    }

    fn dial(&mut self, peer_id: PeerId, candidate: Candidate) {
        if self.pool.is_connected(&peer_id) {
            trace!(peer_id = %peer_id, "Already connected; not dialing");
            return;
        }
        self.pool.mark_connecting(&peer_id);
        debug!(peer_id = %peer_id, kind = %candidate.kind, "Dialing peer");

        let driver = self.driver.clone();
        let tx = self.internal_tx.clone();
        let cancel = self.cancel.clone();
        let timeout = self.config.transport.connect_timeout;
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = tokio::time::timeout(timeout, driver.dial(&candidate)) => {
                    result.unwrap_or_else(|_| {
                        Err(TransportError::Unreachable(format!("dial to {} timed out", candidate.address)))
                    })
                }
            };
            let _ = tx.send(Internal::Dialed { peer_id, result }).await;
        });
    }

    /// Start reading a fresh link and send our Hello on it
    fn register_link(&mut self, link: RawLink, expected: Option<PeerId>) {
        if self.closed || !self.mesh_active {
            trace!("Refusing link while the mesh is inactive");
            return;
        }
        let link_id = LinkId(self.next_link_id);
        self.next_link_id += 1;

        let RawLink {
            local,
            remote,
            outbound,
            inbound,
        } = link;

        let hello = Frame::Hello {
            peer_id: self.local_peer.clone(),
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
        };
        let sealed = match hello.seal(&self.envelope) {
            Ok(sealed) => sealed,
            Err(e) => {
                warn!(error = %e, "Failed to seal Hello");
                return;
            }
        };
        if outbound.try_send(sealed).is_err() {
            debug!(%link_id, "Link closed before Hello");
            return;
        }

        let reader_cancel = self.cancel.child_token();
        spawn_link_reader(link_id, inbound, self.link_tx.clone(), reader_cancel.clone());
        self.pending_links.insert(
            link_id,
            PendingLink {
                outbound,
                local,
                remote,
                reader_cancel,
                expected,
            },
        );

        let tx = self.internal_tx.clone();
        let cancel = self.cancel.clone();
        let deadline = self.config.session.handshake_timeout;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    let _ = tx.send(Internal::HandshakeDeadline(link_id)).await;
                }
            }
        });
        trace!(%link_id, "Link registered; awaiting Hello");
    }

    fn drop_pending(&mut self, link_id: LinkId) {
        if let Some(pending) = self.pending_links.remove(&link_id) {
            pending.reader_cancel.cancel();
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Frame { link_id, bytes } => {
                if self.pending_links.contains_key(&link_id) {
                    self.on_handshake_frame(link_id, &bytes);
                } else {
                    self.on_frame(link_id, &bytes);
                }
            }
            LinkEvent::Closed { link_id } => {
                if self.pending_links.remove(&link_id).is_some() {
                    trace!(%link_id, "Link closed during handshake");
                    return;
                }
                if let Some(peer_id) = self.pool.link_lost(link_id, "link closed") {
                    info!(peer_id = %peer_id, "Peer link lost");
                    self.presence.forget_peer(&peer_id);
                    self.schedule_retry(peer_id);
                }
            }
        }
    }

    fn on_handshake_frame(&mut self, link_id: LinkId, bytes: &[u8]) {
        let Some(pending) = self.pending_links.remove(&link_id) else {
            return;
        };

        let (peer_id, user_id, display_name) = match Frame::open(&self.envelope, bytes) {
            Ok(Frame::Hello {
                peer_id,
                user_id,
                display_name,
            }) => (peer_id, user_id, display_name),
            Ok(other) => {
                warn!(%link_id, kind = other.kind(), "First frame on link was not Hello");
                pending.reader_cancel.cancel();
                return;
            }
            Err(e) => {
                warn!(%link_id, error = %e, "Dropping link that failed its handshake");
                self.note_frame_failure(&e);
                pending.reader_cancel.cancel();
                return;
            }
        };
        self.note_frame_ok();

        if peer_id == self.local_peer || peer_id.is_empty() {
            warn!(%link_id, "Dropping link with an invalid peer id");
            pending.reader_cancel.cancel();
            return;
        }
        if pending.expected.as_ref().is_some_and(|expected| expected != &peer_id) {
            warn!(%link_id, peer_id = %peer_id, "Dialed peer answered with another identity");
            pending.reader_cancel.cancel();
            return;
        }
        if self.is_removed_user(&user_id) {
            info!(peer_id = %peer_id, user_id = %user_id, "Refusing link from a removed participant");
            pending.reader_cancel.cancel();
            return;
        }

        self.pool.attach(
            peer_id.clone(),
            link_id,
            pending.outbound,
            pending.local,
            pending.remote,
            pending.reader_cancel,
        );
        self.pool.record_received(&peer_id);
        self.coordinator.mark_connected(&peer_id);
        self.peer_users.insert(peer_id.clone(), user_id);
        self.presence.on_heartbeat(&peer_id, &display_name, Instant::now());
        info!(peer_id = %peer_id, display_name = %display_name, "Peer connected");

        if self.sender_approved(&peer_id) {
            let state = self.doc.export_state();
            self.send_to(&peer_id, &Frame::DocState(state));
        } else {
            self.unverified.insert(peer_id);
            self.refresh_now();
        }
    }

    fn schedule_retry(&mut self, peer_id: PeerId) {
        if self.closed || !self.mesh_active {
            return;
        }
        if !self.coordinator.is_offerer_for(&peer_id) {
            // The other side offers again
            self.coordinator.forget(&peer_id);
            return;
        }
        if self.retry_pending.contains(&peer_id) {
            return;
        }

        let backoff = self.config.transport.backoff;
        let attempt = self.pool.note_reconnect_attempt(&peer_id);
        if backoff.exhausted(attempt) {
            warn!(peer_id = %peer_id, attempt, "Giving up on peer");
            self.pool.mark_failed(&peer_id, "reconnect attempts exhausted");
            self.coordinator.forget(&peer_id);
            return;
        }

        let delay = backoff.delay_for_attempt(attempt);
        debug!(peer_id = %peer_id, attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");
        self.retry_pending.insert(peer_id.clone());
        let tx = self.internal_tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Internal::Retry(peer_id)).await;
                }
            }
        });
    }

    fn retry(&mut self, peer_id: PeerId) {
        self.retry_pending.remove(&peer_id);
        if self.closed || !self.mesh_active || !self.pool.should_retry(&peer_id) {
            return;
        }
        self.pool.mark_connecting(&peer_id);
        if let Some(offer) = self.coordinator.restart(&peer_id) {
            self.publish_signal(offer);
        }
        // Keep going until the link is back; an unanswered offer produces
        // no dial failure of its own
        self.schedule_retry(peer_id);
    }

    fn on_peer_left(&mut self, peer_id: &PeerId, reason: &str) {
        debug!(peer_id = %peer_id, reason, "Peer left");
        self.pool.close(peer_id);
        self.presence.forget_peer(peer_id);
        self.coordinator.forget(peer_id);
        self.peer_users.remove(peer_id);
        self.unverified.remove(peer_id);
        self.retry_pending.remove(peer_id);
    }

    // ---------------------------------------------------------------------
    // Frames
    // ---------------------------------------------------------------------

    fn send_to(&mut self, peer_id: &PeerId, frame: &Frame) {
        let max = self.config.transport.max_frame_size;
        let chunks = match frame.seal_chunked(&self.envelope, max) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(peer_id = %peer_id, kind = frame.kind(), error = %e, "Failed to seal frame");
                self.pool.record_dropped(peer_id, e.to_string());
                return;
            }
        };
        for chunk in chunks {
            if let Err(e) = self.pool.send(peer_id, chunk) {
                debug!(peer_id = %peer_id, kind = frame.kind(), error = %e, "Frame not sent");
                return;
            }
        }
    }

    /// Send to every connected peer. Returns how many peers accepted every
    /// piece of the frame.
    fn broadcast(&mut self, frame: &Frame) -> usize {
        let peers = self.pool.connected_peers();
        let max = self.config.transport.max_frame_size;
        let chunks = match frame.seal_chunked(&self.envelope, max) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(kind = frame.kind(), error = %e, "Failed to seal frame");
                for peer_id in &peers {
                    self.pool.record_dropped(peer_id, e.to_string());
                }
                return 0;
            }
        };

        let sent = self.pool.broadcast(&chunks);
        trace!(kind = frame.kind(), pieces = chunks.len(), sent, "Broadcast frame");
        sent
    }

    fn note_frame_failure(&mut self, err: &SessionError) {
        match err {
            SessionError::AuthenticationFailed => {
                self.decrypt_failures += 1;
                if self.decrypt_failures >= self.config.session.desync_threshold && !self.desynchronized {
                    warn!(
                        room_id = %self.room_id,
                        failures = self.decrypt_failures,
                        "Frames keep failing to decrypt; session desynchronized"
                    );
                    self.desynchronized = true;
                }
            }
            other => warn!(error = %other, "Dropping undecodable frame"),
        }
    }

    fn note_frame_ok(&mut self) {
        self.decrypt_failures = 0;
        if self.desynchronized {
            info!(room_id = %self.room_id, "Frames decrypt again");
            self.desynchronized = false;
        }
    }

    fn on_frame(&mut self, link_id: LinkId, bytes: &[u8]) {
        let Some(peer_id) = self.pool.peer_for_link(link_id).cloned() else {
            trace!(%link_id, "Frame on a stale link");
            return;
        };
        let frame = match Frame::open(&self.envelope, bytes) {
            Ok(frame) => frame,
            Err(e) => {
                self.note_frame_failure(&e);
                return;
            }
        };
        self.note_frame_ok();
        self.pool.record_received(&peer_id);
        trace!(peer_id = %peer_id, kind = frame.kind(), "Frame received");

        match frame {
            Frame::Hello { .. } => trace!(peer_id = %peer_id, "Repeated Hello ignored"),
            Frame::Bye => self.on_peer_left(&peer_id, "bye"),
            Frame::Control(control) => {
                if self.sender_is_host(&peer_id) {
                    self.on_control(control);
                } else {
                    warn!(peer_id = %peer_id, "Ignoring control frame from a non-host peer");
                }
            }
            other => {
                if !self.admit_sender(&peer_id) {
                    return;
                }
                self.on_content(&peer_id, other);
            }
        }
    }

    fn on_content(&mut self, peer_id: &PeerId, frame: Frame) {
        match frame {
            Frame::DocUpdate(update) => {
                if !self.sender_allows(peer_id, Action::Edit) {
                    debug!(peer_id = %peer_id, "Dropping edit from a peer without edit permission");
                    return;
                }
                if let Err(e) = self.doc.apply_remote(&update) {
                    warn!(peer_id = %peer_id, error = %e, "Rejected document update");
                }
            }
            Frame::DocState(state) => match self.doc.merge_state(&state) {
                Ok(changed) => debug!(peer_id = %peer_id, changed, "Merged peer document state"),
                Err(e) => warn!(peer_id = %peer_id, error = %e, "Rejected document state"),
            },
            Frame::SyncRequest => {
                let state = self.doc.export_state();
                self.send_to(peer_id, &Frame::DocState(state));
            }
            Frame::Presence(presence) => self.on_presence(peer_id, presence),
            Frame::Chat(message) => {
                if !self.sender_allows(peer_id, Action::Chat) {
                    debug!(peer_id = %peer_id, "Dropping chat from a peer without chat permission");
                    return;
                }
                if !self.presence.on_chat(peer_id, message) {
                    trace!(peer_id = %peer_id, "Chat message not appended");
                }
            }
            Frame::Hello { .. } | Frame::Bye | Frame::Control(_) => {}
        }
    }

    fn on_presence(&mut self, peer_id: &PeerId, frame: PresenceFrame) {
        let now = Instant::now();
        match frame {
            PresenceFrame::Heartbeat { display_name } => {
                self.presence.on_heartbeat(peer_id, &display_name, now);
            }
            PresenceFrame::Cursor { x, y, display_name } => {
                self.presence.on_cursor(peer_id, x, y, &display_name, now);
            }
            PresenceFrame::CursorCleared => {
                self.presence.on_cursor_cleared(peer_id);
            }
            PresenceFrame::Typing => {
                self.presence.on_typing(peer_id, now);
            }
        }
    }

    fn on_control(&mut self, control: ControlFrame) {
        match control {
            ControlFrame::RoomLocked { locked } => {
                info!(room_id = %self.room_id, locked, "Host changed room lock");
                self.room.locked = locked;
            }
            ControlFrame::Kicked {
                user_id,
                peer_id,
                banned,
            } => {
                let status = if banned {
                    ParticipantStatus::Banned
                } else {
                    ParticipantStatus::Kicked
                };
                if let Some(record) = self.participants.iter_mut().find(|p| p.user_id == user_id) {
                    record.status = status;
                }
                if user_id == self.user_id {
                    warn!(room_id = %self.room_id, banned, "Removed from the room by the host");
                    self.approval = status;
                    self.kicked = true;
                    self.teardown("removed by host");
                } else {
                    self.on_peer_left(&peer_id, "removed by host");
                }
            }
            ControlFrame::RoomEnded => {
                info!(room_id = %self.room_id, "Host ended the room");
                self.ended = true;
                self.teardown("room ended");
            }
            ControlFrame::PermissionsChanged | ControlFrame::ParticipantsChanged => self.refresh_now(),
            ControlFrame::KeyRotated => {
                warn!(room_id = %self.room_id, "Host rotated the room key; a new join link is needed");
                self.key_rotated = true;
                self.mesh_active = false;
                self.reset_mesh();
            }
        }
    }

    // ---------------------------------------------------------------------
    // Records and gates
    // ---------------------------------------------------------------------

    fn sender_approved(&self, peer_id: &PeerId) -> bool {
        let Some(user_id) = self.peer_users.get(peer_id) else {
            return false;
        };
        self.participants.iter().any(|p| {
            &p.user_id == user_id && &p.peer_id == peer_id && p.status == ParticipantStatus::Approved
        })
    }

    fn sender_is_host(&self, peer_id: &PeerId) -> bool {
        self.sender_approved(peer_id)
            && self
                .peer_users
                .get(peer_id)
                .is_some_and(|user_id| self.room.is_host(user_id))
    }

    fn sender_allows(&self, peer_id: &PeerId, action: Action) -> bool {
        self.peer_users.get(peer_id).is_some_and(|user_id| {
            allowed_actions(&self.grants, user_id, self.room.is_host(user_id), Timestamp::now()).allows(action)
        })
    }

    /// Approved senders pass; anyone else is refetched once
    fn admit_sender(&mut self, peer_id: &PeerId) -> bool {
        if self.sender_approved(peer_id) {
            return true;
        }
        if self.unverified.insert(peer_id.clone()) {
            debug!(peer_id = %peer_id, "Frame from a peer not known as approved; refreshing records");
            self.refresh_now();
        }
        false
    }

    fn is_removed_user(&self, user_id: &UserId) -> bool {
        self.participants.iter().any(|p| {
            &p.user_id == user_id
                && matches!(p.status, ParticipantStatus::Banned | ParticipantStatus::Kicked)
        })
    }

    fn upsert_participant(&mut self, record: ParticipantRecord) {
        match self.participants.iter_mut().find(|p| p.user_id == record.user_id) {
            Some(existing) => *existing = record,
            None => self.participants.push(record),
        }
    }

    fn apply_own_status(&mut self, status: ParticipantStatus) {
        match status {
            ParticipantStatus::Approved if self.approval != ParticipantStatus::Approved => {
                info!(room_id = %self.room_id, "Approved by host");
                self.approval = status;
                self.activate_mesh();
            }
            ParticipantStatus::Kicked | ParticipantStatus::Banned => {
                warn!(room_id = %self.room_id, status = %status, "Removed from the room");
                self.approval = status;
                self.kicked = true;
                self.teardown("removed by host");
            }
            _ => self.approval = status,
        }
    }

    fn on_room_state(&mut self, result: RelayResult<RoomState>) {
        self.refresh_in_flight = false;
        let state = match result {
            Ok(state) => state,
            Err(RelayError::RoomEnded) | Err(RelayError::RoomNotFound(_)) => {
                self.ended = true;
                self.teardown("room ended");
                return;
            }
            Err(e) => {
                debug!(room_id = %self.room_id, error = %e, "Room refresh failed");
                return;
            }
        };

        if state.room.phase(Timestamp::now()) == RoomPhase::Ended {
            self.ended = true;
            self.teardown("room ended or expired");
            return;
        }
        self.room = state.room;
        self.participants = state.participants;
        self.grants = state.grants;

        let own = self
            .participants
            .iter()
            .find(|p| p.user_id == self.user_id)
            .map(|p| p.status);
        if let Some(status) = own {
            self.apply_own_status(status);
        }
        if self.closed {
            return;
        }
        self.enforce_removals();
        self.promote_verified();
    }

    /// Close links to peers whose participant was kicked or banned
    fn enforce_removals(&mut self) {
        let removed: Vec<PeerId> = self
            .peer_users
            .iter()
            .filter(|(_, user_id)| self.is_removed_user(user_id))
            .map(|(peer_id, _)| peer_id.clone())
            .collect();
        for peer_id in removed {
            self.on_peer_left(&peer_id, "participant removed");
        }
    }

    /// Peers whose frames we dropped and who now show as approved get a
    /// full state exchange
    fn promote_verified(&mut self) {
        let ready: Vec<PeerId> = self
            .unverified
            .iter()
            .filter(|peer_id| self.sender_approved(peer_id))
            .cloned()
            .collect();
        for peer_id in ready {
            self.unverified.remove(&peer_id);
            debug!(peer_id = %peer_id, "Peer verified as approved");
            let state = self.doc.export_state();
            self.send_to(&peer_id, &Frame::DocState(state));
            self.send_to(&peer_id, &Frame::SyncRequest);
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Accepted(link) => self.register_link(link, None),
            Internal::Dialed { peer_id, result } => match result {
                Ok(link) => self.register_link(link, Some(peer_id)),
                Err(e) => {
                    debug!(peer_id = %peer_id, error = %e, "Dial failed");
                    self.pool.record_error(&peer_id, e.to_string());
                    self.schedule_retry(peer_id);
                }
            },
            Internal::HandshakeDeadline(link_id) => {
                if self.pending_links.contains_key(&link_id) {
                    debug!(%link_id, "Link sent no Hello in time");
                    self.drop_pending(link_id);
                }
            }
            Internal::Retry(peer_id) => self.retry(peer_id),
            Internal::RoomState(result) => self.on_room_state(result),
            Internal::OwnStatus(record) => {
                let status = record.status;
                self.upsert_participant(record);
                self.apply_own_status(status);
            }
            Internal::Queue(list) => {
                self.participants = list;
                self.enforce_removals();
                self.promote_verified();
            }
            Internal::PresenceTick => {
                let tick = self.presence.tick(Instant::now());
                if let Some((x, y)) = tick.cursor {
                    let frame = Frame::Presence(PresenceFrame::Cursor {
                        x,
                        y,
                        display_name: self.display_name.clone(),
                    });
                    self.broadcast(&frame);
                }
            }
            Internal::Heartbeat => {
                if self.mesh_active {
                    let frame = Frame::Presence(PresenceFrame::Heartbeat {
                        display_name: self.display_name.clone(),
                    });
                    self.broadcast(&frame);
                }
            }
        }
    }

    // ---------------------------------------------------------------------
    // Commands
    // ---------------------------------------------------------------------

    async fn handle_command(&mut self, command: SessionCommand) {
        let name = command.name();
        trace!(command = name, "Session command");
        match command {
            SessionCommand::SetText { text, reply } => {
                let result = self.edit(|doc| doc.set_text(&text));
                respond(name, reply, result);
            }
            SessionCommand::InsertText { pos, text, reply } => {
                let result = self.edit(|doc| doc.local_insert(pos, &text));
                respond(name, reply, result);
            }
            SessionCommand::DeleteText { pos, len, reply } => {
                let result = self.edit(|doc| doc.local_delete(pos, len));
                respond(name, reply, result);
            }
            SessionCommand::SendChat { text, reply } => {
                let result = self.send_chat(&text);
                respond(name, reply, result);
            }
            SessionCommand::SetCursor { x, y, reply } => {
                let result = self.set_cursor(x, y);
                respond(name, reply, result);
            }
            SessionCommand::ClearCursor { reply } => {
                self.presence.clear_cursor();
                self.broadcast(&Frame::Presence(PresenceFrame::CursorCleared));
                respond(name, reply, Ok(()));
            }
            SessionCommand::ExportSnapshot { reply } => {
                let result = DocSnapshot::capture(&self.room_id, &self.doc).map_err(SessionError::from);
                respond(name, reply, result);
            }
            SessionCommand::ImportSnapshot { snapshot, reply } => {
                let result = self.import_snapshot(&snapshot);
                respond(name, reply, result);
            }
            SessionCommand::Diagnostics { reply } => {
                let _ = reply.send(self.pool.all_diagnostics());
            }
            SessionCommand::SetRoomLocked { locked, reply } => {
                let result = self.set_room_locked(locked).await;
                respond(name, reply, result);
            }
            SessionCommand::KickPeer { peer_id, reply } => {
                let result = self.kick_peer(&peer_id).await;
                respond(name, reply, result);
            }
            SessionCommand::Approve { user_id, reply } => {
                let result = self.approve(&user_id).await;
                respond(name, reply, result);
            }
            SessionCommand::Ban { user_id, reply } => {
                let result = self.ban(&user_id).await;
                respond(name, reply, result);
            }
            SessionCommand::SetGrant { grant, reply } => {
                let result = self.set_grant(grant).await;
                respond(name, reply, result);
            }
            SessionCommand::CreateInvite {
                max_uses,
                expires_at,
                reply,
            } => {
                let result = self.create_invite(max_uses, expires_at).await;
                respond(name, reply, result);
            }
            SessionCommand::RevokeInvite { code, reply } => {
                let result = self.revoke_invite(&code).await;
                respond(name, reply, result);
            }
            SessionCommand::RotateKey { reply } => {
                let result = self.rotate_key().await;
                respond(name, reply, result);
            }
            SessionCommand::EndRoom { reply } => {
                let result = self.end_room().await;
                respond(name, reply, result);
            }
            SessionCommand::Leave { reply } => {
                self.leave().await;
                let _ = reply.send(());
            }
        }
    }

    fn ensure_can(&self, action: Action) -> SessionResult<()> {
        if self.approval != ParticipantStatus::Approved {
            return Err(SessionError::AccessDenied(format!(
                "participant is {}",
                self.approval
            )));
        }
        let allowed = allowed_actions(&self.grants, &self.user_id, self.is_host(), Timestamp::now());
        if allowed.allows(action) {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied(action))
        }
    }

    fn ensure_host(&self) -> SessionResult<()> {
        if self.is_host() {
            Ok(())
        } else {
            Err(SessionError::NotHost)
        }
    }

    fn edit<F>(&mut self, change: F) -> SessionResult<()>
    where
        F: FnOnce(&mut TextDocument) -> crate::core_doc::DocResult<DocUpdate>,
    {
        self.ensure_can(Action::Edit)?;
        let update = change(&mut self.doc)?;
        if update.is_empty() {
            return Ok(());
        }
        self.broadcast(&Frame::DocUpdate(update));
        if self.presence.note_local_edit(Instant::now()) {
            self.broadcast(&Frame::Presence(PresenceFrame::Typing));
        }
        Ok(())
    }

    fn send_chat(&mut self, text: &str) -> SessionResult<ChatMessage> {
        self.ensure_can(Action::Chat)?;
        let message = self.presence.send_chat(text)?;
        self.broadcast(&Frame::Chat(message.clone()));
        Ok(message)
    }

    fn set_cursor(&mut self, x: f32, y: f32) -> SessionResult<()> {
        if let Some((x, y)) = self.presence.set_cursor(x, y, Instant::now())? {
            let frame = Frame::Presence(PresenceFrame::Cursor {
                x,
                y,
                display_name: self.display_name.clone(),
            });
            self.broadcast(&frame);
        }
        Ok(())
    }

    fn import_snapshot(&mut self, snapshot: &DocSnapshot) -> SessionResult<()> {
        self.ensure_can(Action::Import)?;
        if snapshot.room_id != self.room_id {
            return Err(SessionError::InvalidInput(format!(
                "snapshot belongs to room {}",
                snapshot.room_id
            )));
        }
        let state = snapshot.verified_state()?;
        if self.doc.merge_state(&state)? {
            info!(room_id = %self.room_id, "Snapshot imported");
            let state = self.doc.export_state();
            self.broadcast(&Frame::DocState(state));
        }
        Ok(())
    }

    async fn set_room_locked(&mut self, locked: bool) -> SessionResult<()> {
        self.ensure_host()?;
        self.relay.set_room_locked(&self.user_id, &self.room_id, locked).await?;
        self.room.locked = locked;
        self.broadcast(&Frame::Control(ControlFrame::RoomLocked { locked }));
        Ok(())
    }

    async fn resolve_peer(&mut self, peer_id: &PeerId) -> SessionResult<UserId> {
        if let Some(record) = self.participants.iter().find(|p| &p.peer_id == peer_id) {
            return Ok(record.user_id.clone());
        }
        if let Some(user_id) = self.peer_users.get(peer_id) {
            return Ok(user_id.clone());
        }
        self.participants = self.relay.list_participants(&self.room_id).await?;
        self.participants
            .iter()
            .find(|p| &p.peer_id == peer_id)
            .map(|p| p.user_id.clone())
            .ok_or_else(|| SessionError::PeerNotFound(peer_id.to_string()))
    }

    async fn kick_peer(&mut self, peer_id: &PeerId) -> SessionResult<()> {
        self.ensure_host()?;
        if peer_id == &self.local_peer {
            return Err(SessionError::InvalidInput("the host cannot kick itself".to_string()));
        }
        let user_id = self.resolve_peer(peer_id).await?;
        let record = self
            .relay
            .set_participant_status(&self.user_id, &self.room_id, &user_id, ParticipantStatus::Kicked)
            .await?;
        self.upsert_participant(record);
        self.broadcast(&Frame::Control(ControlFrame::Kicked {
            user_id: user_id.clone(),
            peer_id: peer_id.clone(),
            banned: false,
        }));
        self.on_peer_left(peer_id, "kicked");
        info!(room_id = %self.room_id, peer_id = %peer_id, user_id = %user_id, "Peer kicked");
        Ok(())
    }

    async fn approve(&mut self, user_id: &UserId) -> SessionResult<()> {
        self.ensure_host()?;
        let record = self
            .relay
            .set_participant_status(&self.user_id, &self.room_id, user_id, ParticipantStatus::Approved)
            .await?;
        self.upsert_participant(record);
        self.broadcast(&Frame::Control(ControlFrame::ParticipantsChanged));
        self.promote_verified();
        Ok(())
    }

    async fn ban(&mut self, user_id: &UserId) -> SessionResult<()> {
        self.ensure_host()?;
        if user_id == &self.user_id {
            return Err(SessionError::InvalidInput("the host cannot ban itself".to_string()));
        }
        let record = self
            .relay
            .set_participant_status(&self.user_id, &self.room_id, user_id, ParticipantStatus::Banned)
            .await?;
        let peer_id = record.peer_id.clone();
        self.upsert_participant(record);
        self.broadcast(&Frame::Control(ControlFrame::Kicked {
            user_id: user_id.clone(),
            peer_id: peer_id.clone(),
            banned: true,
        }));
        self.on_peer_left(&peer_id, "banned");
        info!(room_id = %self.room_id, user_id = %user_id, "Participant banned");
        Ok(())
    }

    async fn set_grant(&mut self, grant: PermissionGrant) -> SessionResult<()> {
        self.ensure_host()?;
        self.relay.put_grant(&self.user_id, &self.room_id, grant.clone()).await?;
        self.grants.retain(|g| g.granted_to != grant.granted_to);
        self.grants.push(grant);
        self.broadcast(&Frame::Control(ControlFrame::PermissionsChanged));
        Ok(())
    }

    async fn create_invite(
        &mut self,
        max_uses: Option<u32>,
        expires_at: Option<Timestamp>,
    ) -> SessionResult<RoomInvite> {
        self.ensure_host()?;
        Ok(self
            .relay
            .create_invite(&self.user_id, &self.room_id, max_uses, expires_at)
            .await?)
    }

    async fn revoke_invite(&mut self, code: &str) -> SessionResult<()> {
        self.ensure_host()?;
        Ok(self.relay.revoke_invite(&self.user_id, &self.room_id, code).await?)
    }

    async fn rotate_key(&mut self) -> SessionResult<JoinLink> {
        self.ensure_host()?;

        let (key, secret) = match &self.password {
            Some(password) => {
                let salt = generate_salt();
                let proof = AccessProof::compute(&self.room_id, password, &salt);
                let key = derive_key_blocking(password, &salt, self.config.crypto.kdf).await?;
                let record = self.room.clone().with_password(salt, proof.clone());
                self.relay.upsert_room(&self.user_id, record.clone()).await?;
                self.room = record;
                (key, LinkSecret::Proof(proof))
            }
            None => {
                let key = generate_key();
                (key.clone(), LinkSecret::Key(key))
            }
        };

        // Last frame under the old key
        self.broadcast(&Frame::Control(ControlFrame::KeyRotated));
        self.envelope = Envelope::new(&self.room_id, &key);
        self.reset_mesh();
        info!(room_id = %self.room_id, "Room key rotated");

        Ok(JoinLink::new(self.link_base.clone(), self.room_id.clone(), secret)
            .with_max_peers_hint(self.room.effective_max_peers()))
    }

    async fn end_room(&mut self) -> SessionResult<()> {
        self.ensure_host()?;
        self.broadcast(&Frame::Control(ControlFrame::RoomEnded));
        let result = self.relay.end_room(&self.user_id, &self.room_id).await;
        self.ended = true;
        self.teardown("room ended by host");
        Ok(result?)
    }

    // ---------------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------------

    async fn leave(&mut self) {
        if self.closed {
            return;
        }
        info!(room_id = %self.room_id, peer_id = %self.local_peer, "Leaving room");
        self.broadcast(&Frame::Bye);
        if self.mesh_active {
            if let Err(e) = self.signal_channel.publish(&self.coordinator.bye()).await {
                debug!(error = %e, "Could not signal departure");
            }
        }
        if let Err(e) = self.relay.set_presence(&self.room_id, &self.user_id, false).await {
            debug!(error = %e, "Could not mark participant offline");
        }
        self.teardown("left");
    }

    fn teardown(&mut self, reason: &str) {
        if self.closed {
            return;
        }
        info!(room_id = %self.room_id, peer_id = %self.local_peer, reason, "Session closing");
        self.closed = true;
        self.mesh_active = false;
        self.tasks.clear();
        self.cancel.cancel();
        self.reset_mesh();
    }
}
