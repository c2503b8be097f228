/*
    handle.rs - Caller side of a session

    Cheap to clone. Every method packages a SessionCommand, pushes it onto
    the session task's channel and awaits the oneshot reply. State is read
    from the watch channel without a round trip.

    Host-only calls are refused here, from the last published snapshot,
    before anything is sent.
*/

use super::command::{Reply, SessionCommand};
use super::state::SessionSnapshot;
use crate::core_crypto::JoinLink;
use crate::core_doc::DocSnapshot;
use crate::core_model::{PeerId, Timestamp, UserId};
use crate::core_presence::ChatMessage;
use crate::core_session::{PermissionGrant, RoomInvite, SessionError, SessionResult};
use crate::core_transport::ConnectionDiagnostic;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Clone)]
pub struct SessionHandle {
    command_tx: mpsc::Sender<SessionCommand>,
    state_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    pub(crate) fn new(
        command_tx: mpsc::Sender<SessionCommand>,
        state_rx: watch::Receiver<SessionSnapshot>,
    ) -> Self {
        SessionHandle {
            command_tx,
            state_rx,
        }
    }

    /// Latest published state
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    /// A receiver that sees every future state change
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_rx.clone()
    }

    pub fn peer_id(&self) -> PeerId {
        self.state_rx.borrow().local_peer_id.clone()
    }

    pub fn text(&self) -> String {
        self.state_rx.borrow().text.clone()
    }

    /// Whether the session task is still running
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }

    /// Wait until `predicate` holds for the published state. Fails with
    /// `SessionClosed` if the session stops first.
    pub async fn wait_for<F>(&self, mut predicate: F) -> SessionResult<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        let mut rx = self.state_rx.clone();
        let state = rx
            .wait_for(|state| predicate(state))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        Ok(state.clone())
    }

    /// [`wait_for`](Self::wait_for) with a deadline
    pub async fn wait_for_timeout<F>(&self, timeout: Duration, predicate: F) -> SessionResult<SessionSnapshot>
    where
        F: FnMut(&SessionSnapshot) -> bool,
    {
        tokio::time::timeout(timeout, self.wait_for(predicate))
            .await
            .map_err(|_| SessionError::InvalidInput(format!("state not reached within {:?}", timeout)))?
    }

    async fn call<T>(&self, build: impl FnOnce(Reply<T>) -> SessionCommand) -> SessionResult<T> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(build(reply))
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)?
    }

    fn require_host(&self) -> SessionResult<()> {
        if self.state_rx.borrow().is_host {
            Ok(())
        } else {
            Err(SessionError::NotHost)
        }
    }

    pub async fn set_text(&self, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        self.call(|reply| SessionCommand::SetText { text, reply }).await
    }

    pub async fn insert_text(&self, pos: usize, text: impl Into<String>) -> SessionResult<()> {
        let text = text.into();
        self.call(|reply| SessionCommand::InsertText { pos, text, reply }).await
    }

    pub async fn delete_text(&self, pos: usize, len: usize) -> SessionResult<()> {
        self.call(|reply| SessionCommand::DeleteText { pos, len, reply }).await
    }

    pub async fn send_chat_message(&self, text: impl Into<String>) -> SessionResult<ChatMessage> {
        let text = text.into();
        self.call(|reply| SessionCommand::SendChat { text, reply }).await
    }

    pub async fn set_cursor_normalized(&self, x: f32, y: f32) -> SessionResult<()> {
        self.call(|reply| SessionCommand::SetCursor { x, y, reply }).await
    }

    pub async fn clear_cursor(&self) -> SessionResult<()> {
        self.call(|reply| SessionCommand::ClearCursor { reply }).await
    }

    pub async fn export_snapshot(&self) -> SessionResult<DocSnapshot> {
        self.call(|reply| SessionCommand::ExportSnapshot { reply }).await
    }

    pub async fn import_snapshot(&self, snapshot: DocSnapshot) -> SessionResult<()> {
        self.call(|reply| SessionCommand::ImportSnapshot { snapshot, reply }).await
    }

    /// Diagnostics for every known peer
    pub async fn get_diagnostics(&self) -> SessionResult<Vec<ConnectionDiagnostic>> {
        let (reply, response) = oneshot::channel();
        self.command_tx
            .send(SessionCommand::Diagnostics { reply })
            .await
            .map_err(|_| SessionError::SessionClosed)?;
        response.await.map_err(|_| SessionError::SessionClosed)
    }

    pub async fn peer_diagnostics(&self, peer_id: &PeerId) -> SessionResult<ConnectionDiagnostic> {
        self.get_diagnostics()
            .await?
            .into_iter()
            .find(|d| &d.peer_id == peer_id)
            .ok_or_else(|| SessionError::PeerNotFound(peer_id.to_string()))
    }

    pub async fn update_room_locked(&self, locked: bool) -> SessionResult<()> {
        self.require_host()?;
        self.call(|reply| SessionCommand::SetRoomLocked { locked, reply }).await
    }

    pub async fn kick_peer(&self, peer_id: &PeerId) -> SessionResult<()> {
        self.require_host()?;
        let peer_id = peer_id.clone();
        self.call(|reply| SessionCommand::KickPeer { peer_id, reply }).await
    }

    pub async fn approve_participant(&self, user_id: &UserId) -> SessionResult<()> {
        self.require_host()?;
        let user_id = user_id.clone();
        self.call(|reply| SessionCommand::Approve { user_id, reply }).await
    }

    pub async fn ban_participant(&self, user_id: &UserId) -> SessionResult<()> {
        self.require_host()?;
        let user_id = user_id.clone();
        self.call(|reply| SessionCommand::Ban { user_id, reply }).await
    }

    pub async fn set_permission_grant(&self, grant: PermissionGrant) -> SessionResult<()> {
        self.require_host()?;
        self.call(|reply| SessionCommand::SetGrant { grant, reply }).await
    }

    pub async fn create_invite(
        &self,
        max_uses: Option<u32>,
        expires_at: Option<Timestamp>,
    ) -> SessionResult<RoomInvite> {
        self.require_host()?;
        self.call(|reply| SessionCommand::CreateInvite {
            max_uses,
            expires_at,
            reply,
        })
        .await
    }

    pub async fn revoke_invite(&self, code: impl Into<String>) -> SessionResult<()> {
        self.require_host()?;
        let code = code.into();
        self.call(|reply| SessionCommand::RevokeInvite { code, reply }).await
    }

    /// Replace the room key. Connected guests are told (under the old key)
    /// and must rejoin through the returned link.
    pub async fn rotate_key(&self) -> SessionResult<JoinLink> {
        self.require_host()?;
        self.call(|reply| SessionCommand::RotateKey { reply }).await
    }

    pub async fn end_room(&self) -> SessionResult<()> {
        self.require_host()?;
        self.call(|reply| SessionCommand::EndRoom { reply }).await
    }

    /// Leave the room. Succeeds even if the session already stopped.
    pub async fn leave(&self) -> SessionResult<()> {
        let (reply, response) = oneshot::channel();
        if self.command_tx.send(SessionCommand::Leave { reply }).await.is_err() {
            return Ok(());
        }
        let _ = response.await;
        Ok(())
    }
}
