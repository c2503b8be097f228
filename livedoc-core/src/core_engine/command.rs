//! Commands accepted by the session task

use crate::core_crypto::JoinLink;
use crate::core_doc::DocSnapshot;
use crate::core_model::{PeerId, Timestamp, UserId};
use crate::core_presence::ChatMessage;
use crate::core_session::{PermissionGrant, RoomInvite, SessionResult};
use crate::core_transport::ConnectionDiagnostic;
use tokio::sync::oneshot;

pub type Reply<T> = oneshot::Sender<SessionResult<T>>;

#[derive(Debug)]
pub enum SessionCommand {
    /// Replace the document text (diffed into CRDT operations)
    SetText { text: String, reply: Reply<()> },
    InsertText { pos: usize, text: String, reply: Reply<()> },
    DeleteText { pos: usize, len: usize, reply: Reply<()> },
    SendChat { text: String, reply: Reply<ChatMessage> },
    SetCursor { x: f32, y: f32, reply: Reply<()> },
    ClearCursor { reply: Reply<()> },
    ExportSnapshot { reply: Reply<DocSnapshot> },
    ImportSnapshot { snapshot: DocSnapshot, reply: Reply<()> },
    Diagnostics { reply: oneshot::Sender<Vec<ConnectionDiagnostic>> },

    // Host-only
    SetRoomLocked { locked: bool, reply: Reply<()> },
    KickPeer { peer_id: PeerId, reply: Reply<()> },
    Approve { user_id: UserId, reply: Reply<()> },
    Ban { user_id: UserId, reply: Reply<()> },
    SetGrant { grant: PermissionGrant, reply: Reply<()> },
    CreateInvite {
        max_uses: Option<u32>,
        expires_at: Option<Timestamp>,
        reply: Reply<RoomInvite>,
    },
    RevokeInvite { code: String, reply: Reply<()> },
    RotateKey { reply: Reply<JoinLink> },
    EndRoom { reply: Reply<()> },

    /// Tear everything down; safe in any state
    Leave { reply: oneshot::Sender<()> },
}

impl SessionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::SetText { .. } => "set_text",
            SessionCommand::InsertText { .. } => "insert_text",
            SessionCommand::DeleteText { .. } => "delete_text",
            SessionCommand::SendChat { .. } => "send_chat_message",
            SessionCommand::SetCursor { .. } => "set_cursor_normalized",
            SessionCommand::ClearCursor { .. } => "clear_cursor",
            SessionCommand::ExportSnapshot { .. } => "export_snapshot",
            SessionCommand::ImportSnapshot { .. } => "import_snapshot",
            SessionCommand::Diagnostics { .. } => "get_diagnostics",
            SessionCommand::SetRoomLocked { .. } => "update_room_locked",
            SessionCommand::KickPeer { .. } => "kick_peer",
            SessionCommand::Approve { .. } => "approve_participant",
            SessionCommand::Ban { .. } => "ban_participant",
            SessionCommand::SetGrant { .. } => "set_permission_grant",
            SessionCommand::CreateInvite { .. } => "create_invite",
            SessionCommand::RevokeInvite { .. } => "revoke_invite",
            SessionCommand::RotateKey { .. } => "rotate_key",
            SessionCommand::EndRoom { .. } => "end_room",
            SessionCommand::Leave { .. } => "leave",
        }
    }
}
