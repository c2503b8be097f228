//! Session state machine
//!
//! Room and participant records, admission rules (capacity, lock, ban,
//! invite), invites, permission grants, and the error type every session
//! operation reports. The rules here are pure; the relay applies them
//! atomically and the engine mirrors their results.

pub mod access;
pub mod errors;
pub mod invite;
pub mod participant;
pub mod permissions;
pub mod room;

pub use access::{admit, check_approval, is_full, occupied_seats, Rejection};
pub use errors::{SessionError, SessionResult};
pub use invite::{InviteError, RoomInvite};
pub use participant::{ParticipantRecord, ParticipantStatus, Role};
pub use permissions::{allowed_actions, Action, AllowedActions, GrantTarget, PermissionGrant, ResourceType};
pub use room::{RoomPhase, RoomRecord, MAX_PEERS, MIN_PEERS};
