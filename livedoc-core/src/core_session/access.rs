/*
    access.rs - Admission rules

    Pure functions over the relay's records; the relay runs them inside its
    own critical section so capacity and lock checks are atomic with the
    write that follows.

    Seats: the host's seat is always reserved, guests hold a seat while
    approved and online. A joiner who already holds a seat (reconnect) is
    never rejected for capacity.
*/

use super::participant::{ParticipantRecord, ParticipantStatus};
use super::room::{RoomPhase, RoomRecord};
use crate::core_model::{Timestamp, UserId};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("room has ended")]
    Ended,

    #[error("room is locked")]
    Locked,

    #[error("room is full")]
    Full,

    #[error("participant is banned")]
    Banned,

    #[error("participant was removed by the host; a new invite is required")]
    KickedWithoutInvite,

    #[error("room requires an invite")]
    InviteRequired,
}

/// Seats in use, host included
pub fn occupied_seats(room: &RoomRecord, participants: &[ParticipantRecord]) -> usize {
    let guests = participants
        .iter()
        .filter(|p| !room.is_host(&p.user_id) && p.holds_seat())
        .count();
    guests + 1
}

pub fn is_full(room: &RoomRecord, participants: &[ParticipantRecord]) -> bool {
    occupied_seats(room, participants) >= room.effective_max_peers() as usize
}

/// Decide whether `user_id` may join, and with which status.
///
/// `with_invite` means the joiner presented a usable invite for this attempt.
pub fn admit(
    room: &RoomRecord,
    participants: &[ParticipantRecord],
    user_id: &UserId,
    with_invite: bool,
    now: Timestamp,
) -> Result<ParticipantStatus, Rejection> {
    if room.phase(now) == RoomPhase::Ended {
        return Err(Rejection::Ended);
    }
    if room.is_host(user_id) {
        return Ok(ParticipantStatus::Approved);
    }

    let existing = participants.iter().find(|p| &p.user_id == user_id);
    if existing.is_some_and(|p| p.status == ParticipantStatus::Banned) {
        return Err(Rejection::Banned);
    }
    if room.locked {
        return Err(Rejection::Locked);
    }

    let holds_seat = existing.is_some_and(|p| p.holds_seat());
    if !holds_seat && is_full(room, participants) {
        return Err(Rejection::Full);
    }

    let previous = existing.map(|p| p.status);
    match (previous, with_invite) {
        (Some(ParticipantStatus::Kicked), false) => Err(Rejection::KickedWithoutInvite),
        (Some(ParticipantStatus::Approved), _) => Ok(ParticipantStatus::Approved),
        (Some(ParticipantStatus::Pending), _) | (_, true) => Ok(ParticipantStatus::Pending),
        (_, false) if room.invite_only => Err(Rejection::InviteRequired),
        (_, false) => Ok(ParticipantStatus::Approved),
    }
}

/// Host approval re-checks lock and capacity
pub fn check_approval(
    room: &RoomRecord,
    participants: &[ParticipantRecord],
    now: Timestamp,
) -> Result<(), Rejection> {
    match room.phase(now) {
        RoomPhase::Ended => Err(Rejection::Ended),
        RoomPhase::Locked => Err(Rejection::Locked),
        RoomPhase::Open if is_full(room, participants) => Err(Rejection::Full),
        RoomPhase::Open => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_model::{PeerId, RoomId};

    fn room(max: u8) -> RoomRecord {
        RoomRecord::new(RoomId::new("r"), UserId::new("host"), max)
    }

    fn guest(name: &str, status: ParticipantStatus) -> ParticipantRecord {
        ParticipantRecord::guest(UserId::new(name), PeerId::new(name), name, status)
    }

    fn host() -> ParticipantRecord {
        ParticipantRecord::host(UserId::new("host"), PeerId::new("h"), "Host")
    }

    #[test]
    fn test_capacity_counts_host_and_approved_online_guests() {
        let r = room(3);
        let mut people = vec![host(), guest("a", ParticipantStatus::Approved)];
        assert_eq!(occupied_seats(&r, &people), 2);

        people.push(guest("p", ParticipantStatus::Pending));
        assert_eq!(occupied_seats(&r, &people), 2);

        people.push(guest("b", ParticipantStatus::Approved));
        assert!(is_full(&r, &people));

        people[1].online = false;
        assert!(!is_full(&r, &people));
    }

    #[test]
    fn test_full_room_rejects_new_joiner_but_not_seat_holder() {
        let r = room(2);
        let people = vec![host(), guest("a", ParticipantStatus::Approved)];
        let now = Timestamp::now();

        assert_eq!(
            admit(&r, &people, &UserId::new("b"), false, now),
            Err(Rejection::Full)
        );
        assert_eq!(
            admit(&r, &people, &UserId::new("a"), false, now),
            Ok(ParticipantStatus::Approved)
        );
        assert_eq!(
            admit(&r, &people, &UserId::new("host"), false, now),
            Ok(ParticipantStatus::Approved)
        );
    }

    #[test]
    fn test_lock_blocks_guests_not_host() {
        let mut r = room(8);
        r.locked = true;
        let now = Timestamp::now();
        assert_eq!(admit(&r, &[], &UserId::new("g"), false, now), Err(Rejection::Locked));
        assert!(admit(&r, &[], &UserId::new("host"), false, now).is_ok());
    }

    #[test]
    fn test_banned_is_rejected_even_with_invite() {
        let people = vec![host(), guest("x", ParticipantStatus::Banned)];
        let result = admit(&room(8), &people, &UserId::new("x"), true, Timestamp::now());
        assert_eq!(result, Err(Rejection::Banned));
    }

    #[test]
    fn test_kicked_needs_new_invite() {
        let people = vec![host(), guest("k", ParticipantStatus::Kicked)];
        let now = Timestamp::now();
        assert_eq!(
            admit(&room(8), &people, &UserId::new("k"), false, now),
            Err(Rejection::KickedWithoutInvite)
        );
        assert_eq!(
            admit(&room(8), &people, &UserId::new("k"), true, now),
            Ok(ParticipantStatus::Pending)
        );
    }

    #[test]
    fn test_invite_joins_pending_and_link_joins_approved() {
        let now = Timestamp::now();
        let r = room(8);
        assert_eq!(admit(&r, &[], &UserId::new("i"), true, now), Ok(ParticipantStatus::Pending));
        assert_eq!(admit(&r, &[], &UserId::new("l"), false, now), Ok(ParticipantStatus::Approved));

        let r = r.with_invite_only(true);
        assert_eq!(
            admit(&r, &[], &UserId::new("l"), false, now),
            Err(Rejection::InviteRequired)
        );
    }

    #[test]
    fn test_ended_room_rejects_everyone() {
        let mut r = room(8);
        r.ended = true;
        let now = Timestamp::now();
        assert_eq!(admit(&r, &[], &UserId::new("host"), false, now), Err(Rejection::Ended));
    }

    #[test]
    fn test_approval_rechecks_lock_and_capacity() {
        let now = Timestamp::now();
        let mut r = room(2);
        let mut people = vec![host(), guest("p", ParticipantStatus::Pending)];
        assert!(check_approval(&r, &people, now).is_ok());

        r.locked = true;
        assert_eq!(check_approval(&r, &people, now), Err(Rejection::Locked));

        r.locked = false;
        people.push(guest("a", ParticipantStatus::Approved));
        assert_eq!(check_approval(&r, &people, now), Err(Rejection::Full));
    }
}
