//! Session engine
//!
//! Ties the document, transport, signaling, relay and presence layers into
//! one running session per participant. Start one with [`host_room`] or
//! [`join_room`] and drive it through the returned [`SessionHandle`].

pub mod command;
pub mod frame;
pub mod handle;
pub mod join;
pub mod scheduler;
mod session;
pub mod state;

pub use command::SessionCommand;
pub use frame::{ControlFrame, Frame, PresenceFrame};
pub use handle::SessionHandle;
pub use join::{host_room, join_room, HostOptions, HostedRoom, JoinOptions, DEFAULT_LINK_BASE};
pub use scheduler::ScheduledTask;
pub use state::SessionSnapshot;
