//! Signaling coordinator
//!
//! Offer/answer/candidate exchange through the relay's room broadcast.
//! Only connection-setup metadata crosses this path.

pub mod channel;
pub mod coordinator;
pub mod message;

pub use channel::SignalChannel;
pub use coordinator::{NegotiationState, SignalAction, SignalingCoordinator};
pub use message::{SignalMessage, SignalPayload};
