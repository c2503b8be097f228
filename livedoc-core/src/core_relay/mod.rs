//! Relay/metadata service boundary
//!
//! [`Relay`] is the contract the engine consumes; [`MemoryRelay`] is the
//! in-process implementation used by tests, the CLI demo, and embedders
//! that host every participant in one process.

pub mod errors;
pub mod memory;
pub mod traits;

pub use errors::{RelayError, RelayResult};
pub use memory::MemoryRelay;
pub use traits::{Relay, SeatClaim, SharedRelay};
