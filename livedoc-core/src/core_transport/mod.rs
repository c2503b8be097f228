//! Peer transport
//!
//! Link drivers (in-memory and TCP), the per-peer pool that carries one
//! link per remote participant, reconnect backoff, and connection
//! diagnostics. Everything here moves opaque, already-sealed frames.

pub mod backoff;
pub mod errors;
pub mod link;
pub mod memory;
pub mod pool;
pub mod tcp;

pub use backoff::BackoffPolicy;
pub use errors::{TransportError, TransportResult};
pub use link::{spawn_link_reader, Candidate, CandidateKind, LinkDriver, LinkEvent, LinkId, RawLink};
pub use memory::{MemoryDriver, MemoryNetwork};
pub use pool::{ChannelState, ConnectionDiagnostic, ConnectionState, PeerPool};
pub use tcp::TcpDriver;
