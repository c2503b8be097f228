//! Shared document
//!
//! Character-level RGA replica of the room's text, the update/state shapes
//! exchanged between peers, and the JSON snapshot used for backup/restore.

pub mod element;
pub mod errors;
pub mod snapshot;
pub mod text_crdt;
pub mod update;

pub use element::ElementId;
pub use errors::{DocError, DocResult};
pub use snapshot::{DocSnapshot, SNAPSHOT_VERSION};
pub use text_crdt::TextDocument;
pub use update::{DocOp, DocState, DocUpdate, StateChar};
