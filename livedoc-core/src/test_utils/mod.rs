//! Test utilities for livedoc
//!
//! Fixtures that stand up a relay and an in-memory network, plus helpers
//! for waiting on session state. Shared by unit tests, the integration
//! tests under `tests/` and the benches.

pub mod assertions;
pub mod async_helpers;
pub mod fixtures;

pub use assertions::*;
pub use async_helpers::*;
pub use fixtures::*;
