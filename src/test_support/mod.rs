//! Test support infrastructure.
//!
//! Only compiled for unit tests. Integration tests under `tests/` talk to an
//! `httpmock` server instead.
//!
//! **BOUNDARY INVARIANT**: No code in this module should be referenced by runtime code.

mod scripted;

pub use scripted::{halted_step, running_step, snapshot_at, ScriptedService};
