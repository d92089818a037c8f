pub mod client;
pub mod config;
pub mod core;
pub mod events;
pub mod model;
pub mod net;
pub mod run_loop;
pub mod store;
pub mod tasks;

pub use client::{ClientError, EmulatorService, HttpEmulatorService};
pub use config::{ApiEndpoint, EndpointSource};
pub use self::core::{init_tracing, SessionConfig, API_ENDPOINT, APP_NAME};
pub use events::SessionEvent;
pub use model::{
    EmulatorSnapshot, Flags, MemoryState, ProcessorState, TaskId, TaskInfo, TaskProgram,
};
pub use run_loop::{RunLoopConfig, RunLoopController, RunOutcome};
pub use store::{Outcome, SessionError, SessionStatus, SessionStore, SessionView};
pub use tasks::{TaskPicker, TaskSelection, Variant};

// Scripted in-process service for unit tests; never compiled into release builds.
#[cfg(test)]
pub(crate) mod test_support;
