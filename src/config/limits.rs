//! Run-loop and data model limits

/// Number of general purpose registers (R0-R7) in every processor snapshot.
pub const REGISTER_COUNT: usize = 8;

/// Upper bound on single-step calls issued by one run-to-completion request.
pub const DEFAULT_MAX_STEPS: u32 = 1000;

/// Pause between consecutive steps of the run loop, so observers can animate.
pub const DEFAULT_STEP_DELAY_MS: u64 = 50;

/// Port the emulator service listens on when inferred from the page host.
pub const DEFAULT_SERVICE_PORT: u16 = 8000;
