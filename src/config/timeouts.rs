//! Timeout configuration

/// Per-request timeout for calls to the emulator service.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 30_000;

/// How long the "compiled without errors" indicator stays visible.
pub const DEFAULT_COMPILE_BANNER_MS: u64 = 3_000;
