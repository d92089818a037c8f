use std::time::Duration;

use once_cell::sync::Lazy;

use crate::config::{env_parse, timeouts::DEFAULT_COMPILE_BANNER_MS, ApiEndpoint};
use crate::run_loop::RunLoopConfig;

// ----------------------------------------------------------------------------
// Constants and endpoint
// ----------------------------------------------------------------------------

pub static APP_NAME: &str = "emuctl";

/// Service base address, resolved once on first use.
pub static API_ENDPOINT: Lazy<ApiEndpoint> = Lazy::new(|| {
    let endpoint = ApiEndpoint::from_env();
    tracing::info!(
        target = "emuctl",
        base_url = %endpoint.base_url,
        source = ?endpoint.source,
        "emulator service endpoint resolved"
    );
    endpoint
});

// ----------------------------------------------------------------------------
// Session configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub run_loop: RunLoopConfig,
    /// Lifetime of the "compiled without errors" indicator.
    pub compile_banner: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            run_loop: RunLoopConfig::default(),
            compile_banner: Duration::from_millis(DEFAULT_COMPILE_BANNER_MS),
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - EMUCTL_MAX_STEPS: step budget of one run-to-completion (default: 1000)
    /// - EMUCTL_STEP_DELAY_MS: pause between run-loop steps (default: 50)
    /// - EMUCTL_COMPILE_BANNER_MS: compile success indicator lifetime (default: 3000)
    pub fn from_env() -> Self {
        Self {
            run_loop: RunLoopConfig::from_env(),
            compile_banner: Duration::from_millis(env_parse(
                "EMUCTL_COMPILE_BANNER_MS",
                DEFAULT_COMPILE_BANNER_MS,
            )),
        }
    }

    /// Non-interactive configuration: no pacing delay between steps.
    pub fn headless() -> Self {
        Self {
            run_loop: RunLoopConfig {
                step_delay: Duration::ZERO,
                ..RunLoopConfig::default()
            },
            ..Self::default()
        }
    }
}

// ----------------------------------------------------------------------------
// Shared helpers
// ----------------------------------------------------------------------------

pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    tracing::info!(target = "emuctl", "tracing initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_preserve_policy_constants() {
        let cfg = SessionConfig::default();
        assert_eq!(cfg.run_loop.max_steps, 1000);
        assert_eq!(cfg.run_loop.step_delay, Duration::from_millis(50));
        assert_eq!(cfg.compile_banner, Duration::from_millis(3000));
    }

    #[test]
    fn headless_drops_pacing_only() {
        let cfg = SessionConfig::headless();
        assert_eq!(cfg.run_loop.step_delay, Duration::ZERO);
        assert_eq!(cfg.run_loop.max_steps, 1000);
    }
}
