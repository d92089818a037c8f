//! Emulator service endpoint resolution.
//!
//! The base address is resolved once at startup with the following precedence:
//! explicit override (`EMUCTL_API_URL`) > same host, service port when the page
//! host is not a loopback address (`EMUCTL_PAGE_HOST`) > loopback default.

use serde::Serialize;

use super::{env_non_empty, limits::DEFAULT_SERVICE_PORT};
use crate::net::{host_url, is_loopback_host, parse_host};

pub const ENV_API_URL: &str = "EMUCTL_API_URL";
pub const ENV_PAGE_HOST: &str = "EMUCTL_PAGE_HOST";
pub const LOOPBACK_DEFAULT: &str = "http://localhost:8000";

/// Where the resolved base address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointSource {
    Override,
    InferredFromHost,
    LoopbackDefault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiEndpoint {
    pub base_url: String,
    pub source: EndpointSource,
}

impl ApiEndpoint {
    /// Resolve from process environment variables.
    pub fn from_env() -> Self {
        Self::resolve(env_non_empty(ENV_API_URL), env_non_empty(ENV_PAGE_HOST))
    }

    /// Resolve from the environment override, using `page_host` as the host the
    /// presentation layer is served from.
    pub fn resolve_with(page_host: Option<&str>) -> Self {
        Self::resolve(env_non_empty(ENV_API_URL), page_host.map(str::to_string))
    }

    /// Pure resolution used by `from_env`; an override that is not a valid URL
    /// with a host is ignored with a warning.
    pub fn resolve(override_url: Option<String>, page_host: Option<String>) -> Self {
        if let Some(raw) = override_url {
            match parse_host(&raw) {
                Ok(_) => {
                    return Self {
                        base_url: raw.trim_end_matches('/').to_string(),
                        source: EndpointSource::Override,
                    }
                }
                Err(err) => {
                    tracing::warn!(target = "emuctl", value = %raw, error = %err, "ignoring invalid API URL override");
                }
            }
        }

        if let Some(host) = page_host.map(|h| h.trim().to_string()).filter(|h| !h.is_empty()) {
            if !is_loopback_host(&host) {
                return Self {
                    base_url: host_url(&host, DEFAULT_SERVICE_PORT),
                    source: EndpointSource::InferredFromHost,
                };
            }
        }

        Self {
            base_url: LOOPBACK_DEFAULT.to_string(),
            source: EndpointSource::LoopbackDefault,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let previous = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, previous }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.previous {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn override_wins_over_page_host() {
        let ep = ApiEndpoint::resolve(
            Some("https://emu.example.org/".into()),
            Some("lab.example.org".into()),
        );
        assert_eq!(ep.base_url, "https://emu.example.org");
        assert_eq!(ep.source, EndpointSource::Override);
    }

    #[test]
    fn non_loopback_page_host_infers_service_port() {
        let ep = ApiEndpoint::resolve(None, Some("10.0.0.7".into()));
        assert_eq!(ep.base_url, "http://10.0.0.7:8000");
        assert_eq!(ep.source, EndpointSource::InferredFromHost);
    }

    #[test]
    fn loopback_page_host_uses_default() {
        for host in ["localhost", "127.0.0.1", "::1", "[::1]"] {
            let ep = ApiEndpoint::resolve(None, Some(host.into()));
            assert_eq!(ep.base_url, LOOPBACK_DEFAULT, "host {host}");
            assert_eq!(ep.source, EndpointSource::LoopbackDefault);
        }
    }

    #[test]
    fn invalid_override_falls_through() {
        let ep = ApiEndpoint::resolve(Some("not a url".into()), None);
        assert_eq!(ep.source, EndpointSource::LoopbackDefault);
    }

    #[test]
    fn env_override_and_page_host() {
        // One test owns the process env for these keys.
        let _url = EnvGuard::set(ENV_API_URL, Some("http://svc.internal:9000"));
        let _host = EnvGuard::set(ENV_PAGE_HOST, None);
        let ep = ApiEndpoint::from_env();
        assert_eq!(ep.base_url, "http://svc.internal:9000");
        assert_eq!(ep.source, EndpointSource::Override);

        let _url = EnvGuard::set(ENV_API_URL, None);
        let ep = ApiEndpoint::resolve_with(Some("lab.example.org"));
        assert_eq!(ep.base_url, "http://lab.example.org:8000");
        assert_eq!(ep.source, EndpointSource::InferredFromHost);

        let _host = EnvGuard::set(ENV_PAGE_HOST, Some("localhost"));
        assert_eq!(ApiEndpoint::from_env().base_url, LOOPBACK_DEFAULT);
    }
}
