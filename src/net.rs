use std::net::IpAddr;
use url::Url;

pub fn parse_host(u: &str) -> anyhow::Result<String> {
    Ok(
        Url::parse(u)?
            .host_str()
            .ok_or_else(|| anyhow::anyhow!("no host"))?
            .to_string(),
    )
}

fn strip_brackets(h: &str) -> &str {
    h.strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(h)
}

pub fn is_loopback_host(h: &str) -> bool {
    let h = strip_brackets(h.trim());
    if h.eq_ignore_ascii_case("localhost") {
        return true;
    }
    h.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// `http://{host}:{port}`, bracketing bare IPv6 literals.
pub fn host_url(h: &str, port: u16) -> String {
    let h = strip_brackets(h.trim());
    match h.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("http://[{h}]:{port}"),
        _ => format!("http://{h}:{port}"),
    }
}
