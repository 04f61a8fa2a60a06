// Host/port helpers for turning config entries into checker addresses

use std::net::Ipv6Addr;

/// Split `host[:port]`, falling back to `default_port`. Accepts bracketed
/// IPv6 (`[::1]:80`) and bare IPv6 without a port (`::1`).
pub fn parse_host_port(s: &str, default_port: u16) -> (String, u16) {
    if let Some(rest) = s.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail
                .strip_prefix(':')
                .and_then(|p| p.parse::<u16>().ok())
                .unwrap_or(default_port);
            return (host.to_string(), port);
        }
    }
    if s.parse::<Ipv6Addr>().is_ok() {
        return (s.to_string(), default_port);
    }
    if let Some(idx) = s.rfind(':') {
        if let Ok(port) = s[idx+1..].parse::<u16>() {
            return (s[..idx].to_string(), port);
        }
    }
    (s.to_string(), default_port)
}

pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
