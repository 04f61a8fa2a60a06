//! Textual address resolution.

use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

use socket2::Domain;

use crate::error::{CheckError, Result};

/// A resolved destination and the address family its socket needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub addr: SocketAddr,
    pub family: Domain,
}

/// Resolve `host:port` into the first socket address it names.
///
/// Hostnames go through the system resolver, so the call may block.
pub fn resolve(addr: &str) -> Result<Target> {
    let parse_err = |source| CheckError::AddressParse {
        addr: addr.to_string(),
        source,
    };
    let resolved = addr
        .to_socket_addrs()
        .map_err(parse_err)?
        .next()
        .ok_or_else(|| parse_err(io::Error::new(io::ErrorKind::NotFound, "no addresses resolved")))?;

    Ok(Target {
        addr: resolved,
        family: Domain::for_address(resolved),
    })
}

/// Parse a source address for binding: either a bare IP or `ip:port`.
/// A bare IP binds to an ephemeral port.
pub fn parse_source(addr: &str) -> Result<SocketAddr> {
    if let Ok(ip) = addr.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, 0));
    }
    addr.parse::<SocketAddr>().map_err(|e| CheckError::AddressParse {
        addr: addr.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_ipv4_literal() {
        let t = resolve("127.0.0.1:8080").unwrap();
        assert_eq!(t.addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(t.family, Domain::IPV4);
    }

    #[test]
    fn resolves_ipv6_literal() {
        let t = resolve("[::1]:443").unwrap();
        assert_eq!(t.family, Domain::IPV6);
        assert_eq!(t.addr.port(), 443);
    }

    #[test]
    fn missing_port_is_a_parse_error() {
        let err = resolve("127.0.0.1").unwrap_err();
        assert!(matches!(err, CheckError::AddressParse { ref addr, .. } if addr == "127.0.0.1"));
    }

    #[test]
    fn source_accepts_bare_ip_and_socket_addr() {
        assert_eq!(parse_source("10.0.0.1").unwrap(), "10.0.0.1:0".parse().unwrap());
        assert_eq!(parse_source("[::1]:5000").unwrap(), "[::1]:5000".parse().unwrap());
        assert!(parse_source("not-an-ip").is_err());
    }
}
