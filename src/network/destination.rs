//! Destination descriptor parsing
//!
//! Descriptors have the form `udp://host:port[?option=value&...]` (the
//! `rtp://` scheme is accepted as an alias). IPv6 hosts are bracketed:
//! `udp://[ff0e::1]:5000`.
//!
//! Options:
//! - `ttl`: multicast hop limit
//! - `localport`: local bind port (0 = ephemeral)
//! - `pkt_size`: maximum datagram size, informational
//! - `buffer_size`: socket send-buffer size in bytes
//! - `reuse`: enable `SO_REUSEADDR`; a bare `reuse` means enabled
//! - `connect`: use a connected socket
//! - `miface`: network interface for multicast egress
//!
//! Numeric values are read like `strtol`: leading digits are used and
//! trailing text is ignored. A value with no leading digits leaves the
//! option at its default.

use std::fmt;
use std::str::FromStr;

use crate::error::NetworkError;

/// Per-destination socket options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationOptions {
    /// Multicast TTL / hop limit (None = default)
    pub ttl: Option<u32>,
    /// Local port to bind (0 = ephemeral)
    pub local_port: u16,
    /// Maximum datagram size
    pub max_packet_size: Option<usize>,
    /// Send-buffer size in bytes
    pub buffer_size: Option<usize>,
    /// Explicit `SO_REUSEADDR` request (None = not specified)
    pub reuse: Option<bool>,
    /// Connected-mode sends
    pub connect: bool,
    /// Interface name (or IPv4 address) for multicast egress
    pub multicast_interface: Option<String>,
}

/// A parsed destination descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub host: String,
    pub port: u16,
    pub options: DestinationOptions,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            options: DestinationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: DestinationOptions) -> Self {
        self.options = options;
        self
    }
}

impl FromStr for Destination {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let invalid = |msg: &str| NetworkError::InvalidDestination(format!("{} ({})", msg, s));

        let rest = match s.find("://") {
            Some(idx) => {
                let scheme = s[..idx].to_ascii_lowercase();
                if scheme != "udp" && scheme != "rtp" {
                    return Err(invalid("unsupported scheme"));
                }
                &s[idx + 3..]
            }
            None => return Err(invalid("missing scheme")),
        };

        let (authority, query) = match rest.find('?') {
            Some(idx) => (&rest[..idx], Some(&rest[idx + 1..])),
            None => (rest, None),
        };
        let authority = authority.trim_end_matches('/');

        let (host, port_str) = if let Some(stripped) = authority.strip_prefix('[') {
            let end = stripped.find(']').ok_or_else(|| invalid("unterminated IPv6 host"))?;
            let port = stripped[end + 1..]
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port"))?;
            (&stripped[..end], port)
        } else {
            authority.rsplit_once(':').ok_or_else(|| invalid("missing port"))?
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let port: u16 = port_str.parse().map_err(|_| invalid("invalid port"))?;

        let mut destination = Destination::new(host, port);
        if let Some(query) = query {
            destination.options = parse_options(query);
        }

        Ok(destination)
    }
}

/// Parse the `key=value&...` option set.
fn parse_options(query: &str) -> DestinationOptions {
    let mut options = DestinationOptions::default();

    for param in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match param.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (param, None),
        };

        match key.to_ascii_lowercase().as_str() {
            "ttl" => {
                if let Some(ttl) = value.and_then(leading_int) {
                    options.ttl = u32::try_from(ttl).ok();
                }
            }
            "localport" | "local_port" => {
                if let Some(port) = value.and_then(leading_int) {
                    options.local_port = u16::try_from(port).unwrap_or(0);
                }
            }
            "pkt_size" => {
                options.max_packet_size = value
                    .and_then(leading_int)
                    .and_then(|v| usize::try_from(v).ok());
            }
            "buffer_size" => {
                options.buffer_size = value
                    .and_then(leading_int)
                    .and_then(|v| usize::try_from(v).ok());
            }
            "reuse" => {
                // no digits: the flag itself is a request to enable
                options.reuse = Some(value.and_then(leading_int).map_or(true, |v| v != 0));
            }
            "connect" => {
                options.connect = value.and_then(leading_int).is_some_and(|v| v != 0);
            }
            "miface" => {
                options.multicast_interface = value.filter(|v| !v.is_empty()).map(str::to_string);
            }
            other => {
                tracing::debug!("Ignoring unknown destination option '{}'", other);
            }
        }
    }

    options
}

/// Leading decimal integer of `s`, `strtol` style.
fn leading_int(s: &str) -> Option<i64> {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let end = digits
        .bytes()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(digits.len());
    if end == 0 {
        return None;
    }

    let value: i64 = digits[..end].parse().ok()?;
    Some(if negative { -value } else { value })
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "udp://[{}]:{}", self.host, self.port)?;
        } else {
            write!(f, "udp://{}:{}", self.host, self.port)?;
        }

        let o = &self.options;
        let mut params = Vec::new();
        if let Some(ttl) = o.ttl {
            params.push(format!("ttl={}", ttl));
        }
        if o.local_port != 0 {
            params.push(format!("localport={}", o.local_port));
        }
        if let Some(size) = o.max_packet_size {
            params.push(format!("pkt_size={}", size));
        }
        if let Some(size) = o.buffer_size {
            params.push(format!("buffer_size={}", size));
        }
        if let Some(reuse) = o.reuse {
            params.push(format!("reuse={}", reuse as u8));
        }
        if o.connect {
            params.push("connect=1".to_string());
        }
        if let Some(iface) = &o.multicast_interface {
            params.push(format!("miface={}", iface));
        }

        if !params.is_empty() {
            write!(f, "?{}", params.join("&"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple() {
        let dest: Destination = "udp://239.0.0.1:5000".parse().unwrap();
        assert_eq!(dest.host, "239.0.0.1");
        assert_eq!(dest.port, 5000);
        assert_eq!(dest.options, DestinationOptions::default());
    }

    #[test]
    fn test_parse_all_options() {
        let dest: Destination =
            "rtp://10.0.0.5:5004?ttl=8&localport=6000&pkt_size=1328&buffer_size=65536&reuse=0&connect=1&miface=eth1"
                .parse()
                .unwrap();
        let o = &dest.options;
        assert_eq!(o.ttl, Some(8));
        assert_eq!(o.local_port, 6000);
        assert_eq!(o.max_packet_size, Some(1328));
        assert_eq!(o.buffer_size, Some(65536));
        assert_eq!(o.reuse, Some(false));
        assert!(o.connect);
        assert_eq!(o.multicast_interface.as_deref(), Some("eth1"));
    }

    #[test]
    fn test_bare_reuse_flag_enables() {
        let dest: Destination = "udp://10.0.0.5:5000?reuse".parse().unwrap();
        assert_eq!(dest.options.reuse, Some(true));

        let dest: Destination = "udp://10.0.0.5:5000?reuse=yes".parse().unwrap();
        assert_eq!(dest.options.reuse, Some(true));
    }

    #[test]
    fn test_non_numeric_values_fall_back() {
        let dest: Destination = "udp://10.0.0.5:5000?ttl=abc&localport=x&buffer_size=&connect=on"
            .parse()
            .unwrap();
        assert_eq!(dest.options.ttl, None);
        assert_eq!(dest.options.local_port, 0);
        assert_eq!(dest.options.buffer_size, None);
        assert!(!dest.options.connect);

        // trailing garbage after digits is ignored
        let dest: Destination = "udp://10.0.0.5:5000?ttl=4hops".parse().unwrap();
        assert_eq!(dest.options.ttl, Some(4));
    }

    #[test]
    fn test_ipv6_host() {
        let dest: Destination = "udp://[ff0e::1]:5000?ttl=2".parse().unwrap();
        assert_eq!(dest.host, "ff0e::1");
        assert_eq!(dest.port, 5000);
        assert_eq!(dest.options.ttl, Some(2));
    }

    #[test]
    fn test_malformed_descriptors() {
        for bad in [
            "",
            "239.0.0.1:5000",
            "http://239.0.0.1:5000",
            "udp://239.0.0.1",
            "udp://:5000",
            "udp://239.0.0.1:port",
            "udp://239.0.0.1:70000",
            "udp://[ff0e::1:5000",
        ] {
            assert!(bad.parse::<Destination>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_display_roundtrip() {
        let url = "udp://[ff0e::1]:5000?ttl=2&localport=7000&reuse=1&connect=1&miface=lo";
        let parsed: Destination = url.parse().unwrap();
        assert_eq!(parsed.to_string(), url);
        assert_eq!(parsed.to_string().parse::<Destination>().unwrap(), parsed);
    }

    #[test]
    fn test_leading_int() {
        assert_eq!(leading_int("42"), Some(42));
        assert_eq!(leading_int(" -3x"), Some(-3));
        assert_eq!(leading_int("x3"), None);
        assert_eq!(leading_int(""), None);
    }
}
