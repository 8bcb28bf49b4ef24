//! UDP transport socket
//!
//! Owns one datagram socket aimed at a resolved destination. Multicast
//! destinations get TTL/hop-limit and egress-interface options; address
//! reuse defaults to on for multicast unless the descriptor says otherwise.

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use crate::constants::DEFAULT_MULTICAST_TTL;
use crate::error::NetworkError;
use crate::network::destination::Destination;

/// Anything that can carry one datagram per call.
///
/// The packet encapsulator is generic over this so the pacer can be driven
/// against an in-memory sink.
pub trait DatagramSink: Send {
    /// Send one datagram, returning the number of bytes handed to the network.
    fn send(&mut self, datagram: &[u8]) -> Result<usize, NetworkError>;
}

/// An open UDP output
pub struct UdpTransport {
    /// Bound, configured socket
    socket: UdpSocket,
    /// Resolved destination
    remote_addr: SocketAddr,
    /// Address the socket is bound to
    local_addr: SocketAddr,
    /// Destination is a multicast group
    is_multicast: bool,
    /// Socket was connected to the destination
    is_connected: bool,
    /// `SO_REUSEADDR` applied
    reuse: bool,
    /// Multicast TTL / hop limit
    ttl: u32,
    /// Informational `pkt_size` from the descriptor
    max_packet_size: Option<usize>,
}

impl UdpTransport {
    /// Parse a descriptor string and open it.
    pub fn open_url(url: &str) -> Result<Self, NetworkError> {
        let destination: Destination = url.parse()?;
        Self::open(&destination)
    }

    /// Resolve, create, configure, bind and optionally connect a socket.
    ///
    /// Any failure drops the partially configured socket; no handle escapes.
    pub fn open(destination: &Destination) -> Result<Self, NetworkError> {
        let opts = &destination.options;

        let remote_addr = resolve(&destination.host, destination.port)?;
        let is_multicast = remote_addr.ip().is_multicast();

        let local_ip = match remote_addr {
            SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let bind_addr = SocketAddr::new(local_ip, opts.local_port);

        let socket = Socket::new(
            Domain::for_address(remote_addr),
            Type::DGRAM,
            Some(Protocol::UDP),
        )
        .map_err(|e| NetworkError::socket("socket", e))?;

        // Follow the requested reuse option; multicast enables it unless told not to
        let reuse = opts.reuse.unwrap_or(is_multicast);
        if reuse {
            socket
                .set_reuse_address(true)
                .map_err(|e| NetworkError::socket("SO_REUSEADDR", e))?;
        }

        socket
            .bind(&SockAddr::from(bind_addr))
            .map_err(|e| NetworkError::socket("bind", e))?;

        let local_addr = socket
            .local_addr()
            .map_err(|e| NetworkError::socket("getsockname", e))?
            .as_socket()
            .ok_or_else(|| NetworkError::SocketFailed("bound address is not IP".to_string()))?;

        let ttl = opts.ttl.unwrap_or(DEFAULT_MULTICAST_TTL);
        if is_multicast {
            set_multicast_options(&socket, &remote_addr, ttl, opts.multicast_interface.as_deref())?;
        }

        if let Some(size) = opts.buffer_size {
            socket
                .set_send_buffer_size(size)
                .map_err(|e| NetworkError::socket("SO_SNDBUF", e))?;
        }

        if opts.connect {
            socket
                .connect(&SockAddr::from(remote_addr))
                .map_err(|e| NetworkError::socket("connect", e))?;
        }

        tracing::info!(
            "Opened UDP output {} -> {} (multicast: {}, connected: {}, reuse: {})",
            local_addr,
            remote_addr,
            is_multicast,
            opts.connect,
            reuse
        );

        Ok(Self {
            socket: socket.into(),
            remote_addr,
            local_addr,
            is_multicast,
            is_connected: opts.connect,
            reuse,
            ttl,
            max_packet_size: opts.max_packet_size,
        })
    }

    /// Send one datagram. Failures are logged and returned; the socket stays usable.
    pub fn send(&self, datagram: &[u8]) -> Result<usize, NetworkError> {
        let result = if self.is_connected {
            self.socket.send(datagram)
        } else {
            self.socket.send_to(datagram, self.remote_addr)
        };

        result.map_err(|e| {
            tracing::warn!("UDP packet to {} failed to send: {}", self.remote_addr, e);
            NetworkError::SendFailed(e.to_string())
        })
    }

    /// Release the socket.
    pub fn close(self) {
        tracing::info!("Closing UDP output {} -> {}", self.local_addr, self.remote_addr);
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Bound local port, including an ephemeral allocation
    pub fn local_port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn is_multicast(&self) -> bool {
        self.is_multicast
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected
    }

    /// Whether `SO_REUSEADDR` was applied
    pub fn reuse_enabled(&self) -> bool {
        self.reuse
    }

    pub fn ttl(&self) -> u32 {
        self.ttl
    }

    pub fn max_packet_size(&self) -> Option<usize> {
        self.max_packet_size
    }
}

impl DatagramSink for UdpTransport {
    fn send(&mut self, datagram: &[u8]) -> Result<usize, NetworkError> {
        UdpTransport::send(self, datagram)
    }
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("is_multicast", &self.is_multicast)
            .field("is_connected", &self.is_connected)
            .finish()
    }
}

/// Resolve `host:port` to the first address the resolver returns.
fn resolve(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    let failed = |reason: String| NetworkError::ResolutionFailed {
        host: host.to_string(),
        reason,
    };

    (host, port)
        .to_socket_addrs()
        .map_err(|e| failed(e.to_string()))?
        .next()
        .ok_or_else(|| failed("no addresses returned".to_string()))
}

fn set_multicast_options(
    socket: &Socket,
    remote: &SocketAddr,
    ttl: u32,
    interface: Option<&str>,
) -> Result<(), NetworkError> {
    match remote {
        SocketAddr::V4(_) => {
            socket
                .set_multicast_ttl_v4(ttl)
                .map_err(|e| NetworkError::socket("IP_MULTICAST_TTL", e))?;

            if let Some(iface) = interface {
                if let Ok(addr) = iface.parse::<Ipv4Addr>() {
                    socket
                        .set_multicast_if_v4(&addr)
                        .map_err(|e| NetworkError::socket("IP_MULTICAST_IF", e))?;
                } else if let Some(index) = interface_index(iface) {
                    set_multicast_ifindex_v4(socket, index)
                        .map_err(|e| NetworkError::socket("IP_MULTICAST_IF", e))?;
                }
            }
        }
        SocketAddr::V6(_) => {
            socket
                .set_multicast_hops_v6(ttl)
                .map_err(|e| NetworkError::socket("IPV6_MULTICAST_HOPS", e))?;

            if let Some(index) = interface.and_then(interface_index) {
                socket
                    .set_multicast_if_v6(index)
                    .map_err(|e| NetworkError::socket("IPV6_MULTICAST_IF", e))?;
            }
        }
    }

    Ok(())
}

/// Look up an interface index by name. Unknown names fall back to the default route.
#[cfg(unix)]
fn interface_index(name: &str) -> Option<u32> {
    let c_name = std::ffi::CString::new(name).ok()?;
    // SAFETY: c_name is a valid NUL-terminated string for the duration of the call
    let index = unsafe { libc::if_nametoindex(c_name.as_ptr()) };
    if index == 0 {
        tracing::warn!("Unknown multicast interface '{}', using default", name);
        None
    } else {
        Some(index)
    }
}

#[cfg(not(unix))]
fn interface_index(name: &str) -> Option<u32> {
    tracing::warn!("Interface names are not supported here ('{}'), using default", name);
    None
}

#[cfg(target_os = "linux")]
fn set_multicast_ifindex_v4(socket: &Socket, index: u32) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let req = libc::ip_mreqn {
        imr_multiaddr: libc::in_addr { s_addr: 0 },
        imr_address: libc::in_addr { s_addr: 0 },
        imr_ifindex: index as libc::c_int,
    };

    // SAFETY: req outlives the call and the length matches its type
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_MULTICAST_IF,
            &req as *const libc::ip_mreqn as *const libc::c_void,
            std::mem::size_of::<libc::ip_mreqn>() as libc::socklen_t,
        )
    };

    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn set_multicast_ifindex_v4(_socket: &Socket, index: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("IPv4 egress by interface index {} needs an address here", index),
    ))
}
