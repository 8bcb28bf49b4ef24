//! RTP Stream Monitor
//!
//! Listens for a TS-over-RTP stream and reports rate, loss and
//! reordering at a fixed interval.
//!
//! Usage: `ts-rtp-monitor [BIND_ADDRESS] [CONFIG.toml]`

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ts_rtp_output::{
    config::{AppConfig, MonitorConfig},
    constants::*,
    protocol::RtpPacket,
};

/// Per-stream receiver state
#[derive(Default)]
struct StreamState {
    ssrc: Option<u32>,
    expected_sequence: Option<u16>,
    packets_received: u64,
    bytes_received: u64,
    ts_packets: u64,
    packets_lost: u64,
    out_of_order: u64,
    invalid_packets: u64,
    last_timestamp: Option<u32>,
}

impl StreamState {
    fn on_packet(&mut self, packet: &RtpPacket<'_>, size: usize) {
        let header = &packet.header;

        if self.ssrc != Some(header.ssrc) {
            tracing::info!(
                "New stream: SSRC {:#010x}, payload type {}",
                header.ssrc,
                header.payload_type
            );
            *self = StreamState {
                ssrc: Some(header.ssrc),
                invalid_packets: self.invalid_packets,
                ..Default::default()
            };
        }

        if header.payload_type != MPEG_TS_PAYLOAD_TYPE {
            tracing::debug!("Unexpected payload type {}", header.payload_type);
        }

        if let Some(expected) = self.expected_sequence {
            // Signed distance handles wrap-around
            let delta = header.sequence.wrapping_sub(expected) as i16;
            if delta > 0 {
                self.packets_lost += delta as u64;
            } else if delta < 0 {
                self.out_of_order += 1;
            }
            if delta >= 0 {
                self.expected_sequence = Some(header.sequence.wrapping_add(1));
            }
        } else {
            self.expected_sequence = Some(header.sequence.wrapping_add(1));
        }

        self.packets_received += 1;
        self.bytes_received += size as u64;
        self.ts_packets += packet.ts_packet_count() as u64;
        self.last_timestamp = Some(header.timestamp);
    }
}

fn main() -> Result<()> {
    // Parse arguments
    let mut config_path = None;
    let mut bind_address = None;
    for arg in std::env::args().skip(1) {
        if arg.ends_with(".toml") {
            config_path = Some(arg);
        } else {
            bind_address = Some(arg);
        }
    }

    // Load config
    let mut config = match &config_path {
        Some(path) => AppConfig::load(path).with_context(|| format!("loading {}", path))?,
        None => AppConfig::default(),
    };
    if let Some(bind_address) = bind_address {
        config.monitor.bind_address = bind_address;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.filter.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting TS RTP monitor");

    let socket = open_receiver(&config.monitor)?;
    tracing::info!("Listening on {}", socket.local_addr()?);

    let report_interval = Duration::from_secs(config.monitor.report_interval_secs.max(1));
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;

    let mut state = StreamState::default();
    let mut buf = vec![0u8; 65536];
    let mut last_report = Instant::now();
    let mut last_bytes = 0u64;

    // Main receiving loop
    loop {
        match socket.recv_from(&mut buf) {
            Ok((len, _from)) => match RtpPacket::parse(&buf[..len]) {
                Ok(packet) => state.on_packet(&packet, len),
                Err(e) => {
                    state.invalid_packets += 1;
                    tracing::debug!("Dropping datagram of {} bytes: {}", len, e);
                }
            },
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                tracing::error!("Receive error: {}", e);
                return Err(e.into());
            }
        }

        // Periodic stats
        let elapsed = last_report.elapsed();
        if elapsed >= report_interval {
            let rate = state.bytes_received.saturating_sub(last_bytes) as f64 * 8.0 / elapsed.as_secs_f64();
            last_bytes = state.bytes_received;
            last_report = Instant::now();

            tracing::info!(
                "Stream stats: {} datagrams, {} TS packets, {:.1} kbit/s, {} lost, {} out of order, {} invalid, last timestamp {:?}",
                state.packets_received,
                state.ts_packets,
                rate / 1000.0,
                state.packets_lost,
                state.out_of_order,
                state.invalid_packets,
                state.last_timestamp
            );
        }
    }
}

/// Bind the listening socket and join the configured group.
fn open_receiver(config: &MonitorConfig) -> Result<UdpSocket> {
    let bind: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {}", config.bind_address))?;

    let group: Option<IpAddr> = config
        .multicast_group
        .as_deref()
        .map(str::parse)
        .transpose()
        .context("invalid multicast group")?;

    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_recv_buffer_size(4 * 1024 * 1024)?;
    socket.bind(&bind.into())?;

    match group {
        Some(IpAddr::V4(group)) => {
            let iface = match bind.ip() {
                IpAddr::V4(ip) => ip,
                IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
            };
            socket.join_multicast_v4(&group, &iface)?;
            tracing::info!("Joined multicast group {}", group);
        }
        Some(IpAddr::V6(group)) => {
            socket.join_multicast_v6(&group, 0)?;
            tracing::info!("Joined multicast group {}", group);
        }
        None => {}
    }

    Ok(socket.into())
}
