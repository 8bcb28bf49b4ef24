//! # TS-over-RTP Output
//!
//! Real-time output stage for MPEG transport streams: paced delivery of
//! multiplexed packets over UDP, unicast or multicast, wrapped in RTP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         MULTIPLEXER THREADS                          │
//! │   ┌──────────────┐   ┌──────────────┐   ┌──────────────┐            │
//! │   │ QueueProducer│   │ QueueProducer│   │ signal_drop()│            │
//! │   └──────┬───────┘   └──────┬───────┘   └──────┬───────┘            │
//! └──────────┼──────────────────┼──────────────────┼────────────────────┘
//!            │ MuxedData        │                  │ drop flag
//!            ▼                  ▼                  ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                      OUTPUT THREAD (output::pacer)                   │
//! │   ┌──────────────┐   ┌──────────────┐   ┌──────────────────────┐    │
//! │   │ Output Queue │──►│   TS FIFO    │──►│ Deadline sleep       │    │
//! │   │ (crossbeam)  │   │ packet + PCR │   │ base + (PCR - PCR0)  │    │
//! │   └──────────────┘   └──────────────┘   └──────────┬───────────┘    │
//! │                                                    ▼                 │
//! │   ┌────────────────────────────────────────────────────────────┐    │
//! │   │  RTP Sender (network::sender) - PT 33, 12-byte header      │    │
//! │   └──────────────────────────┬─────────────────────────────────┘    │
//! │   ┌──────────────────────────▼─────────────────────────────────┐    │
//! │   │  UDP Transport (network::udp) - unicast / multicast        │    │
//! │   └──────────────────────────┬─────────────────────────────────┘    │
//! └──────────────────────────────┼───────────────────────────────────────┘
//!                                ▼ udp://host:port?ttl=..&miface=..
//! ```

pub mod config;
pub mod error;
pub mod network;
pub mod output;
pub mod protocol;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Size of one MPEG transport-stream packet
    pub const TS_PACKET_SIZE: usize = 188;

    /// Transport-stream packets that fit a standard 1500-byte MTU datagram
    pub const MAX_TS_PACKETS_PER_DATAGRAM: usize = 7;

    /// Fixed RTP header size (no CSRC, no extension)
    pub const RTP_HEADER_SIZE: usize = 12;

    /// RTP protocol version
    pub const RTP_VERSION: u8 = 2;

    /// Static payload type for MPEG-2 transport streams (RFC 3551)
    pub const MPEG_TS_PAYLOAD_TYPE: u8 = 33;

    /// MPEG system clock frequency
    pub const MPEG_CLOCK_HZ: u64 = 27_000_000;

    /// Units buffered before playout in normal latency mode
    pub const DEFAULT_FILL_THRESHOLD: usize = 2;

    /// Multicast TTL when none is given
    pub const DEFAULT_MULTICAST_TTL: u32 = 16;

    /// SCHED_FIFO priority for the output thread
    pub const DEFAULT_RT_PRIORITY: i32 = 99;

    /// Default UDP port
    pub const DEFAULT_UDP_PORT: u16 = 5000;
}
