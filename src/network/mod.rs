//! Network subsystem: destinations, UDP transport and RTP encapsulation

pub mod destination;
pub mod udp;
pub mod sender;

pub use destination::{Destination, DestinationOptions};
pub use udp::{DatagramSink, UdpTransport};
pub use sender::{RtpSender, SenderStats};
