//! RTP encapsulation of transport-stream blocks
//!
//! One `RtpSender` per destination. It owns the sequence counter and the
//! randomly chosen SSRC for the lifetime of the session.

use crate::constants::{RTP_HEADER_SIZE, TS_PACKET_SIZE};
use crate::error::NetworkError;
use crate::network::udp::{DatagramSink, UdpTransport};
use crate::protocol::RtpHeader;

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SenderStats {
    /// Datagrams successfully sent
    pub packets_sent: u32,
    /// Payload bytes successfully sent (header excluded)
    pub octets_sent: u32,
}

/// RTP session bound to one transport
pub struct RtpSender<S: DatagramSink = UdpTransport> {
    sink: S,
    sequence: u16,
    ssrc: u32,
    stats: SenderStats,
    /// Reused datagram buffer
    datagram: Vec<u8>,
}

impl<S: DatagramSink> RtpSender<S> {
    /// Start a session with a random SSRC and sequence number zero.
    pub fn open(sink: S) -> Self {
        Self::with_ssrc(sink, rand::random())
    }

    /// Start a session with a fixed SSRC.
    pub fn with_ssrc(sink: S, ssrc: u32) -> Self {
        tracing::debug!("RTP session opened, ssrc {:08x}", ssrc);
        Self {
            sink,
            sequence: 0,
            ssrc,
            stats: SenderStats::default(),
            datagram: Vec::with_capacity(RTP_HEADER_SIZE + TS_PACKET_SIZE * 7),
        }
    }

    /// Wrap `payload` in an RTP header stamped with `timestamp` and send it.
    ///
    /// The sequence number advances whether or not the send succeeds, so
    /// receivers see a failed send as loss.
    pub fn send(&mut self, payload: &[u8], timestamp: i64) -> Result<usize, NetworkError> {
        let header = RtpHeader::mpeg_ts(self.sequence, timestamp as u32, self.ssrc);
        self.sequence = self.sequence.wrapping_add(1);

        self.datagram.clear();
        self.datagram.extend_from_slice(&header.to_bytes());
        self.datagram.extend_from_slice(payload);

        let sent = self.sink.send(&self.datagram)?;

        self.stats.packets_sent = self.stats.packets_sent.wrapping_add(1);
        self.stats.octets_sent = self.stats.octets_sent.wrapping_add(payload.len() as u32);

        Ok(sent)
    }

    /// Sequence number the next datagram will carry
    pub fn next_sequence(&self) -> u16 {
        self.sequence
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn stats(&self) -> SenderStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// End the session, returning the transport.
    pub fn close(self) -> S {
        tracing::debug!(
            "RTP session {:08x} closed after {} packets, {} octets",
            self.ssrc,
            self.stats.packets_sent,
            self.stats.octets_sent
        );
        self.sink
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::protocol::RtpPacket;
    use proptest::prelude::*;
    use std::sync::Arc;

    use parking_lot::Mutex;

    /// In-memory sink that can be told to fail on a given call.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingSink {
        pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
        pub fail_on_call: Option<usize>,
        calls: usize,
    }

    impl RecordingSink {
        pub fn failing_on(call: usize) -> Self {
            Self {
                fail_on_call: Some(call),
                ..Default::default()
            }
        }
    }

    impl DatagramSink for RecordingSink {
        fn send(&mut self, datagram: &[u8]) -> Result<usize, NetworkError> {
            self.calls += 1;
            if self.fail_on_call == Some(self.calls) {
                return Err(NetworkError::SendFailed("injected".to_string()));
            }
            self.sent.lock().push(datagram.to_vec());
            Ok(datagram.len())
        }
    }

    #[test]
    fn test_encapsulate_roundtrip() {
        let sink = RecordingSink::default();
        let sent = sink.sent.clone();
        let mut sender = RtpSender::with_ssrc(sink, 0xCAFEBABE);

        let payload: Vec<u8> = (0..TS_PACKET_SIZE).map(|i| (i * 7) as u8).collect();
        let timestamp = (5i64 << 32) + 123_456;
        assert_eq!(sender.send(&payload, timestamp).unwrap(), RTP_HEADER_SIZE + TS_PACKET_SIZE);

        let datagrams = sent.lock();
        let packet = RtpPacket::parse(&datagrams[0]).unwrap();
        assert_eq!(packet.payload, &payload[..]);
        assert_eq!(packet.header.timestamp, 123_456);
        assert_eq!(packet.header.ssrc, 0xCAFEBABE);
        assert_eq!(packet.header.sequence, 0);
        assert_eq!(packet.header.payload_type, 33);
    }

    #[test]
    fn test_sequence_advances_on_failure() {
        let mut sender = RtpSender::with_ssrc(RecordingSink::failing_on(2), 1);
        let payload = [0x47u8; TS_PACKET_SIZE];

        assert!(sender.send(&payload, 0).is_ok());
        assert!(sender.send(&payload, 0).is_err());
        assert!(sender.send(&payload, 0).is_ok());

        assert_eq!(sender.next_sequence(), 3);
        assert_eq!(
            sender.stats(),
            SenderStats {
                packets_sent: 2,
                octets_sent: 2 * TS_PACKET_SIZE as u32,
            }
        );

        let sequences: Vec<u16> = sender
            .sink()
            .sent
            .lock()
            .iter()
            .map(|d| RtpPacket::parse(d).unwrap().header.sequence)
            .collect();
        assert_eq!(sequences, vec![0, 2]);
    }

    #[test]
    fn test_sequence_wraps() {
        let mut sender = RtpSender::with_ssrc(RecordingSink::default(), 1);
        sender.sequence = u16::MAX;
        sender.send(&[0x47; TS_PACKET_SIZE], 0).unwrap();
        assert_eq!(sender.next_sequence(), 0);
    }

    #[test]
    fn test_random_ssrc_differs() {
        let a = RtpSender::open(RecordingSink::default());
        let b = RtpSender::open(RecordingSink::default());
        let c = RtpSender::open(RecordingSink::default());
        // three identical 32-bit draws are not a realistic outcome
        assert!(a.ssrc() != b.ssrc() || b.ssrc() != c.ssrc());
    }

    proptest! {
        #[test]
        fn prop_sequences_gap_free(start in any::<u16>(), count in 1usize..300) {
            let mut sender = RtpSender::with_ssrc(RecordingSink::default(), 7);
            sender.sequence = start;
            for i in 0..count {
                sender.send(&[0x47; TS_PACKET_SIZE], i as i64).unwrap();
            }

            let sent = sender.sink().sent.lock();
            for (i, datagram) in sent.iter().enumerate() {
                let header = RtpPacket::parse(datagram).unwrap().header;
                prop_assert_eq!(header.sequence, start.wrapping_add(i as u16));
            }
        }
    }
}
