//! RTP wire format for MPEG transport streams
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |              188-byte aligned transport stream payload        |
//! ```

use crate::constants::{MPEG_TS_PAYLOAD_TYPE, RTP_HEADER_SIZE, RTP_VERSION, TS_PACKET_SIZE};
use crate::error::NetworkError;

/// RTP fixed header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Header for one MPEG-TS datagram: no padding, extension, CSRCs or marker.
    pub fn mpeg_ts(sequence: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: MPEG_TS_PAYLOAD_TYPE,
            sequence,
            timestamp,
            ssrc,
        }
    }

    /// Serialize into the 12-byte network-order representation.
    pub fn to_bytes(&self) -> [u8; RTP_HEADER_SIZE] {
        let mut out = [0u8; RTP_HEADER_SIZE];
        out[0] = (self.version << 6)
            | if self.padding { 0x20 } else { 0 }
            | if self.extension { 0x10 } else { 0 }
            | (self.csrc_count & 0x0F);
        out[1] = if self.marker { 0x80 } else { 0 } | (self.payload_type & 0x7F);
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        out
    }

    /// Parse the fixed header. Only version 2 is accepted.
    pub fn parse(data: &[u8]) -> Result<Self, NetworkError> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(NetworkError::InvalidPacket);
        }

        let version = data[0] >> 6;
        if version != RTP_VERSION {
            return Err(NetworkError::InvalidPacket);
        }

        Ok(Self {
            version,
            padding: data[0] & 0x20 != 0,
            extension: data[0] & 0x10 != 0,
            csrc_count: data[0] & 0x0F,
            marker: data[1] & 0x80 != 0,
            payload_type: data[1] & 0x7F,
            sequence: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// Header length including the CSRC list
    pub fn header_size(&self) -> usize {
        RTP_HEADER_SIZE + self.csrc_count as usize * 4
    }
}

/// A parsed datagram borrowing its payload
#[derive(Debug)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a datagram, skipping CSRCs and header extension and removing padding.
    pub fn parse(data: &'a [u8]) -> Result<Self, NetworkError> {
        let header = RtpHeader::parse(data)?;
        let mut offset = header.header_size();

        if header.extension {
            if data.len() < offset + 4 {
                return Err(NetworkError::InvalidPacket);
            }
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4 + words * 4;
        }

        if offset > data.len() {
            return Err(NetworkError::InvalidPacket);
        }

        let end = if header.padding {
            let pad = data[data.len() - 1] as usize;
            if pad == 0 || pad > data.len() - offset {
                return Err(NetworkError::InvalidPacket);
            }
            data.len() - pad
        } else {
            data.len()
        };

        Ok(Self {
            header,
            payload: &data[offset..end],
        })
    }

    /// Number of whole transport-stream packets carried
    pub fn ts_packet_count(&self) -> usize {
        self.payload.len() / TS_PACKET_SIZE
    }
}
