//! Paired transport-stream FIFO
//!
//! Every buffered 188-byte packet travels together with its clock
//! reference, so the payload and clock-reference views can never drift.

use std::collections::VecDeque;

use crate::constants::TS_PACKET_SIZE;
use crate::error::OutputError;
use crate::output::queue::MuxedData;

/// One transport-stream packet and the clock reference it was muxed with
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TsPacket {
    pub data: [u8; TS_PACKET_SIZE],
    pub clock_ref: i64,
}

impl std::fmt::Debug for TsPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TsPacket")
            .field("pid", &(u16::from_be_bytes([self.data[1], self.data[2]]) & 0x1FFF))
            .field("clock_ref", &self.clock_ref)
            .finish()
    }
}

/// Growable ring buffer of [`TsPacket`]s
#[derive(Debug, Default)]
pub struct TsFifo {
    packets: VecDeque<TsPacket>,
}

impl TsFifo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy a multiplexed unit's packets and clock references in, then drop the unit.
    pub fn push_unit(&mut self, unit: MuxedData) -> Result<(), OutputError> {
        let count = unit.packet_count();
        self.packets.try_reserve(count).map_err(|e| {
            OutputError::AllocationFailed(format!("{} packets: {}", count, e))
        })?;

        for (chunk, &clock_ref) in unit.data().chunks_exact(TS_PACKET_SIZE).zip(unit.clock_refs()) {
            let mut data = [0u8; TS_PACKET_SIZE];
            data.copy_from_slice(chunk);
            self.packets.push_back(TsPacket { data, clock_ref });
        }

        Ok(())
    }

    /// Pop one packet with its clock reference.
    pub fn pop(&mut self) -> Option<TsPacket> {
        self.packets.pop_front()
    }

    /// Pop `count` packets into `payload` (cleared first).
    ///
    /// Returns the first packet's clock reference, or `None` without
    /// touching the FIFO when fewer than `count` packets are buffered.
    pub fn pop_block(&mut self, count: usize, payload: &mut Vec<u8>) -> Option<i64> {
        if count == 0 || self.packets.len() < count {
            return None;
        }

        payload.clear();
        let mut first = None;
        for packet in self.packets.drain(..count) {
            first.get_or_insert(packet.clock_ref);
            payload.extend_from_slice(&packet.data);
        }
        first
    }

    /// Buffered packets (the clock-reference count)
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Buffered payload bytes, always `len() * 188`
    pub fn byte_len(&self) -> usize {
        self.packets.len() * TS_PACKET_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }
}
