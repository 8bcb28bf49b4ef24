//! Output queue between the multiplexer and the pacer
//!
//! Multi-producer, single-consumer. Producers hand over whole multiplexed
//! units and may raise the drop flag to force a timing reset; the pacer
//! thread is the only consumer.

use bytes::Bytes;
use crossbeam_channel::{bounded, select, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::constants::TS_PACKET_SIZE;
use crate::error::OutputError;

/// A block of whole transport-stream packets with one clock reference per packet
#[derive(Debug, Clone)]
pub struct MuxedData {
    data: Bytes,
    clock_refs: Vec<i64>,
}

impl MuxedData {
    /// Validates that `data` is 188-aligned and carries exactly one clock reference per packet.
    pub fn new(data: impl Into<Bytes>, clock_refs: Vec<i64>) -> Result<Self, OutputError> {
        let data = data.into();

        if data.len() % TS_PACKET_SIZE != 0 {
            return Err(OutputError::InvalidMuxedData(format!(
                "{} bytes is not a whole number of transport packets",
                data.len()
            )));
        }

        let packets = data.len() / TS_PACKET_SIZE;
        if clock_refs.len() != packets {
            return Err(OutputError::InvalidMuxedData(format!(
                "{} packets but {} clock references",
                packets,
                clock_refs.len()
            )));
        }

        Ok(Self { data, clock_refs })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn clock_refs(&self) -> &[i64] {
        &self.clock_refs
    }

    pub fn packet_count(&self) -> usize {
        self.clock_refs.len()
    }
}

/// Producer half, cloneable across multiplexer threads
#[derive(Clone)]
pub struct QueueProducer {
    tx: Sender<MuxedData>,
    drop_flag: Arc<AtomicBool>,
}

impl QueueProducer {
    /// Hand a unit to the output. Blocks only on a full bounded queue.
    pub fn enqueue(&self, unit: MuxedData) -> Result<(), OutputError> {
        self.tx.send(unit).map_err(|_| OutputError::QueueClosed)
    }

    /// Ask the output to discard its clock baseline (e.g. after an overload).
    pub fn signal_drop(&self) {
        self.drop_flag.store(true, Ordering::Release);
    }

    /// Units waiting to be picked up
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Why [`QueueConsumer::wait`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// At least one unit was moved into the caller's list
    Data,
    /// Shutdown was requested
    Shutdown,
    /// Every producer is gone and the queue is empty
    Disconnected,
}

/// Consumer half, owned by the pacer thread
pub struct QueueConsumer {
    rx: Receiver<MuxedData>,
    drop_flag: Arc<AtomicBool>,
}

impl QueueConsumer {
    /// Block until data arrives or shutdown fires, then move every queued unit into `pending`.
    pub fn wait(&self, pending: &mut Vec<MuxedData>, shutdown: &ShutdownSignal) -> Wake {
        select! {
            recv(self.rx) -> unit => match unit {
                Ok(unit) => {
                    pending.push(unit);
                    pending.extend(self.rx.try_iter());
                    Wake::Data
                }
                Err(_) => Wake::Disconnected,
            },
            recv(shutdown.rx) -> _ => Wake::Shutdown,
        }
    }

    /// Read and clear the drop flag.
    pub fn take_drop(&self) -> bool {
        self.drop_flag.swap(false, Ordering::AcqRel)
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Create an unbounded output queue.
pub fn output_queue() -> (QueueProducer, QueueConsumer) {
    split(unbounded())
}

/// Create an output queue holding at most `capacity` units.
pub fn bounded_output_queue(capacity: usize) -> (QueueProducer, QueueConsumer) {
    split(bounded(capacity))
}

fn split((tx, rx): (Sender<MuxedData>, Receiver<MuxedData>)) -> (QueueProducer, QueueConsumer) {
    let drop_flag = Arc::new(AtomicBool::new(false));
    (
        QueueProducer {
            tx,
            drop_flag: drop_flag.clone(),
        },
        QueueConsumer { rx, drop_flag },
    )
}

/// Fires shutdown when triggered or dropped
pub struct ShutdownTrigger {
    _tx: Sender<()>,
}

impl ShutdownTrigger {
    pub fn trigger(self) {}
}

/// Receiving side of a shutdown request
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: Receiver<()>,
}

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        !matches!(self.rx.try_recv(), Err(TryRecvError::Empty))
    }

    /// Sleep for `timeout` unless shutdown fires first. Returns true on shutdown.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        !matches!(self.rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout))
    }
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = bounded(0);
    (ShutdownTrigger { _tx: tx }, ShutdownSignal { rx })
}
