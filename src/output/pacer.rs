//! Output pacer
//!
//! Drains multiplexed units from the output queue and releases their
//! transport-stream packets at the rate given by the stream's own clock
//! references. The wall-clock deadline of every packet is
//! `baseline.wallclock + (clock_ref - baseline.clock_ref)`; the baseline is
//! captured from the first packet after startup or after a drop signal.
//!
//! ```text
//!            drop signal                    units >= fill threshold
//! STREAMING ─────────────► RESET-PENDING ─────────────────────────► STREAMING
//!     ▲                          │ units < fill threshold
//!     │ units >= fill threshold  ▼
//!     └──────────────────── FILLING
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::config::PacerConfig;
use crate::constants::{RTP_HEADER_SIZE, TS_PACKET_SIZE};
use crate::error::{Error, OutputError, Result};
use crate::network::sender::RtpSender;
use crate::network::udp::{DatagramSink, UdpTransport};
use crate::output::clock::{Clock, MonotonicClock, SleepOutcome};
use crate::output::fifo::TsFifo;
use crate::output::queue::{shutdown_channel, MuxedData, QueueConsumer, ShutdownSignal, ShutdownTrigger, Wake};

/// Pacer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerState {
    /// Accumulating units before playout
    Filling,
    /// Steady-state paced delivery
    Streaming,
    /// A drop was observed; the next packet sets a new baseline
    ResetPending,
}

/// Wall clock and stream clock captured at the same instant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockBaseline {
    /// Wall-clock reading in ticks
    pub wallclock: i64,
    /// Clock reference of the packet that set the baseline
    pub clock_ref: i64,
}

impl ClockBaseline {
    /// Wall-clock deadline for a packet carrying `clock_ref`
    pub fn deadline(&self, clock_ref: i64) -> i64 {
        self.wallclock
            .saturating_add(clock_ref.saturating_sub(self.clock_ref))
    }
}

/// How the pacer loop ended without error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacerExit {
    /// Shutdown was requested
    Shutdown,
    /// All producers went away and the buffer was flushed
    EndOfStream,
}

struct AtomicStats {
    units_received: AtomicU64,
    packets_sent: AtomicU64,
    bytes_sent: AtomicU64,
    late_packets: AtomicU64,
    resets: AtomicU64,
}

impl AtomicStats {
    fn new() -> Self {
        Self {
            units_received: AtomicU64::new(0),
            packets_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            late_packets: AtomicU64::new(0),
            resets: AtomicU64::new(0),
        }
    }

    fn snapshot(&self) -> OutputStats {
        OutputStats {
            units_received: self.units_received.load(Ordering::Relaxed),
            packets_sent: self.packets_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            late_packets: self.late_packets.load(Ordering::Relaxed),
            resets: self.resets.load(Ordering::Relaxed),
        }
    }
}

/// Statistics snapshot
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutputStats {
    /// Multiplexed units taken from the queue
    pub units_received: u64,
    /// Datagrams sent
    pub packets_sent: u64,
    /// Datagram bytes sent, headers included
    pub bytes_sent: u64,
    /// Packets whose deadline had already passed
    pub late_packets: u64,
    /// Drop signals observed
    pub resets: u64,
}

/// Paced delivery loop for one destination
pub struct OutputPacer<S: DatagramSink = UdpTransport, C: Clock = MonotonicClock> {
    /// Validated pacer settings
    config: PacerConfig,
    /// Units required before playout starts
    fill_threshold: usize,
    /// Consumer half of the output queue
    queue: QueueConsumer,
    /// RTP session for the destination
    sender: RtpSender<S>,
    /// Wall clock in stream ticks
    clock: C,
    /// Wakes both suspension points on shutdown
    shutdown: ShutdownSignal,
    /// Held until a handle takes it
    trigger: Option<ShutdownTrigger>,
    /// Packets waiting for their deadline
    fifo: TsFifo,
    /// Units taken from the queue but not yet buffered
    pending: Vec<MuxedData>,
    /// Reused datagram payload
    payload: Vec<u8>,
    /// Current state
    state: PacerState,
    /// Timing anchor, cleared on a drop signal
    baseline: Option<ClockBaseline>,
    /// Counters shared with the handle
    stats: Arc<AtomicStats>,
}

impl<S: DatagramSink, C: Clock> OutputPacer<S, C> {
    /// Build a pacer. Fails on a config that could never release a packet.
    pub fn new(config: PacerConfig, queue: QueueConsumer, sender: RtpSender<S>, clock: C) -> Result<Self> {
        config.validate()?;

        let (trigger, shutdown) = shutdown_channel();
        let fill_threshold = config.effective_fill_threshold();
        let payload = Vec::with_capacity(config.packets_per_datagram * TS_PACKET_SIZE);

        Ok(Self {
            config,
            fill_threshold,
            queue,
            sender,
            clock,
            shutdown,
            trigger: Some(trigger),
            fifo: TsFifo::new(),
            pending: Vec::new(),
            payload,
            state: PacerState::Filling,
            baseline: None,
            stats: Arc::new(AtomicStats::new()),
        })
    }

    /// Take the handle that stops this pacer. Once taken, dropping it stops the loop.
    pub fn take_shutdown_trigger(&mut self) -> Option<ShutdownTrigger> {
        self.trigger.take()
    }

    pub fn state(&self) -> PacerState {
        self.state
    }

    pub fn baseline(&self) -> Option<ClockBaseline> {
        self.baseline
    }

    /// Packets buffered in the FIFO
    pub fn buffered_packets(&self) -> usize {
        self.fifo.len()
    }

    /// Units held back while filling
    pub fn pending_units(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> OutputStats {
        self.stats.snapshot()
    }

    pub fn sender(&self) -> &RtpSender<S> {
        &self.sender
    }

    /// Run until shutdown, end of stream or a fatal error.
    ///
    /// The socket, FIFO and any undelivered units are released when this returns.
    pub fn run(mut self) -> Result<PacerExit> {
        loop {
            if let Some(exit) = self.iterate()? {
                return Ok(exit);
            }
        }
    }

    /// One pass of the loop: wait, observe drop, fill or drain, deliver.
    pub fn iterate(&mut self) -> Result<Option<PacerExit>> {
        let before = self.pending.len();
        match self.queue.wait(&mut self.pending, &self.shutdown) {
            Wake::Data => {}
            Wake::Shutdown => return Ok(Some(PacerExit::Shutdown)),
            Wake::Disconnected => return self.flush(),
        }
        self.stats
            .units_received
            .fetch_add((self.pending.len() - before) as u64, Ordering::Relaxed);

        // Refill the buffer after a drop
        if self.queue.take_drop() {
            tracing::info!("RTP output buffer reset");
            self.baseline = None;
            self.state = PacerState::ResetPending;
            self.stats.resets.fetch_add(1, Ordering::Relaxed);
        }

        if !self.ready() {
            return Ok(None);
        }

        self.drain_pending()?;
        self.deliver()
    }

    fn ready(&mut self) -> bool {
        if self.state == PacerState::Streaming {
            return true;
        }

        if self.pending.len() >= self.fill_threshold {
            if self.state == PacerState::Filling {
                tracing::debug!("Output buffer filled with {} units", self.pending.len());
            }
            self.state = PacerState::Streaming;
            true
        } else {
            self.state = PacerState::Filling;
            false
        }
    }

    fn drain_pending(&mut self) -> Result<()> {
        for unit in self.pending.drain(..) {
            self.fifo.push_unit(unit)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<Option<PacerExit>> {
        tracing::info!(
            "Output queue closed, flushing {} units",
            self.pending.len()
        );
        self.drain_pending()?;
        Ok(Some(self.deliver()?.unwrap_or(PacerExit::EndOfStream)))
    }

    /// Send every complete block in the FIFO, sleeping until each deadline.
    ///
    /// Returns `Some(Shutdown)` if a sleep was cancelled.
    fn deliver(&mut self) -> Result<Option<PacerExit>> {
        let block = self.config.packets_per_datagram;

        while let Some(clock_ref) = self.fifo.pop_block(block, &mut self.payload) {
            match self.baseline {
                Some(baseline) => {
                    let deadline = baseline.deadline(clock_ref);
                    let now = self.clock.now();
                    if deadline < now {
                        self.stats.late_packets.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!("Packet {} ticks behind schedule", now - deadline);
                    } else if self.clock.sleep_until(deadline, &self.shutdown) == SleepOutcome::Cancelled {
                        return Ok(Some(PacerExit::Shutdown));
                    }
                }
                None => {
                    let baseline = ClockBaseline {
                        wallclock: self.clock.now(),
                        clock_ref,
                    };
                    tracing::debug!(
                        "Clock baseline set: wallclock {} clock_ref {}",
                        baseline.wallclock,
                        baseline.clock_ref
                    );
                    self.baseline = Some(baseline);
                }
            }

            if let Err(e) = self.sender.send(&self.payload, clock_ref) {
                tracing::error!("[rtp] Failed to write RTP packet: {}", e);
                return Err(e.into());
            }

            self.stats.packets_sent.fetch_add(1, Ordering::Relaxed);
            self.stats
                .bytes_sent
                .fetch_add((RTP_HEADER_SIZE + self.payload.len()) as u64, Ordering::Relaxed);
        }

        Ok(None)
    }
}

impl<S, C> OutputPacer<S, C>
where
    S: DatagramSink + 'static,
    C: Clock + 'static,
{
    /// Move the pacer onto its own output thread.
    ///
    /// The handle must own the shutdown trigger, so a pacer whose trigger was
    /// already taken is refused.
    pub fn spawn(mut self, name: &str) -> Result<OutputHandle> {
        let trigger = self
            .take_shutdown_trigger()
            .ok_or_else(|| OutputError::ThreadSpawn("shutdown trigger already taken".to_string()))?;
        let stats = self.stats.clone();
        let priority = self.config.priority;

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                priority.apply_or_warn();

                let result = self.run();
                match &result {
                    Ok(exit) => tracing::info!("RTP output stopped: {:?}", exit),
                    Err(e) => tracing::error!("RTP output terminated: {}", e),
                }
                result
            })
            .map_err(|e| OutputError::ThreadSpawn(e.to_string()))?;

        Ok(OutputHandle {
            trigger: Some(trigger),
            thread: Some(thread),
            stats,
        })
    }
}

/// Open `destination` and start pacing `queue` to it on a dedicated thread.
pub fn spawn_output(destination: &str, config: PacerConfig, queue: QueueConsumer) -> Result<OutputHandle> {
    config.validate()?;

    let transport = UdpTransport::open_url(destination)?;
    let datagram_size = RTP_HEADER_SIZE + config.packets_per_datagram * TS_PACKET_SIZE;
    if let Some(max) = transport.max_packet_size() {
        if datagram_size > max {
            tracing::warn!(
                "Datagrams of {} bytes exceed pkt_size {} for {}",
                datagram_size,
                max,
                destination
            );
        }
    }

    let clock = MonotonicClock::new(config.ticks_per_second);
    let sender = RtpSender::open(transport);
    tracing::info!("Starting RTP output to {}", sender.sink().remote_addr());
    OutputPacer::new(config, queue, sender, clock)?.spawn("rtp-output")
}

/// Owner of a running output thread
pub struct OutputHandle {
    trigger: Option<ShutdownTrigger>,
    thread: Option<JoinHandle<Result<PacerExit>>>,
    stats: Arc<AtomicStats>,
}

impl OutputHandle {
    pub fn stats(&self) -> OutputStats {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, |t| t.is_finished())
    }

    /// Request shutdown and wait for the thread.
    pub fn stop(mut self) -> Result<PacerExit> {
        if let Some(trigger) = self.trigger.take() {
            trigger.trigger();
        }
        self.join_thread()
    }

    /// Wait for the thread to end on its own (end of stream or error).
    pub fn join(mut self) -> Result<PacerExit> {
        self.join_thread()
    }

    fn join_thread(&mut self) -> Result<PacerExit> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| Error::from(OutputError::ThreadPanicked))?,
            None => Ok(PacerExit::Shutdown),
        }
    }
}

impl Drop for OutputHandle {
    fn drop(&mut self) {
        self.trigger.take();
        let _ = self.join_thread();
    }
}
