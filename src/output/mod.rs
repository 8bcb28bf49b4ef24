//! Output subsystem: queue, packet buffer, clock and the pacing loop

pub mod clock;
pub mod fifo;
pub mod pacer;
pub mod priority;
pub mod queue;

pub use clock::{Clock, ManualClock, MonotonicClock, SleepOutcome};
pub use fifo::{TsFifo, TsPacket};
pub use pacer::{spawn_output, ClockBaseline, OutputHandle, OutputPacer, OutputStats, PacerExit, PacerState};
pub use priority::ThreadPriority;
pub use queue::{bounded_output_queue, output_queue, MuxedData, QueueConsumer, QueueProducer};
