//! Wall clock expressed in stream ticks
//!
//! The pacer compares clock references against a wall clock running in the
//! same tick domain (27 MHz for MPEG-TS). `MonotonicClock` is the real one;
//! `ManualClock` is a virtual clock whose sleeps complete instantly, used to
//! drive the pacer deterministically.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::output::queue::ShutdownSignal;

/// Result of a deadline sleep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepOutcome {
    Reached,
    Cancelled,
}

/// Source of wall-clock time for the pacer
pub trait Clock: Send {
    /// Current reading in ticks
    fn now(&self) -> i64;

    /// Suspend until `deadline` ticks. Only shutdown may end the sleep early.
    fn sleep_until(&mut self, deadline: i64, shutdown: &ShutdownSignal) -> SleepOutcome;
}

/// Convert a tick count to a duration; negative counts are zero.
pub fn ticks_to_duration(ticks: i64, ticks_per_second: u64) -> Duration {
    if ticks <= 0 || ticks_per_second == 0 {
        return Duration::ZERO;
    }
    let nanos = ticks as u128 * 1_000_000_000 / ticks_per_second as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}

/// Convert a duration to ticks, saturating at `i64::MAX`.
pub fn duration_to_ticks(duration: Duration, ticks_per_second: u64) -> i64 {
    let ticks = duration.as_nanos() * ticks_per_second as u128 / 1_000_000_000;
    ticks.min(i64::MAX as u128) as i64
}

/// Monotonic system clock counting ticks from its creation
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
    ticks_per_second: u64,
}

impl MonotonicClock {
    pub fn new(ticks_per_second: u64) -> Self {
        Self {
            origin: Instant::now(),
            ticks_per_second,
        }
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> i64 {
        duration_to_ticks(self.origin.elapsed(), self.ticks_per_second)
    }

    fn sleep_until(&mut self, deadline: i64, shutdown: &ShutdownSignal) -> SleepOutcome {
        loop {
            let remaining = deadline - self.now();
            if remaining <= 0 {
                return SleepOutcome::Reached;
            }

            // Round up so we never wake a tick short and spin
            let wait = ticks_to_duration(remaining, self.ticks_per_second) + Duration::from_nanos(1);
            if shutdown.wait_timeout(wait) {
                return SleepOutcome::Cancelled;
            }
        }
    }
}

#[derive(Debug, Default)]
struct ManualState {
    now: i64,
    sleeps: Vec<(i64, i64)>,
}

/// Virtual clock: sleeping jumps straight to the deadline and is recorded
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ManualState>>,
}

impl ManualClock {
    pub fn new(start: i64) -> Self {
        let clock = Self::default();
        clock.set(start);
        clock
    }

    pub fn set(&self, now: i64) {
        self.state.lock().now = now;
    }

    pub fn advance(&self, ticks: i64) {
        self.state.lock().now += ticks;
    }

    /// Every sleep so far as `(called_at, deadline)`
    pub fn sleeps(&self) -> Vec<(i64, i64)> {
        self.state.lock().sleeps.clone()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.state.lock().now
    }

    fn sleep_until(&mut self, deadline: i64, shutdown: &ShutdownSignal) -> SleepOutcome {
        if shutdown.is_triggered() {
            return SleepOutcome::Cancelled;
        }

        let mut state = self.state.lock();
        let called_at = state.now;
        state.sleeps.push((called_at, deadline));
        if deadline > called_at {
            state.now = deadline;
        }
        SleepOutcome::Reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MPEG_CLOCK_HZ;
    use crate::output::queue::shutdown_channel;

    #[test]
    fn test_tick_conversions() {
        assert_eq!(ticks_to_duration(27_000_000, MPEG_CLOCK_HZ), Duration::from_secs(1));
        assert_eq!(ticks_to_duration(2700, 1_000_000), Duration::from_micros(2700));
        assert_eq!(ticks_to_duration(-5, MPEG_CLOCK_HZ), Duration::ZERO);
        assert_eq!(duration_to_ticks(Duration::from_millis(1), MPEG_CLOCK_HZ), 27_000);
    }

    #[test]
    fn test_monotonic_sleep_reaches_deadline() {
        let (_trigger, shutdown) = shutdown_channel();
        let mut clock = MonotonicClock::new(1_000_000);

        let deadline = clock.now() + 5_000;
        assert_eq!(clock.sleep_until(deadline, &shutdown), SleepOutcome::Reached);
        assert!(clock.now() >= deadline);

        // a deadline in the past returns at once
        let start = Instant::now();
        assert_eq!(clock.sleep_until(0, &shutdown), SleepOutcome::Reached);
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_monotonic_sleep_cancelled() {
        let (trigger, shutdown) = shutdown_channel();
        let mut clock = MonotonicClock::new(1_000_000);
        drop(trigger);

        let start = Instant::now();
        let far = clock.now() + 60_000_000;
        assert_eq!(clock.sleep_until(far, &shutdown), SleepOutcome::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_manual_clock_records_sleeps() {
        let (_trigger, shutdown) = shutdown_channel();
        let mut clock = ManualClock::new(100);

        clock.sleep_until(250, &shutdown);
        assert_eq!(clock.now(), 250);
        clock.sleep_until(200, &shutdown); // already late
        assert_eq!(clock.now(), 250);
        clock.advance(10);
        assert_eq!(clock.now(), 260);

        assert_eq!(clock.sleeps(), vec![(100, 250), (250, 200)]);
    }
}
