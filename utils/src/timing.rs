// Helpers for reading clocks and timing intervals
//
// Frame pacing and pose correlation work in monotonic nanoseconds,
// the log prefix uses wall clock milliseconds.
use nix::time::{clock_gettime, ClockId};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const NS_PER_MS: u64 = 1_000_000;
pub const NS_PER_SEC: u64 = 1_000_000_000;

pub fn get_current_time() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_millis(0))
}

// Helper to get the current time in milliseconds
pub fn get_current_millis() -> u32 {
    get_current_time().as_millis() as u32
}

/// Current value of the monotonic clock in nanoseconds
///
/// This is the time base used for all predicted present and display
/// times. If the monotonic clock can't be read we fall back to the
/// wall clock so callers always get a usable value.
pub fn get_monotonic_ns() -> u64 {
    match clock_gettime(ClockId::CLOCK_MONOTONIC) {
        Ok(ts) => ts.tv_sec() as u64 * NS_PER_SEC + ts.tv_nsec() as u64,
        Err(_) => get_current_time().as_nanos() as u64,
    }
}

/// Convert a frequency in Hz to a period in nanoseconds
pub fn hz_to_period_ns(hz: f64) -> u64 {
    if hz <= 0.0 {
        return 0;
    }
    (NS_PER_SEC as f64 / hz) as u64
}

// A stopclock for measuring time intervals
//
// The order of use MUST be `new`, `start`, `end`
// after that the recorded duration can be
// got with `get_duration`
pub struct StopWatch {
    sw_start: u64,
    sw_end: u64,
}

impl StopWatch {
    // Create an empty stopwatch
    pub fn new() -> StopWatch {
        StopWatch {
            sw_start: 0,
            sw_end: 0,
        }
    }

    pub fn start(&mut self) {
        self.sw_start = get_monotonic_ns();
    }

    pub fn end(&mut self) {
        self.sw_end = get_monotonic_ns();
    }

    pub fn get_duration(&self) -> Duration {
        Duration::from_nanos(self.sw_end.saturating_sub(self.sw_start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let a = get_monotonic_ns();
        let b = get_monotonic_ns();
        assert!(b >= a);
    }

    #[test]
    fn ninety_hz_period() {
        assert_eq!(hz_to_period_ns(90.0), 11_111_111);
        assert_eq!(hz_to_period_ns(0.0), 0);
    }

    #[test]
    fn stopwatch_measures_forward() {
        let mut sw = StopWatch::new();
        sw.start();
        std::thread::sleep(Duration::from_millis(2));
        sw.end();
        assert!(sw.get_duration() >= Duration::from_millis(2));
    }
}
