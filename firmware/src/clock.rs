//! `embassy-time` backed clock for the flow board.

use core::time::Duration;

use embassy_time::Instant;
use flow_core::clock::{Clock, MonotonicInstant};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct BoardInstant(pub Instant);

impl BoardInstant {
    pub fn as_millis(self) -> u64 {
        self.0.as_millis()
    }
}

impl MonotonicInstant for BoardInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_micros(self.0.saturating_duration_since(earlier.0).as_micros())
    }
}

/// Clock whose delays busy-wait on the embassy time driver.
#[derive(Copy, Clone, Debug, Default)]
pub struct BoardClock;

impl Clock for BoardClock {
    type Instant = BoardInstant;

    fn now(&self) -> BoardInstant {
        BoardInstant(Instant::now())
    }

    fn delay(&mut self, duration: Duration) {
        embassy_time::block_for(to_embassy(duration));
    }
}

/// Converts a core duration, saturating at the embassy tick range.
pub fn to_embassy(duration: Duration) -> embassy_time::Duration {
    let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
    embassy_time::Duration::from_micros(micros)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_time_saturates_backwards() {
        let early = BoardInstant(Instant::from_millis(10));
        let late = BoardInstant(Instant::from_millis(260));

        assert_eq!(
            late.saturating_duration_since(early),
            Duration::from_millis(250)
        );
        assert_eq!(early.saturating_duration_since(late), Duration::ZERO);
    }

    #[test]
    fn pulse_widths_convert_exactly() {
        assert_eq!(
            to_embassy(Duration::from_millis(64)),
            embassy_time::Duration::from_millis(64)
        );
    }
}
