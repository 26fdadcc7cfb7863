//! Power rail control for the remote flow board.
//!
//! The sequencer is the only owner of [`PowerState`]. It is driven by the
//! protocol engine, which power-cycles the board when it stops answering.

use core::time::Duration;

use crate::clock::{Clock, MonotonicInstant};
use crate::protocol::Transport;
use crate::telemetry::{EventPayload, EventRecorder, FlowEventKind};

/// Settle time after energizing the rail.
pub const POWER_SETTLE: Duration = Duration::from_millis(1_000);
/// Settle time after the link wake sequence.
pub const WAKE_SETTLE: Duration = Duration::from_millis(100);

/// Hardware seam for the power-enable output.
pub trait PowerSwitch {
    fn set_enabled(&mut self, enabled: bool);
}

/// Switch that ignores requests, used on hosts without a rail.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPowerSwitch;

impl PowerSwitch for NoopPowerSwitch {
    fn set_enabled(&mut self, _enabled: bool) {}
}

/// Observable rail state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PowerState<TInstant> {
    pub energized: bool,
    pub powered_at: Option<TInstant>,
}

impl<TInstant> PowerState<TInstant> {
    #[must_use]
    pub const fn off() -> Self {
        Self {
            energized: false,
            powered_at: None,
        }
    }
}

/// Drives the flow board power rail and tracks when it came up.
pub struct PowerSequencer<P, TInstant> {
    switch: P,
    state: PowerState<TInstant>,
    settle: Duration,
    wake_settle: Duration,
}

impl<P, TInstant> PowerSequencer<P, TInstant>
where
    P: PowerSwitch,
    TInstant: MonotonicInstant,
{
    /// Creates a sequencer with the default settle intervals. The rail
    /// starts de-energized.
    #[must_use]
    pub const fn new(switch: P) -> Self {
        Self::with_timing(switch, POWER_SETTLE, WAKE_SETTLE)
    }

    #[must_use]
    pub const fn with_timing(switch: P, settle: Duration, wake_settle: Duration) -> Self {
        Self {
            switch,
            state: PowerState::off(),
            settle,
            wake_settle,
        }
    }

    #[must_use]
    pub fn state(&self) -> PowerState<TInstant> {
        self.state
    }

    #[must_use]
    pub fn is_energized(&self) -> bool {
        self.state.energized
    }

    pub fn switch(&self) -> &P {
        &self.switch
    }

    pub fn switch_mut(&mut self) -> &mut P {
        &mut self.switch
    }

    /// Energizes the rail and blocks for the settle interval.
    ///
    /// Returns `false` without touching the output when already energized.
    pub fn power_on<C, const N: usize>(
        &mut self,
        clock: &mut C,
        events: &mut EventRecorder<TInstant, N>,
    ) -> bool
    where
        C: Clock<Instant = TInstant>,
    {
        if self.state.energized {
            return false;
        }

        self.switch.set_enabled(true);
        let now = clock.now();
        self.state = PowerState {
            energized: true,
            powered_at: Some(now),
        };
        events.record(FlowEventKind::PowerOn, EventPayload::None, now);
        clock.delay(self.settle);
        true
    }

    /// De-energizes the rail. The output is always driven low; the event is
    /// only logged on an actual transition.
    pub fn power_off<C, const N: usize>(
        &mut self,
        clock: &mut C,
        events: &mut EventRecorder<TInstant, N>,
    ) -> bool
    where
        C: Clock<Instant = TInstant>,
    {
        self.switch.set_enabled(false);
        let was_energized = self.state.energized;
        if was_energized {
            events.record_power_off(self.state.powered_at, clock.now());
        }
        self.state = PowerState::off();
        was_energized
    }

    /// Off then on.
    pub fn power_cycle<C, const N: usize>(
        &mut self,
        clock: &mut C,
        events: &mut EventRecorder<TInstant, N>,
    ) where
        C: Clock<Instant = TInstant>,
    {
        self.power_off(clock, events);
        self.power_on(clock, events);
    }

    /// Powers a sleeping board, then wakes the link and waits for it to
    /// settle. Does nothing while the board is energized.
    pub fn wakeup<C, T, const N: usize>(
        &mut self,
        clock: &mut C,
        link: &mut T,
        events: &mut EventRecorder<TInstant, N>,
    ) -> bool
    where
        C: Clock<Instant = TInstant>,
        T: Transport,
    {
        if !self.power_on(clock, events) {
            return false;
        }
        link.wake();
        events.record(FlowEventKind::Wakeup, EventPayload::None, clock.now());
        clock.delay(self.wake_settle);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TransportError;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct TickInstant(u64);

    impl MonotonicInstant for TickInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(earlier.0))
        }
    }

    #[derive(Default)]
    struct VirtualClock {
        now_ms: u64,
    }

    impl Clock for VirtualClock {
        type Instant = TickInstant;

        fn now(&self) -> TickInstant {
            TickInstant(self.now_ms)
        }

        fn delay(&mut self, duration: Duration) {
            self.now_ms += u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        }
    }

    #[derive(Default)]
    struct CountingSwitch {
        level: bool,
        on_calls: usize,
        off_calls: usize,
    }

    impl PowerSwitch for CountingSwitch {
        fn set_enabled(&mut self, enabled: bool) {
            self.level = enabled;
            if enabled {
                self.on_calls += 1;
            } else {
                self.off_calls += 1;
            }
        }
    }

    #[derive(Default)]
    struct WakeCounter {
        wakes: usize,
    }

    impl Transport for WakeCounter {
        fn send(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn receive(&mut self, _buffer: &mut [u8]) -> Result<usize, TransportError> {
            Ok(0)
        }

        fn wake(&mut self) {
            self.wakes += 1;
        }
    }

    #[test]
    fn power_on_stamps_time_and_waits_for_settle() {
        let mut clock = VirtualClock { now_ms: 40 };
        let mut events = EventRecorder::<TickInstant>::new();
        let mut power = PowerSequencer::new(CountingSwitch::default());

        assert!(power.power_on(&mut clock, &mut events));
        assert_eq!(power.state().powered_at, Some(TickInstant(40)));
        assert_eq!(clock.now_ms, 1_040);
        assert!(power.switch().level);
        assert_eq!(events.count(FlowEventKind::PowerOn), 1);
    }

    #[test]
    fn power_on_is_noop_when_energized() {
        let mut clock = VirtualClock::default();
        let mut events = EventRecorder::<TickInstant>::new();
        let mut power = PowerSequencer::new(CountingSwitch::default());

        power.power_on(&mut clock, &mut events);
        assert!(!power.power_on(&mut clock, &mut events));
        assert_eq!(power.switch().on_calls, 1);
        assert_eq!(clock.now_ms, 1_000);
    }

    #[test]
    fn power_off_logs_only_on_transition() {
        let mut clock = VirtualClock::default();
        let mut events = EventRecorder::<TickInstant>::new();
        let mut power = PowerSequencer::new(CountingSwitch::default());

        assert!(!power.power_off(&mut clock, &mut events));
        assert_eq!(events.count(FlowEventKind::PowerOff), 0);

        power.power_on(&mut clock, &mut events);
        assert!(power.power_off(&mut clock, &mut events));
        assert_eq!(events.count(FlowEventKind::PowerOff), 1);
        assert_eq!(power.state(), PowerState::off());
        assert_eq!(power.switch().off_calls, 2);
    }

    #[test]
    fn wakeup_powers_and_pulses_sleeping_board() {
        let mut clock = VirtualClock::default();
        let mut events = EventRecorder::<TickInstant>::new();
        let mut power = PowerSequencer::new(CountingSwitch::default());
        let mut link = WakeCounter::default();

        assert!(power.wakeup(&mut clock, &mut link, &mut events));

        assert_eq!(power.switch().on_calls, 1);
        assert_eq!(link.wakes, 1);
        assert_eq!(clock.now_ms, 1_100);
        assert_eq!(events.count(FlowEventKind::Wakeup), 1);
    }

    #[test]
    fn wakeup_leaves_energized_board_alone() {
        let mut clock = VirtualClock::default();
        let mut events = EventRecorder::<TickInstant>::new();
        let mut power = PowerSequencer::new(CountingSwitch::default());
        let mut link = WakeCounter::default();

        power.power_on(&mut clock, &mut events);
        assert!(!power.wakeup(&mut clock, &mut link, &mut events));

        assert_eq!(link.wakes, 0);
        assert_eq!(events.count(FlowEventKind::Wakeup), 0);
        assert_eq!(clock.now_ms, 1_000);
        assert_eq!(power.switch().on_calls, 1);
    }

    #[test]
    fn power_cycle_restamps_powered_at() {
        let mut clock = VirtualClock::default();
        let mut events = EventRecorder::<TickInstant>::new();
        let mut power = PowerSequencer::new(CountingSwitch::default());

        power.power_on(&mut clock, &mut events);
        power.power_cycle(&mut clock, &mut events);

        assert!(power.is_energized());
        assert_eq!(power.state().powered_at, Some(TickInstant(1_000)));
        assert_eq!(power.switch().on_calls, 2);
        assert_eq!(power.switch().off_calls, 1);
    }
}
