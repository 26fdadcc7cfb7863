//! Device-side valve and pump control.
//!
//! Each sampling state maps to a fixed valve profile. Applying a mode
//! pulses all six latching valves toward their profile side and switches
//! the pump to match the state's pump member.

use core::{fmt, time::Duration};

use crate::state::{GroupPhase, SamplingState, StateGroup};
use crate::valves::{PumpStatus, VALVE_CHANNELS, ValveDirection, ValveStatus};

/// Pulse width applied at boot and restored by nothing else.
pub const DEFAULT_PULSE_MS: u16 = 64;
pub const MIN_PULSE_MS: u16 = 5;
pub const MAX_PULSE_MS: u16 = 1_000;
/// Drive current level applied at boot.
pub const DEFAULT_CURRENT: u8 = 4;
pub const MAX_CURRENT: u8 = 7;
/// Pulse widths, in milliseconds, used by the panic sweep.
pub const PANIC_PULSES_MS: [u16; 24] = [
    10, 15, 20, 25, 30, 35, 40, 45, 50, 35, 40, 45, 40, 45, 30, 35, 30, 35, 50, 50, 50, 50, 50, 50,
];

const SAMPLE_LINE: usize = 4;
const PRESSURE_LINE: usize = 5;

/// Hardware seam for the valve bridges and the pump relay.
pub trait ValveDriver {
    /// Drives `channel` toward `side` for `pulse`, then releases the bridge.
    fn pulse(&mut self, channel: usize, side: ValveDirection, pulse: Duration, current: u8);

    fn set_pump(&mut self, on: bool);
}

/// Driver that does nothing; used by host builds and tests.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopValveDriver;

impl ValveDriver for NoopValveDriver {
    fn pulse(&mut self, _channel: usize, _side: ValveDirection, _pulse: Duration, _current: u8) {}

    fn set_pump(&mut self, _on: bool) {}
}

/// Rejected motion setter arguments.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MotionError {
    InvalidChannel(u16),
    PulseOutOfRange(u16),
    CurrentOutOfRange(u16),
}

impl fmt::Display for MotionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionError::InvalidChannel(channel) => {
                write!(f, "valve channel {channel} outside 0..{VALVE_CHANNELS}")
            }
            MotionError::PulseOutOfRange(pulse) => write!(
                f,
                "pulse {pulse} ms outside {MIN_PULSE_MS}..={MAX_PULSE_MS}"
            ),
            MotionError::CurrentOutOfRange(level) => {
                write!(f, "current {level} outside 0..={MAX_CURRENT}")
            }
        }
    }
}

/// Valve sides applied for `state`.
#[must_use]
pub fn valve_profile(state: SamplingState) -> [ValveDirection; VALVE_CHANNELS] {
    use ValveDirection::{SideA, SideB};

    let mut profile = [SideA; VALVE_CHANNELS];
    match state {
        SamplingState::Group(group, phase) => {
            let line = group_line(group);
            match phase {
                GroupPhase::PumpOn | GroupPhase::PumpOff => profile[line] = SideB,
                GroupPhase::Vent => {
                    profile[line] = SideB;
                    profile[SAMPLE_LINE] = SideB;
                }
                GroupPhase::PostCal => profile[SAMPLE_LINE] = SideB,
            }
        }
        SamplingState::Test(test) => profile[group_line(test.group())] = SideB,
        SamplingState::Rest | SamplingState::Deploy => {}
        SamplingState::Vent => profile[SAMPLE_LINE] = SideB,
        SamplingState::Pressurize => profile[PRESSURE_LINE] = SideB,
        SamplingState::Purge(program) => {
            // Bit n of the program number opens line n.
            let mask = program.number();
            for (line, side) in profile.iter_mut().enumerate().take(SAMPLE_LINE) {
                if mask & (1 << line) != 0 {
                    *side = SideB;
                }
            }
            profile[PRESSURE_LINE] = SideB;
        }
    }
    profile
}

const fn group_line(group: StateGroup) -> usize {
    match group {
        StateGroup::Zero => 0,
        StateGroup::Span => 1,
        StateGroup::Equilibrate => 2,
        StateGroup::Air => 3,
    }
}

/// Owns the valve driver and the settings it is driven with.
pub struct MotionController<D> {
    driver: D,
    mode: SamplingState,
    channels: [ValveDirection; VALVE_CHANNELS],
    pump: PumpStatus,
    pulse_ms: u16,
    current: u8,
}

impl<D> MotionController<D>
where
    D: ValveDriver,
{
    /// Wraps `driver` without moving any valve. Channels report unknown
    /// until a mode is applied.
    pub const fn new(driver: D) -> Self {
        Self {
            driver,
            mode: SamplingState::DEFAULT,
            channels: [ValveDirection::Unknown; VALVE_CHANNELS],
            pump: PumpStatus::Unknown,
            pulse_ms: DEFAULT_PULSE_MS,
            current: DEFAULT_CURRENT,
        }
    }

    /// Drives every valve to the state's profile and switches the pump.
    pub fn set_mode(&mut self, state: SamplingState) {
        let pulse = self.pulse_duration();
        for (channel, side) in valve_profile(state).into_iter().enumerate() {
            self.driver.pulse(channel, side, pulse, self.current);
            self.channels[channel] = side;
        }

        let pump_on = state.pump_running();
        self.driver.set_pump(pump_on);
        self.pump = PumpStatus::from(pump_on);
        self.mode = state;
    }

    /// # Errors
    ///
    /// [`MotionError::InvalidChannel`] when `channel` is not below six.
    pub fn set_valve(&mut self, channel: u16, side: ValveDirection) -> Result<(), MotionError> {
        let index = usize::from(channel);
        if index >= VALVE_CHANNELS {
            return Err(MotionError::InvalidChannel(channel));
        }

        self.driver
            .pulse(index, side, self.pulse_duration(), self.current);
        self.channels[index] = side;
        Ok(())
    }

    /// # Errors
    ///
    /// [`MotionError::PulseOutOfRange`] outside 5..=1000 ms.
    pub fn set_pulse(&mut self, millis: u16) -> Result<(), MotionError> {
        if !(MIN_PULSE_MS..=MAX_PULSE_MS).contains(&millis) {
            return Err(MotionError::PulseOutOfRange(millis));
        }
        self.pulse_ms = millis;
        Ok(())
    }

    /// # Errors
    ///
    /// [`MotionError::CurrentOutOfRange`] above 7.
    pub fn set_current(&mut self, level: u16) -> Result<(), MotionError> {
        match u8::try_from(level) {
            Ok(level) if level <= MAX_CURRENT => {
                self.current = level;
                Ok(())
            }
            _ => Err(MotionError::CurrentOutOfRange(level)),
        }
    }

    /// Works stuck valves loose by sweeping every channel both ways with
    /// the panic pulse table, then settles into `Rest`.
    pub fn panic(&mut self) {
        for width in PANIC_PULSES_MS {
            let pulse = Duration::from_millis(u64::from(width));
            for channel in 0..VALVE_CHANNELS {
                self.driver
                    .pulse(channel, ValveDirection::SideA, pulse, DEFAULT_CURRENT);
            }
            for channel in 0..VALVE_CHANNELS {
                self.driver
                    .pulse(channel, ValveDirection::SideB, pulse, DEFAULT_CURRENT);
            }
        }
        self.set_mode(SamplingState::Rest);
    }

    #[must_use]
    pub fn status(&self) -> ValveStatus {
        ValveStatus::new(self.channels, self.pump)
    }

    #[must_use]
    pub fn mode(&self) -> SamplingState {
        self.mode
    }

    #[must_use]
    pub fn pulse_ms(&self) -> u16 {
        self.pulse_ms
    }

    #[must_use]
    pub fn current(&self) -> u8 {
        self.current
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    fn pulse_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.pulse_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::PurgeProgram;
    use heapless::Vec;

    #[derive(Default)]
    struct RecordingDriver {
        pulses: usize,
        last: Option<(usize, ValveDirection, Duration, u8)>,
        pump: Option<bool>,
    }

    impl ValveDriver for RecordingDriver {
        fn pulse(&mut self, channel: usize, side: ValveDirection, pulse: Duration, current: u8) {
            self.pulses += 1;
            self.last = Some((channel, side, pulse, current));
        }

        fn set_pump(&mut self, on: bool) {
            self.pump = Some(on);
        }
    }

    #[test]
    fn set_mode_applies_profile_and_pump() {
        let mut motion = MotionController::new(RecordingDriver::default());
        let state = SamplingState::grouped(StateGroup::Span, GroupPhase::PumpOn);

        motion.set_mode(state);

        assert_eq!(&motion.status().render(), b"ABAAAA1");
        assert_eq!(motion.mode(), state);
        assert_eq!(motion.driver().pulses, VALVE_CHANNELS);
        assert_eq!(motion.driver().pump, Some(true));
    }

    #[test]
    fn status_is_unknown_before_first_mode() {
        let motion = MotionController::new(NoopValveDriver);
        assert_eq!(motion.status(), ValveStatus::UNKNOWN);
    }

    #[test]
    fn profiles_are_distinct_per_group_phase() {
        let mut seen: Vec<[ValveDirection; VALVE_CHANNELS], 16> = Vec::new();
        for group in StateGroup::ALL {
            for phase in [GroupPhase::PumpOn, GroupPhase::Vent] {
                let profile = valve_profile(SamplingState::grouped(group, phase));
                assert!(!seen.contains(&profile), "duplicate profile for {group:?}/{phase:?}");
                seen.push(profile).expect("room");
            }
        }
    }

    #[test]
    fn purge_programs_open_pressure_line() {
        for program in PurgeProgram::ALL {
            let profile = valve_profile(SamplingState::Purge(program));
            assert_eq!(profile[PRESSURE_LINE], ValveDirection::SideB);
        }
    }

    #[test]
    fn set_valve_rejects_invalid_channel_without_driving() {
        let mut motion = MotionController::new(RecordingDriver::default());
        assert_eq!(
            motion.set_valve(6, ValveDirection::SideA),
            Err(MotionError::InvalidChannel(6))
        );
        assert_eq!(motion.driver().pulses, 0);

        motion.set_valve(5, ValveDirection::SideB).expect("valid channel");
        assert_eq!(motion.status().channels[5], ValveDirection::SideB);
    }

    #[test]
    fn pulse_and_current_bounds() {
        let mut motion = MotionController::new(NoopValveDriver);

        assert_eq!(motion.set_pulse(4), Err(MotionError::PulseOutOfRange(4)));
        assert_eq!(motion.set_pulse(1_001), Err(MotionError::PulseOutOfRange(1_001)));
        assert_eq!(motion.pulse_ms(), DEFAULT_PULSE_MS);
        motion.set_pulse(5).expect("lower bound");
        assert_eq!(motion.pulse_ms(), 5);

        assert_eq!(motion.set_current(8), Err(MotionError::CurrentOutOfRange(8)));
        assert_eq!(motion.current(), DEFAULT_CURRENT);
        motion.set_current(7).expect("upper bound");
        assert_eq!(motion.current(), 7);
    }

    #[test]
    fn set_valve_uses_configured_pulse_and_current() {
        let mut motion = MotionController::new(RecordingDriver::default());
        motion.set_pulse(120).expect("pulse");
        motion.set_current(2).expect("current");

        motion.set_valve(3, ValveDirection::SideA).expect("valve");

        assert_eq!(
            motion.driver().last,
            Some((3, ValveDirection::SideA, Duration::from_millis(120), 2))
        );
    }

    #[test]
    fn panic_sweeps_then_rests() {
        let mut motion = MotionController::new(RecordingDriver::default());
        motion.set_mode(SamplingState::Vent);

        motion.panic();

        let sweep = PANIC_PULSES_MS.len() * VALVE_CHANNELS * 2;
        assert_eq!(motion.driver().pulses, VALVE_CHANNELS + sweep + VALVE_CHANNELS);
        assert_eq!(motion.mode(), SamplingState::Rest);
        assert_eq!(&motion.status().render(), b"AAAAAA0");
    }
}
