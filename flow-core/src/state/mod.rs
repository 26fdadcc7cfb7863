//! Sampling state model shared by the sensor controller and the flow board.
//!
//! A [`SamplingState`] names one pneumatic phase of the pCO2 sequencer. The
//! wire codec in [`codec`] maps the transmittable members onto the short
//! tokens used by the flow board, while this module keeps the structural
//! helpers (groups, pump rules, persistence codes, display names).

use core::fmt;

pub mod codec;

pub use codec::{ModeRequest, PUMP_TOGGLE_TOKEN, StateError, decode, encode};

/// Cyclic sampling groups. Each group owns four phases.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateGroup {
    Zero,
    Span,
    Equilibrate,
    Air,
}

impl StateGroup {
    pub const ALL: [StateGroup; 4] = [
        StateGroup::Zero,
        StateGroup::Span,
        StateGroup::Equilibrate,
        StateGroup::Air,
    ];
}

/// Phase within a [`StateGroup`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GroupPhase {
    PumpOn,
    PumpOff,
    Vent,
    PostCal,
}

impl GroupPhase {
    pub const ALL: [GroupPhase; 4] = [
        GroupPhase::PumpOn,
        GroupPhase::PumpOff,
        GroupPhase::Vent,
        GroupPhase::PostCal,
    ];
}

/// Purge programs stored on the flow board.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PurgeProgram {
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
    P7,
    P8,
}

impl PurgeProgram {
    pub const ALL: [PurgeProgram; 8] = [
        PurgeProgram::P1,
        PurgeProgram::P2,
        PurgeProgram::P3,
        PurgeProgram::P4,
        PurgeProgram::P5,
        PurgeProgram::P6,
        PurgeProgram::P7,
        PurgeProgram::P8,
    ];

    /// One-based program number.
    #[must_use]
    pub const fn number(self) -> u8 {
        match self {
            PurgeProgram::P1 => 1,
            PurgeProgram::P2 => 2,
            PurgeProgram::P3 => 3,
            PurgeProgram::P4 => 4,
            PurgeProgram::P5 => 5,
            PurgeProgram::P6 => 6,
            PurgeProgram::P7 => 7,
            PurgeProgram::P8 => 8,
        }
    }
}

/// Bench-only sub-states used while characterising the plumbing.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TestState {
    Zero0,
    Zero1,
    Zero2,
    Span0,
    Span1,
    Span2,
    Equil0,
    Equil1,
    Air0,
    Air1,
}

impl TestState {
    /// Group whose plumbing the sub-state exercises.
    #[must_use]
    pub const fn group(self) -> StateGroup {
        match self {
            TestState::Zero0 | TestState::Zero1 | TestState::Zero2 => StateGroup::Zero,
            TestState::Span0 | TestState::Span1 | TestState::Span2 => StateGroup::Span,
            TestState::Equil0 | TestState::Equil1 => StateGroup::Equilibrate,
            TestState::Air0 | TestState::Air1 => StateGroup::Air,
        }
    }
}

/// One named operating phase of the pneumatic sequencer.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SamplingState {
    Group(StateGroup, GroupPhase),
    Rest,
    Deploy,
    /// Vent / dry mode.
    Vent,
    Pressurize,
    Purge(PurgeProgram),
    Test(TestState),
}

/// Number of members in [`SamplingState::ALL`].
pub const SAMPLING_STATE_COUNT: usize = 38;

impl SamplingState {
    /// State assumed when nothing has been persisted yet.
    pub const DEFAULT: SamplingState = SamplingState::Deploy;

    /// Every sampling state, grouped states first.
    pub const ALL: [SamplingState; SAMPLING_STATE_COUNT] = [
        SamplingState::Group(StateGroup::Zero, GroupPhase::PumpOn),
        SamplingState::Group(StateGroup::Zero, GroupPhase::PumpOff),
        SamplingState::Group(StateGroup::Zero, GroupPhase::Vent),
        SamplingState::Group(StateGroup::Zero, GroupPhase::PostCal),
        SamplingState::Group(StateGroup::Span, GroupPhase::PumpOn),
        SamplingState::Group(StateGroup::Span, GroupPhase::PumpOff),
        SamplingState::Group(StateGroup::Span, GroupPhase::Vent),
        SamplingState::Group(StateGroup::Span, GroupPhase::PostCal),
        SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PumpOn),
        SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PumpOff),
        SamplingState::Group(StateGroup::Equilibrate, GroupPhase::Vent),
        SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PostCal),
        SamplingState::Group(StateGroup::Air, GroupPhase::PumpOn),
        SamplingState::Group(StateGroup::Air, GroupPhase::PumpOff),
        SamplingState::Group(StateGroup::Air, GroupPhase::Vent),
        SamplingState::Group(StateGroup::Air, GroupPhase::PostCal),
        SamplingState::Rest,
        SamplingState::Deploy,
        SamplingState::Vent,
        SamplingState::Pressurize,
        SamplingState::Purge(PurgeProgram::P1),
        SamplingState::Purge(PurgeProgram::P2),
        SamplingState::Purge(PurgeProgram::P3),
        SamplingState::Purge(PurgeProgram::P4),
        SamplingState::Purge(PurgeProgram::P5),
        SamplingState::Purge(PurgeProgram::P6),
        SamplingState::Purge(PurgeProgram::P7),
        SamplingState::Purge(PurgeProgram::P8),
        SamplingState::Test(TestState::Zero0),
        SamplingState::Test(TestState::Zero1),
        SamplingState::Test(TestState::Zero2),
        SamplingState::Test(TestState::Span0),
        SamplingState::Test(TestState::Span1),
        SamplingState::Test(TestState::Span2),
        SamplingState::Test(TestState::Equil0),
        SamplingState::Test(TestState::Equil1),
        SamplingState::Test(TestState::Air0),
        SamplingState::Test(TestState::Air1),
    ];

    #[must_use]
    pub const fn grouped(group: StateGroup, phase: GroupPhase) -> Self {
        SamplingState::Group(group, phase)
    }

    /// Returns the group and phase for grouped states.
    #[must_use]
    pub const fn group(self) -> Option<(StateGroup, GroupPhase)> {
        match self {
            SamplingState::Group(group, phase) => Some((group, phase)),
            _ => None,
        }
    }

    /// Whether the pump runs in this state.
    #[must_use]
    pub const fn pump_running(self) -> bool {
        matches!(self, SamplingState::Group(_, GroupPhase::PumpOn))
    }

    /// Flips the pump member of the current group.
    ///
    /// `PumpOn` and `PumpOff` swap, `Vent` and `PostCal` switch the pump on.
    /// Standalone states are fixed points.
    #[must_use]
    pub const fn toggle_pump(self) -> Self {
        match self {
            SamplingState::Group(group, GroupPhase::PumpOn) => {
                SamplingState::Group(group, GroupPhase::PumpOff)
            }
            SamplingState::Group(group, _) => SamplingState::Group(group, GroupPhase::PumpOn),
            other => other,
        }
    }

    /// Forces the pump member of a group without leaving the group.
    ///
    /// Pump phases and the calibration phase of the zero, span and
    /// equilibrate groups follow the request. The air group only swaps its
    /// two pump phases. Vent phases and standalone states are left alone.
    #[must_use]
    pub const fn with_pump(self, on: bool) -> Self {
        let phase = if on {
            GroupPhase::PumpOn
        } else {
            GroupPhase::PumpOff
        };

        match self {
            SamplingState::Group(StateGroup::Air, GroupPhase::PumpOn | GroupPhase::PumpOff) => {
                SamplingState::Group(StateGroup::Air, phase)
            }
            SamplingState::Group(StateGroup::Air, _) => self,
            SamplingState::Group(
                group,
                GroupPhase::PumpOn | GroupPhase::PumpOff | GroupPhase::PostCal,
            ) => SamplingState::Group(group, phase),
            other => other,
        }
    }

    /// Name reported by the flow board's `mode` query.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            SamplingState::Group(StateGroup::Zero, GroupPhase::PumpOn) => "ZERO_ON",
            SamplingState::Group(StateGroup::Zero, GroupPhase::PumpOff) => "ZERO_OFF",
            SamplingState::Group(StateGroup::Zero, GroupPhase::Vent) => "ZERO_VENT",
            SamplingState::Group(StateGroup::Zero, GroupPhase::PostCal) => "ZERO_POST",
            SamplingState::Group(StateGroup::Span, GroupPhase::PumpOn) => "SPAN_ON",
            SamplingState::Group(StateGroup::Span, GroupPhase::PumpOff) => "SPAN_OFF",
            SamplingState::Group(StateGroup::Span, GroupPhase::Vent) => "SPAN_VENT",
            SamplingState::Group(StateGroup::Span, GroupPhase::PostCal) => "SPAN_POST",
            SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PumpOn) => "EQUIL_ON",
            SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PumpOff) => "EQUIL_OFF",
            SamplingState::Group(StateGroup::Equilibrate, GroupPhase::Vent) => "EQUIL_VENT",
            SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PostCal) => "EQUIL_POST",
            SamplingState::Group(StateGroup::Air, GroupPhase::PumpOn) => "AIR_ON",
            SamplingState::Group(StateGroup::Air, GroupPhase::PumpOff) => "AIR_OFF",
            SamplingState::Group(StateGroup::Air, GroupPhase::Vent) => "AIR_VENT",
            SamplingState::Group(StateGroup::Air, GroupPhase::PostCal) => "AIR_POST",
            SamplingState::Rest => "REST",
            SamplingState::Deploy => "DEPLOY",
            SamplingState::Vent => "VENT",
            SamplingState::Pressurize => "PRES",
            SamplingState::Purge(PurgeProgram::P1) => "PRG1",
            SamplingState::Purge(PurgeProgram::P2) => "PRG2",
            SamplingState::Purge(PurgeProgram::P3) => "PRG3",
            SamplingState::Purge(PurgeProgram::P4) => "PRG4",
            SamplingState::Purge(PurgeProgram::P5) => "PRG5",
            SamplingState::Purge(PurgeProgram::P6) => "PRG6",
            SamplingState::Purge(PurgeProgram::P7) => "PRG7",
            SamplingState::Purge(PurgeProgram::P8) => "PRG8",
            SamplingState::Test(TestState::Zero0) => "ZERO_0",
            SamplingState::Test(TestState::Zero1) => "ZERO_1",
            SamplingState::Test(TestState::Zero2) => "ZERO_2",
            SamplingState::Test(TestState::Span0) => "SPAN_0",
            SamplingState::Test(TestState::Span1) => "SPAN_1",
            SamplingState::Test(TestState::Span2) => "SPAN_2",
            SamplingState::Test(TestState::Equil0) => "EQUIL_0",
            SamplingState::Test(TestState::Equil1) => "EQUIL_1",
            SamplingState::Test(TestState::Air0) => "AIR_0",
            SamplingState::Test(TestState::Air1) => "AIR_1",
        }
    }

    /// Resolves a display name (case-insensitive) back into a state.
    #[must_use]
    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|state| state.display_name().eq_ignore_ascii_case(name))
    }

    /// Encodes the state into the numeric code kept in persistent storage.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            SamplingState::Group(group, phase) => {
                let base = match group {
                    StateGroup::Zero => 0x01,
                    StateGroup::Span => 0x05,
                    StateGroup::Equilibrate => 0x09,
                    StateGroup::Air => 0x0D,
                };
                let offset = match phase {
                    GroupPhase::PumpOn => 0,
                    GroupPhase::PumpOff => 1,
                    GroupPhase::Vent => 2,
                    GroupPhase::PostCal => 3,
                };
                base + offset
            }
            SamplingState::Rest => 0x14,
            SamplingState::Deploy => 0x15,
            SamplingState::Vent => 0x17,
            SamplingState::Pressurize => 0x18,
            SamplingState::Purge(program) => match program {
                PurgeProgram::P1 => 0x19,
                PurgeProgram::P2 => 0x20,
                PurgeProgram::P3 => 0x21,
                PurgeProgram::P4 => 0x22,
                PurgeProgram::P5 => 0x23,
                PurgeProgram::P6 => 0x24,
                PurgeProgram::P7 => 0x25,
                PurgeProgram::P8 => 0x26,
            },
            SamplingState::Test(test) => match test {
                TestState::Zero0 => 0x0100,
                TestState::Zero1 => 0x0200,
                TestState::Zero2 => 0x0400,
                TestState::Span0 => 0x0800,
                TestState::Span1 => 0x1000,
                TestState::Span2 => 0x2000,
                TestState::Equil0 => 0x4000,
                TestState::Equil1 => 0x8000,
                TestState::Air0 => 0x1_0000,
                TestState::Air1 => 0x2_0000,
            },
        }
    }

    /// Decodes a persisted numeric code.
    #[must_use]
    pub fn from_raw(code: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|state| state.to_raw() == code)
    }
}

impl Default for SamplingState {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for SamplingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}
