//! Wire codec between [`SamplingState`] and the flow board's mode tokens.

use core::fmt;

use super::{GroupPhase, PurgeProgram, SamplingState, StateGroup};

/// Token sent for the pump-toggle pseudo operation.
pub const PUMP_TOGGLE_TOKEN: &str = "PUMP_TOGGLE";

/// Canonical token table. Test sub-states are intentionally absent.
const WIRE_TOKENS: [(SamplingState, &str); 28] = [
    (SamplingState::Group(StateGroup::Zero, GroupPhase::PumpOn), "ZPON"),
    (SamplingState::Group(StateGroup::Zero, GroupPhase::PumpOff), "ZPOFF"),
    (SamplingState::Group(StateGroup::Zero, GroupPhase::Vent), "ZPVENT"),
    (SamplingState::Group(StateGroup::Zero, GroupPhase::PostCal), "ZPPCAL"),
    (SamplingState::Group(StateGroup::Span, GroupPhase::PumpOn), "SPON"),
    (SamplingState::Group(StateGroup::Span, GroupPhase::PumpOff), "SPOFF"),
    (SamplingState::Group(StateGroup::Span, GroupPhase::Vent), "SPVENT"),
    (SamplingState::Group(StateGroup::Span, GroupPhase::PostCal), "SPPCAL"),
    (SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PumpOn), "EPON"),
    (SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PumpOff), "EPOFF"),
    (SamplingState::Group(StateGroup::Equilibrate, GroupPhase::Vent), "EPVENT"),
    (SamplingState::Group(StateGroup::Equilibrate, GroupPhase::PostCal), "EPPOST"),
    (SamplingState::Group(StateGroup::Air, GroupPhase::PumpOn), "APON"),
    (SamplingState::Group(StateGroup::Air, GroupPhase::PumpOff), "APOFF"),
    (SamplingState::Group(StateGroup::Air, GroupPhase::Vent), "APVENT"),
    (SamplingState::Group(StateGroup::Air, GroupPhase::PostCal), "APPOST"),
    (SamplingState::Rest, "REST"),
    (SamplingState::Deploy, "DEPLOY"),
    (SamplingState::Vent, "VENT"),
    (SamplingState::Pressurize, "PRES"),
    (SamplingState::Purge(PurgeProgram::P1), "PRG1"),
    (SamplingState::Purge(PurgeProgram::P2), "PRG2"),
    (SamplingState::Purge(PurgeProgram::P3), "PRG3"),
    (SamplingState::Purge(PurgeProgram::P4), "PRG4"),
    (SamplingState::Purge(PurgeProgram::P5), "PRG5"),
    (SamplingState::Purge(PurgeProgram::P6), "PRG6"),
    (SamplingState::Purge(PurgeProgram::P7), "PRG7"),
    (SamplingState::Purge(PurgeProgram::P8), "PRG8"),
];

/// Errors raised while mapping states to and from tokens.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateError {
    /// The state exists but has no wire representation.
    NotEncodable(SamplingState),
    /// The token does not name any state.
    UnknownToken,
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::NotEncodable(state) => {
                write!(f, "state {state} has no wire token")
            }
            StateError::UnknownToken => write!(f, "unknown state token"),
        }
    }
}

/// Looks up the wire token for `state`.
///
/// # Errors
///
/// Returns [`StateError::NotEncodable`] for bench test sub-states.
pub fn encode(state: SamplingState) -> Result<&'static str, StateError> {
    WIRE_TOKENS
        .iter()
        .find(|(candidate, _)| *candidate == state)
        .map(|(_, token)| *token)
        .ok_or(StateError::NotEncodable(state))
}

/// Resolves a wire token into its state. Matching is exact.
///
/// # Errors
///
/// Returns [`StateError::UnknownToken`] when nothing matches.
pub fn decode(token: &str) -> Result<SamplingState, StateError> {
    WIRE_TOKENS
        .iter()
        .find(|(_, candidate)| *candidate == token)
        .map(|(state, _)| *state)
        .ok_or(StateError::UnknownToken)
}

/// Target of a mode change: a real state or the pump-toggle pseudo operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ModeRequest {
    State(SamplingState),
    PumpToggle,
}

impl ModeRequest {
    /// Wire token for the request.
    ///
    /// # Errors
    ///
    /// Propagates [`StateError::NotEncodable`] from [`encode`].
    pub fn token(self) -> Result<&'static str, StateError> {
        match self {
            ModeRequest::State(state) => encode(state),
            ModeRequest::PumpToggle => Ok(PUMP_TOGGLE_TOKEN),
        }
    }

    /// Parses a console argument: a state token or `PUMP_TOGGLE`.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::UnknownToken`] when neither form matches.
    pub fn parse(token: &str) -> Result<Self, StateError> {
        if token == PUMP_TOGGLE_TOKEN {
            Ok(ModeRequest::PumpToggle)
        } else {
            decode(token).map(ModeRequest::State)
        }
    }

    /// Resolves the request against the current state.
    #[must_use]
    pub const fn resolve(self, current: SamplingState) -> SamplingState {
        match self {
            ModeRequest::State(state) => state,
            ModeRequest::PumpToggle => current.toggle_pump(),
        }
    }
}

impl From<SamplingState> for ModeRequest {
    fn from(state: SamplingState) -> Self {
        ModeRequest::State(state)
    }
}
