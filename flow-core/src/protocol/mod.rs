//! Sensor-side flow link: transport seam, timing configuration, and the
//! engine that drives the remote flow board.

use core::{fmt, time::Duration};

use crate::state::StateError;

mod engine;

pub use engine::{COMMAND_CAPACITY, ProtocolEngine, RESPONSE_CAPACITY, StatusText};

/// Positive acknowledgement framing byte.
pub const ACK: u8 = 0x06;
/// Negative acknowledgement framing byte.
pub const NACK: u8 = 0x15;

/// Attempts made by `set_mode` before giving up.
pub const SET_MODE_ATTEMPTS: u8 = 8;
/// Receive polls per `set_mode` attempt.
pub const RESPONSE_POLLS: u16 = 200;
/// Receive attempts made by `read`.
pub const READ_ATTEMPTS: u8 = 5;
/// Delay between sending a mode command and polling for its reply.
pub const RESPONSE_SETTLE: Duration = Duration::from_millis(250);
/// Delay between sending a query and reading its reply.
pub const QUERY_SETTLE: Duration = Duration::from_millis(30);
/// Largest pulse width or current value accepted by the remote setters.
pub const MAX_REMOTE_SETTING: u16 = 1_000;

/// Byte link to the flow board.
pub trait Transport {
    /// Sends the whole buffer.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Send`] when the bytes could not be queued.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Copies pending bytes into `buffer`, returning how many were written.
    /// `Ok(0)` means nothing was pending.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Receive`] on a link fault.
    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError>;

    /// Link-level wake sequence. Links without one do nothing.
    fn wake(&mut self) {}
}

impl<T> Transport for &mut T
where
    T: Transport + ?Sized,
{
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        (**self).send(bytes)
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        (**self).receive(buffer)
    }

    fn wake(&mut self) {
        (**self).wake();
    }
}

/// Link faults surfaced by a [`Transport`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportError {
    Send,
    Receive,
    Disconnected,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Send => f.write_str("send failed"),
            TransportError::Receive => f.write_str("receive failed"),
            TransportError::Disconnected => f.write_str("link disconnected"),
        }
    }
}

/// Retry budgets and settle intervals used by the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ProtocolConfig {
    pub set_attempts: u8,
    pub response_polls: u16,
    pub read_attempts: u8,
    pub response_settle: Duration,
    pub query_settle: Duration,
    pub power_settle: Duration,
    pub wake_settle: Duration,
}

impl ProtocolConfig {
    pub const DEFAULT: ProtocolConfig = ProtocolConfig {
        set_attempts: SET_MODE_ATTEMPTS,
        response_polls: RESPONSE_POLLS,
        read_attempts: READ_ATTEMPTS,
        response_settle: RESPONSE_SETTLE,
        query_settle: QUERY_SETTLE,
        power_settle: crate::power::POWER_SETTLE,
        wake_settle: crate::power::WAKE_SETTLE,
    };
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Errors returned by [`ProtocolEngine`] operations.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// The board answered with NACK.
    Nack,
    /// No framing byte arrived within the poll budget.
    Timeout,
    /// A query produced no reply.
    Empty,
    /// Every attempt failed.
    Exhausted { attempts: u8 },
    State(StateError),
    Transport(TransportError),
    /// A command did not fit its buffer.
    Overflow,
    OutOfRange { value: u16, max: u16 },
    /// The reply did not have the expected shape.
    Malformed,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::Nack => f.write_str("flow board replied NACK"),
            ProtocolError::Timeout => f.write_str("no reply within poll budget"),
            ProtocolError::Empty => f.write_str("empty reply"),
            ProtocolError::Exhausted { attempts } => {
                write!(f, "gave up after {attempts} attempts")
            }
            ProtocolError::State(err) => write!(f, "{err}"),
            ProtocolError::Transport(err) => write!(f, "transport: {err}"),
            ProtocolError::Overflow => f.write_str("command buffer overflow"),
            ProtocolError::OutOfRange { value, max } => {
                write!(f, "value {value} exceeds {max}")
            }
            ProtocolError::Malformed => f.write_str("malformed reply"),
        }
    }
}

impl From<StateError> for ProtocolError {
    fn from(err: StateError) -> Self {
        ProtocolError::State(err)
    }
}

impl From<TransportError> for ProtocolError {
    fn from(err: TransportError) -> Self {
        ProtocolError::Transport(err)
    }
}
