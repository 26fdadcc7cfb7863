use core::fmt::{self, Write as _};

use heapless::{String, Vec};

use super::catalog::{self, CommandTag};
use super::grammar::{self, ConsoleCommand, ParseError};
use crate::clock::Clock;
use crate::motion::{MotionController, MotionError, ValveDriver};
use crate::persistence::{Context, Store};
use crate::protocol::{ACK, NACK};
use crate::state::{ModeRequest, SamplingState, StateError};
use crate::telemetry::{EventPayload, EventRecorder, FlowEventKind};
use crate::valves::{STATUS_REPORT_LEN, ValveDirection, ValveStatus};

/// Longest console line accepted, terminator excluded.
pub const LINE_CAPACITY: usize = 80;
/// Capacity of a formatted query payload.
pub const PAYLOAD_CAPACITY: usize = 96;
/// Capacity of a fully framed reply.
pub const REPLY_CAPACITY: usize = 1 + PAYLOAD_CAPACITY + STATUS_REPORT_LEN;

pub type Payload = String<PAYLOAD_CAPACITY>;

/// Accumulates console bytes until a line terminator arrives.
#[derive(Clone, Debug, Default)]
pub struct LineBuffer {
    bytes: Vec<u8, LINE_CAPACITY>,
    overflowed: bool,
}

impl LineBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            overflowed: false,
        }
    }

    /// Appends one byte. Returns `true` when a terminator completes a
    /// non-empty line. Terminators on an empty buffer are swallowed so
    /// `\r\n` yields one line.
    pub fn ingest(&mut self, byte: u8) -> bool {
        match byte {
            b'\r' | b'\n' => !self.bytes.is_empty() || self.overflowed,
            _ => {
                if self.bytes.push(byte).is_err() {
                    self.overflowed = true;
                }
                false
            }
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty() && !self.overflowed
    }

    #[must_use]
    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.overflowed = false;
    }
}

/// Why a console line was answered with NACK.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchError {
    Parse(ParseError),
    State(StateError),
    Motion(MotionError),
    /// `help` named a topic with no entry.
    UnknownTopic,
    LineTooLong,
    /// The line was not valid UTF-8.
    Encoding,
    /// A payload did not fit its buffer.
    Overflow,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Parse(err) => write!(f, "{err}"),
            DispatchError::State(err) => write!(f, "{err}"),
            DispatchError::Motion(err) => write!(f, "{err}"),
            DispatchError::UnknownTopic => f.write_str("no help for topic"),
            DispatchError::LineTooLong => write!(f, "line exceeds {LINE_CAPACITY} bytes"),
            DispatchError::Encoding => f.write_str("line is not UTF-8"),
            DispatchError::Overflow => f.write_str("payload overflow"),
        }
    }
}

impl From<ParseError> for DispatchError {
    fn from(err: ParseError) -> Self {
        DispatchError::Parse(err)
    }
}

impl From<StateError> for DispatchError {
    fn from(err: StateError) -> Self {
        DispatchError::State(err)
    }
}

impl From<MotionError> for DispatchError {
    fn from(err: MotionError) -> Self {
        DispatchError::Motion(err)
    }
}

/// Framing byte, optional payload line, and the trailing status report.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reply {
    pub frame: u8,
    pub payload: Option<Payload>,
    pub status: [u8; STATUS_REPORT_LEN],
    pub error: Option<DispatchError>,
}

impl Reply {
    #[must_use]
    pub fn is_ack(&self) -> bool {
        self.frame == ACK
    }

    /// Serializes the reply in wire order.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8, REPLY_CAPACITY> {
        let mut bytes = Vec::new();
        // Capacity covers the largest frame, payload, and report.
        let _ = bytes.push(self.frame);
        if let Some(payload) = &self.payload {
            let _ = bytes.extend_from_slice(payload.as_bytes());
        }
        let _ = bytes.extend_from_slice(&self.status);
        bytes
    }
}

/// Device-side console: parses one line, applies it, and builds the reply.
pub struct CommandDispatcher<D, S, C>
where
    C: Clock,
{
    motion: MotionController<D>,
    context: Context<S>,
    clock: C,
    events: EventRecorder<C::Instant>,
}

impl<D, S, C> CommandDispatcher<D, S, C>
where
    D: ValveDriver,
    S: Store,
    C: Clock,
{
    /// Takes ownership of the controller and system record, then drives the
    /// valves to the persisted state.
    pub fn new(mut motion: MotionController<D>, context: Context<S>, clock: C) -> Self {
        motion.set_mode(context.state());
        Self {
            motion,
            context,
            clock,
            events: EventRecorder::new(),
        }
    }

    /// Parses and executes the buffered line. The buffer is always cleared.
    pub fn parse_line(&mut self, line: &mut LineBuffer) -> Reply {
        let reply = if line.overflowed() {
            self.reject(None, DispatchError::LineTooLong)
        } else {
            match core::str::from_utf8(line.as_bytes()) {
                Ok(text) => self.parse_text(text),
                Err(_) => self.reject(None, DispatchError::Encoding),
            }
        };
        line.clear();
        reply
    }

    /// Parses and executes one line of text.
    pub fn parse_text(&mut self, line: &str) -> Reply {
        let command = match grammar::parse(line) {
            Ok(command) => command,
            Err(err) => return self.reject(None, err.into()),
        };

        let tag = command.tag();
        match self.execute(command) {
            Ok(payload) => self.accept(tag, payload),
            Err(err) => self.reject(Some(tag), err),
        }
    }

    fn execute(&mut self, command: ConsoleCommand<'_>) -> Result<Option<Payload>, DispatchError> {
        match command {
            ConsoleCommand::SetMode(token) => {
                let request = ModeRequest::parse(token)?;
                let state = request.resolve(self.context.state());
                self.apply_mode(state);
                Ok(None)
            }
            ConsoleCommand::OpenSideA(channel) => {
                self.motion.set_valve(channel, ValveDirection::SideA)?;
                Ok(None)
            }
            ConsoleCommand::OpenSideB(channel) => {
                self.motion.set_valve(channel, ValveDirection::SideB)?;
                Ok(None)
            }
            ConsoleCommand::SetPulse(millis) => {
                self.motion.set_pulse(millis)?;
                Ok(None)
            }
            ConsoleCommand::SetCurrent(level) => {
                self.motion.set_current(level)?;
                Ok(None)
            }
            ConsoleCommand::Panic => {
                self.motion.panic();
                self.commit_state(self.motion.mode());
                Ok(None)
            }
            ConsoleCommand::Mode => {
                payload(format_args!("MODE: {}\r\n", self.context.state().display_name()))
            }
            ConsoleCommand::Current => {
                payload(format_args!("CURRENT: {}\r\n", self.motion.current()))
            }
            ConsoleCommand::Pulse => payload(format_args!("PULSE: {}\r\n", self.motion.pulse_ms())),
            ConsoleCommand::Version => {
                payload(format_args!("VERSION: {}\r\n", self.context.info().version))
            }
            ConsoleCommand::Serial => {
                payload(format_args!("SERIAL: {}\r\n", self.context.info().serial))
            }
            ConsoleCommand::Count => payload(format_args!(
                "COUNT: {}\r\n",
                self.context.info().startup_count
            )),
            ConsoleCommand::Help { topic } => help(topic),
        }
    }

    fn apply_mode(&mut self, state: SamplingState) {
        self.motion.set_mode(state);
        self.commit_state(state);
    }

    fn commit_state(&mut self, state: SamplingState) {
        if self.context.set_state(state).is_err() {
            let now = self.clock.now();
            self.events
                .record(FlowEventKind::StoreFailure, EventPayload::None, now);
        }
    }

    fn accept(&mut self, tag: CommandTag, payload: Option<Payload>) -> Reply {
        let now = self.clock.now();
        self.events.record(
            FlowEventKind::ConsoleAccepted,
            EventPayload::Console(tag),
            now,
        );
        Reply {
            frame: ACK,
            payload,
            status: self.motion.status().render(),
            error: None,
        }
    }

    fn reject(&mut self, tag: Option<CommandTag>, error: DispatchError) -> Reply {
        let now = self.clock.now();
        let details = tag.map_or(EventPayload::None, EventPayload::Console);
        self.events
            .record(FlowEventKind::ConsoleRejected, details, now);
        Reply {
            frame: NACK,
            payload: None,
            status: self.motion.status().render(),
            error: Some(error),
        }
    }

    #[must_use]
    pub fn state(&self) -> SamplingState {
        self.context.state()
    }

    #[must_use]
    pub fn status(&self) -> ValveStatus {
        self.motion.status()
    }

    pub fn motion(&self) -> &MotionController<D> {
        &self.motion
    }

    pub fn context(&self) -> &Context<S> {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context<S> {
        &mut self.context
    }

    pub fn events(&self) -> &EventRecorder<C::Instant> {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventRecorder<C::Instant> {
        &mut self.events
    }
}

fn payload(args: fmt::Arguments<'_>) -> Result<Option<Payload>, DispatchError> {
    let mut text = Payload::new();
    text.write_fmt(args).map_err(|_| DispatchError::Overflow)?;
    Ok(Some(text))
}

fn help(topic: Option<&str>) -> Result<Option<Payload>, DispatchError> {
    let mut text = Payload::new();
    let overflow = |_| DispatchError::Overflow;

    match topic {
        Some(topic) => {
            let mut entries = catalog::topic(topic).peekable();
            if entries.peek().is_none() {
                return Err(DispatchError::UnknownTopic);
            }
            text.push_str("HELP:").map_err(overflow)?;
            for entry in entries {
                write!(text, " {};", entry.help).map_err(|_| DispatchError::Overflow)?;
            }
        }
        None => {
            text.push_str("HELP:").map_err(overflow)?;
            for entry in catalog::commands() {
                let suffix = if entry.form.is_assignment() { "=" } else { "" };
                write!(text, " {}{suffix}", entry.keyword).map_err(|_| DispatchError::Overflow)?;
            }
        }
    }

    text.push_str("\r\n").map_err(overflow)?;
    Ok(Some(text))
}
