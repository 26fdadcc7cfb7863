use core::fmt::{self, Write as _};

use heapless::{String, Vec};

use super::{
    ACK, MAX_REMOTE_SETTING, NACK, ProtocolConfig, ProtocolError, Transport, TransportError,
};
use crate::clock::Clock;
use crate::persistence::{Context, Store};
use crate::power::{PowerSequencer, PowerState, PowerSwitch};
use crate::state::{ModeRequest, SamplingState};
use crate::telemetry::{
    AttemptFailure, AttemptTelemetry, ErrorCode, EventPayload, EventRecorder, FlowEventKind,
    ModeTelemetry,
};
use crate::valves::{STATUS_REPORT_LEN, ValveStatus, VALVES_PREFIX};

/// Capacity of an outbound command line.
pub const COMMAND_CAPACITY: usize = 32;
/// Capacity of an assembled reply.
pub const RESPONSE_CAPACITY: usize = 128;
/// Longest status report: the optional prefix plus one byte per valve and the pump.
const REPORT_CAPACITY: usize = VALVES_PREFIX.len() + STATUS_REPORT_LEN;
/// Upper bound on reads spent flushing stale input before a transaction.
const DISCARD_LIMIT: usize = 8;

/// Text returned by a query, framing byte removed.
pub type StatusText = String<RESPONSE_CAPACITY>;

const MODE_QUERY: &[u8] = b"MODE\r\n";
const PULSE_QUERY: &[u8] = b"pulse\r\n";
const CURRENT_QUERY: &[u8] = b"current\r\n";

/// Drives the remote flow board over a [`Transport`].
///
/// The engine owns the power sequencer, the clock, and the system record.
/// Every operation takes `&mut self`, so transactions never overlap.
pub struct ProtocolEngine<T, P, C, S>
where
    C: Clock,
{
    transport: T,
    power: PowerSequencer<P, C::Instant>,
    clock: C,
    context: Context<S>,
    config: ProtocolConfig,
    valves: ValveStatus,
    events: EventRecorder<C::Instant>,
}

impl<T, P, C, S> ProtocolEngine<T, P, C, S>
where
    T: Transport,
    P: PowerSwitch,
    C: Clock,
    S: Store,
{
    pub fn new(transport: T, switch: P, clock: C, context: Context<S>) -> Self {
        Self::with_config(transport, switch, clock, context, ProtocolConfig::DEFAULT)
    }

    pub fn with_config(
        transport: T,
        switch: P,
        clock: C,
        context: Context<S>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            transport,
            power: PowerSequencer::with_timing(switch, config.power_settle, config.wake_settle),
            clock,
            context,
            config,
            valves: ValveStatus::UNKNOWN,
            events: EventRecorder::new(),
        }
    }

    /// Wakes the board and synchronizes the local state with the one it
    /// reports.
    ///
    /// # Errors
    ///
    /// Propagates the query failure after logging `FailedOnStartup`.
    pub fn start(&mut self) -> Result<SamplingState, ProtocolError> {
        self.wakeup();
        self.query_state().inspect_err(|_| {
            self.record_error(ErrorCode::FailedOnStartup);
        })
    }

    /// Commands a mode change, power-cycling the board between failed
    /// attempts.
    ///
    /// A plain state is committed as soon as the command is sent, before any
    /// acknowledgement. `PumpToggle` only commits after ACK.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::State`] when the state has no wire token. The board
    ///   is still woken, but nothing is sent and no retry happens.
    /// - [`ProtocolError::Exhausted`] once every attempt failed.
    pub fn set_mode(
        &mut self,
        request: impl Into<ModeRequest>,
    ) -> Result<ValveStatus, ProtocolError> {
        let request = request.into();
        self.wakeup();

        let token = match request.token() {
            Ok(token) => token,
            Err(err) => {
                self.record_error(ErrorCode::InvalidState);
                return Err(err.into());
            }
        };
        let command: String<COMMAND_CAPACITY> = format_command(format_args!("mode={token}\r\n"))?;

        let max_attempts = self.config.set_attempts;
        for attempt in 1..=max_attempts {
            let cause = match self.attempt_mode(request, command.as_bytes()) {
                Ok(valves) => {
                    self.valves = valves;
                    let now = self.clock.now();
                    self.events.record(
                        FlowEventKind::ModeSet,
                        EventPayload::Mode(ModeTelemetry {
                            request,
                            valves,
                            attempts: attempt,
                        }),
                        now,
                    );
                    return Ok(valves);
                }
                Err(cause) => cause,
            };

            let now = self.clock.now();
            self.events
                .record_attempt_failed(AttemptTelemetry::new(attempt, max_attempts, cause), now);

            if attempt < max_attempts {
                self.record(FlowEventKind::PowerCycle);
                self.power.power_cycle(&mut self.clock, &mut self.events);
                self.record(FlowEventKind::Retrying);
            }
        }

        Err(ProtocolError::Exhausted {
            attempts: max_attempts,
        })
    }

    fn attempt_mode(
        &mut self,
        request: ModeRequest,
        command: &[u8],
    ) -> Result<ValveStatus, AttemptFailure> {
        self.discard_input();
        if self.transport.send(command).is_err() {
            self.record_error(ErrorCode::ModeSetFailure);
            return Err(AttemptFailure::SendFailed);
        }

        if let ModeRequest::State(state) = request {
            self.commit_state(state);
        }

        self.clock.delay(self.config.response_settle);

        let mut report: Vec<u8, REPORT_CAPACITY> = Vec::new();
        let mut acked = false;
        let mut chunk = [0u8; RESPONSE_CAPACITY];
        'poll: for _ in 0..self.config.response_polls {
            let received = match self.transport.receive(&mut chunk) {
                Ok(received) => received,
                Err(_) => {
                    self.record_error(ErrorCode::ModeNotReceived);
                    if acked {
                        break;
                    }
                    return Err(AttemptFailure::ReceiveFailed);
                }
            };

            for &byte in chunk.iter().take(received) {
                if acked {
                    // Anything after a complete report is line noise.
                    if report_complete(&report) || report.push(byte).is_err() {
                        break 'poll;
                    }
                } else if byte == ACK {
                    acked = true;
                } else if byte == NACK {
                    self.record_error(ErrorCode::MessageNack);
                    return Err(AttemptFailure::Nack);
                }
            }

            if acked && report_complete(&report) {
                break;
            }
        }

        if !acked {
            return Err(AttemptFailure::Timeout);
        }

        if request == ModeRequest::PumpToggle {
            let toggled = self.context.state().toggle_pump();
            self.commit_state(toggled);
        }

        Ok(ValveStatus::parse(&report).unwrap_or(ValveStatus::UNKNOWN))
    }

    /// Sends the mode query and returns the reply text with the framing
    /// byte removed.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Transport`] when the query could not be sent.
    /// - [`ProtocolError::Empty`] when nothing came back.
    /// - [`ProtocolError::Nack`] when the board refused the query.
    pub fn get_mode(&mut self) -> Result<StatusText, ProtocolError> {
        let reply = self.query(MODE_QUERY)?;
        self.record(FlowEventKind::ModeQueried);
        Ok(reply)
    }

    /// Queries the board's mode and adopts it as the local state.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::Malformed`] when the reply does not name a
    /// known state, or any error from [`Self::get_mode`].
    pub fn query_state(&mut self) -> Result<SamplingState, ProtocolError> {
        let reply = self.get_mode()?;
        let mut lines = reply.lines();
        let name = lines
            .next()
            .and_then(|line| labelled_value(line, "MODE:"))
            .ok_or(ProtocolError::Malformed)?;
        let state = SamplingState::from_display_name(name).ok_or(ProtocolError::Malformed)?;

        if let Some(valves) = lines.next().and_then(|line| ValveStatus::parse(line.as_bytes()).ok())
        {
            self.valves = valves;
        }
        self.commit_state(state);
        Ok(state)
    }

    /// Sets the remote valve pulse width in milliseconds. No reply is
    /// required; whatever comes back is discarded.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::OutOfRange`] above 1000, or the send failure.
    pub fn set_pulse(&mut self, millis: u16) -> Result<(), ProtocolError> {
        self.set_remote("pulse", millis)
    }

    /// Sets the remote drive current level.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::OutOfRange`] above 1000, or the send failure.
    pub fn set_current(&mut self, level: u16) -> Result<(), ProtocolError> {
        self.set_remote("current", level)
    }

    /// # Errors
    ///
    /// Any query failure, or [`ProtocolError::Malformed`].
    pub fn get_pulse(&mut self) -> Result<u16, ProtocolError> {
        let reply = self.query(PULSE_QUERY)?;
        parse_reading(&reply, "PULSE:")
    }

    /// # Errors
    ///
    /// Any query failure, or [`ProtocolError::Malformed`].
    pub fn get_current(&mut self) -> Result<u16, ProtocolError> {
        let reply = self.query(CURRENT_QUERY)?;
        parse_reading(&reply, "CURRENT:")
    }

    /// Flips the pump of the current group state on the board.
    ///
    /// # Errors
    ///
    /// See [`Self::set_mode`].
    pub fn pump_toggle(&mut self) -> Result<ValveStatus, ProtocolError> {
        self.set_mode(ModeRequest::PumpToggle)
    }

    /// # Errors
    ///
    /// See [`Self::set_mode`].
    pub fn pump_on(&mut self) -> Result<ValveStatus, ProtocolError> {
        let target = self.context.state().with_pump(true);
        self.set_mode(target)
    }

    /// # Errors
    ///
    /// See [`Self::set_mode`].
    pub fn pump_off(&mut self) -> Result<ValveStatus, ProtocolError> {
        let target = self.context.state().with_pump(false);
        self.set_mode(target)
    }

    /// Powers a sleeping board and pulses the link wake sequence. Returns
    /// `false` when the board was already awake.
    pub fn wakeup(&mut self) -> bool {
        self.power
            .wakeup(&mut self.clock, &mut self.transport, &mut self.events)
    }

    /// Powers the board down.
    pub fn sleep(&mut self) {
        self.power.power_off(&mut self.clock, &mut self.events);
    }

    /// Unstructured write. Not retried.
    ///
    /// # Errors
    ///
    /// Returns the transport failure.
    pub fn write(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.transport.send(bytes).map_err(ProtocolError::from)
    }

    /// Unstructured read. Returns the first non-empty receive within the
    /// read budget, or `Ok(0)` when at least one receive succeeded empty.
    ///
    /// # Errors
    ///
    /// Returns the last transport failure when every receive failed.
    pub fn read(&mut self, buffer: &mut [u8]) -> Result<usize, ProtocolError> {
        let mut last_error: Option<TransportError> = None;
        let mut any_ok = false;
        for _ in 0..self.config.read_attempts {
            match self.transport.receive(buffer) {
                Ok(0) => any_ok = true,
                Ok(received) => return Ok(received),
                Err(err) => last_error = Some(err),
            }
        }

        match last_error {
            Some(err) if !any_ok => Err(err.into()),
            _ => Ok(0),
        }
    }

    #[must_use]
    pub fn current_state(&self) -> SamplingState {
        self.context.state()
    }

    /// Display name of the current state.
    #[must_use]
    pub fn mode_name(&self) -> &'static str {
        self.context.state().display_name()
    }

    #[must_use]
    pub fn valve_status(&self) -> ValveStatus {
        self.valves
    }

    #[must_use]
    pub fn power_state(&self) -> PowerState<C::Instant> {
        self.power.state()
    }

    #[must_use]
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn events(&self) -> &EventRecorder<C::Instant> {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventRecorder<C::Instant> {
        &mut self.events
    }

    pub fn context(&self) -> &Context<S> {
        &self.context
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn power(&self) -> &PowerSequencer<P, C::Instant> {
        &self.power
    }

    pub fn power_mut(&mut self) -> &mut PowerSequencer<P, C::Instant> {
        &mut self.power
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn set_remote(&mut self, name: &str, value: u16) -> Result<(), ProtocolError> {
        if value > MAX_REMOTE_SETTING {
            return Err(ProtocolError::OutOfRange {
                value,
                max: MAX_REMOTE_SETTING,
            });
        }
        let command: String<COMMAND_CAPACITY> =
            format_command(format_args!("{name}={value}\r\n"))?;

        self.discard_input();
        if let Err(err) = self.transport.send(command.as_bytes()) {
            self.record_error(ErrorCode::MessageNotSent);
            return Err(err.into());
        }
        self.clock.delay(self.config.query_settle);
        self.discard_input();
        Ok(())
    }

    fn query(&mut self, command: &[u8]) -> Result<StatusText, ProtocolError> {
        self.discard_input();
        if let Err(err) = self.transport.send(command) {
            self.record_error(ErrorCode::MessageNotSent);
            return Err(err.into());
        }
        self.clock.delay(self.config.query_settle);

        let mut buffer = [0u8; RESPONSE_CAPACITY];
        let received = self.collect_reply(&mut buffer);
        if received == 0 {
            self.record_error(ErrorCode::ModeNotReceived);
            return Err(ProtocolError::Empty);
        }

        let reply = buffer.get(..received).unwrap_or_default();
        let payload = match reply.split_first() {
            Some((&NACK, _)) => {
                self.record_error(ErrorCode::MessageNack);
                return Err(ProtocolError::Nack);
            }
            Some((&ACK, rest)) => rest,
            _ => reply,
        };

        let text = core::str::from_utf8(payload).map_err(|_| ProtocolError::Malformed)?;
        let mut status = StatusText::new();
        status
            .push_str(text)
            .map_err(|_| ProtocolError::Overflow)?;
        Ok(status)
    }

    /// Appends receives into `buffer` until the reply carries its status
    /// line or the read budget runs out. A link fault ends the reply early.
    fn collect_reply(&mut self, buffer: &mut [u8]) -> usize {
        let mut filled = 0;
        for _ in 0..self.config.read_attempts {
            let Some(free) = buffer.get_mut(filled..).filter(|free| !free.is_empty()) else {
                break;
            };
            match self.transport.receive(free) {
                Ok(received) => filled += received,
                Err(_) => break,
            }
            if reply_complete(buffer.get(..filled).unwrap_or_default()) {
                break;
            }
        }
        filled
    }

    fn discard_input(&mut self) {
        let mut scratch = [0u8; RESPONSE_CAPACITY];
        for _ in 0..DISCARD_LIMIT {
            match self.transport.receive(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    }

    fn commit_state(&mut self, state: SamplingState) {
        if self.context.set_state(state).is_err() {
            self.record(FlowEventKind::StoreFailure);
        }
    }

    fn record(&mut self, event: FlowEventKind) {
        let now = self.clock.now();
        self.events.record(event, EventPayload::None, now);
    }

    fn record_error(&mut self, code: ErrorCode) {
        let now = self.clock.now();
        self.events.record_error(code, now);
    }
}

fn report_complete(report: &[u8]) -> bool {
    let body = report
        .strip_prefix(VALVES_PREFIX.as_bytes())
        .unwrap_or(report);
    body.len() >= STATUS_REPORT_LEN
}

/// A query reply is a refusal, or a text line followed by a status report.
fn reply_complete(reply: &[u8]) -> bool {
    match reply.split_first() {
        None => false,
        Some((&NACK, _)) => true,
        Some((_, rest)) => rest
            .windows(2)
            .position(|pair| pair == b"\r\n")
            .and_then(|end| rest.get(end + 2..))
            .is_some_and(report_complete),
    }
}

fn format_command<const N: usize>(args: fmt::Arguments<'_>) -> Result<String<N>, ProtocolError> {
    let mut command = String::new();
    command
        .write_fmt(args)
        .map_err(|_| ProtocolError::Overflow)?;
    Ok(command)
}

fn labelled_value<'a>(line: &'a str, label: &str) -> Option<&'a str> {
    line.trim().strip_prefix(label).map(str::trim)
}

fn parse_reading(reply: &str, label: &str) -> Result<u16, ProtocolError> {
    reply
        .lines()
        .next()
        .and_then(|line| labelled_value(line, label))
        .and_then(|value| value.parse().ok())
        .ok_or(ProtocolError::Malformed)
}
