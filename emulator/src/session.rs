use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use flow_core::clock::{Clock, MonotonicInstant};
use flow_core::console::{CommandDispatcher, LineBuffer};
use flow_core::motion::{MotionController, NoopValveDriver};
use flow_core::persistence::{Context, MemoryStore};
use flow_core::power::PowerSwitch;
use flow_core::protocol::{ProtocolEngine, ProtocolError, Transport, TransportError};
use flow_core::state::{ModeRequest, SamplingState};
use flow_core::telemetry::{EventPayload, EventRecord, FlowEventKind};
use flow_core::valves::ValveStatus;

const BOARD_SERIAL: &str = "FLOW-EMU1";
const BOARD_VERSION: &str = "3.0.1";
const SENSOR_SERIAL: &str = "PCO2-EMU1";
const DEFAULT_FAULT_DROPS: usize = 3;

pub const HELP_TOPICS: &[(&str, &str)] = &[
    ("mode", "mode <TOKEN|PUMP_TOGGLE>    - set the flow board mode"),
    ("get", "get <mode|pulse|current>     - query the flow board"),
    ("pulse", "pulse <ms>                   - set the remote valve pulse width"),
    ("current", "current <level>              - set the remote drive current"),
    ("pump", "pump <on|off|toggle>         - change the pump within the group"),
    ("start", "start                        - wake the board and adopt its state"),
    ("power", "power <on|off>               - wake or sleep the flow board"),
    ("raw", "raw <line>                   - send one console line and show the reply"),
    ("drop", "drop <n>                     - drop the next n sends to the board"),
    ("status", "status                       - show local state, valves, and power"),
    ("events", "events                       - list the retained event history"),
    ("help", "help [topic]                 - show help for a command"),
];

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Session,
    Faults,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Session => "transcripts/emulator-session.log",
            TranscriptProfile::Faults => "transcripts/emulator-faults.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Session => "Flow board emulator session transcript",
            TranscriptProfile::Faults => "Flow board emulator fault injection transcript",
        }
    }

    /// Sends to drop before the link starts delivering.
    pub fn default_drops(self) -> usize {
        match self {
            TranscriptProfile::Session => 0,
            TranscriptProfile::Faults => DEFAULT_FAULT_DROPS,
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("session") {
            Ok(Self::Session)
        } else if tag.eq_ignore_ascii_case("faults") {
            Ok(Self::Faults)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

/// Simulated time. Delays advance it instantly so retries and power-cycle
/// settles do not stall the shell.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct SimInstant(Duration);

impl SimInstant {
    pub fn since_start(self) -> Duration {
        self.0
    }
}

impl MonotonicInstant for SimInstant {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

#[derive(Debug, Default)]
pub struct SimClock {
    elapsed: Duration,
}

impl Clock for SimClock {
    type Instant = SimInstant;

    fn now(&self) -> SimInstant {
        SimInstant(self.elapsed)
    }

    fn delay(&mut self, duration: Duration) {
        self.elapsed += duration;
    }
}

/// Power rail model that counts real transitions.
#[derive(Debug, Default)]
pub struct RailSwitch {
    enabled: bool,
    transitions: usize,
}

impl PowerSwitch for RailSwitch {
    fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.transitions += 1;
        }
        self.enabled = enabled;
    }
}

type Board = CommandDispatcher<NoopValveDriver, MemoryStore, SimClock>;

/// In-memory serial link to a simulated flow board. Sends made while the
/// drop counter is non-zero are lost, which makes the board miss the line.
pub struct SimulatedLink {
    board: Board,
    line: LineBuffer,
    inbound: VecDeque<u8>,
    drop_sends: usize,
    dropped: usize,
}

impl SimulatedLink {
    fn new(drop_sends: usize) -> Result<Self, String> {
        let store = MemoryStore::new()
            .with_identity(BOARD_SERIAL, BOARD_VERSION)
            .map_err(|err| format!("board identity: {err}"))?;
        let context = Context::boot(store).map_err(|err| format!("board boot: {err}"))?;
        let board = CommandDispatcher::new(
            MotionController::new(NoopValveDriver),
            context,
            SimClock::default(),
        );

        Ok(Self {
            board,
            line: LineBuffer::new(),
            inbound: VecDeque::new(),
            drop_sends,
            dropped: 0,
        })
    }

    fn arm_drops(&mut self, count: usize) {
        self.drop_sends = count;
    }

    fn board_state(&self) -> SamplingState {
        self.board.state()
    }

    fn board_status(&self) -> ValveStatus {
        self.board.status()
    }
}

impl Transport for SimulatedLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.drop_sends > 0 {
            self.drop_sends -= 1;
            self.dropped += 1;
            return Ok(());
        }

        for &byte in bytes {
            if self.line.ingest(byte) {
                let reply = self.board.parse_line(&mut self.line);
                self.inbound.extend(reply.to_bytes().iter().copied());
            }
        }
        Ok(())
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        let count = buffer.len().min(self.inbound.len());
        for (slot, byte) in buffer.iter_mut().zip(self.inbound.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

type Engine = ProtocolEngine<SimulatedLink, RailSwitch, SimClock, MemoryStore>;

pub struct Session {
    engine: Engine,
    transcript: TranscriptLogger,
}

impl Session {
    pub fn new(profile: TranscriptProfile, drops: Option<usize>) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        let link = SimulatedLink::new(drops.unwrap_or_else(|| profile.default_drops()))
            .map_err(io::Error::other)?;
        let store = MemoryStore::new()
            .with_identity(SENSOR_SERIAL, BOARD_VERSION)
            .map_err(|err| io::Error::other(err.to_string()))?;
        let context = Context::boot(store).map_err(|err| io::Error::other(err.to_string()))?;
        let engine = ProtocolEngine::new(link, RailSwitch::default(), SimClock::default(), context);

        Ok(Self { engine, transcript })
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.elapsed();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let mut words = trimmed.split_whitespace();
        let verb = words.next().unwrap_or_default().to_ascii_lowercase();
        let argument = words.next();

        let mut lines = match (verb.as_str(), argument) {
            ("help", topic) => help(topic),
            ("mode", Some(token)) => self.set_mode(token),
            ("get", Some("mode")) => self.get_mode(),
            ("get", Some("pulse")) => {
                let result = self.engine.get_pulse();
                vec![report(result.map(|ms| format!("OK pulse={ms}ms")))]
            }
            ("get", Some("current")) => {
                let result = self.engine.get_current();
                vec![report(result.map(|level| format!("OK current={level}")))]
            }
            ("pulse", Some(value)) => self.set_remote(value, Engine::set_pulse, "pulse"),
            ("current", Some(value)) => self.set_remote(value, Engine::set_current, "current"),
            ("pump", Some("on")) => vec![self.describe_mode(Engine::pump_on)],
            ("pump", Some("off")) => vec![self.describe_mode(Engine::pump_off)],
            ("pump", Some("toggle")) => vec![self.describe_mode(Engine::pump_toggle)],
            ("start", None) => {
                let result = self.engine.start();
                vec![report(result.map(|state| {
                    format!("OK adopted {}", state.display_name())
                }))]
            }
            ("power", Some("on")) => {
                if self.engine.wakeup() {
                    vec!["OK awake".to_string()]
                } else {
                    vec!["OK already awake".to_string()]
                }
            }
            ("power", Some("off")) => {
                self.engine.sleep();
                vec!["OK asleep".to_string()]
            }
            ("raw", Some(_)) => {
                let rest = trimmed
                    .split_once(char::is_whitespace)
                    .map_or("", |(_, rest)| rest.trim());
                self.raw(rest)
            }
            ("drop", Some(value)) => match value.parse::<usize>() {
                Ok(count) => {
                    self.engine.transport_mut().arm_drops(count);
                    vec![format!("OK dropping next {count} sends")]
                }
                Err(_) => vec![format!("ERR syntax expected a count, got `{value}`")],
            },
            ("status", None) => self.status(),
            ("events", None) => self.events(),
            _ => vec![format!("ERR syntax unrecognized `{trimmed}` (try `help`)")],
        };

        lines.extend(self.new_events());
        self.record_output(&lines)?;
        Ok(lines)
    }

    fn elapsed(&self) -> Duration {
        self.engine.clock().now().since_start()
    }

    fn set_mode(&mut self, token: &str) -> Vec<String> {
        let request = match ModeRequest::parse(&token.to_ascii_uppercase()) {
            Ok(request) => request,
            Err(err) => return vec![format!("ERR mode {err}")],
        };
        vec![self.describe_mode(|engine| engine.set_mode(request))]
    }

    fn describe_mode<F>(&mut self, operation: F) -> String
    where
        F: FnOnce(&mut Engine) -> Result<ValveStatus, ProtocolError>,
    {
        let started = self.elapsed();
        let result = operation(&mut self.engine);
        let took = self.elapsed().saturating_sub(started);
        report(result.map(|valves| {
            format!(
                "OK mode={} valves={} took={}",
                self.engine.mode_name(),
                render(valves),
                format_duration_short(took)
            )
        }))
    }

    fn get_mode(&mut self) -> Vec<String> {
        match self.engine.get_mode() {
            Ok(reply) => reply
                .lines()
                .map(|line| format!("OK {line}"))
                .collect(),
            Err(err) => vec![format!("ERR {err}")],
        }
    }

    fn set_remote<F>(&mut self, value: &str, setter: F, name: &str) -> Vec<String>
    where
        F: FnOnce(&mut Engine, u16) -> Result<(), ProtocolError>,
    {
        let Ok(parsed) = value.parse::<u16>() else {
            return vec![format!("ERR syntax expected a number, got `{value}`")];
        };
        let result = setter(&mut self.engine, parsed);
        vec![report(result.map(|()| format!("OK {name}={parsed} sent")))]
    }

    fn raw(&mut self, line: &str) -> Vec<String> {
        let mut command = line.to_string();
        command.push_str("\r\n");
        if let Err(err) = self.engine.write(command.as_bytes()) {
            return vec![format!("ERR {err}")];
        }

        let mut buffer = [0u8; 128];
        match self.engine.read(&mut buffer) {
            Ok(0) => vec!["ERR no reply".to_string()],
            Ok(received) => vec![format!("RAW {}", escape(&buffer[..received]))],
            Err(err) => vec![format!("ERR {err}")],
        }
    }

    fn status(&self) -> Vec<String> {
        let power = self.engine.power_state();
        let link = self.engine.transport();
        vec![
            format!(
                "sensor mode={} valves={}",
                self.engine.mode_name(),
                render(self.engine.valve_status())
            ),
            format!(
                "board mode={} valves={}",
                link.board_state().display_name(),
                render(link.board_status())
            ),
            format!(
                "power energized={} rail-transitions={} dropped-sends={}",
                power.energized,
                self.engine.power().switch().transitions,
                link.dropped
            ),
            format!(
                "startups sensor={} board={}",
                self.engine.context().info().startup_count,
                link.board.context().info().startup_count
            ),
        ]
    }

    fn events(&self) -> Vec<String> {
        let records = self.engine.events().snapshot();
        if records.is_empty() {
            return vec!["no events recorded".to_string()];
        }
        records.iter().map(describe_event).collect()
    }

    fn new_events(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        self.engine
            .events_mut()
            .drain_new(|record| lines.push(format!("  {}", describe_event(record))));
        lines
    }

    fn record_output(&mut self, lines: &[String]) -> io::Result<()> {
        let elapsed = self.elapsed();
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn help(topic: Option<&str>) -> Vec<String> {
    let mut lines = Vec::new();
    match topic {
        Some(target) => {
            if let Some((_, detail)) = HELP_TOPICS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(target))
            {
                lines.push((*detail).to_string());
            } else {
                lines.push(format!("No help available for `{target}`."));
                lines.push(format!("Available topics: {}", help_topic_list()));
            }
        }
        None => {
            lines.push("Available commands:".to_string());
            for (_, detail) in HELP_TOPICS {
                lines.push(format!("  {detail}"));
            }
            lines.push("Type `help <topic>` for a specific command.".to_string());
        }
    }
    lines
}

fn help_topic_list() -> String {
    HELP_TOPICS
        .iter()
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn report(result: Result<String, ProtocolError>) -> String {
    result.unwrap_or_else(|err| format!("ERR {err}"))
}

fn render(valves: ValveStatus) -> String {
    String::from_utf8_lossy(&valves.render()).into_owned()
}

fn escape(bytes: &[u8]) -> String {
    bytes.escape_ascii().to_string()
}

fn describe_event(record: &EventRecord<SimInstant>) -> String {
    let at = record.timestamp.since_start().as_millis();
    let name = match record.event {
        FlowEventKind::Error(code) => format!("error({})", code.description()),
        other => format!("{other:?}"),
    };
    let details = match record.details {
        EventPayload::None => String::new(),
        EventPayload::Attempt(attempt) => format!(
            " attempt={}/{} cause={:?}",
            attempt.attempt, attempt.max_attempts, attempt.cause
        ),
        EventPayload::Mode(mode) => format!(
            " request={:?} valves={} attempts={}",
            mode.request,
            render(mode.valves),
            mode.attempts
        ),
        EventPayload::Power(power) => match power.energized_for {
            Some(duration) => format!(" energized-for={}", format_duration_short(duration)),
            None => String::new(),
        },
        EventPayload::Console(tag) => format!(" command={tag:?}"),
    };
    format!("#{} +{at}ms {name}{details}", record.id)
}

fn format_duration_short(duration: Duration) -> String {
    if duration.as_secs() == 0 {
        format!("{}ms", duration.as_millis())
    } else {
        format!("{:.3}s", duration.as_secs_f64())
    }
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are simulated milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(drops: usize) -> SimulatedLink {
        SimulatedLink::new(drops).expect("simulated board")
    }

    #[test]
    fn dropped_sends_never_reach_the_board() {
        let mut link = link(1);
        link.send(b"mode=REST\r\n").expect("send");
        assert_eq!(link.board_state(), SamplingState::Deploy);
        assert_eq!(link.dropped, 1);

        link.send(b"mode=REST\r\n").expect("send");
        assert_eq!(link.board_state(), SamplingState::Rest);
    }

    #[test]
    fn engine_retries_through_dropped_sends() {
        let store = MemoryStore::new();
        let context = Context::boot(store).expect("boot");
        let mut engine = ProtocolEngine::new(
            link(2),
            RailSwitch::default(),
            SimClock::default(),
            context,
        );

        let request = ModeRequest::parse("SPON").expect("token");
        engine.set_mode(request).expect("third attempt lands");

        assert_eq!(engine.transport().dropped, 2);
        assert_eq!(engine.events().count(FlowEventKind::PowerCycle), 2);
    }

    #[test]
    fn event_lines_include_payload_details() {
        let mut clock = SimClock::default();
        clock.delay(Duration::from_millis(1_250));
        let record = EventRecord {
            id: 4,
            timestamp: clock.now(),
            event: FlowEventKind::PowerOn,
            details: EventPayload::None,
        };
        assert_eq!(describe_event(&record), "#4 +1250ms PowerOn");
    }

    #[test]
    fn profile_tags_are_case_insensitive() {
        assert_eq!(
            TranscriptProfile::from_tag("FAULTS"),
            Ok(TranscriptProfile::Faults)
        );
        assert!(TranscriptProfile::from_tag("reboot").is_err());
    }
}
