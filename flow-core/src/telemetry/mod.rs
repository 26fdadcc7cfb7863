//! Event catalog and ring-buffer recorder shared by firmware and host targets.
//!
//! Every failure on the flow link is logged with a distinguishing numeric
//! code before it is returned to the caller. Informational events (power
//! transitions, retries, accepted console commands) share the same ring so a
//! transcript can be reconstructed after the fact. Firmware drains the ring
//! to defmt; the emulator writes it into its transcript file.

use core::{fmt, time::Duration};

use heapless::{HistoryBuf, OldestOrdered};

use crate::clock::MonotonicInstant;
use crate::console::CommandTag;
use crate::state::ModeRequest;
use crate::valves::ValveStatus;

/// Monotonic identifier assigned to each recorded event.
pub type EventId = u32;

/// Total number of events retained in memory.
pub const EVENT_RING_CAPACITY: usize = 64;

/// Error codes reported by the flow link.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    FailedToInit,
    FailedOnStartup,
    InvalidState,
    ModeSetFailure,
    MessageNack,
    MessageNotSent,
    ModeNotReceived,
}

impl ErrorCode {
    const FAILED_TO_INIT: u32 = 0x0040_0001;
    const FAILED_ON_STARTUP: u32 = 0x0040_0002;
    const INVALID_STATE: u32 = 0x0040_0004;
    const MODE_SET_FAILURE: u32 = 0x0040_0008;
    const MESSAGE_NACK: u32 = 0x0040_0010;
    const MESSAGE_NOT_SENT: u32 = 0x0040_0020;
    const MODE_NOT_RECEIVED: u32 = 0x0040_0040;

    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            ErrorCode::FailedToInit => Self::FAILED_TO_INIT,
            ErrorCode::FailedOnStartup => Self::FAILED_ON_STARTUP,
            ErrorCode::InvalidState => Self::INVALID_STATE,
            ErrorCode::ModeSetFailure => Self::MODE_SET_FAILURE,
            ErrorCode::MessageNack => Self::MESSAGE_NACK,
            ErrorCode::MessageNotSent => Self::MESSAGE_NOT_SENT,
            ErrorCode::ModeNotReceived => Self::MODE_NOT_RECEIVED,
        }
    }

    #[must_use]
    pub const fn from_raw(code: u32) -> Option<Self> {
        match code {
            Self::FAILED_TO_INIT => Some(ErrorCode::FailedToInit),
            Self::FAILED_ON_STARTUP => Some(ErrorCode::FailedOnStartup),
            Self::INVALID_STATE => Some(ErrorCode::InvalidState),
            Self::MODE_SET_FAILURE => Some(ErrorCode::ModeSetFailure),
            Self::MESSAGE_NACK => Some(ErrorCode::MessageNack),
            Self::MESSAGE_NOT_SENT => Some(ErrorCode::MessageNotSent),
            Self::MODE_NOT_RECEIVED => Some(ErrorCode::ModeNotReceived),
            _ => None,
        }
    }

    /// Human readable summary.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            ErrorCode::FailedToInit => "FLOW Failed To Init",
            ErrorCode::FailedOnStartup => "FLOW Failed On Startup",
            ErrorCode::InvalidState => "FLOW Invalid Flow State",
            ErrorCode::ModeSetFailure => "FLOW Mode Set Failure",
            ErrorCode::MessageNack => "FLOW Message NACK",
            ErrorCode::MessageNotSent => "FLOW Message Not Sent",
            ErrorCode::ModeNotReceived => "FLOW Mode Not Received",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X} {}", self.to_raw(), self.description())
    }
}

/// Discriminated events recorded by the flow link and the console.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlowEventKind {
    Error(ErrorCode),
    PowerOn,
    PowerOff,
    Wakeup,
    AttemptFailed,
    PowerCycle,
    Retrying,
    ModeSet,
    ModeQueried,
    ConsoleAccepted,
    ConsoleRejected,
    StoreFailure,
    Custom(u32),
}

impl FlowEventKind {
    const POWER_ON_CODE: u32 = 0x0041_0001;
    const POWER_OFF_CODE: u32 = 0x0041_0002;
    const WAKEUP_CODE: u32 = 0x0041_0003;
    const ATTEMPT_FAILED_CODE: u32 = 0x0041_0004;
    const POWER_CYCLE_CODE: u32 = 0x0041_0005;
    const RETRYING_CODE: u32 = 0x0041_0006;
    const MODE_SET_CODE: u32 = 0x0041_0007;
    const MODE_QUERIED_CODE: u32 = 0x0041_0008;
    const CONSOLE_ACCEPTED_CODE: u32 = 0x0041_0009;
    const CONSOLE_REJECTED_CODE: u32 = 0x0041_000A;
    const STORE_FAILURE_CODE: u32 = 0x0041_000B;

    /// Encodes the event into a compact numeric discriminant.
    #[must_use]
    pub const fn to_raw(self) -> u32 {
        match self {
            FlowEventKind::Error(code) => code.to_raw(),
            FlowEventKind::PowerOn => Self::POWER_ON_CODE,
            FlowEventKind::PowerOff => Self::POWER_OFF_CODE,
            FlowEventKind::Wakeup => Self::WAKEUP_CODE,
            FlowEventKind::AttemptFailed => Self::ATTEMPT_FAILED_CODE,
            FlowEventKind::PowerCycle => Self::POWER_CYCLE_CODE,
            FlowEventKind::Retrying => Self::RETRYING_CODE,
            FlowEventKind::ModeSet => Self::MODE_SET_CODE,
            FlowEventKind::ModeQueried => Self::MODE_QUERIED_CODE,
            FlowEventKind::ConsoleAccepted => Self::CONSOLE_ACCEPTED_CODE,
            FlowEventKind::ConsoleRejected => Self::CONSOLE_REJECTED_CODE,
            FlowEventKind::StoreFailure => Self::STORE_FAILURE_CODE,
            FlowEventKind::Custom(code) => code,
        }
    }

    /// Decodes a numeric discriminant, falling back to [`FlowEventKind::Custom`].
    #[must_use]
    pub const fn from_raw(code: u32) -> Self {
        if let Some(error) = ErrorCode::from_raw(code) {
            return FlowEventKind::Error(error);
        }

        match code {
            Self::POWER_ON_CODE => FlowEventKind::PowerOn,
            Self::POWER_OFF_CODE => FlowEventKind::PowerOff,
            Self::WAKEUP_CODE => FlowEventKind::Wakeup,
            Self::ATTEMPT_FAILED_CODE => FlowEventKind::AttemptFailed,
            Self::POWER_CYCLE_CODE => FlowEventKind::PowerCycle,
            Self::RETRYING_CODE => FlowEventKind::Retrying,
            Self::MODE_SET_CODE => FlowEventKind::ModeSet,
            Self::MODE_QUERIED_CODE => FlowEventKind::ModeQueried,
            Self::CONSOLE_ACCEPTED_CODE => FlowEventKind::ConsoleAccepted,
            Self::CONSOLE_REJECTED_CODE => FlowEventKind::ConsoleRejected,
            Self::STORE_FAILURE_CODE => FlowEventKind::StoreFailure,
            other => FlowEventKind::Custom(other),
        }
    }

    /// Returns `true` for events that carry an error code.
    #[must_use]
    pub const fn is_error(self) -> bool {
        matches!(self, FlowEventKind::Error(_))
    }
}

impl fmt::Display for FlowEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowEventKind::Error(code) => write!(f, "error {code}"),
            FlowEventKind::PowerOn => f.write_str("FLOW Power On"),
            FlowEventKind::PowerOff => f.write_str("FLOW Power Off"),
            FlowEventKind::Wakeup => f.write_str("FLOW Wakeup"),
            FlowEventKind::AttemptFailed => f.write_str("Flow Controller FAIL"),
            FlowEventKind::PowerCycle => f.write_str("Cycling Flow Control Power"),
            FlowEventKind::Retrying => f.write_str("Retrying Flow Command"),
            FlowEventKind::ModeSet => f.write_str("mode set"),
            FlowEventKind::ModeQueried => f.write_str("mode queried"),
            FlowEventKind::ConsoleAccepted => f.write_str("console ACK"),
            FlowEventKind::ConsoleRejected => f.write_str("console NACK"),
            FlowEventKind::StoreFailure => f.write_str("store failure"),
            FlowEventKind::Custom(code) => write!(f, "custom({code:08X})"),
        }
    }
}

/// Why a protocol attempt failed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AttemptFailure {
    SendFailed,
    Nack,
    Timeout,
    /// The link faulted before an acknowledgement arrived.
    ReceiveFailed,
}

/// Metadata for a failed protocol attempt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AttemptTelemetry {
    /// One-based attempt number.
    pub attempt: u8,
    pub max_attempts: u8,
    pub cause: AttemptFailure,
}

impl AttemptTelemetry {
    #[must_use]
    pub const fn new(attempt: u8, max_attempts: u8, cause: AttemptFailure) -> Self {
        Self {
            attempt,
            max_attempts,
            cause,
        }
    }
}

/// Metadata for a completed mode change.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ModeTelemetry {
    pub request: ModeRequest,
    pub valves: ValveStatus,
    pub attempts: u8,
}

/// Metadata for a power rail transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerTelemetry {
    /// How long the rail had been energized, recorded on power-off.
    pub energized_for: Option<Duration>,
}

/// Payloads carried alongside events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EventPayload {
    None,
    Attempt(AttemptTelemetry),
    Mode(ModeTelemetry),
    Power(PowerTelemetry),
    Console(CommandTag),
}

/// Event stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EventRecord<TInstant>
where
    TInstant: Copy,
{
    pub id: EventId,
    pub timestamp: TInstant,
    pub event: FlowEventKind,
    pub details: EventPayload,
}

/// Event ring buffer type alias.
pub type EventRing<TInstant, const CAPACITY: usize = EVENT_RING_CAPACITY> =
    HistoryBuf<EventRecord<TInstant>, CAPACITY>;

/// Records events into a fixed-size ring buffer. Oldest entries are
/// overwritten once the ring is full.
pub struct EventRecorder<TInstant, const CAPACITY: usize = EVENT_RING_CAPACITY>
where
    TInstant: Copy,
{
    ring: EventRing<TInstant, CAPACITY>,
    next_event_id: EventId,
    drained_through: Option<EventId>,
}

impl<TInstant, const CAPACITY: usize> EventRecorder<TInstant, CAPACITY>
where
    TInstant: MonotonicInstant,
{
    /// Creates a recorder with an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
            drained_through: None,
        }
    }

    /// Iterates recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, EventRecord<TInstant>> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent record, if any.
    pub fn latest(&self) -> Option<&EventRecord<TInstant>> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Number of retained records matching `event`.
    pub fn count(&self, event: FlowEventKind) -> usize {
        self.ring
            .oldest_ordered()
            .filter(|record| record.event == event)
            .count()
    }

    /// Copies the retained records, oldest first.
    #[cfg(feature = "alloc")]
    pub fn snapshot(&self) -> alloc::vec::Vec<EventRecord<TInstant>> {
        self.ring.oldest_ordered().copied().collect()
    }

    /// Visits records not yet handed to a log sink and marks them drained.
    pub fn drain_new<F>(&mut self, mut sink: F)
    where
        F: FnMut(&EventRecord<TInstant>),
    {
        let cutoff = self.drained_through;
        for record in self.ring.oldest_ordered() {
            if cutoff.is_none_or(|last| record.id > last) {
                sink(record);
            }
        }
        if let Some(latest) = self.ring.recent() {
            self.drained_through = Some(latest.id);
        }
    }

    /// Records an arbitrary event with the supplied payload.
    pub fn record(
        &mut self,
        event: FlowEventKind,
        details: EventPayload,
        timestamp: TInstant,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);

        self.ring.write(EventRecord {
            id,
            timestamp,
            event,
            details,
        });

        id
    }

    /// Records an error code with no extra payload.
    pub fn record_error(&mut self, code: ErrorCode, timestamp: TInstant) -> EventId {
        self.record(FlowEventKind::Error(code), EventPayload::None, timestamp)
    }

    /// Records a failed attempt of a retried transaction.
    pub fn record_attempt_failed(
        &mut self,
        details: AttemptTelemetry,
        timestamp: TInstant,
    ) -> EventId {
        self.record(
            FlowEventKind::AttemptFailed,
            EventPayload::Attempt(details),
            timestamp,
        )
    }

    /// Records a power-off, including how long the rail had been up.
    pub fn record_power_off(&mut self, powered_at: Option<TInstant>, timestamp: TInstant) -> EventId {
        let energized_for = powered_at.map(|start| timestamp.saturating_duration_since(start));
        self.record(
            FlowEventKind::PowerOff,
            EventPayload::Power(PowerTelemetry { energized_for }),
            timestamp,
        )
    }
}

impl<TInstant, const CAPACITY: usize> Default for EventRecorder<TInstant, CAPACITY>
where
    TInstant: MonotonicInstant,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
    struct MillisInstant(u64);

    impl MonotonicInstant for MillisInstant {
        fn saturating_duration_since(&self, earlier: Self) -> Duration {
            Duration::from_millis(self.0.saturating_sub(earlier.0))
        }
    }

    #[test]
    fn error_codes_round_trip() {
        let fixtures = [
            (ErrorCode::FailedToInit, 0x0040_0001),
            (ErrorCode::FailedOnStartup, 0x0040_0002),
            (ErrorCode::InvalidState, 0x0040_0004),
            (ErrorCode::ModeSetFailure, 0x0040_0008),
            (ErrorCode::MessageNack, 0x0040_0010),
            (ErrorCode::MessageNotSent, 0x0040_0020),
            (ErrorCode::ModeNotReceived, 0x0040_0040),
        ];

        for (code, raw) in fixtures {
            assert_eq!(code.to_raw(), raw);
            assert_eq!(ErrorCode::from_raw(raw), Some(code));
            assert_eq!(FlowEventKind::from_raw(raw), FlowEventKind::Error(code));
        }
    }

    #[test]
    fn unknown_codes_decode_as_custom() {
        let event = FlowEventKind::from_raw(0xDEAD_0001);
        assert_eq!(event, FlowEventKind::Custom(0xDEAD_0001));
        assert_eq!(event.to_raw(), 0xDEAD_0001);
        assert!(!event.is_error());
    }

    #[test]
    fn informational_codes_round_trip() {
        let kinds = [
            FlowEventKind::PowerOn,
            FlowEventKind::PowerOff,
            FlowEventKind::Wakeup,
            FlowEventKind::AttemptFailed,
            FlowEventKind::PowerCycle,
            FlowEventKind::Retrying,
            FlowEventKind::ModeSet,
            FlowEventKind::ModeQueried,
            FlowEventKind::ConsoleAccepted,
            FlowEventKind::ConsoleRejected,
            FlowEventKind::StoreFailure,
        ];
        for kind in kinds {
            assert_eq!(FlowEventKind::from_raw(kind.to_raw()), kind);
        }
    }

    #[test]
    fn power_off_records_energized_duration() {
        let mut recorder = EventRecorder::<MillisInstant>::new();
        recorder.record_power_off(Some(MillisInstant(1_000)), MillisInstant(4_500));

        let record = recorder.latest().copied().expect("record");
        assert_eq!(record.event, FlowEventKind::PowerOff);
        match record.details {
            EventPayload::Power(details) => {
                assert_eq!(details.energized_for, Some(Duration::from_millis(3_500)));
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn ring_overwrites_oldest_and_keeps_ids_monotonic() {
        let mut recorder = EventRecorder::<MillisInstant, 4>::new();
        for tick in 0..6 {
            recorder.record(FlowEventKind::Retrying, EventPayload::None, MillisInstant(tick));
        }

        assert_eq!(recorder.len(), 4);
        let ids: heapless::Vec<EventId, 4> =
            recorder.oldest_first().map(|record| record.id).collect();
        assert_eq!(ids.as_slice(), &[2, 3, 4, 5]);
        assert_eq!(recorder.count(FlowEventKind::Retrying), 4);
    }

    #[test]
    fn drain_new_only_visits_fresh_records() {
        let mut recorder = EventRecorder::<MillisInstant>::new();
        recorder.record_error(ErrorCode::MessageNack, MillisInstant(1));
        recorder.record_error(ErrorCode::MessageNotSent, MillisInstant(2));

        let mut seen = 0;
        recorder.drain_new(|_| seen += 1);
        assert_eq!(seen, 2);

        recorder.record(FlowEventKind::PowerOn, EventPayload::None, MillisInstant(3));
        let mut fresh = heapless::Vec::<FlowEventKind, 4>::new();
        recorder.drain_new(|record| {
            let _ = fresh.push(record.event);
        });
        assert_eq!(fresh.as_slice(), &[FlowEventKind::PowerOn]);
    }

    #[test]
    fn error_code_display_includes_hex_code() {
        use core::fmt::Write;
        let mut text: heapless::String<48> = heapless::String::new();
        write!(text, "{}", ErrorCode::MessageNack).expect("fits");
        assert_eq!(text.as_str(), "00400010 FLOW Message NACK");
    }
}
