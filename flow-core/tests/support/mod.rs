#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use flow_core::clock::{Clock, MonotonicInstant};
use flow_core::console::{CommandDispatcher, LineBuffer};
use flow_core::motion::{MotionController, NoopValveDriver};
use flow_core::persistence::{Context, MemoryStore};
use flow_core::power::PowerSwitch;
use flow_core::protocol::{Transport, TransportError};

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct Millis(pub u64);

impl MonotonicInstant for Millis {
    fn saturating_duration_since(&self, earlier: Self) -> Duration {
        Duration::from_millis(self.0.saturating_sub(earlier.0))
    }
}

/// Clock whose delays advance time instantly.
#[derive(Debug, Default)]
pub struct VirtualClock {
    pub now_ms: u64,
}

impl Clock for VirtualClock {
    type Instant = Millis;

    fn now(&self) -> Millis {
        Millis(self.now_ms)
    }

    fn delay(&mut self, duration: Duration) {
        self.now_ms += u64::try_from(duration.as_millis()).expect("delay fits in u64");
    }
}

#[derive(Debug, Default)]
pub struct RecordingSwitch {
    pub enabled: bool,
    pub on_calls: usize,
    pub off_calls: usize,
}

impl RecordingSwitch {
    pub fn reset_counts(&mut self) {
        self.on_calls = 0;
        self.off_calls = 0;
    }
}

impl PowerSwitch for RecordingSwitch {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if enabled {
            self.on_calls += 1;
        } else {
            self.off_calls += 1;
        }
    }
}

/// Transport whose every send and receive fails.
#[derive(Debug, Default)]
pub struct DeadLink {
    pub send_attempts: usize,
    pub wakes: usize,
}

impl Transport for DeadLink {
    fn send(&mut self, _bytes: &[u8]) -> Result<(), TransportError> {
        self.send_attempts += 1;
        Err(TransportError::Send)
    }

    fn receive(&mut self, _buffer: &mut [u8]) -> Result<usize, TransportError> {
        Err(TransportError::Receive)
    }

    fn wake(&mut self) {
        self.wakes += 1;
    }
}

pub type Board = CommandDispatcher<NoopValveDriver, MemoryStore, VirtualClock>;

pub fn board() -> Board {
    let store = MemoryStore::new()
        .with_identity("FLOW-0007", "3.0.1")
        .expect("identity fits");
    let context = Context::boot(store).expect("board boot");
    CommandDispatcher::new(
        MotionController::new(NoopValveDriver),
        context,
        VirtualClock::default(),
    )
}

/// In-memory link that feeds sent bytes straight into a flow board console.
pub struct BoardLink {
    pub board: Board,
    line: LineBuffer,
    inbound: VecDeque<u8>,
    pub lines: Vec<String>,
}

impl BoardLink {
    pub fn new(board: Board) -> Self {
        Self {
            board,
            line: LineBuffer::new(),
            inbound: VecDeque::new(),
            lines: Vec::new(),
        }
    }
}

impl Transport for BoardLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        for &byte in bytes {
            if self.line.ingest(byte) {
                self.lines
                    .push(String::from_utf8_lossy(self.line.as_bytes()).into_owned());
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
