mod support;

use flow_core::persistence::{Context, MemoryStore};
use flow_core::power::NoopPowerSwitch;
use flow_core::protocol::{ProtocolEngine, ProtocolError};
use flow_core::state::{GroupPhase, PurgeProgram, SamplingState, StateError, StateGroup, TestState};
use flow_core::telemetry::{ErrorCode, FlowEventKind};
use flow_core::valves::PumpStatus;

use support::{BoardLink, VirtualClock, board};

type LinkedEngine = ProtocolEngine<BoardLink, NoopPowerSwitch, VirtualClock, MemoryStore>;

fn linked() -> LinkedEngine {
    let context = Context::boot(MemoryStore::new()).expect("sensor boot");
    ProtocolEngine::new(
        BoardLink::new(board()),
        NoopPowerSwitch,
        VirtualClock::default(),
        context,
    )
}

#[test]
fn set_mode_reaches_board_and_reports_its_valves() {
    let mut engine = linked();
    let target = SamplingState::grouped(StateGroup::Equilibrate, GroupPhase::PumpOn);

    let valves = engine.set_mode(target).expect("mode set");

    let board = &engine.transport().board;
    assert_eq!(board.state(), target);
    assert_eq!(valves, board.status());
    assert_eq!(valves.pump, PumpStatus::On);
    assert_eq!(engine.current_state(), target);
    assert_eq!(engine.transport().lines, vec!["mode=EPON".to_string()]);
}

#[test]
fn every_encodable_state_round_trips_over_the_link() {
    let mut engine = linked();
    for state in SamplingState::ALL {
        if matches!(state, SamplingState::Test(_)) {
            continue;
        }
        engine.set_mode(state).expect("mode set");
        assert_eq!(engine.transport().board.state(), state);
        assert_eq!(engine.query_state(), Ok(state));
    }
}

#[test]
fn test_states_never_reach_the_board() {
    let mut engine = linked();

    let result = engine.set_mode(SamplingState::Test(TestState::Air0));

    assert_eq!(
        result,
        Err(ProtocolError::State(StateError::NotEncodable(
            SamplingState::Test(TestState::Air0)
        )))
    );
    assert!(engine.transport().lines.is_empty());
    assert_eq!(
        engine
            .events()
            .count(FlowEventKind::Error(ErrorCode::InvalidState)),
        1
    );
}

#[test]
fn pump_toggle_flips_both_sides() {
    let mut engine = linked();
    engine
        .set_mode(SamplingState::grouped(StateGroup::Zero, GroupPhase::PumpOn))
        .expect("mode set");

    let valves = engine.pump_toggle().expect("toggle");

    let expected = SamplingState::grouped(StateGroup::Zero, GroupPhase::PumpOff);
    assert_eq!(engine.current_state(), expected);
    assert_eq!(engine.transport().board.state(), expected);
    assert_eq!(valves.pump, PumpStatus::Off);
}

#[test]
fn pump_on_and_off_follow_current_group() {
    let mut engine = linked();
    engine
        .set_mode(SamplingState::grouped(StateGroup::Span, GroupPhase::PostCal))
        .expect("mode set");

    engine.pump_on().expect("pump on");
    assert_eq!(
        engine.transport().board.state(),
        SamplingState::grouped(StateGroup::Span, GroupPhase::PumpOn)
    );

    engine.pump_off().expect("pump off");
    assert_eq!(
        engine.transport().board.state(),
        SamplingState::grouped(StateGroup::Span, GroupPhase::PumpOff)
    );
}

#[test]
fn remote_pulse_and_current_settings() {
    let mut engine = linked();
    engine.wakeup();

    assert_eq!(engine.get_pulse(), Ok(64));
    engine.set_pulse(250).expect("pulse set");
    assert_eq!(engine.get_pulse(), Ok(250));

    // The board refuses widths below 5 ms; the setter does not wait for it.
    engine.set_pulse(3).expect("fire and forget");
    assert_eq!(engine.get_pulse(), Ok(250));

    engine.set_current(6).expect("current set");
    assert_eq!(engine.get_current(), Ok(6));
    assert_eq!(
        engine.set_current(1_200),
        Err(ProtocolError::OutOfRange {
            value: 1_200,
            max: 1_000
        })
    );
}

#[test]
fn start_adopts_board_state() {
    let mut engine = linked();
    let reply = engine.transport_mut().board.parse_text("mode=PRG3");
    assert!(reply.is_ack());

    let state = engine.start().expect("start");

    assert_eq!(state, SamplingState::Purge(PurgeProgram::P3));
    assert_eq!(engine.current_state(), state);
    assert_eq!(engine.valve_status(), engine.transport().board.status());
}

#[test]
fn get_mode_returns_reply_text() {
    let mut engine = linked();
    engine.wakeup();

    let reply = engine.get_mode().expect("mode text");

    assert!(reply.starts_with("MODE: DEPLOY\r\n"), "reply was {reply:?}");
}

#[test]
fn raw_write_and_read_pass_through() {
    let mut engine = linked();
    engine.write(b"ser\r\n").expect("write");

    let mut buffer = [0u8; 64];
    let received = engine.read(&mut buffer).expect("read");

    assert_eq!(&buffer[..received], b"\x06SERIAL: FLOW-0007\r\nAAAAAA0");
}

#[test]
fn sleep_then_set_mode_wakes_board_again() {
    let mut engine = linked();
    engine.set_mode(SamplingState::Rest).expect("mode set");
    engine.sleep();
    assert!(!engine.power_state().energized);

    engine.set_mode(SamplingState::Deploy).expect("mode set after sleep");

    assert!(engine.power_state().energized);
    assert_eq!(engine.events().count(FlowEventKind::PowerOn), 2);
    assert_eq!(engine.events().count(FlowEventKind::PowerOff), 1);
}
