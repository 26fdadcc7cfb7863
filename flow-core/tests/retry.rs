mod support;

use flow_core::persistence::{Context, MemoryStore};
use flow_core::protocol::{ProtocolConfig, ProtocolEngine, ProtocolError};
use flow_core::state::{GroupPhase, SamplingState, StateGroup};
use flow_core::telemetry::{AttemptFailure, ErrorCode, EventPayload, FlowEventKind};

use support::{DeadLink, RecordingSwitch, VirtualClock};

type DeadEngine = ProtocolEngine<DeadLink, RecordingSwitch, VirtualClock, MemoryStore>;

fn dead_engine() -> DeadEngine {
    let context = Context::boot(MemoryStore::new()).expect("boot");
    ProtocolEngine::new(
        DeadLink::default(),
        RecordingSwitch::default(),
        VirtualClock::default(),
        context,
    )
}

#[test]
fn dead_link_exhausts_after_eight_attempts_with_seven_power_cycles() {
    let mut engine = dead_engine();
    engine.wakeup();
    engine.power_mut().switch_mut().reset_counts();

    let result = engine.set_mode(SamplingState::grouped(StateGroup::Zero, GroupPhase::PumpOn));

    assert_eq!(result, Err(ProtocolError::Exhausted { attempts: 8 }));
    assert_eq!(engine.transport().send_attempts, 8);
    assert_eq!(engine.power().switch().off_calls, 7);
    assert_eq!(engine.power().switch().on_calls, 7);
    assert!(engine.power_state().energized, "board is left powered");
}

#[test]
fn dead_link_logs_every_failed_send() {
    let mut engine = dead_engine();
    engine.wakeup();

    let _ = engine.set_mode(SamplingState::Rest);

    let events = engine.events();
    assert_eq!(
        events.count(FlowEventKind::Error(ErrorCode::ModeSetFailure)),
        8
    );
    assert_eq!(events.count(FlowEventKind::AttemptFailed), 8);
    assert_eq!(events.count(FlowEventKind::PowerCycle), 7);
    assert_eq!(events.count(FlowEventKind::Retrying), 7);

    let attempts: Vec<(u8, AttemptFailure)> = events
        .oldest_first()
        .filter_map(|record| match record.details {
            EventPayload::Attempt(details) => Some((details.attempt, details.cause)),
            _ => None,
        })
        .collect();
    assert_eq!(
        attempts,
        (1..=8)
            .map(|attempt| (attempt, AttemptFailure::SendFailed))
            .collect::<Vec<_>>()
    );
}

#[test]
fn failed_sends_do_not_commit_state() {
    let mut engine = dead_engine();
    let before = engine.current_state();

    let _ = engine.set_mode(SamplingState::Pressurize);

    assert_eq!(engine.current_state(), before);
}

#[test]
fn retry_budget_follows_config() {
    let context = Context::boot(MemoryStore::new()).expect("boot");
    let config = ProtocolConfig {
        set_attempts: 3,
        ..ProtocolConfig::DEFAULT
    };
    let mut engine = ProtocolEngine::with_config(
        DeadLink::default(),
        RecordingSwitch::default(),
        VirtualClock::default(),
        context,
        config,
    );

    assert_eq!(
        engine.set_mode(SamplingState::Vent),
        Err(ProtocolError::Exhausted { attempts: 3 })
    );
    assert_eq!(engine.transport().send_attempts, 3);
}

#[test]
fn power_cycles_wait_for_settle_each_time() {
    let mut engine = dead_engine();
    engine.wakeup();
    let start = engine.clock().now_ms;

    let _ = engine.set_mode(SamplingState::Deploy);

    let settle = u64::try_from(ProtocolConfig::DEFAULT.power_settle.as_millis()).expect("fits");
    assert_eq!(engine.clock().now_ms - start, 7 * settle);
}

#[test]
fn dead_link_read_surfaces_transport_error() {
    let mut engine = dead_engine();
    let mut buffer = [0u8; 16];
    assert!(matches!(
        engine.read(&mut buffer),
        Err(ProtocolError::Transport(_))
    ));
}
