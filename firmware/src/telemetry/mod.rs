//! Mirrors the dispatcher's event ring to the log.
//!
//! Records stay in the `flow-core` ring; this module only walks the ones not
//! yet drained and emits one line each, through defmt on the target and
//! stdout on host builds.

#![cfg_attr(not(target_os = "none"), allow(dead_code))]

use flow_core::telemetry::{EventPayload, EventRecord, EventRecorder, FlowEventKind};

use crate::clock::BoardInstant;

/// Logs every record added since the previous drain.
pub fn drain<const N: usize>(recorder: &mut EventRecorder<BoardInstant, N>) {
    recorder.drain_new(log_event);
}

pub fn log_event(record: &EventRecord<BoardInstant>) {
    let label = event_label(record.event);
    let code = record.event.to_raw();
    let timestamp_ms = record.timestamp.as_millis();

    if record.event.is_error() {
        emit_error(record.id, label, code, timestamp_ms);
    } else {
        emit_info(record.id, label, code, timestamp_ms, &record.details);
    }
}

#[cfg(target_os = "none")]
fn emit_error(id: u32, label: &'static str, code: u32, timestamp_ms: u64) {
    defmt::error!("flow:event #{} {} code={=u32:#x} t={}ms", id, label, code, timestamp_ms);
}

#[cfg(not(target_os = "none"))]
fn emit_error(id: u32, label: &'static str, code: u32, timestamp_ms: u64) {
    println!("flow:event #{id} {label} code={code:#010x} t={timestamp_ms}ms");
}

#[cfg(target_os = "none")]
fn emit_info(id: u32, label: &'static str, code: u32, timestamp_ms: u64, details: &EventPayload) {
    match details {
        EventPayload::None => {
            defmt::info!("flow:event #{} {} code={=u32:#x} t={}ms", id, label, code, timestamp_ms);
        }
        other => defmt::info!(
            "flow:event #{} {} code={=u32:#x} t={}ms {}",
            id,
            label,
            code,
            timestamp_ms,
            other
        ),
    }
}

#[cfg(not(target_os = "none"))]
fn emit_info(id: u32, label: &'static str, code: u32, timestamp_ms: u64, details: &EventPayload) {
    match details {
        EventPayload::None => println!("flow:event #{id} {label} code={code:#010x} t={timestamp_ms}ms"),
        other => println!("flow:event #{id} {label} code={code:#010x} t={timestamp_ms}ms {other:?}"),
    }
}

const fn event_label(event: FlowEventKind) -> &'static str {
    match event {
        FlowEventKind::Error(code) => code.description(),
        FlowEventKind::PowerOn => "power-on",
        FlowEventKind::PowerOff => "power-off",
        FlowEventKind::Wakeup => "wakeup",
        FlowEventKind::AttemptFailed => "attempt-failed",
        FlowEventKind::PowerCycle => "power-cycle",
        FlowEventKind::Retrying => "retrying",
        FlowEventKind::ModeSet => "mode-set",
        FlowEventKind::ModeQueried => "mode-queried",
        FlowEventKind::ConsoleAccepted => "console-ack",
        FlowEventKind::ConsoleRejected => "console-nack",
        FlowEventKind::StoreFailure => "store-failure",
        FlowEventKind::Custom(_) => "custom",
    }
}
