#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Console link counters shared between the UART receive path and the
//! dispatcher loop.
//!
//! The receive side never blocks, so overflow is only visible here.

use portable_atomic::{AtomicU32, Ordering};

static BYTES_RECEIVED: AtomicU32 = AtomicU32::new(0);
static BYTES_DROPPED: AtomicU32 = AtomicU32::new(0);
static LINES_ACKED: AtomicU32 = AtomicU32::new(0);
static LINES_NACKED: AtomicU32 = AtomicU32::new(0);
/// Dropped count already reported to the log.
static DROPS_REPORTED: AtomicU32 = AtomicU32::new(0);

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct LinkSnapshot {
    pub received: u32,
    pub dropped: u32,
    pub acked: u32,
    pub nacked: u32,
}

/// Records one receive burst: `accepted` bytes made it into the console
/// queue, the rest of `total` did not.
pub fn record_received(total: usize, accepted: usize) {
    let dropped = total.saturating_sub(accepted);
    BYTES_RECEIVED.fetch_add(saturate(accepted), Ordering::Relaxed);
    if dropped > 0 {
        BYTES_DROPPED.fetch_add(saturate(dropped), Ordering::Relaxed);
    }
}

pub fn record_reply(acked: bool) {
    let counter = if acked { &LINES_ACKED } else { &LINES_NACKED };
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Returns the drops not yet reported and marks them reported.
pub fn take_new_drops() -> Option<u32> {
    let dropped = BYTES_DROPPED.load(Ordering::Relaxed);
    let reported = DROPS_REPORTED.swap(dropped, Ordering::Relaxed);
    let fresh = dropped.wrapping_sub(reported);
    (fresh > 0).then_some(fresh)
}

pub fn snapshot() -> LinkSnapshot {
    LinkSnapshot {
        received: BYTES_RECEIVED.load(Ordering::Relaxed),
        dropped: BYTES_DROPPED.load(Ordering::Relaxed),
        acked: LINES_ACKED.load(Ordering::Relaxed),
        nacked: LINES_NACKED.load(Ordering::Relaxed),
    }
}

fn saturate(count: usize) -> u32 {
    u32::try_from(count).unwrap_or(u32::MAX)
}
