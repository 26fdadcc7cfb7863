#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Shared logic for the pCO2 flow-control link.
//
// The sensor side drives the flow board through `protocol`; the flow board
// answers through `console`. Both halves stay portable across MCU firmware
// and host tooling by avoiding the Rust standard library.

pub mod clock;
pub mod console;
pub mod motion;
pub mod persistence;
pub mod power;
pub mod protocol;
pub mod state;
pub mod telemetry;
pub mod valves;
