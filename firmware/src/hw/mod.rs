//! GPIO valve bridge and record flash for the flow board.
//!
//! Each latching valve has one coil output per side. A move selects the drive
//! current on the three current-select lines, energizes one coil for the
//! pulse width, then releases it.

use core::time::Duration;

use embassy_stm32::gpio::Output;
use flow_core::motion::ValveDriver;
use flow_core::valves::{VALVE_CHANNELS, ValveDirection};

use crate::clock::to_embassy;

mod flash;

pub use flash::BoardFlash;

/// Number of current-select lines; levels 0..=7.
pub const CURRENT_SELECT_LINES: usize = 3;

pub struct CoilPair<'d> {
    side_a: Output<'d>,
    side_b: Output<'d>,
}

impl<'d> CoilPair<'d> {
    pub fn new(side_a: Output<'d>, side_b: Output<'d>) -> Self {
        Self { side_a, side_b }
    }

    fn coil_mut(&mut self, side: ValveDirection) -> Option<&mut Output<'d>> {
        match side {
            ValveDirection::SideA => Some(&mut self.side_a),
            ValveDirection::SideB => Some(&mut self.side_b),
            ValveDirection::Unknown => None,
        }
    }

    fn release(&mut self) {
        self.side_a.set_low();
        self.side_b.set_low();
    }
}

pub struct GpioValveDriver<'d> {
    coils: [CoilPair<'d>; VALVE_CHANNELS],
    current_select: [Output<'d>; CURRENT_SELECT_LINES],
    pump: Output<'d>,
}

impl<'d> GpioValveDriver<'d> {
    pub fn new(
        coils: [CoilPair<'d>; VALVE_CHANNELS],
        current_select: [Output<'d>; CURRENT_SELECT_LINES],
        pump: Output<'d>,
    ) -> Self {
        let mut driver = Self {
            coils,
            current_select,
            pump,
        };
        driver.release_all();
        driver
    }

    fn select_current(&mut self, level: u8) {
        for (bit, line) in self.current_select.iter_mut().enumerate() {
            if level & (1 << bit) == 0 {
                line.set_low();
            } else {
                line.set_high();
            }
        }
    }

    fn release_all(&mut self) {
        for pair in &mut self.coils {
            pair.release();
        }
        self.pump.set_low();
    }
}

impl ValveDriver for GpioValveDriver<'_> {
    fn pulse(&mut self, channel: usize, side: ValveDirection, pulse: Duration, current: u8) {
        self.select_current(current);
        let Some(pair) = self.coils.get_mut(channel) else {
            return;
        };
        // Both coils of a bridge must never be energized together.
        pair.release();
        if let Some(coil) = pair.coil_mut(side) {
            coil.set_high();
            embassy_time::block_for(to_embassy(pulse));
            coil.set_low();
        }
    }

    fn set_pump(&mut self, on: bool) {
        if on {
            self.pump.set_high();
        } else {
            self.pump.set_low();
        }
    }
}
