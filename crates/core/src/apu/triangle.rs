//! Triangle channel: a 32-step up/down sequencer gated by a linear counter
//! and the length counter.

use super::length_counter::LengthCounter;
use serde::{Deserialize, Serialize};

pub const TRIANGLE_SEQUENCE: [u8; 32] = [
    15, 14, 13, 12, 11, 10, 9, 8, 7, 6, 5, 4, 3, 2, 1, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11,
    12, 13, 14, 15,
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriangleChannel {
    pub length: LengthCounter,
    period: u16,
    timer: u16,
    step: u8,
    linear_counter: u8,
    linear_reload_value: u8,
    linear_reload: bool,
    /// Halts the length counter and keeps the linear reload flag set
    control: bool,
}

impl TriangleChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// `reg` is the offset within $4008-$400B.
    pub fn write_register(&mut self, reg: u16, value: u8) {
        match reg & 3 {
            0 => {
                self.control = value & 0x80 != 0;
                self.length.set_halt(self.control);
                self.linear_reload_value = value & 0x7F;
            }
            1 => {}
            2 => self.period = (self.period & 0x0700) | value as u16,
            _ => {
                self.period = (self.period & 0x00FF) | (((value & 0x07) as u16) << 8);
                self.length.load(value >> 3);
                self.linear_reload = true;
            }
        }
    }

    /// Clocked every CPU cycle.
    pub fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.period;
            if self.linear_counter > 0 && self.length.is_active() {
                self.step = (self.step + 1) & 31;
            }
        } else {
            self.timer -= 1;
        }
    }

    /// Quarter-frame clock of the linear counter.
    pub fn clock_quarter(&mut self) {
        if self.linear_reload {
            self.linear_counter = self.linear_reload_value;
        } else if self.linear_counter > 0 {
            self.linear_counter -= 1;
        }
        if !self.control {
            self.linear_reload = false;
        }
    }

    pub fn clock_half(&mut self) {
        self.length.clock();
    }

    /// Current level (0-15). The sequencer holds its last step when gated, so the
    /// output does not drop to zero and pop.
    pub fn output(&self) -> u8 {
        TRIANGLE_SEQUENCE[self.step as usize]
    }

    pub fn linear_counter(&self) -> u8 {
        self.linear_counter
    }
}
