//! Pulse (square wave) channel.

use super::envelope::Envelope;
use super::length_counter::LengthCounter;
use super::sweep::SweepUnit;
use serde::{Deserialize, Serialize};

/// Duty waveforms: 12.5%, 25%, 50%, 25% negated.
pub const DUTY_TABLE: [[u8; 8]; 4] = [
    [0, 1, 0, 0, 0, 0, 0, 0],
    [0, 1, 1, 0, 0, 0, 0, 0],
    [0, 1, 1, 1, 1, 0, 0, 0],
    [1, 0, 0, 1, 1, 1, 1, 1],
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseChannel {
    pub envelope: Envelope,
    pub sweep: SweepUnit,
    pub length: LengthCounter,
    duty: u8,
    /// 11-bit timer period
    period: u16,
    timer: u16,
    phase: u8,
}

impl PulseChannel {
    /// `first` selects pulse 1's one's-complement sweep negate.
    pub fn new(first: bool) -> Self {
        Self {
            envelope: Envelope::new(),
            sweep: SweepUnit::new(first),
            length: LengthCounter::new(),
            duty: 0,
            period: 0,
            timer: 0,
            phase: 0,
        }
    }

    /// Register write; `reg` is the offset 0-3 within the channel's block.
    pub fn write_register(&mut self, reg: u16, value: u8) {
        match reg & 3 {
            0 => {
                self.duty = value >> 6;
                self.length.set_halt(value & 0x20 != 0);
                self.envelope.write_control(value);
            }
            1 => self.sweep.write(value),
            2 => self.period = (self.period & 0x0700) | value as u16,
            _ => {
                self.period = (self.period & 0x00FF) | (((value & 0x07) as u16) << 8);
                self.length.load(value >> 3);
                self.phase = 0;
                self.envelope.restart();
            }
        }
    }

    /// Clock the timer once per APU cycle (every other CPU cycle).
    pub fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.period;
            self.phase = (self.phase + 1) & 7;
        } else {
            self.timer -= 1;
        }
    }

    pub fn clock_quarter(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_half(&mut self) {
        self.length.clock();
        if let Some(period) = self.sweep.clock(self.period) {
            self.period = period;
        }
    }

    /// Current level (0-15).
    pub fn output(&self) -> u8 {
        if !self.length.is_active() || self.sweep.mutes(self.period) {
            return 0;
        }
        DUTY_TABLE[self.duty as usize][self.phase as usize] * self.envelope.output()
    }

    pub fn period(&self) -> u16 {
        self.period
    }
}
