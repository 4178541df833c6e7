//! Noise channel with a 15-bit linear feedback shift register.

use super::envelope::Envelope;
use super::length_counter::LengthCounter;
use super::timing::TimingMode;
use serde::{Deserialize, Serialize};

/// Timer periods in CPU cycles.
pub const NOISE_PERIOD_TABLE_NTSC: [u16; 16] = [
    4, 8, 16, 32, 64, 96, 128, 160, 202, 254, 380, 508, 762, 1016, 2034, 4068,
];

pub const NOISE_PERIOD_TABLE_PAL: [u16; 16] = [
    4, 8, 14, 30, 60, 88, 118, 148, 188, 236, 354, 472, 708, 944, 1890, 3778,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoiseChannel {
    pub envelope: Envelope,
    pub length: LengthCounter,
    /// Short mode: feedback from bit 6 instead of bit 1
    short_mode: bool,
    period_index: u8,
    timer: u16,
    shift_register: u16,
    pal: bool,
}

impl NoiseChannel {
    pub fn new(timing: TimingMode) -> Self {
        Self {
            envelope: Envelope::new(),
            length: LengthCounter::new(),
            short_mode: false,
            period_index: 0,
            timer: 0,
            shift_register: 1,
            pal: timing == TimingMode::Pal,
        }
    }

    /// `reg` is the offset within $400C-$400F.
    pub fn write_register(&mut self, reg: u16, value: u8) {
        match reg & 3 {
            0 => {
                self.length.set_halt(value & 0x20 != 0);
                self.envelope.write_control(value);
            }
            1 => {}
            2 => {
                self.short_mode = value & 0x80 != 0;
                self.period_index = value & 0x0F;
            }
            _ => {
                self.length.load(value >> 3);
                self.envelope.restart();
            }
        }
    }

    fn period(&self) -> u16 {
        let table = if self.pal {
            &NOISE_PERIOD_TABLE_PAL
        } else {
            &NOISE_PERIOD_TABLE_NTSC
        };
        table[self.period_index as usize]
    }

    /// Clocked every CPU cycle; the table is in CPU cycles.
    pub fn clock_timer(&mut self) {
        if self.timer == 0 {
            self.timer = self.period() - 1;
            let tap = if self.short_mode { 6 } else { 1 };
            let feedback = (self.shift_register ^ (self.shift_register >> tap)) & 1;
            self.shift_register = (self.shift_register >> 1) | (feedback << 14);
        } else {
            self.timer -= 1;
        }
    }

    pub fn clock_quarter(&mut self) {
        self.envelope.clock();
    }

    pub fn clock_half(&mut self) {
        self.length.clock();
    }

    /// Envelope volume while the LFSR's low bit is clear, else 0.
    pub fn output(&self) -> u8 {
        if !self.length.is_active() || self.shift_register & 1 != 0 {
            0
        } else {
            self.envelope.output()
        }
    }

    pub fn shift_register(&self) -> u16 {
        self.shift_register
    }
}
