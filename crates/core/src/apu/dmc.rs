//! Delta Modulation Channel (DMC).
//!
//! Plays 1-bit delta-encoded samples fetched from cartridge memory. Each output
//! bit moves a 7-bit DAC up or down by 2. Sample bytes are fetched by DMA: the
//! channel only reports the address it needs ([`DmcChannel::pending_fetch`]); the
//! owner performs the bus read, charges the CPU stall and hands the byte back with
//! [`DmcChannel::fill`].
//!
//! - **$4010**: `IL-- RRRR` IRQ enable, loop, rate index
//! - **$4011**: direct load of the DAC
//! - **$4012**: sample address `$C000 + A * 64`
//! - **$4013**: sample length `L * 16 + 1`

use super::timing::TimingMode;
use serde::{Deserialize, Serialize};

/// CPU cycles between output bits, indexed by the rate nibble.
pub const DMC_RATE_TABLE_NTSC: [u16; 16] = [
    428, 380, 340, 320, 286, 254, 226, 214, 190, 160, 142, 128, 106, 84, 72, 54,
];

pub const DMC_RATE_TABLE_PAL: [u16; 16] = [
    398, 354, 316, 298, 276, 236, 210, 198, 176, 148, 132, 118, 98, 78, 66, 50,
];

/// CPU cycles stolen by each sample fetch.
pub const DMC_FETCH_STALL: u32 = 4;

/// What happens when the last byte of a sample has been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DmcPlayMode {
    /// Stop quietly
    Normal,
    /// Restart from the sample address
    Loop,
    /// Stop and raise an IRQ
    Irq,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmcChannel {
    irq_enabled: bool,
    loop_enabled: bool,
    rate_index: u8,
    pal: bool,
    timer: u16,
    output_level: u8,
    sample_address: u16,
    sample_length: u16,
    current_address: u16,
    bytes_remaining: u16,
    sample_buffer: Option<u8>,
    shift_register: u8,
    bits_remaining: u8,
    silence: bool,
    irq_pending: bool,
}

impl DmcChannel {
    pub fn new(timing: TimingMode) -> Self {
        let pal = timing == TimingMode::Pal;
        let mut dmc = Self {
            irq_enabled: false,
            loop_enabled: false,
            rate_index: 0,
            pal,
            timer: 0,
            output_level: 0,
            sample_address: 0xC000,
            sample_length: 1,
            current_address: 0xC000,
            bytes_remaining: 0,
            sample_buffer: None,
            shift_register: 0,
            bits_remaining: 8,
            silence: true,
            irq_pending: false,
        };
        dmc.timer = dmc.rate();
        dmc
    }

    pub fn rate(&self) -> u16 {
        let table = if self.pal {
            &DMC_RATE_TABLE_PAL
        } else {
            &DMC_RATE_TABLE_NTSC
        };
        table[self.rate_index as usize]
    }

    pub fn play_mode(&self) -> DmcPlayMode {
        if self.loop_enabled {
            DmcPlayMode::Loop
        } else if self.irq_enabled {
            DmcPlayMode::Irq
        } else {
            DmcPlayMode::Normal
        }
    }

    /// `reg` is the offset within $4010-$4013.
    pub fn write_register(&mut self, reg: u16, value: u8) {
        match reg & 3 {
            0 => {
                self.irq_enabled = value & 0x80 != 0;
                self.loop_enabled = value & 0x40 != 0;
                self.rate_index = value & 0x0F;
                if !self.irq_enabled {
                    self.irq_pending = false;
                }
            }
            1 => self.output_level = value & 0x7F,
            2 => self.sample_address = 0xC000 | ((value as u16) << 6),
            _ => self.sample_length = ((value as u16) << 4) + 1,
        }
    }

    /// $4015 bit 4. Enabling restarts an idle sample; disabling stops fetching.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.irq_pending = false;
        if !enabled {
            self.bytes_remaining = 0;
        } else if self.bytes_remaining == 0 {
            self.restart();
        }
    }

    fn restart(&mut self) {
        self.current_address = self.sample_address;
        self.bytes_remaining = self.sample_length;
    }

    /// Address the memory reader wants next, if its buffer is empty.
    pub fn pending_fetch(&self) -> Option<u16> {
        if self.sample_buffer.is_none() && self.bytes_remaining > 0 {
            Some(self.current_address)
        } else {
            None
        }
    }

    /// Deliver the byte read from [`Self::pending_fetch`]'s address.
    pub fn fill(&mut self, byte: u8) {
        self.sample_buffer = Some(byte);
        self.current_address = if self.current_address == 0xFFFF {
            0x8000
        } else {
            self.current_address + 1
        };
        self.bytes_remaining = self.bytes_remaining.saturating_sub(1);
        if self.bytes_remaining == 0 {
            match self.play_mode() {
                DmcPlayMode::Loop => self.restart(),
                DmcPlayMode::Irq => self.irq_pending = true,
                DmcPlayMode::Normal => {}
            }
        }
    }

    /// Clocked every CPU cycle.
    pub fn clock_timer(&mut self) {
        if self.timer > 1 {
            self.timer -= 1;
            return;
        }
        self.timer = self.rate();

        if !self.silence {
            if self.shift_register & 1 != 0 {
                if self.output_level <= 125 {
                    self.output_level += 2;
                }
            } else if self.output_level >= 2 {
                self.output_level -= 2;
            }
        }
        self.shift_register >>= 1;

        self.bits_remaining -= 1;
        if self.bits_remaining == 0 {
            self.bits_remaining = 8;
            match self.sample_buffer.take() {
                Some(byte) => {
                    self.shift_register = byte;
                    self.silence = false;
                }
                None => self.silence = true,
            }
        }
    }

    /// DAC level (0-127).
    pub fn output(&self) -> u8 {
        self.output_level
    }

    pub fn is_active(&self) -> bool {
        self.bytes_remaining > 0
    }

    pub fn is_irq_pending(&self) -> bool {
        self.irq_pending
    }

    pub fn clear_irq(&mut self) {
        self.irq_pending = false;
    }
}
