//! Frame sequencer that drives envelope, length counter, and sweep units.
//!
//! Ticks at 240Hz (NTSC) or 200Hz (PAL) measured in CPU cycles.
//!
//! | step (1-indexed) | 4-step mode         | 5-step mode     |
//! |------------------|---------------------|-----------------|
//! | 1                | quarter             | quarter         |
//! | 2                | quarter, half       | quarter, half   |
//! | 3                | quarter             | quarter         |
//! | 4                | quarter, half, IRQ  | -               |
//! | 5                |                     | quarter, half   |

use super::timing::TimingMode;
use serde::{Deserialize, Serialize};

/// Which sub-units to clock on a sequencer tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameTick {
    /// Envelopes and the triangle linear counter
    pub quarter: bool,
    /// Length counters and sweep units
    pub half: bool,
}

impl FrameTick {
    const NONE: FrameTick = FrameTick {
        quarter: false,
        half: false,
    };
    const QUARTER: FrameTick = FrameTick {
        quarter: true,
        half: false,
    };
    const BOTH: FrameTick = FrameTick {
        quarter: true,
        half: true,
    };
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounter {
    five_step: bool,
    irq_inhibit: bool,
    irq_pending: bool,
    /// Steps completed in the current sequence
    step: u8,
    cycle_count: u32,
    cycles_per_step: u32,
}

impl FrameCounter {
    pub fn new(timing: TimingMode) -> Self {
        Self {
            five_step: false,
            irq_inhibit: false,
            irq_pending: false,
            step: 0,
            cycle_count: 0,
            cycles_per_step: Self::cycles_per_step(timing),
        }
    }

    fn cycles_per_step(timing: TimingMode) -> u32 {
        (timing.cpu_clock_hz() / timing.frame_counter_hz()) as u32
    }

    /// Advance one CPU cycle.
    pub fn clock(&mut self) -> FrameTick {
        self.cycle_count += 1;
        if self.cycle_count < self.cycles_per_step {
            return FrameTick::NONE;
        }
        self.cycle_count = 0;
        self.step += 1;

        let tick = match (self.five_step, self.step) {
            (false, 4) => {
                if !self.irq_inhibit {
                    self.irq_pending = true;
                }
                FrameTick::BOTH
            }
            (true, 4) => FrameTick::NONE,
            (_, 2) | (true, 5) => FrameTick::BOTH,
            _ => FrameTick::QUARTER,
        };

        let length = if self.five_step { 5 } else { 4 };
        if self.step >= length {
            self.step = 0;
        }
        tick
    }

    /// $4017 write. Restarts the sequence; selecting 5-step mode clocks every
    /// unit immediately, which the returned tick reports.
    pub fn write_control(&mut self, value: u8) -> FrameTick {
        self.five_step = value & 0x80 != 0;
        self.irq_inhibit = value & 0x40 != 0;
        if self.irq_inhibit {
            self.irq_pending = false;
        }
        self.step = 0;
        self.cycle_count = 0;
        if self.five_step {
            FrameTick::BOTH
        } else {
            FrameTick::NONE
        }
    }

    pub fn is_irq_pending(&self) -> bool {
        self.irq_pending
    }

    pub fn clear_irq(&mut self) {
        self.irq_pending = false;
    }

    pub fn is_five_step(&self) -> bool {
        self.five_step
    }

    pub fn set_timing(&mut self, timing: TimingMode) {
        self.cycles_per_step = Self::cycles_per_step(timing);
    }

    pub fn step_period(&self) -> u32 {
        self.cycles_per_step
    }
}
