//! Envelope generator for volume control.
//!
//! Pulse and noise channels either output a constant volume or a decaying
//! level (15 down to 0, optionally looping) clocked on quarter frames.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    start_flag: bool,
    decay_level: u8,
    divider: u8,
    /// Divider period, doubling as the constant volume.
    period: u8,
    loop_flag: bool,
    constant_volume: bool,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the low six bits of a channel control register: `--LC VVVV`.
    pub fn write_control(&mut self, value: u8) {
        self.loop_flag = value & 0x20 != 0;
        self.constant_volume = value & 0x10 != 0;
        self.period = value & 0x0F;
    }

    /// Quarter-frame clock.
    pub fn clock(&mut self) {
        if self.start_flag {
            self.start_flag = false;
            self.decay_level = 15;
            self.divider = self.period;
        } else if self.divider > 0 {
            self.divider -= 1;
        } else {
            self.divider = self.period;
            if self.decay_level > 0 {
                self.decay_level -= 1;
            } else if self.loop_flag {
                self.decay_level = 15;
            }
        }
    }

    /// Current volume (0-15).
    pub fn output(&self) -> u8 {
        if self.constant_volume {
            self.period
        } else {
            self.decay_level
        }
    }

    pub fn restart(&mut self) {
        self.start_flag = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_volume_ignores_decay() {
        let mut env = Envelope::new();
        env.write_control(0x17);
        env.restart();
        for _ in 0..40 {
            env.clock();
        }
        assert_eq!(env.output(), 7);
    }

    #[test]
    fn decays_and_loops() {
        let mut env = Envelope::new();
        env.write_control(0x20); // loop, period 0
        env.restart();
        env.clock();
        assert_eq!(env.output(), 15);
        for expected in (0..15).rev() {
            env.clock();
            assert_eq!(env.output(), expected);
        }
        env.clock();
        assert_eq!(env.output(), 15);
    }

    #[test]
    fn period_slows_decay() {
        let mut env = Envelope::new();
        env.write_control(0x02);
        env.restart();
        env.clock();
        env.clock();
        env.clock();
        assert_eq!(env.output(), 15);
        env.clock();
        assert_eq!(env.output(), 14);
    }
}
