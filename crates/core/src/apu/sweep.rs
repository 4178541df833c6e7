//! Pulse channel sweep unit.
//!
//! Periodically retunes the pulse timer by `period >> shift`. The target period is
//! computed continuously; when it would exceed 11 bits (or the current period is
//! below 8) the channel is muted instead of wrapping.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepUnit {
    enabled: bool,
    period: u8,
    negate: bool,
    shift: u8,
    divider: u8,
    reload: bool,
    /// Pulse 1 negates with one's complement (subtracts one extra).
    ones_complement: bool,
}

impl SweepUnit {
    pub fn new(ones_complement: bool) -> Self {
        Self {
            ones_complement,
            ..Self::default()
        }
    }

    /// $4001/$4005 write: `EPPP NSSS`.
    pub fn write(&mut self, value: u8) {
        self.enabled = value & 0x80 != 0;
        self.period = (value >> 4) & 0x07;
        self.negate = value & 0x08 != 0;
        self.shift = value & 0x07;
        self.reload = true;
    }

    pub fn target_period(&self, current: u16) -> u16 {
        let delta = current >> self.shift;
        if self.negate {
            let extra = self.ones_complement as u16;
            current.saturating_sub(delta + extra)
        } else {
            current + delta
        }
    }

    pub fn mutes(&self, current: u16) -> bool {
        current < 8 || self.target_period(current) > 0x7FF
    }

    /// Half-frame clock. Returns the new timer period when the sweep fires.
    pub fn clock(&mut self, current: u16) -> Option<u16> {
        let mut update = None;
        if self.divider == 0 && self.enabled && self.shift > 0 && !self.mutes(current) {
            update = Some(self.target_period(current));
        }
        if self.divider == 0 || self.reload {
            self.divider = self.period;
            self.reload = false;
        } else {
            self.divider -= 1;
        }
        update
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raises_period_by_shifted_amount() {
        let mut sweep = SweepUnit::new(false);
        sweep.write(0x81); // enabled, period 0, shift 1
        assert_eq!(sweep.clock(100), Some(150));
    }

    #[test]
    fn negate_differs_between_channels() {
        let mut p1 = SweepUnit::new(true);
        let mut p2 = SweepUnit::new(false);
        p1.write(0x89);
        p2.write(0x89);
        assert_eq!(p1.clock(100), Some(49));
        assert_eq!(p2.clock(100), Some(50));
    }

    #[test]
    fn overflow_mutes_instead_of_wrapping() {
        let mut sweep = SweepUnit::new(false);
        sweep.write(0x81);
        assert!(sweep.mutes(0x600));
        assert_eq!(sweep.clock(0x600), None);
        assert!(!sweep.mutes(0x200));
    }

    #[test]
    fn low_period_mutes_even_when_disabled() {
        let sweep = SweepUnit::new(false);
        assert!(sweep.mutes(7));
        assert!(!sweep.mutes(8));
    }

    #[test]
    fn divider_delays_updates() {
        let mut sweep = SweepUnit::new(false);
        sweep.write(0xA1); // period 2
        assert_eq!(sweep.clock(100), Some(150)); // divider was already 0
        assert_eq!(sweep.clock(100), None);
        assert_eq!(sweep.clock(100), None);
        assert_eq!(sweep.clock(100), Some(150));
    }
}
