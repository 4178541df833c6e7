//! Non-linear channel mixer with DC removal.
//!
//! The two lookup tables follow the 2A03's resistor network:
//!
//! ```text
//! pulse_out = 95.52  / (8128.0  / (pulse1 + pulse2)          + 100.0)
//! tnd_out   = 163.67 / (24329.0 / (3*triangle + 2*noise + dmc) + 100.0)
//! ```
//!
//! Channel levels arrive as averages over a sample period, so they are fractional;
//! table lookups interpolate between neighbouring entries.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub const PULSE_TABLE_LEN: usize = 31;
pub const TND_TABLE_LEN: usize = 203;

/// Coefficient of the one-pole high-pass filter.
pub const DC_BLOCK_R: f32 = 0.995;

/// Stereo positions, 0.0 = hard left, 1.0 = hard right.
pub const PAN_PULSE1: f32 = 0.35;
pub const PAN_PULSE2: f32 = 0.65;
pub const PAN_TRIANGLE: f32 = 0.45;
pub const PAN_NOISE: f32 = 0.55;
pub const PAN_DMC: f32 = 0.5;

static PULSE_TABLE: OnceLock<[f32; PULSE_TABLE_LEN]> = OnceLock::new();
static TND_TABLE: OnceLock<[f32; TND_TABLE_LEN]> = OnceLock::new();

pub fn pulse_table() -> &'static [f32; PULSE_TABLE_LEN] {
    PULSE_TABLE.get_or_init(|| {
        let mut table = [0.0; PULSE_TABLE_LEN];
        for (n, entry) in table.iter_mut().enumerate().skip(1) {
            *entry = 95.52 / (8128.0 / n as f32 + 100.0);
        }
        table
    })
}

pub fn tnd_table() -> &'static [f32; TND_TABLE_LEN] {
    TND_TABLE.get_or_init(|| {
        let mut table = [0.0; TND_TABLE_LEN];
        for (n, entry) in table.iter_mut().enumerate().skip(1) {
            *entry = 163.67 / (24329.0 / n as f32 + 100.0);
        }
        table
    })
}

/// Linear interpolation into `table`; the index is clamped to the table range.
pub fn lookup(table: &[f32], index: f32) -> f32 {
    let last = (table.len() - 1) as f32;
    let index = index.clamp(0.0, last);
    let lo = index.floor() as usize;
    let hi = (lo + 1).min(table.len() - 1);
    let frac = index - lo as f32;
    table[lo] + (table[hi] - table[lo]) * frac
}

/// Per-channel levels, averaged over one output sample.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelLevels {
    pub pulse1: f32,
    pub pulse2: f32,
    pub triangle: f32,
    pub noise: f32,
    pub dmc: f32,
}

impl ChannelLevels {
    /// Scale each channel by its gain toward one side. `toward_right` picks the side.
    fn panned(&self, toward_right: bool) -> ChannelLevels {
        let gain = |pan: f32| if toward_right { pan * 2.0 } else { (1.0 - pan) * 2.0 };
        ChannelLevels {
            pulse1: self.pulse1 * gain(PAN_PULSE1),
            pulse2: self.pulse2 * gain(PAN_PULSE2),
            triangle: self.triangle * gain(PAN_TRIANGLE),
            noise: self.noise * gain(PAN_NOISE),
            dmc: self.dmc * gain(PAN_DMC),
        }
    }

    /// Combined analog level in roughly 0.0..=1.0.
    pub fn mix(&self) -> f32 {
        let pulse = lookup(pulse_table(), self.pulse1 + self.pulse2);
        let tnd = lookup(
            tnd_table(),
            3.0 * self.triangle + 2.0 * self.noise + self.dmc,
        );
        pulse + tnd
    }
}

/// One-pole DC-blocking filter: `y[n] = x[n] - x[n-1] + R * y[n-1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DcBlocker {
    prev_in: f32,
    prev_out: f32,
}

impl DcBlocker {
    pub fn process(&mut self, input: f32) -> f32 {
        let out = input - self.prev_in + DC_BLOCK_R * self.prev_out;
        self.prev_in = input;
        self.prev_out = out;
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mixer {
    stereo: bool,
    left: DcBlocker,
    right: DcBlocker,
}

impl Mixer {
    pub fn new(stereo: bool) -> Self {
        Self {
            stereo,
            ..Self::default()
        }
    }

    pub fn is_stereo(&self) -> bool {
        self.stereo
    }

    pub fn channels(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }

    /// Mix one frame of output, pushing one (mono) or two (L, R) samples to `out`.
    pub fn mix_into(&mut self, levels: &ChannelLevels, out: &mut impl Extend<i16>) {
        if self.stereo {
            let left = self.left.process(levels.panned(false).mix());
            let right = self.right.process(levels.panned(true).mix());
            out.extend([to_pcm(left), to_pcm(right)]);
        } else {
            let mono = self.left.process(levels.mix());
            out.extend([to_pcm(mono)]);
        }
    }
}

fn to_pcm(value: f32) -> i16 {
    (value * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_start_silent_and_rise() {
        assert_eq!(pulse_table()[0], 0.0);
        assert_eq!(tnd_table()[0], 0.0);
        assert!(pulse_table().windows(2).all(|w| w[1] > w[0]));
        assert!(tnd_table().windows(2).all(|w| w[1] > w[0]));
        assert!((pulse_table()[30] - 0.2575).abs() < 0.001);
        assert!((tnd_table()[202] - 0.7425).abs() < 0.001);
    }

    #[test]
    fn lookup_interpolates_and_clamps() {
        let table = [0.0, 1.0, 4.0];
        assert_eq!(lookup(&table, 0.5), 0.5);
        assert_eq!(lookup(&table, 1.5), 2.5);
        assert_eq!(lookup(&table, 9.0), 4.0);
        assert_eq!(lookup(&table, -1.0), 0.0);
    }

    #[test]
    fn dc_blocker_removes_constant_offset() {
        let mut dc = DcBlocker::default();
        let first = dc.process(0.5);
        assert!((first - 0.5).abs() < 1e-6);
        let mut last = first;
        for _ in 0..5000 {
            last = dc.process(0.5);
        }
        assert!(last.abs() < 0.01);
    }

    #[test]
    fn mono_emits_one_sample_stereo_two() {
        let levels = ChannelLevels {
            pulse1: 15.0,
            ..Default::default()
        };
        let mut out = Vec::new();
        Mixer::new(false).mix_into(&levels, &mut out);
        assert_eq!(out.len(), 1);
        assert!(out[0] > 0);

        out.clear();
        Mixer::new(true).mix_into(&levels, &mut out);
        assert_eq!(out.len(), 2);
        // pulse 1 sits left of centre
        assert!(out[0] > out[1]);
    }

    #[test]
    fn centred_channel_is_balanced() {
        let levels = ChannelLevels {
            dmc: 64.0,
            ..Default::default()
        };
        let mut out = Vec::new();
        Mixer::new(true).mix_into(&levels, &mut out);
        assert_eq!(out[0], out[1]);
    }
}
