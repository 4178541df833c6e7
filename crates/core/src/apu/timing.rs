//! Region timing shared by the CPU, PPU and APU.

use serde::{Deserialize, Serialize};

/// Console region timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingMode {
    /// NTSC (North America, Japan) - 1.789773 MHz CPU clock
    #[default]
    Ntsc,
    /// PAL (Europe, Australia) - 1.662607 MHz CPU clock
    Pal,
}

impl TimingMode {
    pub fn cpu_clock_hz(&self) -> f64 {
        match self {
            TimingMode::Ntsc => 1_789_773.0,
            TimingMode::Pal => 1_662_607.0,
        }
    }

    pub fn frame_rate_hz(&self) -> f64 {
        match self {
            TimingMode::Ntsc => 60.0988,
            TimingMode::Pal => 50.0070,
        }
    }

    /// Frame sequencer rate (240Hz NTSC, 200Hz PAL)
    pub fn frame_counter_hz(&self) -> f64 {
        match self {
            TimingMode::Ntsc => 240.0,
            TimingMode::Pal => 200.0,
        }
    }

    /// Extra vblank scanlines on top of the 262-line NTSC frame.
    pub fn vblank_addend(&self) -> u16 {
        match self {
            TimingMode::Ntsc => 0,
            TimingMode::Pal => 50,
        }
    }

    pub fn scanlines_per_frame(&self) -> u16 {
        262 + self.vblank_addend()
    }

    /// PPU dots per CPU cycle, in fifths (3 for NTSC, 3.2 for PAL).
    pub fn dots_per_cycle_x5(&self) -> u32 {
        match self {
            TimingMode::Ntsc => 15,
            TimingMode::Pal => 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pal_frame_is_longer() {
        assert_eq!(TimingMode::Ntsc.scanlines_per_frame(), 262);
        assert_eq!(TimingMode::Pal.scanlines_per_frame(), 312);
        assert!(TimingMode::Pal.cpu_clock_hz() < TimingMode::Ntsc.cpu_clock_hz());
    }

    #[test]
    fn parses_lowercase_names() {
        let t: TimingMode = serde_json::from_str("\"pal\"").expect("parse");
        assert_eq!(t, TimingMode::Pal);
    }
}
