//! Save-state blob.
//!
//! A state is one serde_json document whose top-level fields appear in a fixed order:
//! format version, the three memory blocks (work RAM, PPU VRAM, OAM), the CPU, the
//! mapper, PPU registers and counters, APU channels and the joypad readers. Derived
//! caches (decoded tiles, sprite shadows, palette colours) are rebuilt on load and the
//! framebuffer is not stored: the next rendered frame replaces it.

use crate::apu::ApuState;
use crate::joypad::Joypad;
use crate::mappers::MapperState;
use crate::ppu::{PpuState, OAM_LEN, VRAM_LEN};
use emu_core::cpu_6502::Cpu6502State;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STATE_VERSION: u32 = 1;
pub const RAM_LEN: usize = 0x800;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to encode state: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode state: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("state version {found} is not supported (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("state block `{block}` has {actual} bytes, expected {expected}")]
    Size {
        block: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("state was saved with mapper {found}, cartridge uses mapper {expected}")]
    Mapper { expected: u8, found: u8 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    pub version: u32,
    pub ram: Vec<u8>,
    pub vram: Vec<u8>,
    pub oam: Vec<u8>,
    pub cpu: Cpu6502State,
    pub mapper: MapperState,
    pub ppu: PpuState,
    pub apu: ApuState,
    pub joypads: [Joypad; 2],
}

impl SaveState {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec(self).map_err(StateError::Encode)
    }

    /// Decode and check the version and memory block sizes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(StateError::Decode)?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> Result<serde_json::Value, StateError> {
        serde_json::to_value(self).map_err(StateError::Encode)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, StateError> {
        // look at the version first so an old layout reports a version error, not a
        // missing-field error
        let found = value
            .get("version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        if found != STATE_VERSION {
            return Err(StateError::Version {
                found,
                expected: STATE_VERSION,
            });
        }
        let state: SaveState = serde_json::from_value(value).map_err(StateError::Decode)?;
        state.validate()?;
        Ok(state)
    }

    fn validate(&self) -> Result<(), StateError> {
        check_len("ram", &self.ram, RAM_LEN)?;
        check_len("vram", &self.vram, VRAM_LEN)?;
        check_len("oam", &self.oam, OAM_LEN)?;
        check_len("palette", &self.ppu.palette, 32)
    }
}

fn check_len(block: &'static str, data: &[u8], expected: usize) -> Result<(), StateError> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(StateError::Size {
            block,
            expected,
            actual: data.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apu::Apu;
    use crate::ppu::Ppu;
    use emu_core::apu::TimingMode;
    use emu_core::cpu_6502::{ArrayMemory, Cpu6502};

    fn sample_state() -> SaveState {
        let ppu = Ppu::new(TimingMode::Ntsc);
        let apu = Apu::new(TimingMode::Ntsc, 44_100, false);
        let cpu = Cpu6502::new(ArrayMemory::new());
        SaveState {
            version: STATE_VERSION,
            ram: vec![0; RAM_LEN],
            vram: ppu.vram().to_vec(),
            oam: ppu.oam().to_vec(),
            cpu: cpu.snapshot(),
            mapper: MapperState::default(),
            ppu: ppu.snapshot(),
            apu: apu.snapshot(),
            joypads: [Joypad::new(0), Joypad::new(1)],
        }
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut state = sample_state();
        state.ram[0x123] = 0x45;
        let bytes = state.to_bytes().unwrap();
        assert_eq!(SaveState::from_bytes(&bytes).unwrap(), state);
    }

    #[test]
    fn test_field_order_is_fixed() {
        let text = String::from_utf8(sample_state().to_bytes().unwrap()).unwrap();
        let keys = [
            "\"version\"", "\"ram\"", "\"vram\"", "\"oam\"", "\"cpu\"", "\"mapper\"",
            "\"ppu\"", "\"apu\"", "\"joypads\"",
        ];
        let positions: Vec<usize> = keys.iter().map(|k| text.find(k).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_version_mismatch() {
        let mut state = sample_state();
        state.version = 99;
        let bytes = state.to_bytes().unwrap();
        assert!(matches!(
            SaveState::from_bytes(&bytes),
            Err(StateError::Version { found: 99, expected: STATE_VERSION })
        ));
    }

    #[test]
    fn test_wrong_block_size() {
        let mut state = sample_state();
        state.oam.pop();
        let bytes = state.to_bytes().unwrap();
        match SaveState::from_bytes(&bytes) {
            Err(StateError::Size { block, expected, actual }) => {
                assert_eq!((block, expected, actual), ("oam", 256, 255));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(
            SaveState::from_bytes(b"not json"),
            Err(StateError::Decode(_))
        ));
    }
}
