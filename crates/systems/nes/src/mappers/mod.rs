//! Cartridge boards.
//!
//! The bus decodes the fixed console address space itself and forwards everything at
//! $4020 and above to the cartridge's [`Mapper`]. A mapper owns the PRG data and any
//! board registers; it places CHR data into the PPU's pattern memory through
//! [`PatternMemory`], so bank switches reach the pre-decoded tile cache.
//!
//! Only NROM (mapper 0) is implemented. [`create_mapper`] falls back to it for other
//! numbers after reporting a warning.

mod nrom;

pub use nrom::Nrom;

use crate::cartridge::{Cartridge, Mirroring};
use crate::sinks::ErrorSink;
use crate::state::StateError;
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The PPU-side view a mapper gets when loading or switching CHR banks.
pub trait PatternMemory {
    /// Copy a 4 KB bank into pattern slot 0 ($0000) or 1 ($1000) and re-decode its tiles.
    fn load_pattern_bank(&mut self, slot: usize, data: &[u8]);
    /// Make the 8 KB pattern area writable through $2007 (CHR-RAM boards).
    fn enable_chr_ram(&mut self);
    fn set_mirroring(&mut self, mirroring: Mirroring);
}

/// Mapper-internal state carried in save states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperState {
    pub number: u8,
    pub prg_ram: Vec<u8>,
    /// Bank selects, IRQ counters and latches, in a board-defined order
    pub registers: Vec<u8>,
}

pub trait Mapper: Send + fmt::Debug {
    fn number(&self) -> u8;

    fn name(&self) -> &'static str;

    /// Install the cartridge's initial PRG/CHR layout and mirroring.
    fn load_rom(&mut self, video: &mut dyn PatternMemory);

    /// CPU read in $4020-$FFFF.
    fn load(&mut self, addr: u16) -> u8;

    /// CPU write in $4020-$FFFF.
    fn write(&mut self, addr: u16, val: u8, video: &mut dyn PatternMemory);

    fn reset(&mut self);

    /// Called once per rendered scanline. Returns `true` to raise an IRQ.
    fn clock_irq_counter(&mut self) -> bool {
        false
    }

    /// Called for every PPU pattern fetch, for boards with read-triggered latches.
    fn latch_access(&mut self, _addr: u16) {}

    fn save_state(&self) -> MapperState;

    fn load_state(&mut self, state: &MapperState) -> Result<(), StateError>;
}

/// Build the board for a cartridge. Unknown mapper numbers fall back to NROM with a
/// warning sent to `errors`.
pub fn create_mapper(cart: Cartridge, errors: &dyn ErrorSink) -> Box<dyn Mapper> {
    let number = cart.header.mapper;
    if number != 0 {
        let message = format!(
            "mapper {} is not supported, falling back to NROM; the game may not run correctly",
            number
        );
        log(LogCategory::Mapper, LogLevel::Warn, || message.clone());
        errors.report(LogLevel::Warn, &message);
    }
    Box::new(Nrom::new(cart))
}
