use super::{Mapper, MapperState, PatternMemory};
use crate::cartridge::{Cartridge, Mirroring, PRG_BANK_LEN};
use crate::state::StateError;

pub const PRG_RAM_LEN: usize = 0x2000;

/// NROM (mapper 0): no bank switching.
///
/// - $6000-$7FFF: 8 KB PRG RAM
/// - $8000-$BFFF: PRG bank 0
/// - $C000-$FFFF: PRG bank 1, or bank 0 again on 16 KB boards
/// - PPU $0000-$1FFF: the first two 4 KB CHR banks, or 8 KB CHR RAM
#[derive(Debug)]
pub struct Nrom {
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
    mirroring: Mirroring,
    prg_ram: Box<[u8; PRG_RAM_LEN]>,
    /// Offsets into `prg_rom` of the $8000 and $C000 windows
    windows: [usize; 2],
}

impl Nrom {
    pub fn new(cart: Cartridge) -> Self {
        let banks = cart.prg_rom.len() / PRG_BANK_LEN;
        let upper = if banks >= 2 { PRG_BANK_LEN } else { 0 };
        Self {
            prg_rom: cart.prg_rom,
            chr_rom: cart.chr_rom,
            mirroring: cart.header.mirroring,
            prg_ram: Box::new([0; PRG_RAM_LEN]),
            windows: [0, upper],
        }
    }

    /// A board with nothing on it; every read returns 0.
    pub fn empty() -> Self {
        Self {
            prg_rom: Vec::new(),
            chr_rom: Vec::new(),
            mirroring: Mirroring::Horizontal,
            prg_ram: Box::new([0; PRG_RAM_LEN]),
            windows: [0, 0],
        }
    }
}

impl Mapper for Nrom {
    fn number(&self) -> u8 {
        0
    }

    fn name(&self) -> &'static str {
        "NROM"
    }

    fn load_rom(&mut self, video: &mut dyn PatternMemory) {
        video.set_mirroring(self.mirroring);
        if self.chr_rom.is_empty() {
            video.enable_chr_ram();
            return;
        }
        let banks: Vec<&[u8]> = self.chr_rom.chunks(0x1000).take(2).collect();
        for (slot, bank) in banks.iter().enumerate() {
            video.load_pattern_bank(slot, bank);
        }
        if banks.len() == 1 {
            video.load_pattern_bank(1, banks[0]);
        }
    }

    fn load(&mut self, addr: u16) -> u8 {
        match addr {
            0x6000..=0x7FFF => self.prg_ram[(addr - 0x6000) as usize],
            0x8000..=0xFFFF => {
                let window = ((addr >> 14) & 1) as usize;
                let offset = self.windows[window] + (addr as usize & 0x3FFF);
                self.prg_rom.get(offset).copied().unwrap_or(0)
            }
            _ => 0,
        }
    }

    fn write(&mut self, addr: u16, val: u8, _video: &mut dyn PatternMemory) {
        if let 0x6000..=0x7FFF = addr {
            self.prg_ram[(addr - 0x6000) as usize] = val;
        }
    }

    fn reset(&mut self) {}

    fn save_state(&self) -> MapperState {
        MapperState {
            number: 0,
            prg_ram: self.prg_ram.to_vec(),
            registers: Vec::new(),
        }
    }

    fn load_state(&mut self, state: &MapperState) -> Result<(), StateError> {
        if state.number != 0 {
            return Err(StateError::Mapper {
                expected: 0,
                found: state.number,
            });
        }
        if state.prg_ram.len() != PRG_RAM_LEN {
            return Err(StateError::Size {
                block: "prg_ram",
                expected: PRG_RAM_LEN,
                actual: state.prg_ram.len(),
            });
        }
        self.prg_ram.copy_from_slice(&state.prg_ram);
        Ok(())
    }
}
