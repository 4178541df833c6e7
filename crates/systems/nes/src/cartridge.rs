//! iNES cartridge images.
//!
//! ## Header layout
//!
//! | byte  | meaning                                                             |
//! |-------|---------------------------------------------------------------------|
//! | 0-3   | `NES\x1A`                                                           |
//! | 4     | PRG ROM size in 16 KB banks                                         |
//! | 5     | CHR ROM size in 8 KB banks (held internally as twice as many 4 KB)  |
//! | 6     | bit 0 vertical mirroring, bit 2 trainer, bit 3 four-screen, mapper low nibble in 7-4 |
//! | 7     | mapper high nibble in 7-4                                           |
//! | 8-15  | reserved; any non-zero byte marks a dirty header and byte 7 is ignored |
//!
//! The body is an optional 512-byte trainer, then the PRG banks, then the CHR banks.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const HEADER_LEN: usize = 16;
pub const TRAINER_LEN: usize = 512;
pub const PRG_BANK_LEN: usize = 0x4000;
pub const CHR_BANK_LEN: usize = 0x1000;

const MAGIC: &[u8; 4] = b"NES\x1A";

#[derive(Debug, Error)]
pub enum RomError {
    #[error("ROM image is {0} bytes, shorter than the 16-byte header")]
    TooShort(usize),
    #[error("missing NES<EOF> magic")]
    BadMagic,
    #[error("{section} truncated: expected {expected} bytes, found {actual}")]
    Truncated {
        section: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("header declares no PRG banks")]
    NoPrgBanks,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Nametable arrangement. Indexes the logical-to-physical table in [`Mirroring::tables`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    FourScreen,
    SingleScreenLower,
    SingleScreenUpper,
}

impl Mirroring {
    /// Physical nametable backing each of the four logical nametables.
    pub fn tables(self) -> [usize; 4] {
        match self {
            Mirroring::Horizontal => [0, 0, 1, 1],
            Mirroring::Vertical => [0, 1, 0, 1],
            Mirroring::FourScreen => [0, 1, 2, 3],
            Mirroring::SingleScreenLower => [0, 0, 0, 0],
            Mirroring::SingleScreenUpper => [1, 1, 1, 1],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RomHeader {
    /// 16 KB units
    pub prg_banks: u8,
    /// 4 KB units (twice the header's 8 KB count)
    pub chr_banks: u16,
    pub mirroring: Mirroring,
    pub has_trainer: bool,
    pub mapper: u8,
}

impl RomHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, RomError> {
        if bytes.len() < HEADER_LEN {
            return Err(RomError::TooShort(bytes.len()));
        }
        if &bytes[0..4] != MAGIC {
            return Err(RomError::BadMagic);
        }

        let flags6 = bytes[6];
        let flags7 = bytes[7];
        let mirroring = if flags6 & 0x08 != 0 {
            Mirroring::FourScreen
        } else if flags6 & 0x01 != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };

        let dirty = bytes[8..16].iter().any(|&b| b != 0);
        let mapper_high = if dirty { 0 } else { flags7 & 0xF0 };

        Ok(Self {
            prg_banks: bytes[4],
            chr_banks: bytes[5] as u16 * 2,
            mirroring,
            has_trainer: flags6 & 0x04 != 0,
            mapper: (flags6 >> 4) | mapper_high,
        })
    }
}

/// A parsed ROM image: header plus the PRG and CHR banks it declares.
#[derive(Debug, Clone)]
pub struct Cartridge {
    pub header: RomHeader,
    pub prg_rom: Vec<u8>,
    /// Empty for CHR-RAM boards
    pub chr_rom: Vec<u8>,
}

impl Cartridge {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RomError> {
        let header = RomHeader::parse(bytes)?;
        if header.prg_banks == 0 {
            return Err(RomError::NoPrgBanks);
        }

        let mut offset = HEADER_LEN;
        if header.has_trainer {
            offset += TRAINER_LEN;
        }

        let prg_len = header.prg_banks as usize * PRG_BANK_LEN;
        let prg_rom = take(bytes, offset, prg_len, "PRG ROM")?.to_vec();
        offset += prg_len;

        let chr_len = header.chr_banks as usize * CHR_BANK_LEN;
        let chr_rom = take(bytes, offset, chr_len, "CHR ROM")?.to_vec();

        Ok(Self {
            header,
            prg_rom,
            chr_rom,
        })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, RomError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn prg_bank(&self, index: usize) -> &[u8] {
        let start = (index * PRG_BANK_LEN).min(self.prg_rom.len());
        let end = (start + PRG_BANK_LEN).min(self.prg_rom.len());
        &self.prg_rom[start..end]
    }

    /// 4 KB CHR bank, or `None` when the image has fewer banks.
    pub fn chr_bank(&self, index: usize) -> Option<&[u8]> {
        let start = index * CHR_BANK_LEN;
        self.chr_rom.get(start..start + CHR_BANK_LEN)
    }

    pub fn has_chr_ram(&self) -> bool {
        self.chr_rom.is_empty()
    }
}

fn take<'a>(
    bytes: &'a [u8],
    offset: usize,
    len: usize,
    section: &'static str,
) -> Result<&'a [u8], RomError> {
    let available = bytes.len().saturating_sub(offset);
    if available < len {
        return Err(RomError::Truncated {
            section,
            expected: len,
            actual: available,
        });
    }
    Ok(&bytes[offset..offset + len])
}

/// Assemble an iNES image in memory. Used by tests and the CLI's self-check.
pub fn build_ines(prg: &[u8], chr: &[u8], flags6: u8, flags7: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + prg.len() + chr.len());
    out.extend_from_slice(MAGIC);
    out.push((prg.len() / PRG_BANK_LEN) as u8);
    out.push((chr.len() / (2 * CHR_BANK_LEN)) as u8);
    out.push(flags6);
    out.push(flags7);
    out.extend_from_slice(&[0; 8]);
    out.extend_from_slice(prg);
    out.extend_from_slice(chr);
    out
}
