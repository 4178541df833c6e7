#![allow(dead_code)]

use emu_nes::cartridge::build_ines;
use emu_nes::{EmulatorConfig, NesSystem};

pub const NMI_HANDLER: usize = 0x0100;

/// 16 KB NROM image with `program` at $8000. Reset points at $8000; NMI and IRQ
/// point at $8100, which holds `INC $10; RTI`.
pub fn nrom_image(program: &[u8], flags6: u8) -> Vec<u8> {
    let mut prg = vec![0xEAu8; 0x4000];
    prg[..program.len()].copy_from_slice(program);
    prg[NMI_HANDLER..NMI_HANDLER + 3].copy_from_slice(&[0xE6, 0x10, 0x40]);
    prg[0x3FFA..].copy_from_slice(&[0x00, 0x81, 0x00, 0x80, 0x00, 0x81]);

    let mut chr = vec![0u8; 0x2000];
    for (i, b) in chr.iter_mut().enumerate() {
        *b = (i * 7) as u8;
    }
    build_ines(&prg, &chr, flags6, 0)
}

pub fn quiet_config() -> EmulatorConfig {
    EmulatorConfig {
        pace_frames: false,
        ..EmulatorConfig::default()
    }
}

pub fn system_with(program: &[u8], flags6: u8) -> NesSystem {
    let mut nes = NesSystem::new(quiet_config());
    nes.load_rom_bytes(&nrom_image(program, flags6))
        .expect("test ROM loads");
    nes
}

/// Turns on NMI, sprites/background and pulse 1, then counts in X and stores it.
pub const BUSY_PROGRAM: &[u8] = &[
    0xA9, 0x80, 0x8D, 0x00, 0x20, // LDA #$80; STA $2000
    0xA9, 0x1E, 0x8D, 0x01, 0x20, // LDA #$1E; STA $2001
    0xA9, 0x01, 0x8D, 0x15, 0x40, // LDA #$01; STA $4015
    0xA9, 0xBF, 0x8D, 0x00, 0x40, // LDA #$BF; STA $4000
    0xA9, 0x40, 0x8D, 0x02, 0x40, // LDA #$40; STA $4002
    0xA9, 0x08, 0x8D, 0x03, 0x40, // LDA #$08; STA $4003
    0xE8, 0x8E, 0x00, 0x02, // loop: INX; STX $0200
    0x4C, 0x1E, 0x80, // JMP loop
];
