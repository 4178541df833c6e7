mod common;

use common::{nrom_image, system_with};
use emu_core::apu::TimingMode;
use emu_core::cpu_6502::{
    InterruptLines, Memory6502, FLAG_CARRY, FLAG_NEGATIVE, FLAG_OVERFLOW, FLAG_ZERO,
};
use emu_nes::{Apu, Cartridge, Mirroring, NesError, Nrom};

#[test]
fn test_nrom_128_mirrors_rom_and_horizontal_nametables() {
    let image = nrom_image(&[0x11, 0x22, 0x33], 0);
    let cart = Cartridge::from_bytes(&image).unwrap();
    assert_eq!(cart.header.prg_banks, 1);
    assert_eq!(cart.header.chr_banks, 1);
    assert_eq!(cart.header.mapper, 0);
    assert_eq!(cart.header.mirroring, Mirroring::Horizontal);

    let mut nes = system_with(&[0x11, 0x22, 0x33], 0);
    let bus = nes.bus_mut();
    for offset in [0x0000u16, 0x0001, 0x0100, 0x1234, 0x3FFF] {
        assert_eq!(bus.read(0x8000 + offset), bus.read(0xC000 + offset));
    }
    assert_eq!(bus.read(0xC001), 0x22);

    let ppu = &nes.bus().ppu;
    let slots: Vec<usize> = [0x2000u16, 0x2400, 0x2800, 0x2C00]
        .iter()
        .map(|&a| ppu.nametable_offset(a))
        .collect();
    assert_eq!(slots[0], slots[1]);
    assert_eq!(slots[2], slots[3]);
    assert_ne!(slots[0], slots[2]);
}

#[test]
fn test_adc_signed_overflow() {
    // LDA #$50; STA $10; CLC; LDA #$50; ADC $10
    let mut nes = system_with(&[0xA9, 0x50, 0x85, 0x10, 0x18, 0xA9, 0x50, 0x65, 0x10], 0);
    for _ in 0..5 {
        nes.step_instruction().unwrap();
    }
    let cpu = nes.cpu();
    assert_eq!(cpu.a, 0xA0);
    assert!(!cpu.p.carry);
    assert!(cpu.p.overflow);
    assert!(cpu.p.negative);
    assert!(!cpu.p.zero);
    assert_eq!(cpu.status() & (FLAG_CARRY | FLAG_OVERFLOW | FLAG_NEGATIVE | FLAG_ZERO), 0xC0);
}

#[test]
fn test_four_step_sequence() {
    let mut apu = Apu::new(TimingMode::Ntsc, 44_100, false);
    let mut sampler = Nrom::empty();
    let step = apu.frame_counter().step_period();

    apu.write_register(0x4017, 0x00);
    apu.write_register(0x4015, 0x01);
    apu.write_register(0x4001, 0x87); // sweep on, period 0, shift 7
    apu.write_register(0x4002, 0x00);
    apu.write_register(0x4003, 0x01); // timer high 1, length index 0
    let length = apu.pulse1().length.value();
    assert_eq!(apu.pulse1().period(), 0x100);

    let mut lines = InterruptLines::default();
    let mut lengths = Vec::new();
    let mut periods = Vec::new();
    for n in 1..=4 {
        if n == 4 {
            apu.clock(step - 1, &mut sampler, &mut lines);
            assert!(!apu.irq_pending(), "IRQ only after the last step");
            apu.clock(1, &mut sampler, &mut lines);
        } else {
            apu.clock(step, &mut sampler, &mut lines);
            assert!(!apu.irq_pending());
        }
        lengths.push(apu.pulse1().length.value());
        periods.push(apu.pulse1().period());
    }
    assert_eq!(
        lengths,
        vec![length, length - 1, length - 1, length - 2],
        "half-frame clocks land on steps 2 and 4"
    );
    assert_eq!(periods, vec![0x100, 0x102, 0x102, 0x104]);
    assert!(apu.irq_pending());
    assert!(lines.irq);

    // inhibited: a full sequence raises nothing
    let mut apu = Apu::new(TimingMode::Ntsc, 44_100, false);
    let mut lines = InterruptLines::default();
    apu.write_register(0x4017, 0x40);
    apu.clock(step * 4, &mut sampler, &mut lines);
    assert!(!apu.irq_pending());
    assert!(!lines.irq);
}

#[test]
fn test_illegal_opcode_halts_without_further_writes() {
    // LDA #$AA; STA $0300; .byte $02; STA $0301; STA $0302
    let mut nes = system_with(
        &[0xA9, 0xAA, 0x8D, 0x00, 0x03, 0x02, 0x8D, 0x01, 0x03, 0x8D, 0x02, 0x03],
        0,
    );
    nes.step_instruction().unwrap();
    nes.step_instruction().unwrap();
    assert_eq!(nes.bus().ram()[0x300], 0xAA);

    match nes.step_instruction() {
        Err(NesError::Crashed { pc, opcode }) => assert_eq!((pc, opcode), (0x8005, 0x02)),
        other => panic!("expected crash, got {:?}", other),
    }
    assert!(nes.is_crashed());

    let cycles = nes.cpu().cycles;
    let ram = nes.bus().ram().to_vec();
    for _ in 0..10 {
        assert!(nes.step_instruction().is_err());
    }
    assert_eq!(nes.cpu().cycles, cycles);
    assert_eq!(nes.bus().ram().to_vec(), ram);
    assert_eq!(nes.bus().ram()[0x301], 0);
}
