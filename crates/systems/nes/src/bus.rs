//! CPU address space and device clocking.
//!
//! | range         | device                                             |
//! |---------------|----------------------------------------------------|
//! | $0000-$1FFF   | 2 KB work RAM, mirrored every $800                 |
//! | $2000-$3FFF   | PPU registers, mirrored every 8 bytes              |
//! | $4000-$4013   | APU channel registers (write only)                 |
//! | $4014         | OAM DMA                                            |
//! | $4015         | APU status / channel enable                        |
//! | $4016         | joypad strobe (write), joypad 1 (read)             |
//! | $4017         | frame counter (write), joypad 2 (read)             |
//! | $4018-$401F   | unused, reads return the last bus value            |
//! | $4020-$FFFF   | cartridge                                          |
//!
//! After every instruction the CPU calls [`Memory6502::tick`] with the cycles it
//! used. The bus turns them into PPU dots (3 per cycle NTSC, 3.2 PAL, carried in
//! fifths) and APU cycles, then reports interrupts and DMA stalls back to the CPU.

use crate::apu::Apu;
use crate::joypad::Joypad;
use crate::mappers::{Mapper, Nrom};
use crate::ppu::Ppu;
use crate::sinks::{InputSource, NoInput};
use crate::state::RAM_LEN;
use emu_core::apu::TimingMode;
use emu_core::cpu_6502::{InterruptKind, IrqRequester, Memory6502};
use emu_core::logging::{log, LogCategory, LogLevel};
use std::fmt;

/// Cycles the CPU is suspended for an OAM DMA, plus one when it starts on an odd cycle.
pub const OAM_DMA_CYCLES: u32 = 513;

pub struct NesBus {
    ram: Box<[u8; RAM_LEN]>,
    pub ppu: Ppu,
    pub apu: Apu,
    mapper: Box<dyn Mapper>,
    joypads: [Joypad; 2],
    input: Box<dyn InputSource>,
    open_bus: u8,
    dots_x5: u32,
    dot_fraction: u32,
    dma_halt: u32,
    cycles: u64,
}

impl fmt::Debug for NesBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NesBus")
            .field("ppu", &self.ppu)
            .field("mapper", &self.mapper.name())
            .field("joypads", &self.joypads)
            .field("cycles", &self.cycles)
            .finish_non_exhaustive()
    }
}

impl NesBus {
    /// A bus with an empty NROM board and no input attached.
    pub fn new(timing: TimingMode, ppu: Ppu, apu: Apu) -> Self {
        Self {
            ram: Box::new([0; RAM_LEN]),
            ppu,
            apu,
            mapper: Box::new(Nrom::empty()),
            joypads: [Joypad::new(0), Joypad::new(1)],
            input: Box::new(NoInput),
            open_bus: 0,
            dots_x5: timing.dots_per_cycle_x5(),
            dot_fraction: 0,
            dma_halt: 0,
            cycles: 0,
        }
    }

    /// Plug in a cartridge board and let it install CHR data and mirroring.
    pub fn insert_mapper(&mut self, mut mapper: Box<dyn Mapper>) {
        mapper.load_rom(&mut self.ppu);
        log(LogCategory::Bus, LogLevel::Info, || {
            format!("Bus: inserted mapper {} ({})", mapper.number(), mapper.name())
        });
        self.mapper = mapper;
    }

    pub fn mapper(&self) -> &dyn Mapper {
        self.mapper.as_ref()
    }

    pub fn mapper_mut(&mut self) -> &mut dyn Mapper {
        self.mapper.as_mut()
    }

    pub fn set_input(&mut self, input: Box<dyn InputSource>) {
        self.input = input;
    }

    pub fn ram(&self) -> &[u8; RAM_LEN] {
        &self.ram
    }

    /// Caller validates the length.
    pub fn load_ram(&mut self, data: &[u8]) {
        let n = data.len().min(RAM_LEN);
        self.ram[..n].copy_from_slice(&data[..n]);
    }

    pub fn joypads(&self) -> &[Joypad; 2] {
        &self.joypads
    }

    pub fn set_joypads(&mut self, joypads: [Joypad; 2]) {
        self.joypads = joypads;
    }

    /// CPU cycles seen by [`Memory6502::tick`].
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn set_cycles(&mut self, cycles: u64) {
        self.cycles = cycles;
    }

    /// Console reset: devices return to power-on registers, work RAM and the
    /// cartridge's PRG RAM are kept.
    pub fn reset(&mut self) {
        self.ppu.reset();
        self.apu.reset();
        self.mapper.reset();
        self.mapper.load_rom(&mut self.ppu);
        for pad in &mut self.joypads {
            pad.reset();
        }
        self.open_bus = 0;
        self.dot_fraction = 0;
        self.dma_halt = 0;
        self.cycles = 0;
    }

    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        let mut buf = [0u8; 256];
        for (i, slot) in buf.iter_mut().enumerate() {
            *slot = self.read(base.wrapping_add(i as u16));
        }
        self.ppu.oam_dma(&buf, self.mapper.as_mut());
        self.dma_halt += OAM_DMA_CYCLES + (self.cycles & 1) as u32;
        log(LogCategory::Bus, LogLevel::Trace, || {
            format!("Bus: OAM DMA from ${:04X}", base)
        });
    }
}

impl Memory6502 for NesBus {
    fn read(&mut self, addr: u16) -> u8 {
        let value = match addr {
            0x0000..=0x1FFF => self.ram[addr as usize & 0x07FF],
            0x2000..=0x3FFF => self.ppu.read_register(addr & 7, self.mapper.as_mut()),
            0x4015 => self.apu.read_status() | (self.open_bus & 0x20),
            0x4016 | 0x4017 => {
                let port = (addr - 0x4016) as usize;
                self.joypads[port].read(self.input.as_ref()) | (self.open_bus & 0xE0)
            }
            0x4000..=0x401F => self.open_bus,
            _ => self.mapper.load(addr),
        };
        self.open_bus = value;
        value
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.open_bus = val;
        match addr {
            0x0000..=0x1FFF => self.ram[addr as usize & 0x07FF] = val,
            0x2000..=0x3FFF => self.ppu.write_register(addr & 7, val, self.mapper.as_mut()),
            0x4014 => self.oam_dma(val),
            0x4016 => {
                for pad in &mut self.joypads {
                    pad.write_strobe(val);
                }
            }
            0x4000..=0x4017 => self.apu.write_register(addr, val),
            0x4018..=0x401F => {}
            _ => self.mapper.write(addr, val, &mut self.ppu),
        }
    }

    fn tick(&mut self, cycles: u32, lines: &mut dyn IrqRequester) {
        self.cycles = self.cycles.wrapping_add(cycles as u64);

        let fifths = self.dot_fraction + cycles * self.dots_x5;
        self.dot_fraction = fifths % 5;
        if self.ppu.tick(fifths / 5, self.mapper.as_mut()) {
            lines.request_irq(InterruptKind::Normal);
        }
        if self.ppu.take_nmi() {
            lines.request_irq(InterruptKind::NonMaskable);
        }

        self.apu.clock(cycles, self.mapper.as_mut(), lines);

        if self.dma_halt > 0 {
            lines.halt_cycles(std::mem::take(&mut self.dma_halt));
        }
    }
}
