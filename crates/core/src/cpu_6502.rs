//! MOS 6502 CPU core implementation
//!
//! A table-decoded interpreter for the documented 6502 instruction set, as used by the
//! 2A03/2A07 console CPUs (decimal mode is stored but never affects arithmetic).
//!
//! The CPU is the only driver of emulated time: after every instruction it hands the
//! consumed cycle count to its [`Memory6502`] implementation via [`Memory6502::tick`], which
//! advances attached devices and may request interrupts or CPU halts through the
//! [`IrqRequester`] it is given.

use crate::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};

/// Memory interface trait for the 6502 CPU
///
/// Systems using the 6502 must implement this trait to provide memory access.
/// Reads take `&mut self` because reading hardware registers has side effects.
pub trait Memory6502 {
    /// Read a byte from memory at the given address
    fn read(&mut self, addr: u16) -> u8;

    /// Write a byte to memory at the given address
    fn write(&mut self, addr: u16, val: u8);

    /// Advance attached devices by `cycles` CPU cycles.
    fn tick(&mut self, _cycles: u32, _lines: &mut dyn IrqRequester) {}
}

/// Interrupt sources understood by the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterruptKind {
    /// Maskable IRQ, vector $FFFE. Dropped while the interrupt-disable flag is set.
    Normal,
    /// NMI, vector $FFFA.
    NonMaskable,
    /// Reset, vector $FFFC.
    Reset,
}

/// Narrow capability handed to devices so they can signal the CPU without owning it.
pub trait IrqRequester {
    fn request_irq(&mut self, kind: InterruptKind);

    /// Add `cycles` to the debt the CPU must burn before its next fetch.
    fn halt_cycles(&mut self, cycles: u32);
}

/// Pending interrupt requests and halt debt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterruptLines {
    pub irq: bool,
    pub nmi: bool,
    pub reset: bool,
    pub halt: u32,
}

impl IrqRequester for InterruptLines {
    fn request_irq(&mut self, kind: InterruptKind) {
        match kind {
            InterruptKind::Normal => self.irq = true,
            InterruptKind::NonMaskable => self.nmi = true,
            InterruptKind::Reset => self.reset = true,
        }
    }

    fn halt_cycles(&mut self, cycles: u32) {
        self.halt = self.halt.saturating_add(cycles);
    }
}

pub const FLAG_CARRY: u8 = 0x01;
pub const FLAG_ZERO: u8 = 0x02;
pub const FLAG_INTERRUPT: u8 = 0x04;
pub const FLAG_DECIMAL: u8 = 0x08;
pub const FLAG_BREAK: u8 = 0x10;
pub const FLAG_UNUSED: u8 = 0x20;
pub const FLAG_OVERFLOW: u8 = 0x40;
pub const FLAG_NEGATIVE: u8 = 0x80;

/// Processor status flags (NV-BDIZC), held unpacked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusFlags {
    pub carry: bool,
    pub zero: bool,
    pub interrupt_disable: bool,
    pub decimal: bool,
    pub brk: bool,
    pub unused: bool,
    pub overflow: bool,
    pub negative: bool,
}

impl StatusFlags {
    pub fn from_byte(v: u8) -> Self {
        Self {
            carry: v & FLAG_CARRY != 0,
            zero: v & FLAG_ZERO != 0,
            interrupt_disable: v & FLAG_INTERRUPT != 0,
            decimal: v & FLAG_DECIMAL != 0,
            brk: v & FLAG_BREAK != 0,
            unused: v & FLAG_UNUSED != 0,
            overflow: v & FLAG_OVERFLOW != 0,
            negative: v & FLAG_NEGATIVE != 0,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut v = 0;
        for (set, bit) in [
            (self.carry, FLAG_CARRY),
            (self.zero, FLAG_ZERO),
            (self.interrupt_disable, FLAG_INTERRUPT),
            (self.decimal, FLAG_DECIMAL),
            (self.brk, FLAG_BREAK),
            (self.unused, FLAG_UNUSED),
            (self.overflow, FLAG_OVERFLOW),
            (self.negative, FLAG_NEGATIVE),
        ] {
            if set {
                v |= bit;
            }
        }
        v
    }

    /// The byte pushed by PHP/BRK (`brk == true`) or by a hardware interrupt.
    fn pushed(self, brk: bool) -> u8 {
        let mut v = self.to_byte() | FLAG_UNUSED;
        if brk {
            v |= FLAG_BREAK;
        } else {
            v &= !FLAG_BREAK;
        }
        v
    }

    /// Restore from a byte pulled by PLP/RTI; B is not a real latch and bit 5 reads as 1.
    fn pulled(v: u8) -> Self {
        let mut p = Self::from_byte(v);
        p.brk = false;
        p.unused = true;
        p
    }
}

/// Where and what the CPU was executing when it hit an opcode it cannot run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashInfo {
    pub pc: u16,
    pub opcode: u8,
}

/// Serializable register file and control state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cpu6502State {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub pc: u16,
    pub status: u8,
    pub cycles: u64,
    pub lines: InterruptLines,
    pub crashed: Option<CrashInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Relative,
    Indirect,
    IndirectX,
    IndirectY,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mnemonic {
    Adc, And, Asl, Bcc, Bcs, Beq, Bit, Bmi, Bne, Bpl, Brk, Bvc, Bvs, Clc,
    Cld, Cli, Clv, Cmp, Cpx, Cpy, Dec, Dex, Dey, Eor, Inc, Inx, Iny, Jmp,
    Jsr, Lda, Ldx, Ldy, Lsr, Nop, Ora, Pha, Php, Pla, Plp, Rol, Ror, Rti,
    Rts, Sbc, Sec, Sed, Sei, Sta, Stx, Sty, Tax, Tay, Tsx, Txa, Txs, Tya,
}

#[derive(Debug, Clone, Copy)]
struct Opcode {
    op: Mnemonic,
    mode: Mode,
    cycles: u8,
    /// Adds a cycle when indexing crosses a page.
    page_penalty: bool,
}

const fn op(op: Mnemonic, mode: Mode, cycles: u8) -> Opcode {
    Opcode {
        op,
        mode,
        cycles,
        page_penalty: false,
    }
}

const fn opx(op: Mnemonic, mode: Mode, cycles: u8) -> Opcode {
    Opcode {
        op,
        mode,
        cycles,
        page_penalty: true,
    }
}

fn decode(opcode: u8) -> Option<Opcode> {
    use Mnemonic::*;
    use Mode::*;
    let d = match opcode {
        0x69 => op(Adc, Immediate, 2),
        0x65 => op(Adc, ZeroPage, 3),
        0x75 => op(Adc, ZeroPageX, 4),
        0x6D => op(Adc, Absolute, 4),
        0x7D => opx(Adc, AbsoluteX, 4),
        0x79 => opx(Adc, AbsoluteY, 4),
        0x61 => op(Adc, IndirectX, 6),
        0x71 => opx(Adc, IndirectY, 5),

        0x29 => op(And, Immediate, 2),
        0x25 => op(And, ZeroPage, 3),
        0x35 => op(And, ZeroPageX, 4),
        0x2D => op(And, Absolute, 4),
        0x3D => opx(And, AbsoluteX, 4),
        0x39 => opx(And, AbsoluteY, 4),
        0x21 => op(And, IndirectX, 6),
        0x31 => opx(And, IndirectY, 5),

        0x0A => op(Asl, Accumulator, 2),
        0x06 => op(Asl, ZeroPage, 5),
        0x16 => op(Asl, ZeroPageX, 6),
        0x0E => op(Asl, Absolute, 6),
        0x1E => op(Asl, AbsoluteX, 7),

        0x90 => op(Bcc, Relative, 2),
        0xB0 => op(Bcs, Relative, 2),
        0xF0 => op(Beq, Relative, 2),
        0x30 => op(Bmi, Relative, 2),
        0xD0 => op(Bne, Relative, 2),
        0x10 => op(Bpl, Relative, 2),
        0x50 => op(Bvc, Relative, 2),
        0x70 => op(Bvs, Relative, 2),

        0x24 => op(Bit, ZeroPage, 3),
        0x2C => op(Bit, Absolute, 4),

        0x00 => op(Brk, Implied, 7),

        0x18 => op(Clc, Implied, 2),
        0xD8 => op(Cld, Implied, 2),
        0x58 => op(Cli, Implied, 2),
        0xB8 => op(Clv, Implied, 2),

        0xC9 => op(Cmp, Immediate, 2),
        0xC5 => op(Cmp, ZeroPage, 3),
        0xD5 => op(Cmp, ZeroPageX, 4),
        0xCD => op(Cmp, Absolute, 4),
        0xDD => opx(Cmp, AbsoluteX, 4),
        0xD9 => opx(Cmp, AbsoluteY, 4),
        0xC1 => op(Cmp, IndirectX, 6),
        0xD1 => opx(Cmp, IndirectY, 5),

        0xE0 => op(Cpx, Immediate, 2),
        0xE4 => op(Cpx, ZeroPage, 3),
        0xEC => op(Cpx, Absolute, 4),
        0xC0 => op(Cpy, Immediate, 2),
        0xC4 => op(Cpy, ZeroPage, 3),
        0xCC => op(Cpy, Absolute, 4),

        0xC6 => op(Dec, ZeroPage, 5),
        0xD6 => op(Dec, ZeroPageX, 6),
        0xCE => op(Dec, Absolute, 6),
        0xDE => op(Dec, AbsoluteX, 7),
        0xCA => op(Dex, Implied, 2),
        0x88 => op(Dey, Implied, 2),

        0x49 => op(Eor, Immediate, 2),
        0x45 => op(Eor, ZeroPage, 3),
        0x55 => op(Eor, ZeroPageX, 4),
        0x4D => op(Eor, Absolute, 4),
        0x5D => opx(Eor, AbsoluteX, 4),
        0x59 => opx(Eor, AbsoluteY, 4),
        0x41 => op(Eor, IndirectX, 6),
        0x51 => opx(Eor, IndirectY, 5),

        0xE6 => op(Inc, ZeroPage, 5),
        0xF6 => op(Inc, ZeroPageX, 6),
        0xEE => op(Inc, Absolute, 6),
        0xFE => op(Inc, AbsoluteX, 7),
        0xE8 => op(Inx, Implied, 2),
        0xC8 => op(Iny, Implied, 2),

        0x4C => op(Jmp, Absolute, 3),
        0x6C => op(Jmp, Indirect, 5),
        0x20 => op(Jsr, Absolute, 6),

        0xA9 => op(Lda, Immediate, 2),
        0xA5 => op(Lda, ZeroPage, 3),
        0xB5 => op(Lda, ZeroPageX, 4),
        0xAD => op(Lda, Absolute, 4),
        0xBD => opx(Lda, AbsoluteX, 4),
        0xB9 => opx(Lda, AbsoluteY, 4),
        0xA1 => op(Lda, IndirectX, 6),
        0xB1 => opx(Lda, IndirectY, 5),

        0xA2 => op(Ldx, Immediate, 2),
        0xA6 => op(Ldx, ZeroPage, 3),
        0xB6 => op(Ldx, ZeroPageY, 4),
        0xAE => op(Ldx, Absolute, 4),
        0xBE => opx(Ldx, AbsoluteY, 4),

        0xA0 => op(Ldy, Immediate, 2),
        0xA4 => op(Ldy, ZeroPage, 3),
        0xB4 => op(Ldy, ZeroPageX, 4),
        0xAC => op(Ldy, Absolute, 4),
        0xBC => opx(Ldy, AbsoluteX, 4),

        0x4A => op(Lsr, Accumulator, 2),
        0x46 => op(Lsr, ZeroPage, 5),
        0x56 => op(Lsr, ZeroPageX, 6),
        0x4E => op(Lsr, Absolute, 6),
        0x5E => op(Lsr, AbsoluteX, 7),

        0xEA => op(Nop, Implied, 2),

        0x09 => op(Ora, Immediate, 2),
        0x05 => op(Ora, ZeroPage, 3),
        0x15 => op(Ora, ZeroPageX, 4),
        0x0D => op(Ora, Absolute, 4),
        0x1D => opx(Ora, AbsoluteX, 4),
        0x19 => opx(Ora, AbsoluteY, 4),
        0x01 => op(Ora, IndirectX, 6),
        0x11 => opx(Ora, IndirectY, 5),

        0x48 => op(Pha, Implied, 3),
        0x08 => op(Php, Implied, 3),
        0x68 => op(Pla, Implied, 4),
        0x28 => op(Plp, Implied, 4),

        0x2A => op(Rol, Accumulator, 2),
        0x26 => op(Rol, ZeroPage, 5),
        0x36 => op(Rol, ZeroPageX, 6),
        0x2E => op(Rol, Absolute, 6),
        0x3E => op(Rol, AbsoluteX, 7),

        0x6A => op(Ror, Accumulator, 2),
        0x66 => op(Ror, ZeroPage, 5),
        0x76 => op(Ror, ZeroPageX, 6),
        0x6E => op(Ror, Absolute, 6),
        0x7E => op(Ror, AbsoluteX, 7),

        0x40 => op(Rti, Implied, 6),
        0x60 => op(Rts, Implied, 6),

        0xE9 => op(Sbc, Immediate, 2),
        0xE5 => op(Sbc, ZeroPage, 3),
        0xF5 => op(Sbc, ZeroPageX, 4),
        0xED => op(Sbc, Absolute, 4),
        0xFD => opx(Sbc, AbsoluteX, 4),
        0xF9 => opx(Sbc, AbsoluteY, 4),
        0xE1 => op(Sbc, IndirectX, 6),
        0xF1 => opx(Sbc, IndirectY, 5),

        0x38 => op(Sec, Implied, 2),
        0xF8 => op(Sed, Implied, 2),
        0x78 => op(Sei, Implied, 2),

        0x85 => op(Sta, ZeroPage, 3),
        0x95 => op(Sta, ZeroPageX, 4),
        0x8D => op(Sta, Absolute, 4),
        0x9D => op(Sta, AbsoluteX, 5),
        0x99 => op(Sta, AbsoluteY, 5),
        0x81 => op(Sta, IndirectX, 6),
        0x91 => op(Sta, IndirectY, 6),

        0x86 => op(Stx, ZeroPage, 3),
        0x96 => op(Stx, ZeroPageY, 4),
        0x8E => op(Stx, Absolute, 4),
        0x84 => op(Sty, ZeroPage, 3),
        0x94 => op(Sty, ZeroPageX, 4),
        0x8C => op(Sty, Absolute, 4),

        0xAA => op(Tax, Implied, 2),
        0xA8 => op(Tay, Implied, 2),
        0xBA => op(Tsx, Implied, 2),
        0x8A => op(Txa, Implied, 2),
        0x9A => op(Txs, Implied, 2),
        0x98 => op(Tya, Implied, 2),

        _ => return None,
    };
    Some(d)
}

#[inline]
fn pages_differ(a: u16, b: u16) -> bool {
    (a & 0xFF00) != (b & 0xFF00)
}

/// MOS 6502 CPU state and execution engine
///
/// This is a generic, reusable 6502 CPU implementation that works with any
/// system through the `Memory6502` trait.
#[derive(Debug)]
pub struct Cpu6502<M: Memory6502> {
    /// Accumulator register
    pub a: u8,
    /// X index register
    pub x: u8,
    /// Y index register
    pub y: u8,
    /// Stack pointer (points to 0x0100 + sp)
    pub sp: u8,
    /// Status flags
    pub p: StatusFlags,
    /// Program counter
    pub pc: u16,
    /// Total cycles executed
    pub cycles: u64,
    /// Memory interface
    pub memory: M,
    lines: InterruptLines,
    crashed: Option<CrashInfo>,
}

impl<M: Memory6502> Cpu6502<M> {
    /// Create a new 6502 CPU with the given memory interface
    pub fn new(memory: M) -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFD,
            p: StatusFlags::from_byte(0x24),
            pc: 0x8000,
            cycles: 0,
            memory,
            lines: InterruptLines::default(),
            crashed: None,
        }
    }

    /// Reset the CPU to initial state (preserves memory)
    pub fn reset(&mut self) {
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.sp = 0xFD;
        self.p = StatusFlags::from_byte(0x24);
        self.cycles = 0;
        self.lines = InterruptLines::default();
        self.crashed = None;
        self.pc = self.read_u16(0xFFFC);
    }

    /// Packed status register.
    pub fn status(&self) -> u8 {
        self.p.to_byte()
    }

    pub fn set_status(&mut self, v: u8) {
        self.p = StatusFlags::from_byte(v);
    }

    pub fn request_irq(&mut self, kind: InterruptKind) {
        self.lines.request_irq(kind);
    }

    pub fn halt_cycles(&mut self, cycles: u32) {
        self.lines.halt_cycles(cycles);
    }

    pub fn pending_halt(&self) -> u32 {
        self.lines.halt
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.is_some()
    }

    pub fn crash_info(&self) -> Option<CrashInfo> {
        self.crashed
    }

    pub fn snapshot(&self) -> Cpu6502State {
        Cpu6502State {
            a: self.a,
            x: self.x,
            y: self.y,
            sp: self.sp,
            pc: self.pc,
            status: self.p.to_byte(),
            cycles: self.cycles,
            lines: self.lines,
            crashed: self.crashed,
        }
    }

    pub fn restore(&mut self, state: &Cpu6502State) {
        self.a = state.a;
        self.x = state.x;
        self.y = state.y;
        self.sp = state.sp;
        self.pc = state.pc;
        self.p = StatusFlags::from_byte(state.status);
        self.cycles = state.cycles;
        self.lines = state.lines;
        self.crashed = state.crashed;
    }

    #[inline]
    fn read(&mut self, addr: u16) -> u8 {
        self.memory.read(addr)
    }

    #[inline]
    fn write(&mut self, addr: u16, val: u8) {
        self.memory.write(addr, val);
    }

    fn read_u16(&mut self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Zero-page pointer read; the high byte wraps within page zero.
    fn read_u16_zp(&mut self, zp: u8) -> u16 {
        let lo = self.read(zp as u16) as u16;
        let hi = self.read(zp.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    /// Read a 16-bit pointer for JMP (indirect) with the 6502 page-wrapping bug.
    fn read_indirect_u16_bug(&mut self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi_addr = (addr & 0xFF00) | (addr.wrapping_add(1) & 0x00FF);
        let hi = self.read(hi_addr) as u16;
        (hi << 8) | lo
    }

    #[inline]
    fn fetch_u8(&mut self) -> u8 {
        let v = self.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        v
    }

    #[inline]
    fn fetch_u16(&mut self) -> u16 {
        let lo = self.fetch_u8() as u16;
        let hi = self.fetch_u8() as u16;
        (hi << 8) | lo
    }

    #[inline]
    fn push_u8(&mut self, v: u8) {
        let addr = 0x0100 | self.sp as u16;
        self.write(addr, v);
        self.sp = self.sp.wrapping_sub(1);
    }

    #[inline]
    fn pop_u8(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        let addr = 0x0100 | self.sp as u16;
        self.read(addr)
    }

    fn push_u16(&mut self, v: u16) {
        self.push_u8((v >> 8) as u8);
        self.push_u8(v as u8);
    }

    fn pop_u16(&mut self) -> u16 {
        let lo = self.pop_u8() as u16;
        let hi = self.pop_u8() as u16;
        (hi << 8) | lo
    }

    #[inline]
    fn set_zero_and_negative(&mut self, v: u8) {
        self.p.zero = v == 0;
        self.p.negative = v & 0x80 != 0;
    }

    /// Resolve the effective address for `mode`, reporting whether indexing crossed a page.
    /// For relative mode the result is the branch target.
    fn operand_address(&mut self, mode: Mode) -> (u16, bool) {
        match mode {
            Mode::Implied | Mode::Accumulator => (0, false),
            Mode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                (addr, false)
            }
            Mode::ZeroPage => (self.fetch_u8() as u16, false),
            Mode::ZeroPageX => (self.fetch_u8().wrapping_add(self.x) as u16, false),
            Mode::ZeroPageY => (self.fetch_u8().wrapping_add(self.y) as u16, false),
            Mode::Absolute => (self.fetch_u16(), false),
            Mode::AbsoluteX => {
                let base = self.fetch_u16();
                let addr = base.wrapping_add(self.x as u16);
                (addr, pages_differ(base, addr))
            }
            Mode::AbsoluteY => {
                let base = self.fetch_u16();
                let addr = base.wrapping_add(self.y as u16);
                (addr, pages_differ(base, addr))
            }
            Mode::Relative => {
                let offset = self.fetch_u8() as i8;
                let target = self.pc.wrapping_add(offset as u16);
                (target, pages_differ(self.pc, target))
            }
            Mode::Indirect => {
                let ptr = self.fetch_u16();
                (self.read_indirect_u16_bug(ptr), false)
            }
            Mode::IndirectX => {
                let zp = self.fetch_u8().wrapping_add(self.x);
                (self.read_u16_zp(zp), false)
            }
            Mode::IndirectY => {
                let zp = self.fetch_u8();
                let base = self.read_u16_zp(zp);
                let addr = base.wrapping_add(self.y as u16);
                (addr, pages_differ(base, addr))
            }
        }
    }

    fn adc(&mut self, v: u8) {
        let sum = self.a as u16 + v as u16 + self.p.carry as u16;
        let result = sum as u8;
        self.p.carry = sum > 0xFF;
        self.p.overflow = (!(self.a ^ v) & (self.a ^ result) & 0x80) != 0;
        self.a = result;
        self.set_zero_and_negative(result);
    }

    fn compare(&mut self, reg: u8, v: u8) {
        self.p.carry = reg >= v;
        self.set_zero_and_negative(reg.wrapping_sub(v));
    }

    /// Returns the extra cycles a branch costs.
    fn branch(&mut self, taken: bool, target: u16, crossed: bool) -> u32 {
        if !taken {
            return 0;
        }
        self.pc = target;
        if crossed {
            2
        } else {
            1
        }
    }

    /// Read-modify-write on the accumulator or memory. Memory targets see the
    /// unmodified value written back first, as the hardware does.
    fn modify(&mut self, mode: Mode, addr: u16, f: fn(&mut Self, u8) -> u8) {
        if mode == Mode::Accumulator {
            let v = self.a;
            self.a = f(self, v);
        } else {
            let v = self.read(addr);
            self.write(addr, v);
            let r = f(self, v);
            self.write(addr, r);
        }
    }

    fn asl(&mut self, v: u8) -> u8 {
        self.p.carry = v & 0x80 != 0;
        let r = v << 1;
        self.set_zero_and_negative(r);
        r
    }

    fn lsr(&mut self, v: u8) -> u8 {
        self.p.carry = v & 0x01 != 0;
        let r = v >> 1;
        self.set_zero_and_negative(r);
        r
    }

    fn rol(&mut self, v: u8) -> u8 {
        let r = (v << 1) | self.p.carry as u8;
        self.p.carry = v & 0x80 != 0;
        self.set_zero_and_negative(r);
        r
    }

    fn ror(&mut self, v: u8) -> u8 {
        let r = (v >> 1) | ((self.p.carry as u8) << 7);
        self.p.carry = v & 0x01 != 0;
        self.set_zero_and_negative(r);
        r
    }

    fn inc(&mut self, v: u8) -> u8 {
        let r = v.wrapping_add(1);
        self.set_zero_and_negative(r);
        r
    }

    fn dec(&mut self, v: u8) -> u8 {
        let r = v.wrapping_sub(1);
        self.set_zero_and_negative(r);
        r
    }

    /// Service the highest-priority pending interrupt. Returns cycles used, 0 if none fired.
    fn service_interrupts(&mut self) -> u32 {
        if self.lines.reset {
            self.lines = InterruptLines {
                halt: self.lines.halt,
                ..InterruptLines::default()
            };
            // Reset performs the stack accesses as reads: SP drops by three, nothing is written.
            self.sp = self.sp.wrapping_sub(3);
            self.p.interrupt_disable = true;
            self.pc = self.read_u16(0xFFFC);
            log(LogCategory::Interrupts, LogLevel::Debug, || {
                format!("CPU: RESET -> {:04X}", self.pc)
            });
            return 7;
        }

        if self.lines.nmi {
            self.lines.nmi = false;
            self.enter_interrupt(0xFFFA);
            log(LogCategory::Interrupts, LogLevel::Trace, || {
                format!("CPU: NMI -> {:04X}", self.pc)
            });
            return 7;
        }

        if self.lines.irq {
            self.lines.irq = false;
            if self.p.interrupt_disable {
                return 0;
            }
            self.enter_interrupt(0xFFFE);
            log(LogCategory::Interrupts, LogLevel::Trace, || {
                format!("CPU: IRQ -> {:04X}", self.pc)
            });
            return 7;
        }

        0
    }

    fn enter_interrupt(&mut self, vector: u16) {
        self.push_u16(self.pc);
        let s = self.p.pushed(false);
        self.push_u8(s);
        self.p.interrupt_disable = true;
        self.pc = self.read_u16(vector);
    }

    fn finish(&mut self, cycles: u32) -> u32 {
        self.cycles = self.cycles.wrapping_add(cycles as u64);
        self.memory.tick(cycles, &mut self.lines);
        cycles
    }

    /// Execute one instruction (or burn halt debt, or enter an interrupt) and
    /// return the cycles consumed. A crashed CPU consumes nothing.
    pub fn step(&mut self) -> u32 {
        if self.crashed.is_some() {
            return 0;
        }

        if self.lines.halt > 0 {
            let burn = std::mem::take(&mut self.lines.halt);
            return self.finish(burn);
        }

        let irq_cycles = self.service_interrupts();
        if irq_cycles > 0 {
            return self.finish(irq_cycles);
        }

        let pc = self.pc;
        let opcode = self.fetch_u8();
        let Some(decoded) = decode(opcode) else {
            self.pc = pc;
            self.crashed = Some(CrashInfo { pc, opcode });
            log(LogCategory::CPU, LogLevel::Error, || {
                format!("CPU: illegal opcode {:02X} at {:04X}, halting", opcode, pc)
            });
            return 0;
        };

        let (addr, crossed) = self.operand_address(decoded.mode);
        let mut cycles = decoded.cycles as u32;
        if decoded.page_penalty && crossed {
            cycles += 1;
        }

        use Mnemonic::*;
        match decoded.op {
            Adc => {
                let v = self.read(addr);
                self.adc(v);
            }
            Sbc => {
                let v = self.read(addr);
                self.adc(!v);
            }
            And => {
                self.a &= self.read(addr);
                self.set_zero_and_negative(self.a);
            }
            Ora => {
                self.a |= self.read(addr);
                self.set_zero_and_negative(self.a);
            }
            Eor => {
                self.a ^= self.read(addr);
                self.set_zero_and_negative(self.a);
            }
            Cmp => {
                let v = self.read(addr);
                self.compare(self.a, v);
            }
            Cpx => {
                let v = self.read(addr);
                self.compare(self.x, v);
            }
            Cpy => {
                let v = self.read(addr);
                self.compare(self.y, v);
            }
            Bit => {
                let v = self.read(addr);
                self.p.zero = self.a & v == 0;
                self.p.overflow = v & 0x40 != 0;
                self.p.negative = v & 0x80 != 0;
            }
            Lda => {
                self.a = self.read(addr);
                self.set_zero_and_negative(self.a);
            }
            Ldx => {
                self.x = self.read(addr);
                self.set_zero_and_negative(self.x);
            }
            Ldy => {
                self.y = self.read(addr);
                self.set_zero_and_negative(self.y);
            }
            Sta => self.write(addr, self.a),
            Stx => self.write(addr, self.x),
            Sty => self.write(addr, self.y),

            Asl => self.modify(decoded.mode, addr, Self::asl),
            Lsr => self.modify(decoded.mode, addr, Self::lsr),
            Rol => self.modify(decoded.mode, addr, Self::rol),
            Ror => self.modify(decoded.mode, addr, Self::ror),
            Inc => self.modify(decoded.mode, addr, Self::inc),
            Dec => self.modify(decoded.mode, addr, Self::dec),

            Inx => {
                self.x = self.x.wrapping_add(1);
                self.set_zero_and_negative(self.x);
            }
            Iny => {
                self.y = self.y.wrapping_add(1);
                self.set_zero_and_negative(self.y);
            }
            Dex => {
                self.x = self.x.wrapping_sub(1);
                self.set_zero_and_negative(self.x);
            }
            Dey => {
                self.y = self.y.wrapping_sub(1);
                self.set_zero_and_negative(self.y);
            }

            Bcc => cycles += self.branch(!self.p.carry, addr, crossed),
            Bcs => cycles += self.branch(self.p.carry, addr, crossed),
            Beq => cycles += self.branch(self.p.zero, addr, crossed),
            Bne => cycles += self.branch(!self.p.zero, addr, crossed),
            Bmi => cycles += self.branch(self.p.negative, addr, crossed),
            Bpl => cycles += self.branch(!self.p.negative, addr, crossed),
            Bvs => cycles += self.branch(self.p.overflow, addr, crossed),
            Bvc => cycles += self.branch(!self.p.overflow, addr, crossed),

            Jmp => self.pc = addr,
            Jsr => {
                self.push_u16(self.pc.wrapping_sub(1));
                self.pc = addr;
            }
            Rts => self.pc = self.pop_u16().wrapping_add(1),
            Rti => {
                let s = self.pop_u8();
                self.p = StatusFlags::pulled(s);
                self.pc = self.pop_u16();
            }
            Brk => {
                self.push_u16(self.pc.wrapping_add(1));
                let s = self.p.pushed(true);
                self.push_u8(s);
                self.p.interrupt_disable = true;
                self.pc = self.read_u16(0xFFFE);
                log(LogCategory::CPU, LogLevel::Debug, || {
                    format!("CPU: BRK at {:04X} -> {:04X}", pc, self.pc)
                });
            }

            Pha => self.push_u8(self.a),
            Php => {
                let s = self.p.pushed(true);
                self.push_u8(s);
            }
            Pla => {
                self.a = self.pop_u8();
                self.set_zero_and_negative(self.a);
            }
            Plp => {
                let s = self.pop_u8();
                self.p = StatusFlags::pulled(s);
            }

            Tax => {
                self.x = self.a;
                self.set_zero_and_negative(self.x);
            }
            Tay => {
                self.y = self.a;
                self.set_zero_and_negative(self.y);
            }
            Txa => {
                self.a = self.x;
                self.set_zero_and_negative(self.a);
            }
            Tya => {
                self.a = self.y;
                self.set_zero_and_negative(self.a);
            }
            Tsx => {
                self.x = self.sp;
                self.set_zero_and_negative(self.x);
            }
            Txs => self.sp = self.x,

            Clc => self.p.carry = false,
            Sec => self.p.carry = true,
            Cli => self.p.interrupt_disable = false,
            Sei => self.p.interrupt_disable = true,
            Cld => self.p.decimal = false,
            Sed => self.p.decimal = true,
            Clv => self.p.overflow = false,
            Nop => {}
        }

        self.finish(cycles)
    }
}

impl<M: Memory6502> crate::Cpu for Cpu6502<M> {
    fn reset(&mut self) {
        Cpu6502::reset(self);
    }

    fn step(&mut self) -> u32 {
        Cpu6502::step(self)
    }
}

/// Flat 64KB memory, handy for tests and benchmarks.
#[derive(Debug)]
pub struct ArrayMemory {
    pub data: Box<[u8; 0x10000]>,
}

impl ArrayMemory {
    pub fn new() -> Self {
        Self {
            data: Box::new([0; 0x10000]),
        }
    }

    /// Copy `data` to `offset` and point the reset vector at it.
    pub fn load_program(&mut self, offset: u16, data: &[u8]) {
        for (i, b) in data.iter().enumerate() {
            self.data[(offset as usize + i) & 0xFFFF] = *b;
        }
        self.data[0xFFFC] = offset as u8;
        self.data[0xFFFD] = (offset >> 8) as u8;
    }
}

impl Default for ArrayMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory6502 for ArrayMemory {
    fn read(&mut self, addr: u16) -> u8 {
        self.data[addr as usize]
    }

    fn write(&mut self, addr: u16, val: u8) {
        self.data[addr as usize] = val;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_with(program: &[u8]) -> Cpu6502<ArrayMemory> {
        let mut cpu = Cpu6502::new(ArrayMemory::new());
        cpu.memory.load_program(0x8000, program);
        cpu.reset();
        cpu
    }

    /// Counts writes so tests can check nothing is stored after a crash.
    struct CountingMemory {
        inner: ArrayMemory,
        writes: usize,
        ticked: u32,
    }

    impl Memory6502 for CountingMemory {
        fn read(&mut self, addr: u16) -> u8 {
            self.inner.read(addr)
        }

        fn write(&mut self, addr: u16, val: u8) {
            self.writes += 1;
            self.inner.write(addr, val);
        }

        fn tick(&mut self, cycles: u32, _lines: &mut dyn IrqRequester) {
            self.ticked += cycles;
        }
    }

    #[test]
    fn lda_immediate_sets_a_and_flags() {
        let mut cpu = cpu_with(&[0xA9, 0x05, 0xEA]);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.a, 5);
        assert!(!cpu.p.zero);
        assert!(!cpu.p.negative);
        assert_eq!(cpu.step(), 2);
    }

    #[test]
    fn lda_zero_sets_zero_flag() {
        let mut cpu = cpu_with(&[0xA9, 0x00]);
        cpu.step();
        assert!(cpu.p.zero);
        assert_eq!(cpu.status() & FLAG_ZERO, FLAG_ZERO);
    }

    #[test]
    fn adc_signed_overflow() {
        // A=0x50, operand 0x50, carry clear
        let mut cpu = cpu_with(&[0x18, 0xA9, 0x50, 0x69, 0x50]);
        cpu.step();
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0xA0);
        assert!(!cpu.p.carry);
        assert!(cpu.p.overflow);
        assert!(cpu.p.negative);
        assert!(!cpu.p.zero);
    }

    #[test]
    fn adc_carry_out_and_sbc_borrow() {
        let mut cpu = cpu_with(&[0xA9, 0xFF, 0x69, 0x02, 0x38, 0xE9, 0x02]);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0x01);
        assert!(cpu.p.carry);
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0xFF);
        assert!(!cpu.p.carry);
        assert!(cpu.p.negative);
    }

    #[test]
    fn status_pack_unpack_round_trips_every_byte() {
        for v in 0..=255u8 {
            assert_eq!(StatusFlags::from_byte(v).to_byte(), v, "status {:02X}", v);
        }
    }

    #[test]
    fn status_flags_map_to_documented_bits() {
        let p = StatusFlags {
            carry: true,
            negative: true,
            ..StatusFlags::default()
        };
        assert_eq!(p.to_byte(), 0x81);
        let q = StatusFlags::from_byte(FLAG_ZERO | FLAG_OVERFLOW);
        assert!(q.zero && q.overflow && !q.carry && !q.negative);
    }

    #[test]
    fn reset_loads_vector_and_fixed_state() {
        let cpu = cpu_with(&[0xEA]);
        assert_eq!(cpu.pc, 0x8000);
        assert_eq!(cpu.sp, 0xFD);
        assert_eq!(cpu.status(), 0x24);
    }

    #[test]
    fn lda_absolute_x_page_cross_costs_one_cycle() {
        // LDX #$01 ; LDA $80FF,X ; LDA $8000,X
        let mut cpu = cpu_with(&[0xA2, 0x01, 0xBD, 0xFF, 0x80, 0xBD, 0x00, 0x80]);
        cpu.step();
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.step(), 4);
    }

    #[test]
    fn indirect_y_page_cross_costs_one_cycle() {
        let mut cpu = cpu_with(&[0xA0, 0x10, 0xB1, 0x20, 0xB1, 0x22]);
        cpu.memory.data[0x20] = 0xF8;
        cpu.memory.data[0x21] = 0x02;
        cpu.memory.data[0x22] = 0x00;
        cpu.memory.data[0x23] = 0x03;
        cpu.memory.data[0x0308] = 0x77;
        cpu.memory.data[0x0310] = 0x66;
        cpu.step();
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.a, 0x77);
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.a, 0x66);
    }

    /// Every opcode that pays for a page cross, with its base cycle count.
    const PAGE_PENALTY_OPCODES: [(u8, Mode, u32); 23] = [
        (0x7D, Mode::AbsoluteX, 4),
        (0x79, Mode::AbsoluteY, 4),
        (0x71, Mode::IndirectY, 5),
        (0x3D, Mode::AbsoluteX, 4),
        (0x39, Mode::AbsoluteY, 4),
        (0x31, Mode::IndirectY, 5),
        (0xDD, Mode::AbsoluteX, 4),
        (0xD9, Mode::AbsoluteY, 4),
        (0xD1, Mode::IndirectY, 5),
        (0x5D, Mode::AbsoluteX, 4),
        (0x59, Mode::AbsoluteY, 4),
        (0x51, Mode::IndirectY, 5),
        (0xBD, Mode::AbsoluteX, 4),
        (0xB9, Mode::AbsoluteY, 4),
        (0xB1, Mode::IndirectY, 5),
        (0xBE, Mode::AbsoluteY, 4),
        (0xBC, Mode::AbsoluteX, 4),
        (0x1D, Mode::AbsoluteX, 4),
        (0x19, Mode::AbsoluteY, 4),
        (0x11, Mode::IndirectY, 5),
        (0xFD, Mode::AbsoluteX, 4),
        (0xF9, Mode::AbsoluteY, 4),
        (0xF1, Mode::IndirectY, 5),
    ];

    #[test]
    fn page_penalty_table_matches_decoder() {
        let flagged: Vec<u8> = (0..=255u8)
            .filter(|&op| decode(op).map_or(false, |d| d.page_penalty))
            .collect();
        assert_eq!(flagged.len(), PAGE_PENALTY_OPCODES.len());
        for (op, mode, base) in PAGE_PENALTY_OPCODES {
            let d = decode(op).unwrap();
            assert!(d.page_penalty, "{:02X}", op);
            assert_eq!(d.mode, mode, "{:02X}", op);
            assert_eq!(d.cycles as u32, base, "{:02X}", op);
        }
    }

    #[test]
    fn every_page_penalty_opcode_adds_one_cycle_on_cross() {
        for (op, mode, base) in PAGE_PENALTY_OPCODES {
            // LDX #$10 ; LDY #$10 ; then the crossing form, then the same-page form
            let mut program = vec![0xA2, 0x10, 0xA0, 0x10];
            match mode {
                Mode::IndirectY => program.extend_from_slice(&[op, 0x20, op, 0x22]),
                _ => program.extend_from_slice(&[op, 0xF8, 0x80, op, 0x00, 0x80]),
            }
            let mut cpu = cpu_with(&program);
            // ($20) = $02F8 crosses with Y=$10, ($22) = $0300 does not
            cpu.memory.data[0x20] = 0xF8;
            cpu.memory.data[0x21] = 0x02;
            cpu.memory.data[0x22] = 0x00;
            cpu.memory.data[0x23] = 0x03;

            cpu.step();
            cpu.step();
            assert_eq!(cpu.step(), base + 1, "{:02X} {:?} crossing", op, mode);
            assert_eq!(cpu.step(), base, "{:02X} {:?} same page", op, mode);
        }
    }

    #[test]
    fn stores_never_take_page_penalty() {
        // LDX #$FF ; STA $80F0,X (crosses) ; STA $8000,X
        let mut cpu = cpu_with(&[0xA2, 0xFF, 0x9D, 0xF0, 0x02, 0x9D, 0x00, 0x02]);
        cpu.step();
        assert_eq!(cpu.step(), 5);
        assert_eq!(cpu.step(), 5);
    }

    #[test]
    fn branch_cycle_accounting() {
        // BNE not taken (Z set by LDA #0), then BEQ taken same page
        let mut cpu = cpu_with(&[0xA9, 0x00, 0xD0, 0x02, 0xF0, 0x00]);
        cpu.step();
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.step(), 3);
        assert_eq!(cpu.pc, 0x8006);
    }

    #[test]
    fn branch_taken_across_page_costs_two_extra() {
        let mut cpu = Cpu6502::new(ArrayMemory::new());
        // BEQ +4 placed so the target lands on the next page
        cpu.memory.load_program(0x80FA, &[0xA9, 0x00, 0xF0, 0x04]);
        cpu.reset();
        cpu.step();
        assert_eq!(cpu.step(), 4);
        assert_eq!(cpu.pc, 0x8102);
    }

    #[test]
    fn pha_pla_roundtrip() {
        let mut cpu = cpu_with(&[0xA9, 0x42, 0x48, 0xA9, 0x00, 0x68]);
        for _ in 0..4 {
            cpu.step();
        }
        assert_eq!(cpu.a, 0x42);
        assert_eq!(cpu.sp, 0xFD);
    }

    #[test]
    fn jsr_rts_returns() {
        let mut cpu = cpu_with(&[0x20, 0x10, 0x80, 0xEA]);
        cpu.memory.data[0x8010] = 0x60;
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.pc, 0x8010);
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.pc, 0x8003);
    }

    #[test]
    fn jmp_indirect_page_wrap_bug() {
        let mut cpu = cpu_with(&[0x6C, 0xFF, 0x02]);
        cpu.memory.data[0x02FF] = 0x34;
        cpu.memory.data[0x0200] = 0x12;
        cpu.memory.data[0x0300] = 0x99;
        cpu.step();
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn rotate_through_carry() {
        // SEC ; LDA #$80 ; ROL A ; ROR A
        let mut cpu = cpu_with(&[0x38, 0xA9, 0x80, 0x2A, 0x6A]);
        cpu.step();
        cpu.step();
        cpu.step();
        assert_eq!(cpu.a, 0x01);
        assert!(cpu.p.carry);
        cpu.step();
        assert_eq!(cpu.a, 0x80);
        assert!(cpu.p.carry);
    }

    #[test]
    fn inc_memory_zero_page_x() {
        let mut cpu = cpu_with(&[0xA2, 0x04, 0xF6, 0x10]);
        cpu.memory.data[0x14] = 0xFF;
        cpu.step();
        assert_eq!(cpu.step(), 6);
        assert_eq!(cpu.memory.data[0x14], 0x00);
        assert!(cpu.p.zero);
    }

    #[test]
    fn cmp_sets_carry_when_greater_or_equal() {
        let mut cpu = cpu_with(&[0xA9, 0x40, 0xC9, 0x40, 0xC9, 0x41]);
        cpu.step();
        cpu.step();
        assert!(cpu.p.carry && cpu.p.zero);
        cpu.step();
        assert!(!cpu.p.carry && cpu.p.negative);
    }

    #[test]
    fn brk_pushes_break_and_rti_restores() {
        let mut cpu = cpu_with(&[0x00, 0xEA, 0xEA]);
        cpu.memory.data[0xFFFE] = 0x00;
        cpu.memory.data[0xFFFF] = 0x90;
        cpu.memory.data[0x9000] = 0x40; // RTI
        assert_eq!(cpu.step(), 7);
        assert_eq!(cpu.pc, 0x9000);
        let pushed = cpu.memory.data[0x0100 | cpu.sp.wrapping_add(1) as usize];
        assert_eq!(pushed & FLAG_BREAK, FLAG_BREAK);
        assert!(cpu.p.interrupt_disable);
        cpu.step();
        assert_eq!(cpu.pc, 0x8002);
    }

    #[test]
    fn nmi_fires_even_with_interrupts_disabled() {
        let mut cpu = cpu_with(&[0x78, 0xEA]);
        cpu.memory.data[0xFFFA] = 0x00;
        cpu.memory.data[0xFFFB] = 0xA0;
        cpu.step();
        cpu.request_irq(InterruptKind::NonMaskable);
        assert_eq!(cpu.step(), 7);
        assert_eq!(cpu.pc, 0xA000);
        let pushed = cpu.memory.data[0x0100 | cpu.sp.wrapping_add(1) as usize];
        assert_eq!(pushed & FLAG_BREAK, 0);
        assert_eq!(pushed & FLAG_UNUSED, FLAG_UNUSED);
    }

    #[test]
    fn masked_irq_is_dropped_not_queued() {
        let mut cpu = cpu_with(&[0x78, 0xEA, 0x58, 0xEA, 0xEA]);
        cpu.memory.data[0xFFFE] = 0x00;
        cpu.memory.data[0xFFFF] = 0xB0;
        cpu.step(); // SEI
        cpu.request_irq(InterruptKind::Normal);
        assert_eq!(cpu.step(), 2); // dropped, NOP runs
        assert_eq!(cpu.pc, 0x8002);
        cpu.step(); // CLI
        cpu.step();
        assert_eq!(cpu.pc, 0x8004, "dropped IRQ must not fire later");
    }

    #[test]
    fn irq_taken_when_enabled() {
        let mut cpu = cpu_with(&[0x58, 0xEA]);
        cpu.memory.data[0xFFFE] = 0x00;
        cpu.memory.data[0xFFFF] = 0xB0;
        cpu.step();
        cpu.request_irq(InterruptKind::Normal);
        assert_eq!(cpu.step(), 7);
        assert_eq!(cpu.pc, 0xB000);
        assert!(cpu.p.interrupt_disable);
    }

    #[test]
    fn reset_request_jumps_to_reset_vector() {
        let mut cpu = cpu_with(&[0xEA, 0xEA]);
        cpu.step();
        cpu.request_irq(InterruptKind::Reset);
        assert_eq!(cpu.step(), 7);
        assert_eq!(cpu.pc, 0x8000);
        assert_eq!(cpu.sp, 0xFA);
    }

    #[test]
    fn halt_cycles_are_burned_before_fetch() {
        let mut cpu = cpu_with(&[0xEA]);
        cpu.halt_cycles(513);
        assert_eq!(cpu.step(), 513);
        assert_eq!(cpu.pc, 0x8000);
        assert_eq!(cpu.step(), 2);
        assert_eq!(cpu.pc, 0x8001);
    }

    #[test]
    fn illegal_opcode_latches_crash() {
        let mut inner = ArrayMemory::new();
        // STA $10 ; illegal $02 ; STA $11
        inner.load_program(0x8000, &[0xA9, 0x01, 0x85, 0x10, 0x02, 0x85, 0x11]);
        let mut cpu = Cpu6502::new(CountingMemory {
            inner,
            writes: 0,
            ticked: 0,
        });
        cpu.reset();
        cpu.step();
        cpu.step();
        assert_eq!(cpu.memory.writes, 1);
        assert_eq!(cpu.step(), 0);
        assert_eq!(
            cpu.crash_info(),
            Some(CrashInfo {
                pc: 0x8004,
                opcode: 0x02
            })
        );
        for _ in 0..10 {
            assert_eq!(cpu.step(), 0);
        }
        assert_eq!(cpu.memory.writes, 1);
        assert_eq!(cpu.memory.inner.data[0x11], 0);
    }

    #[test]
    fn every_instruction_ticks_memory() {
        let mut inner = ArrayMemory::new();
        inner.load_program(0x8000, &[0xEA, 0xA9, 0x01, 0x8D, 0x00, 0x02]);
        let mut cpu = Cpu6502::new(CountingMemory {
            inner,
            writes: 0,
            ticked: 0,
        });
        cpu.reset();
        let total: u32 = (0..3).map(|_| cpu.step()).sum();
        assert_eq!(total, 8);
        assert_eq!(cpu.memory.ticked, 8);
        assert_eq!(cpu.cycles, 8);
    }

    #[test]
    fn snapshot_restore_round_trip() {
        let mut cpu = cpu_with(&[0xA9, 0x33, 0xA2, 0x44, 0x38]);
        cpu.step();
        cpu.step();
        cpu.step();
        cpu.request_irq(InterruptKind::Normal);
        cpu.halt_cycles(4);
        let snap = cpu.snapshot();

        let mut other = cpu_with(&[0xEA]);
        other.restore(&snap);
        assert_eq!(other.snapshot(), snap);
        assert_eq!(other.a, 0x33);
        assert_eq!(other.x, 0x44);
        assert!(other.p.carry);
        assert_eq!(other.pending_halt(), 4);
    }

    #[test]
    fn full_documented_opcode_count() {
        let count = (0..=255u8).filter(|&op| decode(op).is_some()).count();
        assert_eq!(count, 151);
    }

    #[test]
    fn drives_through_cpu_trait() {
        let mut cpu = cpu_with(&[0xEA, 0xE8]);
        let pc = cpu.pc;
        let core: &mut dyn crate::Cpu = &mut cpu;
        assert_eq!(core.step(), 2);
        assert_eq!(core.step(), 2);
        core.reset();
        assert_eq!(cpu.pc, pc);
        assert_eq!(cpu.x, 0);
    }
}
