//! NES/Famicom console built on the `emu_core` components.
//!
//! [`NesSystem`] owns the whole machine: a [`Cpu6502`] whose memory is the
//! [`NesBus`], which in turn owns the PPU, APU, cartridge mapper and joypads. The
//! CPU is the only clock. After each instruction the bus advances the other devices
//! by the cycles used and hands interrupts and DMA stalls back to the CPU, so the
//! whole console steps deterministically on one thread.
//!
//! [`Emulator`] wraps a `NesSystem` with the command surface a front end uses and
//! runs it on a worker thread.

pub mod apu;
pub mod bus;
pub mod cartridge;
pub mod config;
pub mod emulator;
pub mod joypad;
pub mod mappers;
pub mod ppu;
pub mod sinks;
pub mod state;

pub use apu::{Apu, ApuState, Sampler};
pub use bus::NesBus;
pub use cartridge::{Cartridge, Mirroring, RomError, RomHeader};
pub use config::{ConfigError, EmulatorConfig};
pub use emulator::Emulator;
pub use joypad::{Button, Joypad};
pub use mappers::{create_mapper, Mapper, MapperState, Nrom, PatternMemory};
pub use ppu::{Ppu, PpuState};
pub use sinks::{
    AudioRingSink, AudioSink, CollectingErrorSink, DisplaySink, ErrorSink, FrameBufferSink,
    InputSource, LogErrorSink, NoInput, ScaleMode, SharedInput, SCREEN_HEIGHT, SCREEN_WIDTH,
};
pub use state::{SaveState, StateError, STATE_VERSION};

use emu_core::cpu_6502::{CrashInfo, Cpu6502};
use emu_core::logging::{log, LogCategory, LogLevel};
use emu_core::types::Frame;
use emu_core::{MountPointInfo, System};
use serde::de::Error as _;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

pub const CARTRIDGE_SLOT: &str = "Cartridge";

#[derive(Debug, Error)]
pub enum NesError {
    #[error(transparent)]
    Rom(#[from] RomError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("no cartridge inserted")]
    NoCartridge,
    #[error("CPU crashed: illegal opcode ${opcode:02X} at ${pc:04X}")]
    Crashed { pc: u16, opcode: u8 },
    #[error("unknown mount point: {0}")]
    InvalidMountPoint(String),
    #[error("emulation worker failed: {0}")]
    Worker(String),
}

impl From<CrashInfo> for NesError {
    fn from(info: CrashInfo) -> Self {
        NesError::Crashed {
            pc: info.pc,
            opcode: info.opcode,
        }
    }
}

pub struct NesSystem {
    cpu: Cpu6502<NesBus>,
    config: EmulatorConfig,
    display: Option<Box<dyn DisplaySink>>,
    audio: Option<Box<dyn AudioSink>>,
    errors: Arc<dyn ErrorSink>,
    cartridge: Option<RomHeader>,
    frames: u64,
    crash_reported: bool,
}

impl fmt::Debug for NesSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NesSystem")
            .field("pc", &self.cpu.pc)
            .field("cycles", &self.cpu.cycles)
            .field("cartridge", &self.cartridge)
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}

impl Default for NesSystem {
    fn default() -> Self {
        Self::new(EmulatorConfig::default())
    }
}

impl NesSystem {
    pub fn new(config: EmulatorConfig) -> Self {
        let timing = config.timing;
        let mut ppu = Ppu::new(timing);
        ppu.set_emphasis_enabled(config.emphasis);
        ppu.set_sprite_limit(config.sprite_limit);
        let mut apu = Apu::with_capacity(
            timing,
            config.sample_rate,
            config.stereo,
            config.audio_buffer_len,
        );
        apu.set_sound_enabled(config.sound_enabled);

        let mut cpu = Cpu6502::new(NesBus::new(timing, ppu, apu));
        cpu.reset();
        Self {
            cpu,
            config,
            display: None,
            audio: None,
            errors: Arc::new(LogErrorSink),
            cartridge: None,
            frames: 0,
            crash_reported: false,
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn cpu(&self) -> &Cpu6502<NesBus> {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut Cpu6502<NesBus> {
        &mut self.cpu
    }

    pub fn bus(&self) -> &NesBus {
        &self.cpu.memory
    }

    pub fn bus_mut(&mut self) -> &mut NesBus {
        &mut self.cpu.memory
    }

    pub fn cartridge(&self) -> Option<&RomHeader> {
        self.cartridge.as_ref()
    }

    /// Frames completed since power-on.
    pub fn frame_count(&self) -> u64 {
        self.frames
    }

    pub fn set_display(&mut self, display: Box<dyn DisplaySink>) {
        self.display = Some(display);
    }

    pub fn set_audio(&mut self, audio: Box<dyn AudioSink>) {
        let apu = &self.cpu.memory.apu;
        if audio.sample_rate() != apu.sample_rate() || audio.channels() != apu.channels() {
            let message = format!(
                "audio sink expects {} Hz x{}, console produces {} Hz x{}",
                audio.sample_rate(),
                audio.channels(),
                apu.sample_rate(),
                apu.channels()
            );
            self.errors.report(LogLevel::Warn, &message);
        }
        self.audio = Some(audio);
    }

    /// Detach the audio sink; samples are discarded from then on.
    pub fn clear_audio(&mut self) {
        self.audio = None;
    }

    pub fn set_input(&mut self, input: Box<dyn InputSource>) {
        self.cpu.memory.set_input(input);
    }

    pub fn set_error_sink(&mut self, errors: Arc<dyn ErrorSink>) {
        self.errors = errors;
    }

    pub fn error_sink(&self) -> Arc<dyn ErrorSink> {
        Arc::clone(&self.errors)
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        self.config.sound_enabled = enabled;
        self.cpu.memory.apu.set_sound_enabled(enabled);
    }

    pub fn is_crashed(&self) -> bool {
        self.cpu.is_crashed()
    }

    pub fn crash_info(&self) -> Option<CrashInfo> {
        self.cpu.crash_info()
    }

    // ---------------------------------------------------------------------
    // Cartridge
    // ---------------------------------------------------------------------

    /// Parse an iNES image and insert it. Failures are also sent to the error sink.
    pub fn load_rom_bytes(&mut self, data: &[u8]) -> Result<(), NesError> {
        let cart = Cartridge::from_bytes(data).map_err(|e| self.report_rom_error(e))?;
        self.insert(cart);
        Ok(())
    }

    pub fn load_rom_file<P: AsRef<Path>>(&mut self, path: P) -> Result<(), NesError> {
        let path = path.as_ref();
        let cart = Cartridge::from_file(path).map_err(|e| self.report_rom_error(e))?;
        log(LogCategory::System, LogLevel::Info, || {
            format!("System: loaded {}", path.display())
        });
        self.insert(cart);
        Ok(())
    }

    fn report_rom_error(&self, e: RomError) -> NesError {
        self.errors
            .report(LogLevel::Error, &format!("failed to load ROM: {}", e));
        NesError::Rom(e)
    }

    fn insert(&mut self, cart: Cartridge) {
        let header = cart.header;
        let mapper = create_mapper(cart, self.errors.as_ref());
        self.cpu.memory.insert_mapper(mapper);
        self.cartridge = Some(header);
        self.reset();
        log(LogCategory::System, LogLevel::Info, || {
            format!(
                "System: cartridge {} PRG x16K, {} CHR x4K, mapper {}, {:?} mirroring",
                header.prg_banks, header.chr_banks, header.mapper, header.mirroring
            )
        });
    }

    pub fn eject(&mut self) {
        self.cpu.memory.insert_mapper(Box::new(Nrom::empty()));
        self.cartridge = None;
        self.reset();
    }

    // ---------------------------------------------------------------------
    // Execution
    // ---------------------------------------------------------------------

    pub fn reset(&mut self) {
        self.cpu.memory.reset();
        self.cpu.reset();
        self.crash_reported = false;
        log(LogCategory::System, LogLevel::Debug, || {
            format!("System: reset, PC=${:04X}", self.cpu.pc)
        });
    }

    /// Run one instruction (or interrupt entry, or DMA stall). Returns `true` when
    /// the PPU finished a frame during it.
    pub fn step_instruction(&mut self) -> Result<bool, NesError> {
        if self.cartridge.is_none() {
            return Err(NesError::NoCartridge);
        }
        if let Some(info) = self.cpu.crash_info() {
            return Err(info.into());
        }

        self.cpu.step();

        if let Some(info) = self.cpu.crash_info() {
            if !self.crash_reported {
                self.crash_reported = true;
                self.errors.report(
                    LogLevel::Error,
                    &format!(
                        "illegal opcode ${:02X} at ${:04X}, emulation stopped",
                        info.opcode, info.pc
                    ),
                );
            }
            return Err(info.into());
        }

        if self.cpu.memory.ppu.take_frame_complete() {
            self.present_frame();
            return Ok(true);
        }
        Ok(false)
    }

    /// Run until the PPU completes a frame.
    pub fn run_frame(&mut self) -> Result<(), NesError> {
        while !self.step_instruction()? {}
        Ok(())
    }

    fn present_frame(&mut self) {
        self.frames += 1;
        let bus = &mut self.cpu.memory;
        if let Some(display) = self.display.as_mut() {
            let pixels = bus.ppu.pixels();
            let buffer = display.buffer_mut();
            let n = buffer.len().min(pixels.len());
            buffer[..n].copy_from_slice(&pixels[..n]);
            display.frame_ready(false);
        }
        match self.audio.as_mut() {
            Some(audio) => bus.apu.flush(audio.as_mut()),
            None => bus.apu.discard_samples(),
        }
    }

    /// Copy of the current framebuffer.
    pub fn frame(&self) -> Frame {
        Frame::from_pixels(
            SCREEN_WIDTH as u32,
            SCREEN_HEIGHT as u32,
            self.cpu.memory.ppu.pixels(),
        )
    }

    // ---------------------------------------------------------------------
    // Save states
    // ---------------------------------------------------------------------

    pub fn snapshot(&self) -> SaveState {
        let bus = &self.cpu.memory;
        SaveState {
            version: STATE_VERSION,
            ram: bus.ram().to_vec(),
            vram: bus.ppu.vram().to_vec(),
            oam: bus.ppu.oam().to_vec(),
            cpu: self.cpu.snapshot(),
            mapper: bus.mapper().save_state(),
            ppu: bus.ppu.snapshot(),
            apu: bus.apu.snapshot(),
            joypads: *bus.joypads(),
        }
    }

    /// Apply a decoded state. The mapper is checked first so a state from another
    /// board leaves the console untouched.
    pub fn restore(&mut self, state: &SaveState) -> Result<(), NesError> {
        let bus = &mut self.cpu.memory;
        bus.mapper_mut().load_state(&state.mapper)?;
        bus.load_ram(&state.ram);
        bus.ppu.restore(&state.ppu, &state.vram, &state.oam);
        bus.apu.restore(&state.apu);
        bus.set_joypads(state.joypads);
        bus.set_cycles(state.cpu.cycles);
        self.cpu.restore(&state.cpu);
        self.crash_reported = state.cpu.crashed.is_some();
        Ok(())
    }

    pub fn save_state_bytes(&self) -> Result<Vec<u8>, NesError> {
        Ok(self.snapshot().to_bytes()?)
    }

    pub fn load_state_bytes(&mut self, bytes: &[u8]) -> Result<(), NesError> {
        let state = SaveState::from_bytes(bytes)?;
        self.restore(&state)
    }
}

impl System for NesSystem {
    type Error = NesError;

    fn reset(&mut self) {
        NesSystem::reset(self);
    }

    fn step_frame(&mut self) -> Result<Frame, Self::Error> {
        self.run_frame()?;
        Ok(self.frame())
    }

    fn save_state(&self) -> serde_json::Value {
        match self.snapshot().to_value() {
            Ok(value) => value,
            Err(e) => {
                log(LogCategory::System, LogLevel::Error, || {
                    format!("System: cannot encode state: {}", e)
                });
                serde_json::Value::Null
            }
        }
    }

    fn load_state(&mut self, v: &serde_json::Value) -> Result<(), serde_json::Error> {
        let state = SaveState::from_value(v.clone())
            .map_err(|e| serde_json::Error::custom(e.to_string()))?;
        self.restore(&state)
            .map_err(|e| serde_json::Error::custom(e.to_string()))
    }

    fn supports_save_states(&self) -> bool {
        true
    }

    fn mount_points(&self) -> Vec<MountPointInfo> {
        vec![MountPointInfo {
            id: CARTRIDGE_SLOT.to_string(),
            name: "Cartridge Slot".to_string(),
            extensions: vec!["nes".to_string()],
            required: true,
        }]
    }

    fn mount(&mut self, mount_point_id: &str, data: &[u8]) -> Result<(), Self::Error> {
        if mount_point_id != CARTRIDGE_SLOT {
            return Err(NesError::InvalidMountPoint(mount_point_id.to_string()));
        }
        self.load_rom_bytes(data)
    }

    fn unmount(&mut self, mount_point_id: &str) -> Result<(), Self::Error> {
        if mount_point_id != CARTRIDGE_SLOT {
            return Err(NesError::InvalidMountPoint(mount_point_id.to_string()));
        }
        self.eject();
        Ok(())
    }

    fn is_mounted(&self, mount_point_id: &str) -> bool {
        mount_point_id == CARTRIDGE_SLOT && self.cartridge.is_some()
    }
}
