//! NES APU (Audio Processing Unit).
//!
//! Wires the channel units from `emu_core::apu` to the $4000-$4017 register block and
//! clocks them once per CPU cycle:
//!
//! - **Pulse 1/2** ($4000-$4007): timers run every other CPU cycle
//! - **Triangle** ($4008-$400B), **Noise** ($400C-$400F): every CPU cycle
//! - **DMC** ($4010-$4013): every CPU cycle; its memory reader fetches sample bytes
//!   through a [`Sampler`] and stalls the CPU for each fetch
//! - **$4015**: channel enables (write), length/IRQ status (read, clears frame IRQ)
//! - **$4017**: frame sequencer mode and IRQ inhibit
//!
//! ## Audio output
//!
//! Channel levels are summed every cycle. Once per output sample period
//! (CPU clock / sample rate) the averages go through the non-linear mixer and the
//! DC blocker and the result is appended to a bounded buffer. The buffer is drained
//! into an [`AudioSink`] with [`Apu::flush`]; samples that do not fit are dropped.

use crate::mappers::Mapper;
use crate::sinks::AudioSink;
use emu_core::apu::{
    ChannelLevels, DmcChannel, FrameCounter, FrameTick, Mixer, NoiseChannel, PulseChannel,
    TimingMode, TriangleChannel, DMC_FETCH_STALL,
};
use emu_core::cpu_6502::{InterruptKind, IrqRequester};
use emu_core::logging::{log, LogCategory, LogLevel};
use serde::{Deserialize, Serialize};

/// Memory access for the DMC's sample reader.
pub trait Sampler {
    fn sample_read(&mut self, addr: u16) -> u8;
}

impl<T: Mapper + ?Sized> Sampler for T {
    fn sample_read(&mut self, addr: u16) -> u8 {
        self.load(addr)
    }
}

/// Channel and sequencer state carried in save states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApuState {
    pub pulse1: PulseChannel,
    pub pulse2: PulseChannel,
    pub triangle: TriangleChannel,
    pub noise: NoiseChannel,
    pub dmc: DmcChannel,
    pub frame_counter: FrameCounter,
    pub odd_cycle: bool,
    pub mixer: Mixer,
    pub sample_clock: f64,
    /// Levels summed since the last output sample
    pub level_sum: ChannelLevels,
    pub level_cycles: u32,
}

#[derive(Debug)]
pub struct Apu {
    timing: TimingMode,
    pulse1: PulseChannel,
    pulse2: PulseChannel,
    triangle: TriangleChannel,
    noise: NoiseChannel,
    dmc: DmcChannel,
    frame_counter: FrameCounter,
    odd_cycle: bool,

    mixer: Mixer,
    sample_rate: u32,
    cycles_per_sample: f64,
    sample_clock: f64,
    level_sum: ChannelLevels,
    level_cycles: u32,
    buffer: Vec<i16>,
    capacity: usize,
    dropped: u64,
    sound_enabled: bool,
}

pub const DEFAULT_BUFFER_LEN: usize = 8192;

impl Apu {
    pub fn new(timing: TimingMode, sample_rate: u32, stereo: bool) -> Self {
        Self::with_capacity(timing, sample_rate, stereo, DEFAULT_BUFFER_LEN)
    }

    pub fn with_capacity(timing: TimingMode, sample_rate: u32, stereo: bool, capacity: usize) -> Self {
        let sample_rate = sample_rate.max(1);
        Self {
            timing,
            pulse1: PulseChannel::new(true),
            pulse2: PulseChannel::new(false),
            triangle: TriangleChannel::new(),
            noise: NoiseChannel::new(timing),
            dmc: DmcChannel::new(timing),
            frame_counter: FrameCounter::new(timing),
            odd_cycle: false,
            mixer: Mixer::new(stereo),
            sample_rate,
            cycles_per_sample: timing.cpu_clock_hz() / sample_rate as f64,
            sample_clock: 0.0,
            level_sum: ChannelLevels::default(),
            level_cycles: 0,
            buffer: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
            sound_enabled: true,
        }
    }

    /// Power-on state for the channels; output settings and buffered samples are kept.
    pub fn reset(&mut self) {
        self.pulse1 = PulseChannel::new(true);
        self.pulse2 = PulseChannel::new(false);
        self.triangle = TriangleChannel::new();
        self.noise = NoiseChannel::new(self.timing);
        self.dmc = DmcChannel::new(self.timing);
        self.frame_counter = FrameCounter::new(self.timing);
        self.odd_cycle = false;
        self.sample_clock = 0.0;
        self.level_sum = ChannelLevels::default();
        self.level_cycles = 0;
    }

    pub fn timing(&self) -> TimingMode {
        self.timing
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.mixer.channels()
    }

    pub fn set_sound_enabled(&mut self, enabled: bool) {
        if self.sound_enabled != enabled {
            log(LogCategory::APU, LogLevel::Info, || {
                format!("APU: sound {}", if enabled { "enabled" } else { "disabled" })
            });
        }
        self.sound_enabled = enabled;
        if !enabled {
            self.buffer.clear();
        }
    }

    pub fn is_sound_enabled(&self) -> bool {
        self.sound_enabled
    }

    pub fn frame_counter(&self) -> &FrameCounter {
        &self.frame_counter
    }

    pub fn pulse1(&self) -> &PulseChannel {
        &self.pulse1
    }

    pub fn pulse2(&self) -> &PulseChannel {
        &self.pulse2
    }

    pub fn triangle(&self) -> &TriangleChannel {
        &self.triangle
    }

    pub fn noise(&self) -> &NoiseChannel {
        &self.noise
    }

    pub fn dmc(&self) -> &DmcChannel {
        &self.dmc
    }

    /// Frame or DMC interrupt is asserted.
    pub fn irq_pending(&self) -> bool {
        self.frame_counter.is_irq_pending() || self.dmc.is_irq_pending()
    }

    /// Samples waiting for [`Apu::flush`].
    pub fn samples(&self) -> &[i16] {
        &self.buffer
    }

    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }

    pub fn write_register(&mut self, addr: u16, val: u8) {
        match addr {
            0x4000..=0x4003 => self.pulse1.write_register(addr & 3, val),
            0x4004..=0x4007 => self.pulse2.write_register(addr & 3, val),
            0x4008..=0x400B => self.triangle.write_register(addr & 3, val),
            0x400C..=0x400F => self.noise.write_register(addr & 3, val),
            0x4010..=0x4013 => self.dmc.write_register(addr & 3, val),
            0x4015 => {
                self.pulse1.length.set_enabled(val & 0x01 != 0);
                self.pulse2.length.set_enabled(val & 0x02 != 0);
                self.triangle.length.set_enabled(val & 0x04 != 0);
                self.noise.length.set_enabled(val & 0x08 != 0);
                self.dmc.set_enabled(val & 0x10 != 0);
            }
            0x4017 => {
                let tick = self.frame_counter.write_control(val);
                self.apply_frame_tick(tick);
            }
            _ => {}
        }
    }

    /// $4015 read. Clears the frame interrupt.
    pub fn read_status(&mut self) -> u8 {
        let mut status = 0u8;
        if self.pulse1.length.is_active() {
            status |= 0x01;
        }
        if self.pulse2.length.is_active() {
            status |= 0x02;
        }
        if self.triangle.length.is_active() {
            status |= 0x04;
        }
        if self.noise.length.is_active() {
            status |= 0x08;
        }
        if self.dmc.is_active() {
            status |= 0x10;
        }
        if self.frame_counter.is_irq_pending() {
            status |= 0x40;
        }
        if self.dmc.is_irq_pending() {
            status |= 0x80;
        }
        self.frame_counter.clear_irq();
        status
    }

    fn apply_frame_tick(&mut self, tick: FrameTick) {
        if tick.quarter {
            self.pulse1.clock_quarter();
            self.pulse2.clock_quarter();
            self.triangle.clock_quarter();
            self.noise.clock_quarter();
        }
        if tick.half {
            self.pulse1.clock_half();
            self.pulse2.clock_half();
            self.triangle.clock_half();
            self.noise.clock_half();
        }
    }

    /// Advance `cycles` CPU cycles. DMC fetches read through `sampler` and add
    /// stall cycles to `lines`; a pending frame or DMC interrupt is requested on
    /// `lines` after the run.
    pub fn clock<S: Sampler + ?Sized>(
        &mut self,
        cycles: u32,
        sampler: &mut S,
        lines: &mut dyn IrqRequester,
    ) {
        for _ in 0..cycles {
            let tick = self.frame_counter.clock();
            self.apply_frame_tick(tick);

            self.triangle.clock_timer();
            self.noise.clock_timer();
            if let Some(addr) = self.dmc.pending_fetch() {
                let byte = sampler.sample_read(addr);
                self.dmc.fill(byte);
                lines.halt_cycles(DMC_FETCH_STALL);
            }
            self.dmc.clock_timer();
            if self.odd_cycle {
                self.pulse1.clock_timer();
                self.pulse2.clock_timer();
            }
            self.odd_cycle = !self.odd_cycle;

            if self.sound_enabled {
                self.accumulate();
            }
        }

        if self.irq_pending() {
            lines.request_irq(InterruptKind::Normal);
        }
    }

    fn accumulate(&mut self) {
        self.level_sum.pulse1 += self.pulse1.output() as f32;
        self.level_sum.pulse2 += self.pulse2.output() as f32;
        self.level_sum.triangle += self.triangle.output() as f32;
        self.level_sum.noise += self.noise.output() as f32;
        self.level_sum.dmc += self.dmc.output() as f32;
        self.level_cycles += 1;

        self.sample_clock += 1.0;
        if self.sample_clock < self.cycles_per_sample {
            return;
        }
        self.sample_clock -= self.cycles_per_sample;

        let n = self.level_cycles as f32;
        let average = ChannelLevels {
            pulse1: self.level_sum.pulse1 / n,
            pulse2: self.level_sum.pulse2 / n,
            triangle: self.level_sum.triangle / n,
            noise: self.level_sum.noise / n,
            dmc: self.level_sum.dmc / n,
        };
        self.level_sum = ChannelLevels::default();
        self.level_cycles = 0;

        let before = self.buffer.len();
        self.mixer.mix_into(&average, &mut self.buffer);
        if self.buffer.len() > self.capacity {
            self.dropped += (self.buffer.len() - before) as u64;
            self.buffer.truncate(before);
        }
    }

    /// Hand buffered samples to `sink` and empty the buffer.
    pub fn flush(&mut self, sink: &mut dyn AudioSink) {
        if self.buffer.is_empty() {
            return;
        }
        sink.write_samples(&self.buffer);
        self.buffer.clear();
    }

    /// Throw buffered samples away when nobody is listening.
    pub fn discard_samples(&mut self) {
        self.buffer.clear();
    }

    pub fn snapshot(&self) -> ApuState {
        ApuState {
            pulse1: self.pulse1.clone(),
            pulse2: self.pulse2.clone(),
            triangle: self.triangle.clone(),
            noise: self.noise.clone(),
            dmc: self.dmc.clone(),
            frame_counter: self.frame_counter.clone(),
            odd_cycle: self.odd_cycle,
            mixer: self.mixer.clone(),
            sample_clock: self.sample_clock,
            level_sum: self.level_sum,
            level_cycles: self.level_cycles,
        }
    }

    pub fn restore(&mut self, state: &ApuState) {
        self.pulse1 = state.pulse1.clone();
        self.pulse2 = state.pulse2.clone();
        self.triangle = state.triangle.clone();
        self.noise = state.noise.clone();
        self.dmc = state.dmc.clone();
        self.frame_counter = state.frame_counter.clone();
        self.odd_cycle = state.odd_cycle;
        self.mixer = state.mixer.clone();
        self.sample_clock = state.sample_clock;
        self.level_sum = state.level_sum;
        self.level_cycles = state.level_cycles;
        self.buffer.clear();
    }
}
