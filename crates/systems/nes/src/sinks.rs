//! Interfaces to the world outside the console, plus thread-safe implementations a
//! front end can hand to the emulator and keep a clone of.
//!
//! The console never talks to a window, an audio device or a keyboard directly.
//! It writes finished frames into a [`DisplaySink`], flushes samples into an
//! [`AudioSink`], polls buttons from an [`InputSource`] and reports problems to an
//! [`ErrorSink`]. Every trait is `Send` so the whole console can move onto the
//! emulation worker thread.

use crate::joypad::Button;
use emu_core::logging::{log, LogCategory, LogLevel};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

pub const SCREEN_WIDTH: usize = 256;
pub const SCREEN_HEIGHT: usize = 240;

/// Presentation hint carried for the front end; the core never interprets it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScaleMode {
    #[default]
    Integer,
    Stretch,
    AspectCorrect,
}

pub trait DisplaySink: Send {
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    /// Back buffer of `width * height` packed 0xAARRGGBB pixels.
    fn buffer_mut(&mut self) -> &mut [u32];
    /// The back buffer holds a complete frame. `skip` marks frames the front end
    /// may drop without presenting.
    fn frame_ready(&mut self, skip: bool);
    fn scale_mode(&self) -> ScaleMode;
    fn set_scale_mode(&mut self, mode: ScaleMode);
    fn fps_overlay(&self) -> bool;
    fn set_fps_overlay(&mut self, enabled: bool);
}

pub trait AudioSink: Send {
    fn sample_rate(&self) -> u32;
    /// 1 for mono, 2 for interleaved stereo.
    fn channels(&self) -> u16;
    fn write_samples(&mut self, samples: &[i16]);
}

pub trait InputSource: Send {
    fn key_state(&self, pad: usize, button: Button) -> bool;
}

pub trait ErrorSink: Send + Sync {
    fn report(&self, level: LogLevel, message: &str);
}

#[derive(Debug)]
struct FrameSlots {
    front: Vec<u32>,
    ready: bool,
    frames: u64,
    skipped: u64,
}

/// Double buffer: the console renders into the back buffer it owns, `frame_ready`
/// publishes it by swapping under the lock.
#[derive(Debug, Clone)]
pub struct FrameBufferSink {
    back: Vec<u32>,
    shared: Arc<Mutex<FrameSlots>>,
    scale_mode: ScaleMode,
    fps_overlay: bool,
}

impl FrameBufferSink {
    pub fn new() -> Self {
        let len = SCREEN_WIDTH * SCREEN_HEIGHT;
        Self {
            back: vec![0xFF00_0000; len],
            shared: Arc::new(Mutex::new(FrameSlots {
                front: vec![0xFF00_0000; len],
                ready: false,
                frames: 0,
                skipped: 0,
            })),
            scale_mode: ScaleMode::default(),
            fps_overlay: false,
        }
    }

    /// The newest published frame, once. `None` until another frame arrives.
    pub fn take_frame(&self) -> Option<Vec<u32>> {
        let mut slots = self.shared.lock().ok()?;
        if !slots.ready {
            return None;
        }
        slots.ready = false;
        Some(slots.front.clone())
    }

    /// Frames published so far, and how many of them were marked skippable.
    pub fn frame_count(&self) -> (u64, u64) {
        self.shared
            .lock()
            .map(|s| (s.frames, s.skipped))
            .unwrap_or((0, 0))
    }
}

impl Default for FrameBufferSink {
    fn default() -> Self {
        Self::new()
    }
}

impl DisplaySink for FrameBufferSink {
    fn width(&self) -> usize {
        SCREEN_WIDTH
    }

    fn height(&self) -> usize {
        SCREEN_HEIGHT
    }

    fn buffer_mut(&mut self) -> &mut [u32] {
        &mut self.back
    }

    fn frame_ready(&mut self, skip: bool) {
        if let Ok(mut slots) = self.shared.lock() {
            slots.frames += 1;
            if skip {
                slots.skipped += 1;
                return;
            }
            std::mem::swap(&mut slots.front, &mut self.back);
            slots.ready = true;
        }
    }

    fn scale_mode(&self) -> ScaleMode {
        self.scale_mode
    }

    fn set_scale_mode(&mut self, mode: ScaleMode) {
        self.scale_mode = mode;
    }

    fn fps_overlay(&self) -> bool {
        self.fps_overlay
    }

    fn set_fps_overlay(&mut self, enabled: bool) {
        self.fps_overlay = enabled;
    }
}

#[derive(Debug)]
struct SampleQueue {
    samples: VecDeque<i16>,
    capacity: usize,
    dropped: u64,
}

/// Bounded sample queue shared between the console and an audio callback.
/// Samples that do not fit are dropped; the queue never grows.
#[derive(Debug, Clone)]
pub struct AudioRingSink {
    sample_rate: u32,
    channels: u16,
    queue: Arc<Mutex<SampleQueue>>,
}

impl AudioRingSink {
    pub fn new(sample_rate: u32, channels: u16, capacity: usize) -> Self {
        Self {
            sample_rate,
            channels,
            queue: Arc::new(Mutex::new(SampleQueue {
                samples: VecDeque::with_capacity(capacity),
                capacity,
                dropped: 0,
            })),
        }
    }

    /// Move up to `out.len()` queued samples into `out`; returns how many.
    pub fn read_samples(&self, out: &mut [i16]) -> usize {
        let Ok(mut queue) = self.queue.lock() else {
            return 0;
        };
        let n = out.len().min(queue.samples.len());
        for (slot, sample) in out.iter_mut().zip(queue.samples.drain(..n)) {
            *slot = sample;
        }
        n
    }

    pub fn len(&self) -> usize {
        self.queue.lock().map(|q| q.samples.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.queue.lock().map(|q| q.dropped).unwrap_or(0)
    }
}

impl AudioSink for AudioRingSink {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn write_samples(&mut self, samples: &[i16]) {
        if let Ok(mut queue) = self.queue.lock() {
            let room = queue.capacity - queue.samples.len();
            let take = samples.len().min(room);
            queue.samples.extend(&samples[..take]);
            queue.dropped += (samples.len() - take) as u64;
        }
    }
}

/// Button state for two pads, one bit per [`Button`], writable from any thread.
#[derive(Debug, Clone, Default)]
pub struct SharedInput {
    pads: Arc<[AtomicU8; 2]>,
}

impl SharedInput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_button(&self, pad: usize, button: Button, pressed: bool) {
        if let Some(bits) = self.pads.get(pad) {
            if pressed {
                bits.fetch_or(button.mask(), Ordering::Relaxed);
            } else {
                bits.fetch_and(!button.mask(), Ordering::Relaxed);
            }
        }
    }

    /// Replace a pad's whole state; bit order follows [`Button::ALL`].
    pub fn set_state(&self, pad: usize, bits: u8) {
        if let Some(slot) = self.pads.get(pad) {
            slot.store(bits, Ordering::Relaxed);
        }
    }

    pub fn state(&self, pad: usize) -> u8 {
        self.pads
            .get(pad)
            .map(|b| b.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl InputSource for SharedInput {
    fn key_state(&self, pad: usize, button: Button) -> bool {
        self.state(pad) & button.mask() != 0
    }
}

/// Input source with nothing pressed.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoInput;

impl InputSource for NoInput {
    fn key_state(&self, _pad: usize, _button: Button) -> bool {
        false
    }
}

/// Forwards reports to the System log category.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, level: LogLevel, message: &str) {
        log(LogCategory::System, level, || message.to_string());
    }
}

/// Keeps every report; for tests and for front ends that show a message list.
#[derive(Debug, Clone, Default)]
pub struct CollectingErrorSink {
    messages: Arc<Mutex<Vec<(LogLevel, String)>>>,
}

impl CollectingErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(LogLevel, String)> {
        self.messages.lock().map(|m| m.clone()).unwrap_or_default()
    }
}

impl ErrorSink for CollectingErrorSink {
    fn report(&self, level: LogLevel, message: &str) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push((level, message.to_string()));
        }
    }
}
